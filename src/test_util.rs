use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::providers::{CompletionRequest, Provider, ProviderError, ProviderFuture, ProviderResponse};

type Respond = dyn Fn(&CompletionRequest) -> Result<String, ProviderError> + Send + Sync;
type Delay = dyn Fn(&CompletionRequest) -> Duration + Send + Sync;

/// Scripted provider that records every request and tracks peak concurrency.
#[derive(Clone)]
pub(crate) struct StubProvider {
    respond: Arc<Respond>,
    delay: Arc<Delay>,
    calls: Arc<Mutex<Vec<CompletionRequest>>>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl StubProvider {
    pub(crate) fn new(
        respond: impl Fn(&CompletionRequest) -> Result<String, ProviderError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            respond: Arc::new(respond),
            delay: Arc::new(|_| Duration::ZERO),
            calls: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn echo(suffix: &'static str) -> Self {
        Self::new(move |request| Ok(format!("{}{}", request.user, suffix)))
    }

    pub(crate) fn with_delay(
        mut self,
        delay: impl Fn(&CompletionRequest) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.delay = Arc::new(delay);
        self
    }

    pub(crate) fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }

    pub(crate) fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Provider for StubProvider {
    fn complete(&self, request: CompletionRequest) -> ProviderFuture {
        let stub = self.clone();
        Box::pin(async move {
            let now = stub.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            stub.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep((stub.delay)(&request)).await;
            let result = (stub.respond)(&request);
            stub.calls.lock().expect("calls lock").push(request.clone());
            stub.in_flight.fetch_sub(1, Ordering::SeqCst);
            result.map(|content| ProviderResponse {
                content,
                model: Some(request.model),
                usage: None,
            })
        })
    }

    fn endpoint(&self) -> &str {
        "https://stub.invalid/v1"
    }

    fn credential(&self) -> &str {
        "stub-key"
    }
}
