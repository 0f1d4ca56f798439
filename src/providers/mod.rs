use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

mod openai;
pub(crate) mod retry;

pub use openai::OpenAI;

/// One chat completion: a system prompt and a single user message.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderResponse {
    pub content: String,
    pub model: Option<String>,
    pub usage: Option<ProviderUsage>,
}

/// Classified completion failures. The translator decides retry and fallback
/// behaviour from the variant alone.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Errors that make the backup model worth a try.
    pub fn is_fallback_trigger(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. }
                | ProviderError::Auth(_)
                | ProviderError::PermissionDenied(_)
        )
    }

    /// Errors worth another attempt on the same model, empty completions included.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. }
                | ProviderError::Transient(_)
                | ProviderError::InvalidResponse(_)
        )
    }
}

pub type ProviderFuture =
    Pin<Box<dyn Future<Output = Result<ProviderResponse, ProviderError>> + Send>>;

pub trait Provider: Clone + Send + Sync + 'static {
    /// Issues a single request. Retries are the caller's concern.
    fn complete(&self, request: CompletionRequest) -> ProviderFuture;

    /// Base URL used in cache fingerprints.
    fn endpoint(&self) -> &str;

    /// Account credential, mixed into fingerprints only under credential scope.
    fn credential(&self) -> &str;
}

pub fn resolve_key(override_key: Option<&str>) -> anyhow::Result<String> {
    if let Some(key) = override_key.filter(|key| !key.trim().is_empty()) {
        return Ok(key.to_string());
    }
    get_env("OPENAI_API_KEY").ok_or_else(|| anyhow::anyhow!("API key not found (set OPENAI_API_KEY or pass --key)"))
}

pub(crate) fn get_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}
