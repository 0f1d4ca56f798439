use futures_util::StreamExt;
use futures_util::stream;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::cache::{CacheScope, CacheStore, TranslationUnit, fingerprint};
use crate::prompts::{PromptSource, render_system_prompt};
use crate::providers::retry::rate_limit_delay;
use crate::providers::{CompletionRequest, Provider, ProviderError};
use crate::settings::Settings;

pub const MAX_CONCURRENCY: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub rate_limit_base: Duration,
    pub transient_delay: Duration,
    pub fallback_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            rate_limit_base: Duration::from_secs(5),
            transient_delay: Duration::from_secs(5),
            fallback_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Same attempt budget with no waiting between attempts.
    pub fn immediate() -> Self {
        Self {
            max_attempts: 3,
            rate_limit_base: Duration::ZERO,
            transient_delay: Duration::ZERO,
            fallback_delay: Duration::ZERO,
        }
    }

    fn delay_for(&self, err: &ProviderError, attempt: usize) -> Duration {
        match err {
            ProviderError::RateLimited { retry_after } => {
                rate_limit_delay(self.rate_limit_base, attempt, *retry_after)
            }
            _ => self.transient_delay,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub model: String,
    pub backup_model: Option<String>,
    pub source_lang: String,
    pub domain: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub retry: RetryPolicy,
    pub cache_scope: CacheScope,
}

impl ClientConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            backup_model: None,
            source_lang: "auto".to_string(),
            domain: None,
            temperature: 0.3,
            max_tokens: 4000,
            retry: RetryPolicy::default(),
            cache_scope: CacheScope::Endpoint,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            model: settings.model.clone(),
            backup_model: settings.backup_model.clone(),
            source_lang: "auto".to_string(),
            domain: None,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            retry: settings.retry.clone(),
            cache_scope: settings.cache_scope,
        }
    }

    pub fn with_backup_model(mut self, backup_model: Option<String>) -> Self {
        self.backup_model = backup_model.filter(|model| !model.trim().is_empty());
        self
    }

    fn backup(&self) -> Option<&str> {
        self.backup_model
            .as_deref()
            .filter(|backup| !backup.trim().is_empty() && *backup != self.model)
    }
}

/// Counters for one client's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClientStats {
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub fallbacks: usize,
    pub degraded: usize,
}

#[derive(Debug, Default)]
struct Counters {
    cache_hits: AtomicUsize,
    cache_misses: AtomicUsize,
    fallbacks: AtomicUsize,
    degraded: AtomicUsize,
}

struct DomainPrompt {
    domain: Option<String>,
    prompt: Option<String>,
}

/// Turns source strings into translated strings through a [`Provider`].
pub struct TranslationClient<P: Provider> {
    provider: P,
    config: ClientConfig,
    cache: Option<Arc<dyn CacheStore>>,
    prompts: Arc<dyn PromptSource>,
    active_model: Mutex<String>,
    domain: Mutex<Option<String>>,
    domain_prompt: tokio::sync::Mutex<Option<DomainPrompt>>,
    counters: Counters,
}

impl<P: Provider> TranslationClient<P> {
    pub fn new(
        provider: P,
        config: ClientConfig,
        cache: Option<Arc<dyn CacheStore>>,
        prompts: Arc<dyn PromptSource>,
    ) -> Self {
        let active_model = Mutex::new(config.model.clone());
        let domain = Mutex::new(config.domain.clone());
        Self {
            provider,
            config,
            cache,
            prompts,
            active_model,
            domain,
            domain_prompt: tokio::sync::Mutex::new(None),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The model the next request goes to.
    pub fn active_model(&self) -> String {
        self.active_model
            .lock()
            .map(|model| model.clone())
            .unwrap_or_else(|_| self.config.model.clone())
    }

    fn set_active_model(&self, model: &str) {
        if let Ok(mut active) = self.active_model.lock() {
            *active = model.to_string();
        }
    }

    /// Changes the domain; the cached domain prompt is resolved again on next use.
    pub fn set_domain(&self, domain: Option<String>) {
        if let Ok(mut current) = self.domain.lock() {
            *current = domain.filter(|domain| !domain.trim().is_empty());
        }
    }

    fn current_domain(&self) -> Option<String> {
        self.domain.lock().ok().and_then(|domain| domain.clone())
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.counters.cache_misses.load(Ordering::Relaxed),
            fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
            degraded: self.counters.degraded.load(Ordering::Relaxed),
        }
    }

    pub fn fingerprint(&self, text: &str, target_lang: &str) -> String {
        fingerprint(
            &TranslationUnit {
                text,
                target_lang,
                model: &self.config.model,
                backup_model: self.config.backup_model.as_deref().unwrap_or_default(),
                endpoint: self.provider.endpoint(),
                credential: self.provider.credential(),
            },
            self.config.cache_scope,
        )
    }

    /// Translates one string. Never fails: exhausted attempts yield `text` itself.
    pub async fn translate_text(&self, text: &str, target_lang: &str) -> String {
        if text.trim().is_empty() {
            return text.to_string();
        }

        let key = self.fingerprint(text, target_lang);
        if let Some(hit) = self.cache_get(&key) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            debug!("cache hit for {}", key);
            return hit;
        }
        self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);

        let system = match self.system_prompt(target_lang).await {
            Ok(system) => system,
            Err(err) => {
                warn!("failed to build system prompt: {:#}", err);
                return self.degrade(text);
            }
        };

        match self.translate_with_retry(text, &system).await {
            Some(translated) => {
                self.cache_put(&key, &translated);
                translated
            }
            None => self.degrade(text),
        }
    }

    pub async fn translate_batch(
        &self,
        texts: &[String],
        target_lang: &str,
        max_concurrency: usize,
    ) -> Vec<String> {
        self.translate_batch_with_progress(texts, target_lang, max_concurrency, &|_| {})
            .await
    }

    /// Fans out with at most `max_concurrency` requests in flight and returns
    /// results in input order. `on_progress` receives the running count of
    /// finished units.
    pub async fn translate_batch_with_progress(
        &self,
        texts: &[String],
        target_lang: &str,
        max_concurrency: usize,
        on_progress: &(dyn Fn(usize) + Sync),
    ) -> Vec<String> {
        let concurrency = max_concurrency.clamp(1, MAX_CONCURRENCY);
        let finished = AtomicUsize::new(0);
        let mut results: Vec<Option<String>> = vec![None; texts.len()];

        let finished = &finished;
        let units: Vec<_> = texts
            .iter()
            .enumerate()
            .map(|(index, text)| async move {
                let translated = self.translate_text(text, target_lang).await;
                on_progress(finished.fetch_add(1, Ordering::SeqCst) + 1);
                (index, translated)
            })
            .collect();
        let mut pending = stream::iter(units).buffer_unordered(concurrency);
        while let Some((index, translated)) = pending.next().await {
            results[index] = Some(translated);
        }

        results
            .into_iter()
            .zip(texts)
            .map(|(translated, source)| translated.unwrap_or_else(|| source.clone()))
            .collect()
    }

    async fn translate_with_retry(&self, text: &str, system: &str) -> Option<String> {
        let attempts = self.config.retry.max_attempts.max(1);
        let mut backup_tried = false;

        for attempt in 1..=attempts {
            let err = match self.request(&self.config.model, system, text).await {
                Ok(translated) => return Some(translated),
                Err(err) => err,
            };
            warn!(
                "translation attempt {}/{} with {} failed: {}",
                attempt, attempts, self.config.model, err
            );

            if err.is_fallback_trigger()
                && !backup_tried
                && let Some(backup) = self.config.backup()
            {
                backup_tried = true;
                if let Some(translated) = self.try_backup(backup, system, text).await {
                    return Some(translated);
                }
            }

            if !err.is_retryable() && !err.is_fallback_trigger() {
                break;
            }
            if attempt < attempts {
                sleep(self.config.retry.delay_for(&err, attempt)).await;
            }
        }
        None
    }

    async fn try_backup(&self, backup: &str, system: &str, text: &str) -> Option<String> {
        self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
        warn!("switching to backup model {}", backup);
        self.set_active_model(backup);
        sleep(self.config.retry.fallback_delay).await;
        let result = self.request(backup, system, text).await;
        self.set_active_model(&self.config.model);
        match result {
            Ok(translated) => Some(translated),
            Err(err) => {
                warn!("backup model {} failed: {}", backup, err);
                None
            }
        }
    }

    async fn request(&self, model: &str, system: &str, text: &str) -> Result<String, ProviderError> {
        let response = self
            .provider
            .complete(CompletionRequest {
                model: model.to_string(),
                system: system.to_string(),
                user: text.to_string(),
                temperature: self.config.temperature,
                max_tokens: self.config.max_tokens,
            })
            .await?;
        let translated = strip_reasoning(&response.content);
        if translated.is_empty() {
            return Err(ProviderError::InvalidResponse(
                "completion was empty after removing reasoning".to_string(),
            ));
        }
        Ok(translated)
    }

    async fn system_prompt(&self, target_lang: &str) -> anyhow::Result<String> {
        let domain = self.current_domain();
        let mut cached = self.domain_prompt.lock().await;
        let stale = cached.as_ref().is_none_or(|entry| entry.domain != domain);
        if stale {
            let prompt = match domain.as_deref() {
                Some(name) => self.prompts.resolve(name).unwrap_or_else(|err| {
                    warn!("failed to resolve prompt for domain {}: {:#}", name, err);
                    None
                }),
                None => None,
            };
            *cached = Some(DomainPrompt {
                domain: domain.clone(),
                prompt,
            });
        }
        let prompt = cached.as_ref().and_then(|entry| entry.prompt.as_deref());
        render_system_prompt(&self.config.source_lang, target_lang, prompt)
    }

    fn degrade(&self, text: &str) -> String {
        self.counters.degraded.fetch_add(1, Ordering::Relaxed);
        let preview: String = text.chars().take(30).collect();
        warn!("translation failed, keeping source text: {}", preview);
        text.to_string()
    }

    fn cache_get(&self, key: &str) -> Option<String> {
        let cache = self.cache.as_ref()?;
        match cache.get(key) {
            Ok(hit) => hit,
            Err(err) => {
                warn!("cache read failed: {:#}", err);
                None
            }
        }
    }

    fn cache_put(&self, key: &str, translated: &str) {
        if let Some(cache) = self.cache.as_ref()
            && let Err(err) = cache.put(key, translated)
        {
            warn!("cache write failed: {:#}", err);
        }
    }
}

/// Removes every `<think>...</think>` block and trims the remainder.
pub fn strip_reasoning(content: &str) -> String {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";
    let mut out = String::with_capacity(content.len());
    let mut rest = content;
    while let Some(start) = rest.find(OPEN) {
        let after_open = &rest[start + OPEN.len()..];
        let Some(end) = after_open.find(CLOSE) else {
            break;
        };
        out.push_str(&rest[..start]);
        rest = &after_open[end + CLOSE.len()..];
    }
    out.push_str(rest);
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::prompts::SettingsPrompts;
    use crate::test_util::StubProvider;
    use std::collections::HashMap;

    fn client(provider: StubProvider, config: ClientConfig) -> TranslationClient<StubProvider> {
        TranslationClient::new(
            provider,
            ClientConfig {
                retry: RetryPolicy::immediate(),
                ..config
            },
            Some(Arc::new(MemoryCache::new())),
            Arc::new(SettingsPrompts::default()),
        )
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[tokio::test]
    async fn batch_keeps_input_order_under_bounded_concurrency() {
        let provider = StubProvider::echo("_T").with_delay(|request| match request.user.as_str() {
            "x" => Duration::from_millis(40),
            "y" => Duration::from_millis(5),
            "z" => Duration::from_millis(25),
            _ => Duration::from_millis(1),
        });
        let client = client(provider.clone(), ClientConfig::new("primary"));

        let out = client
            .translate_batch(&strings(&["x", "y", "z", "w", "v"]), "zh", 2)
            .await;

        assert_eq!(out, strings(&["x_T", "y_T", "z_T", "w_T", "v_T"]));
        assert!(provider.peak_in_flight() <= 2);
        assert_eq!(provider.call_count(), 5);
    }

    #[tokio::test]
    async fn cached_translation_skips_the_provider() {
        let provider = StubProvider::echo("_T");
        let cache = Arc::new(MemoryCache::new());
        let client = TranslationClient::new(
            provider.clone(),
            ClientConfig::new("primary"),
            Some(cache.clone()),
            Arc::new(SettingsPrompts::default()),
        );
        cache
            .put(&client.fingerprint("Hi", "en"), "Hola")
            .expect("seed cache");

        assert_eq!(client.translate_text("Hi", "en").await, "Hola");
        assert_eq!(provider.call_count(), 0);
        assert_eq!(client.stats().cache_hits, 1);
    }

    #[tokio::test]
    async fn second_identical_request_is_served_from_cache() {
        let provider = StubProvider::echo("_T");
        let client = client(provider.clone(), ClientConfig::new("primary"));
        assert_eq!(client.translate_text("Hello", "fr").await, "Hello_T");
        assert_eq!(client.translate_text("Hello", "fr").await, "Hello_T");
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn rate_limited_primary_falls_back_and_reverts() {
        let provider = StubProvider::new(|request| {
            if request.model == "primary" {
                Err(ProviderError::RateLimited { retry_after: None })
            } else {
                Ok(format!("{}@{}", request.user, request.model))
            }
        });
        let client = client(
            provider.clone(),
            ClientConfig::new("primary").with_backup_model(Some("backup".to_string())),
        );

        assert_eq!(client.translate_text("Hello", "zh").await, "Hello@backup");
        assert_eq!(client.active_model(), "primary");
        let models: Vec<String> = provider.calls().into_iter().map(|call| call.model).collect();
        assert_eq!(models, vec!["primary", "backup"]);
        assert_eq!(client.stats().fallbacks, 1);
    }

    #[tokio::test]
    async fn exhausted_attempts_return_the_source_text() {
        let provider = StubProvider::new(|_| Err(ProviderError::Transient("down".to_string())));
        let client = client(
            provider.clone(),
            ClientConfig::new("primary").with_backup_model(Some("backup".to_string())),
        );

        let out = client.translate_batch(&strings(&["a", "b"]), "de", 2).await;
        assert_eq!(out, strings(&["a", "b"]));
        // transient errors never engage the backup
        assert_eq!(provider.call_count(), 6);
        assert_eq!(client.stats().degraded, 2);
        assert_eq!(client.stats().fallbacks, 0);
    }

    #[tokio::test]
    async fn failed_backup_is_tried_once_per_unit() {
        let provider = StubProvider::new(|_| Err(ProviderError::Auth("revoked".to_string())));
        let client = client(
            provider.clone(),
            ClientConfig::new("primary").with_backup_model(Some("backup".to_string())),
        );

        assert_eq!(client.translate_text("Hello", "ja").await, "Hello");
        let models: Vec<String> = provider.calls().into_iter().map(|call| call.model).collect();
        assert_eq!(models, vec!["primary", "backup", "primary", "primary"]);
        assert_eq!(client.active_model(), "primary");
    }

    #[tokio::test]
    async fn blank_input_short_circuits() {
        let provider = StubProvider::echo("_T");
        let client = client(provider.clone(), ClientConfig::new("primary"));
        assert_eq!(client.translate_text("  \n", "zh").await, "  \n");
        assert_eq!(provider.call_count(), 0);
        assert_eq!(client.stats(), ClientStats::default());
    }

    #[tokio::test]
    async fn domain_prompt_follows_set_domain() {
        let provider = StubProvider::echo("");
        let prompts = SettingsPrompts::new(HashMap::from([
            ("legal".to_string(), "Keep citations.".to_string()),
            ("medical".to_string(), "Keep dosages.".to_string()),
        ]));
        let client = TranslationClient::new(
            provider.clone(),
            ClientConfig {
                domain: Some("legal".to_string()),
                ..ClientConfig::new("primary")
            },
            None,
            Arc::new(prompts),
        );

        client.translate_text("one", "en").await;
        client.set_domain(Some("medical".to_string()));
        client.translate_text("two", "en").await;

        let systems: Vec<String> = provider.calls().into_iter().map(|call| call.system).collect();
        assert!(systems[0].ends_with("Domain guidance: Keep citations."));
        assert!(systems[1].ends_with("Domain guidance: Keep dosages."));
    }

    #[tokio::test]
    async fn progress_counts_every_unit() {
        let client = client(StubProvider::echo("_T"), ClientConfig::new("primary"));
        let seen = Mutex::new(Vec::new());
        client
            .translate_batch_with_progress(&strings(&["a", "", "c"]), "zh", 3, &|done| {
                seen.lock().expect("lock").push(done);
            })
            .await;
        let mut seen = seen.into_inner().expect("into inner");
        seen.sort();
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn client_errors_stop_retrying_early() {
        let provider = StubProvider::new(|_| {
            Err(ProviderError::Api {
                status: 400,
                message: "bad request".to_string(),
            })
        });
        let client = client(
            provider.clone(),
            ClientConfig::new("primary").with_backup_model(Some("backup".to_string())),
        );

        assert_eq!(client.translate_text("Hello", "zh").await, "Hello");
        assert_eq!(provider.call_count(), 1);
        assert_eq!(client.stats().degraded, 1);
    }

    #[tokio::test]
    async fn reasoning_only_reply_is_retried_and_not_cached() {
        let provider = StubProvider::new(|_| Ok("<think>no answer</think>".to_string()));
        let cache = Arc::new(MemoryCache::new());
        let client = TranslationClient::new(
            provider.clone(),
            ClientConfig {
                retry: RetryPolicy::immediate(),
                ..ClientConfig::new("primary")
            },
            Some(cache.clone()),
            Arc::new(SettingsPrompts::default()),
        );

        assert_eq!(client.translate_text("Hello", "zh").await, "Hello");
        assert_eq!(provider.call_count(), 3);
        assert!(cache.is_empty());
    }

    #[test]
    fn reasoning_blocks_are_removed() {
        assert_eq!(
            strip_reasoning("<think>plan\nsteps</think>\n你好 <think>again</think>世界\n"),
            "你好 世界"
        );
        assert_eq!(strip_reasoning("  plain  "), "plain");
        assert_eq!(strip_reasoning("<think>unterminated"), "<think>unterminated");
    }

    #[test]
    fn rate_limit_backoff_grows_while_other_errors_wait_flat() {
        let policy = RetryPolicy::default();
        let limited = ProviderError::RateLimited { retry_after: None };
        let delays: Vec<u64> = (1..=3)
            .map(|attempt| policy.delay_for(&limited, attempt).as_secs())
            .collect();
        assert_eq!(delays, vec![5, 10, 20]);
        let transient = ProviderError::Transient("reset".to_string());
        assert_eq!(policy.delay_for(&transient, 3), Duration::from_secs(5));
    }
}
