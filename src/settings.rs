use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheScope;
use crate::translator::RetryPolicy;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone)]
pub struct Settings {
    pub endpoint: String,
    pub model: String,
    pub backup_model: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: u32,
    pub retry: RetryPolicy,
    pub cache_enabled: bool,
    pub cache_path: Option<PathBuf>,
    pub cache_scope: CacheScope,
    pub chunk_size: usize,
    pub concurrency: usize,
    pub output_dir: PathBuf,
    pub progress_threshold: u8,
    pub progress_interval: Duration,
    pub progress_ttl: Duration,
    pub prompts: HashMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            backup_model: None,
            timeout_secs: 120,
            temperature: 0.3,
            max_tokens: 4000,
            retry: RetryPolicy::default(),
            cache_enabled: true,
            cache_path: None,
            cache_scope: CacheScope::Endpoint,
            chunk_size: 10,
            concurrency: 5,
            output_dir: PathBuf::from("translated"),
            progress_threshold: 2,
            progress_interval: Duration::from_millis(200),
            progress_ttl: Duration::from_secs(3600),
            prompts: HashMap::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    translator: Option<TranslatorSettings>,
    retry: Option<RetrySettings>,
    cache: Option<CacheSettings>,
    pipeline: Option<PipelineSettings>,
    progress: Option<ProgressSettings>,
    prompts: Option<HashMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
struct TranslatorSettings {
    endpoint: Option<String>,
    model: Option<String>,
    backup_model: Option<String>,
    timeout_secs: Option<u64>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct RetrySettings {
    max_attempts: Option<usize>,
    rate_limit_base_secs: Option<u64>,
    transient_delay_secs: Option<u64>,
    fallback_delay_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CacheSettings {
    enabled: Option<bool>,
    path: Option<String>,
    scope: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PipelineSettings {
    chunk_size: Option<usize>,
    concurrency: Option<usize>,
    output_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ProgressSettings {
    threshold_percent: Option<u8>,
    interval_ms: Option<u64>,
    ttl_secs: Option<u64>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    ensure_home_settings_file()?;

    let mut ordered_paths = Vec::new();
    ordered_paths.push(PathBuf::from("settings.toml"));
    ordered_paths.push(PathBuf::from("settings.local.toml"));

    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            settings
                .merge_toml(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
        }
    }

    Ok(settings)
}

/// Settings built from the embedded defaults only, ignoring every file on disk.
pub fn builtin_settings() -> Result<Settings> {
    let mut settings = Settings::default();
    settings.merge_toml(DEFAULT_SETTINGS_TOML)?;
    Ok(settings)
}

impl Settings {
    pub fn merge_toml(&mut self, content: &str) -> Result<()> {
        let parsed: SettingsFile = toml::from_str(content)?;
        self.merge(parsed)
    }

    /// Location of the sqlite cache when `[cache] path` is left empty.
    pub fn resolved_cache_path(&self) -> Option<PathBuf> {
        self.cache_path
            .clone()
            .or_else(|| home_dir().map(|home| home.join("cache.sqlite")))
    }

    fn merge(&mut self, incoming: SettingsFile) -> Result<()> {
        if let Some(translator) = incoming.translator {
            if let Some(endpoint) = non_empty(translator.endpoint) {
                self.endpoint = endpoint.trim_end_matches('/').to_string();
            }
            if let Some(model) = non_empty(translator.model) {
                self.model = model;
            }
            if let Some(backup) = translator.backup_model {
                self.backup_model = non_empty(Some(backup));
            }
            if let Some(secs) = translator.timeout_secs
                && secs > 0
            {
                self.timeout_secs = secs;
            }
            if let Some(temperature) = translator.temperature {
                self.temperature = temperature;
            }
            if let Some(max_tokens) = translator.max_tokens
                && max_tokens > 0
            {
                self.max_tokens = max_tokens;
            }
        }
        if let Some(retry) = incoming.retry {
            if let Some(attempts) = retry.max_attempts
                && attempts > 0
            {
                self.retry.max_attempts = attempts;
            }
            if let Some(secs) = retry.rate_limit_base_secs {
                self.retry.rate_limit_base = Duration::from_secs(secs);
            }
            if let Some(secs) = retry.transient_delay_secs {
                self.retry.transient_delay = Duration::from_secs(secs);
            }
            if let Some(secs) = retry.fallback_delay_secs {
                self.retry.fallback_delay = Duration::from_secs(secs);
            }
        }
        if let Some(cache) = incoming.cache {
            if let Some(enabled) = cache.enabled {
                self.cache_enabled = enabled;
            }
            if let Some(path) = non_empty(cache.path) {
                self.cache_path = Some(PathBuf::from(path));
            }
            if let Some(scope) = non_empty(cache.scope) {
                self.cache_scope = scope.parse()?;
            }
        }
        if let Some(pipeline) = incoming.pipeline {
            if let Some(size) = pipeline.chunk_size
                && size > 0
            {
                self.chunk_size = size;
            }
            if let Some(concurrency) = pipeline.concurrency
                && concurrency > 0
            {
                self.concurrency = concurrency;
            }
            if let Some(dir) = non_empty(pipeline.output_dir) {
                self.output_dir = PathBuf::from(dir);
            }
        }
        if let Some(progress) = incoming.progress {
            if let Some(threshold) = progress.threshold_percent {
                self.progress_threshold = threshold;
            }
            if let Some(ms) = progress.interval_ms {
                self.progress_interval = Duration::from_millis(ms);
            }
            if let Some(secs) = progress.ttl_secs
                && secs > 0
            {
                self.progress_ttl = Duration::from_secs(secs);
            }
        }
        if let Some(map) = incoming.prompts {
            for (key, value) in map {
                self.prompts.insert(key, value);
            }
        }
        Ok(())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = home_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".doc-translator-rust"))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_settings_match_documented_defaults() {
        let settings = builtin_settings().expect("settings");
        assert_eq!(settings.model, "gpt-4o-mini");
        assert_eq!(settings.backup_model, None);
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.retry.rate_limit_base, Duration::from_secs(5));
        assert_eq!(settings.chunk_size, 10);
        assert_eq!(settings.progress_threshold, 2);
        assert_eq!(settings.progress_interval, Duration::from_millis(200));
        assert_eq!(settings.cache_scope, CacheScope::Endpoint);
        assert!(settings.prompts.contains_key("legal"));
    }

    #[test]
    fn later_layers_override_earlier_ones() {
        let mut settings = builtin_settings().expect("settings");
        settings
            .merge_toml(
                r#"
[translator]
endpoint = "http://localhost:8080/v1/"
backup_model = "gpt-4o"

[cache]
scope = "credential"

[pipeline]
chunk_size = 0

[prompts]
legal = "custom"
"#,
            )
            .expect("merge");
        assert_eq!(settings.endpoint, "http://localhost:8080/v1");
        assert_eq!(settings.backup_model.as_deref(), Some("gpt-4o"));
        assert_eq!(settings.cache_scope, CacheScope::Credential);
        assert_eq!(settings.chunk_size, 10);
        assert_eq!(settings.prompts.get("legal").map(String::as_str), Some("custom"));
    }

    #[test]
    fn unknown_cache_scope_is_rejected() {
        let mut settings = Settings::default();
        let err = settings
            .merge_toml("[cache]\nscope = \"tenant\"\n")
            .expect_err("invalid scope");
        assert!(err.to_string().contains("tenant"));
    }
}
