use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

pub mod adapters;
pub mod cache;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod progress;
pub mod prompts;
pub mod providers;
pub mod segment;
pub mod settings;
#[cfg(test)]
mod test_util;
pub mod translator;

pub use adapters::{AdapterRegistry, FormatAdapter};
pub use engine::Engine;
pub use error::PipelineError;
pub use jobs::{Job, JobStatus, JobStore, MemoryJobStore};
pub use progress::{MemoryProgressStore, ProgressSnapshot, ProgressStore};
pub use providers::{OpenAI, Provider, ProviderError};
pub use segment::{DisplayMode, FileKind, Segment, SegmentKind};
pub use translator::{ClientConfig, TranslationClient};

#[derive(Debug, Clone)]
pub struct Config {
    pub file: PathBuf,
    pub lang: String,
    pub model: Option<String>,
    pub backup_model: Option<String>,
    pub key: Option<String>,
    pub display_mode: DisplayMode,
    pub concurrency: Option<usize>,
    pub output_dir: Option<PathBuf>,
    pub domain: Option<String>,
    pub source_lang: String,
    pub no_cache: bool,
    pub preview: bool,
    pub max_chars: usize,
    pub compare: Option<PathBuf>,
    pub settings_path: Option<String>,
}

/// Runs one CLI request and returns what should be printed.
pub async fn run(config: Config) -> Result<String> {
    let settings_path = config.settings_path.as_deref().map(Path::new);
    let mut settings = settings::load_settings(settings_path)?;
    if let Some(dir) = &config.output_dir {
        settings.output_dir = dir.clone();
    }
    let file_type = file_type(&config.file);

    if config.preview || config.compare.is_some() {
        let engine = build_engine(settings, OpenAI::new(String::new()));
        return preview(&engine, &config, &file_type);
    }

    let key = providers::resolve_key(config.key.as_deref())?;
    let endpoint = providers::get_env("OPENAI_BASE_URL").unwrap_or_else(|| settings.endpoint.clone());
    let provider = OpenAI::new(key)
        .with_base_url(endpoint)
        .with_timeout(Duration::from_secs(settings.timeout_secs))
        .with_context(|| "failed to build HTTP client")?;

    let cache = if settings.cache_enabled && !config.no_cache {
        open_cache(&settings)
    } else {
        None
    };
    let poll_interval = settings.progress_interval.max(Duration::from_millis(200));
    let concurrency = config.concurrency.unwrap_or(settings.concurrency);
    let model = config.model.clone().unwrap_or_else(|| settings.model.clone());
    let jobs = Arc::new(MemoryJobStore::new());
    let mut engine = Engine::new(
        settings.clone(),
        AdapterRegistry::standard(),
        provider,
        jobs.clone(),
        Arc::new(MemoryProgressStore::new(settings.progress_ttl)),
    );
    if let Some(cache) = cache {
        engine = engine.with_cache(cache);
    }

    let mut job = Job::new(job_id(&config.file), &config.file, &config.lang, model)
        .with_concurrency(concurrency);
    job.file_type = file_type;
    job.source_lang = config.source_lang.clone();
    job.backup_model = config.backup_model.clone().filter(|model| !model.trim().is_empty());
    job.display_mode = config.display_mode;
    job.domain = config.domain.clone().filter(|domain| !domain.trim().is_empty());
    let id = job.id.clone();
    jobs.insert(job)?;

    let handle = engine.start_job(&id);
    let mut last_percent = None;
    while !handle.is_finished() {
        if let Ok(snapshot) = engine.get_progress(&id)
            && last_percent != Some(snapshot.progress_percent)
        {
            info!(
                "progress {}% ({}/{})",
                snapshot.progress_percent, snapshot.translated_segments, snapshot.total_segments
            );
            last_percent = Some(snapshot.progress_percent);
        }
        tokio::time::sleep(poll_interval).await;
    }
    let result = handle
        .await
        .map_err(|err| anyhow!("translation task failed: {}", err))??;
    Ok(result.display().to_string())
}

fn build_engine<P: Provider>(settings: settings::Settings, provider: P) -> Engine<P> {
    let ttl = settings.progress_ttl;
    Engine::new(
        settings,
        AdapterRegistry::standard(),
        provider,
        Arc::new(MemoryJobStore::new()),
        Arc::new(MemoryProgressStore::new(ttl)),
    )
}

fn preview<P: Provider>(engine: &Engine<P>, config: &Config, file_type: &str) -> Result<String> {
    let output = match &config.compare {
        Some(result) => serde_json::to_string_pretty(&engine.extract_parallel_preview(
            &config.file,
            result,
            file_type,
            config.max_chars,
        )?)?,
        None => serde_json::to_string_pretty(&engine.extract_preview(
            &config.file,
            file_type,
            config.max_chars,
        )?)?,
    };
    Ok(output)
}

fn open_cache(settings: &settings::Settings) -> Option<Arc<dyn cache::CacheStore>> {
    let path = settings.resolved_cache_path()?;
    match cache::SqliteCache::open(&path) {
        Ok(cache) => Some(Arc::new(cache)),
        Err(err) => {
            warn!("translation cache disabled: {:#}", err);
            None
        }
    }
}

fn file_type(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_lowercase()
}

fn job_id(path: &Path) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    let digest = format!("{:x}", md5::compute(format!("{}:{}", path.display(), nanos)));
    format!("local-{}", &digest[..8])
}
