use anyhow::anyhow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::adapters::AdapterRegistry;
use crate::cache::CacheStore;
use crate::error::PipelineError;
use crate::jobs::{Job, JobStore};
use crate::progress::{ProgressReporter, ProgressSnapshot, ProgressStore, publish};
use crate::prompts::{PromptSource, SettingsPrompts};
use crate::providers::Provider;
use crate::segment::{FileKind, ParallelPreview, Preview};
use crate::settings::Settings;
use crate::translator::{ClientConfig, TranslationClient};

/// Runs translation jobs: extract, translate in chunks, reinject.
pub struct Engine<P: Provider> {
    registry: Arc<AdapterRegistry>,
    provider: P,
    cache: Option<Arc<dyn CacheStore>>,
    jobs: Arc<dyn JobStore>,
    progress: Arc<dyn ProgressStore>,
    prompts: Arc<dyn PromptSource>,
    settings: Arc<Settings>,
}

impl<P: Provider> Clone for Engine<P> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            provider: self.provider.clone(),
            cache: self.cache.clone(),
            jobs: self.jobs.clone(),
            progress: self.progress.clone(),
            prompts: self.prompts.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<P: Provider> Engine<P> {
    pub fn new(
        settings: Settings,
        registry: AdapterRegistry,
        provider: P,
        jobs: Arc<dyn JobStore>,
        progress: Arc<dyn ProgressStore>,
    ) -> Self {
        let prompts = Arc::new(SettingsPrompts::new(settings.prompts.clone()));
        Self {
            registry: Arc::new(registry),
            provider,
            cache: None,
            jobs,
            progress,
            prompts,
            settings: Arc::new(settings),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_prompts(mut self, prompts: Arc<dyn PromptSource>) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Schedules the job in the background and returns immediately.
    pub fn start_job(&self, job_id: &str) -> JoinHandle<Result<PathBuf, PipelineError>> {
        let engine = self.clone();
        let job_id = job_id.to_string();
        tokio::spawn(async move { engine.run_job(&job_id).await })
    }

    pub async fn run_job(&self, job_id: &str) -> Result<PathBuf, PipelineError> {
        let job = self.jobs.load(job_id)?;
        self.jobs.mark_started(&job.id)?;
        self.publish_job(&job.id);
        info!("job {} started: {} -> {}", job.id, job.source_file_path.display(), job.target_lang);
        match self.execute(&job).await {
            Ok(result) => {
                self.jobs.mark_completed(&job.id, &result)?;
                self.publish_job(&job.id);
                info!("job {} completed: {}", job.id, result.display());
                Ok(result)
            }
            Err(err) => {
                let message = err.to_string();
                error!("job {} failed: {}", job.id, message);
                if let Err(mark_err) = self.jobs.mark_failed(&job.id, &message) {
                    warn!("failed to mark job {} as failed: {}", job.id, mark_err);
                }
                self.publish_job(&job.id);
                Err(err)
            }
        }
    }

    /// Reads the ephemeral store first and falls back to the job record.
    pub fn get_progress(&self, job_id: &str) -> Result<ProgressSnapshot, PipelineError> {
        match self.progress.get(job_id) {
            Ok(Some(snapshot)) => return Ok(snapshot),
            Ok(None) => {}
            Err(err) => warn!("progress store read failed for job {}: {:#}", job_id, err),
        }
        let job = self.jobs.load(job_id)?;
        Ok(ProgressSnapshot::from_job(&job))
    }

    pub fn extract_preview(
        &self,
        path: &Path,
        file_type: &str,
        max_chars: usize,
    ) -> Result<Preview, PipelineError> {
        let adapter = self.registry.resolve(file_type)?;
        ensure_exists(path)?;
        adapter.extract_preview(path, max_chars)
    }

    /// Source and translated previews side by side. The result adapter follows
    /// the result file's extension, which differs from the source for PDFs.
    pub fn extract_parallel_preview(
        &self,
        source_path: &Path,
        result_path: &Path,
        file_type: &str,
        max_chars: usize,
    ) -> Result<ParallelPreview, PipelineError> {
        let source = self.extract_preview(source_path, file_type, max_chars)?;
        let result_kind = FileKind::from_path(result_path)?;
        let translated = self.extract_preview(result_path, result_kind.as_str(), max_chars)?;
        Ok(ParallelPreview {
            source_content: source.content,
            translated_content: translated.content,
            source_total_chars: source.total_chars,
            translated_total_chars: translated.total_chars,
            truncated: source.truncated || translated.truncated,
        })
    }

    async fn execute(&self, job: &Job) -> Result<PathBuf, PipelineError> {
        let adapter = self.registry.resolve(&job.file_type)?;
        ensure_exists(&job.source_file_path)?;

        let segments = {
            let adapter = adapter.clone();
            let path = job.source_file_path.clone();
            blocking(move || adapter.extract(&path)).await?
        };
        let total = segments.len();
        self.jobs.set_total(&job.id, total)?;
        self.publish_job(&job.id);
        info!("job {}: {} segments to translate", job.id, total);

        let client = TranslationClient::new(
            self.provider.clone(),
            self.client_config(job),
            self.cache.clone(),
            self.prompts.clone(),
        );
        let reporter = ProgressReporter::new(job.id.clone(), total, self.jobs.clone(), self.progress.clone())
            .with_throttle(self.settings.progress_threshold, self.settings.progress_interval);

        let texts: Vec<String> = segments.into_iter().map(|segment| segment.text).collect();
        let mut translations = Vec::with_capacity(total);
        for chunk in texts.chunks(self.settings.chunk_size.max(1)) {
            let base = translations.len();
            let translated = client
                .translate_batch_with_progress(chunk, &job.target_lang, job.concurrency, &|done| {
                    reporter.report(base + done);
                })
                .await;
            translations.extend(translated);
        }
        let stats = client.stats();
        info!(
            "job {}: cache hits {}, misses {}, fallbacks {}, untranslated {}",
            job.id, stats.cache_hits, stats.cache_misses, stats.fallbacks, stats.degraded
        );

        let source = job.source_file_path.clone();
        let output_dir = self.settings.output_dir.clone();
        let mode = job.display_mode;
        blocking(move || adapter.reinject(&source, &translations, mode, &output_dir)).await
    }

    fn client_config(&self, job: &Job) -> ClientConfig {
        let mut config = ClientConfig::from_settings(&self.settings);
        if !job.model.trim().is_empty() {
            config.model = job.model.clone();
        }
        config.source_lang = job.source_lang.clone();
        config.domain = job.domain.clone();
        let backup = job.backup_model.clone().or(config.backup_model.take());
        config.with_backup_model(backup)
    }

    fn publish_job(&self, job_id: &str) {
        match self.jobs.load(job_id) {
            Ok(job) => publish(self.progress.as_ref(), ProgressSnapshot::from_job(&job)),
            Err(err) => warn!("failed to load job {} for progress: {}", job_id, err),
        }
    }
}

fn ensure_exists(path: &Path) -> Result<(), PipelineError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(PipelineError::unreadable(path, "file not found"))
    }
}

async fn blocking<T, F>(work: F) -> Result<T, PipelineError>
where
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| PipelineError::Other(anyhow!("document task panicked: {}", err)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobStatus, MemoryJobStore};
    use crate::progress::MemoryProgressStore;
    use crate::providers::ProviderError;
    use crate::segment::DisplayMode;
    use crate::test_util::StubProvider;
    use crate::translator::RetryPolicy;
    use std::fs;
    use std::time::Duration;

    struct Fixture {
        engine: Engine<StubProvider>,
        jobs: Arc<MemoryJobStore>,
        dir: tempfile::TempDir,
    }

    fn fixture(provider: StubProvider) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = Settings {
            output_dir: dir.path().join("out"),
            chunk_size: 2,
            retry: RetryPolicy::immediate(),
            progress_interval: Duration::ZERO,
            ..Settings::default()
        };
        let jobs = Arc::new(MemoryJobStore::new());
        let engine = Engine::new(
            settings,
            AdapterRegistry::standard(),
            provider,
            jobs.clone(),
            Arc::new(MemoryProgressStore::default()),
        );
        Fixture { engine, jobs, dir }
    }

    #[tokio::test]
    async fn text_job_runs_to_completion() {
        let fx = fixture(StubProvider::echo(" [zh]"));
        let source = fx.dir.path().join("notes.txt");
        fs::write(&source, "One\n\nTwo\n\nThree\n").expect("write");
        fx.jobs
            .insert(Job::new("job-1", &source, "zh", "gpt-4o-mini"))
            .expect("insert");

        let result = fx
            .engine
            .start_job("job-1")
            .await
            .expect("join")
            .expect("run");

        assert_eq!(
            fs::read_to_string(&result).expect("read"),
            "One [zh]\n\nTwo [zh]\n\nThree [zh]\n"
        );
        let job = fx.jobs.get("job-1").expect("job");
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.total_segments, 3);
        assert_eq!(job.result_file_path.as_deref(), Some(result.as_path()));
        let progress = fx.engine.get_progress("job-1").expect("progress");
        assert_eq!(progress.status, JobStatus::Completed);
        assert_eq!(progress.progress_percent, 100);
    }

    #[tokio::test]
    async fn degraded_units_keep_source_text_and_job_completes() {
        let fx = fixture(StubProvider::new(|request| {
            if request.user == "Two" {
                Err(ProviderError::Transient("timeout".to_string()))
            } else {
                Ok(format!("<think>hmm</think>{}!", request.user))
            }
        }));
        let source = fx.dir.path().join("notes.md");
        fs::write(&source, "# One\n\nTwo\n").expect("write");
        let mut job = Job::new("job-2", &source, "zh", "gpt-4o-mini");
        job.display_mode = DisplayMode::Parallel;
        fx.jobs.insert(job).expect("insert");

        let result = fx.engine.run_job("job-2").await.expect("run");
        assert_eq!(fs::read_to_string(result).expect("read"), "# One\n# One!\n\nTwo\n\nTwo\n");
        assert_eq!(fx.jobs.get("job-2").expect("job").status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn missing_source_fails_the_job() {
        let fx = fixture(StubProvider::echo(""));
        fx.jobs
            .insert(Job::new("job-3", fx.dir.path().join("gone.docx"), "zh", "m"))
            .expect("insert");

        let err = fx.engine.run_job("job-3").await.expect_err("missing");
        assert!(matches!(err, PipelineError::SourceUnreadable { .. }));
        let job = fx.jobs.get("job-3").expect("job");
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.started_at.is_some());
        assert!(job.error_message.unwrap_or_default().contains("gone.docx"));
        assert_eq!(fx.engine.get_progress("job-3").expect("progress").status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn unsupported_type_fails_before_extraction() {
        let fx = fixture(StubProvider::echo(""));
        let source = fx.dir.path().join("legacy.doc");
        fs::write(&source, "binary").expect("write");
        fx.jobs
            .insert(Job::new("job-4", &source, "zh", "m"))
            .expect("insert");

        let err = fx.engine.run_job("job-4").await.expect_err("unsupported");
        assert!(matches!(err, PipelineError::UnsupportedFormat(_)));
        let job = fx.jobs.get("job-4").expect("job");
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.started_at.is_some());
        assert_eq!(job.total_segments, 0);
    }

    #[tokio::test]
    async fn finished_job_cannot_be_started_again() {
        let fx = fixture(StubProvider::echo("!"));
        let source = fx.dir.path().join("a.txt");
        fs::write(&source, "Hi\n").expect("write");
        fx.jobs
            .insert(Job::new("job-6", &source, "en", "m"))
            .expect("insert");
        fx.engine.run_job("job-6").await.expect("run");

        let err = fx.engine.run_job("job-6").await.expect_err("rerun");
        assert!(matches!(err, PipelineError::InvalidTransition { .. }));
        assert_eq!(fx.jobs.get("job-6").expect("job").status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn unknown_job_is_an_error() {
        let fx = fixture(StubProvider::echo(""));
        assert!(matches!(
            fx.engine.run_job("nope").await,
            Err(PipelineError::JobNotFound(_))
        ));
        assert!(fx.engine.get_progress("nope").is_err());
    }

    #[test]
    fn preview_distinguishes_unsupported_from_unreadable() {
        let fx = fixture(StubProvider::echo(""));
        let unsupported = fx
            .engine
            .extract_preview(Path::new("deck.key"), "key", 100)
            .expect_err("unsupported");
        assert!(matches!(unsupported, PipelineError::UnsupportedFormat(_)));

        let unreadable = fx
            .engine
            .extract_preview(&fx.dir.path().join("missing.md"), "md", 100)
            .expect_err("missing");
        assert!(matches!(unreadable, PipelineError::SourceUnreadable { .. }));
    }

    #[test]
    fn preview_respects_the_character_budget() {
        let fx = fixture(StubProvider::echo(""));
        let source = fx.dir.path().join("long.txt");
        fs::write(&source, "abcdef\n\nghijkl\n\nmnop\n").expect("write");
        let preview = fx.engine.extract_preview(&source, "txt", 8).expect("preview");
        let texts: Vec<&str> = preview.content.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["abcdef", "gh"]);
        assert_eq!(preview.total_chars, 16);
        assert!(preview.truncated);
    }

    #[tokio::test]
    async fn parallel_preview_reads_source_and_result() {
        let fx = fixture(StubProvider::echo("!"));
        let source = fx.dir.path().join("a.txt");
        fs::write(&source, "Hi\n\nBye\n").expect("write");
        fx.jobs
            .insert(Job::new("job-5", &source, "en", "m"))
            .expect("insert");
        let result = fx.engine.run_job("job-5").await.expect("run");

        let preview = fx
            .engine
            .extract_parallel_preview(&source, &result, "txt", 100)
            .expect("preview");
        let translated: Vec<&str> = preview
            .translated_content
            .iter()
            .map(|s| s.text.as_str())
            .collect();
        assert_eq!(translated, vec!["Hi!", "Bye!"]);
        assert_eq!(preview.source_total_chars, 5);
        assert!(!preview.truncated);
    }
}
