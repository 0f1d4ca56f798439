use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::RwLock;

use crate::error::PipelineError;
use crate::segment::{DisplayMode, FileKind};
use crate::translator::MAX_CONCURRENCY;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// `pending -> processing -> {completed, failed}`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }

    pub fn transition(self, next: JobStatus) -> Result<JobStatus, PipelineError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(PipelineError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub source_file_path: PathBuf,
    pub file_type: String,
    pub source_lang: String,
    pub target_lang: String,
    pub model: String,
    pub backup_model: Option<String>,
    pub concurrency: usize,
    pub display_mode: DisplayMode,
    pub domain: Option<String>,
    pub status: JobStatus,
    pub progress_percent: u8,
    pub total_segments: usize,
    pub translated_segments: usize,
    pub result_file_path: Option<PathBuf>,
    pub error_message: Option<String>,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl Job {
    /// A pending job. The file type is taken from the source extension.
    pub fn new(
        id: impl Into<String>,
        source_file_path: impl Into<PathBuf>,
        target_lang: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let source_file_path = source_file_path.into();
        let file_type = FileKind::from_path(&source_file_path)
            .map(|kind| kind.as_str().to_string())
            .unwrap_or_else(|_| {
                source_file_path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .unwrap_or_default()
                    .to_lowercase()
            });
        Self {
            id: id.into(),
            source_file_path,
            file_type,
            source_lang: "auto".to_string(),
            target_lang: target_lang.into(),
            model: model.into(),
            backup_model: None,
            concurrency: 5,
            display_mode: DisplayMode::Replace,
            domain: None,
            status: JobStatus::Pending,
            progress_percent: 0,
            total_segments: 0,
            translated_segments: 0,
            result_file_path: None,
            error_message: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.clamp(1, MAX_CONCURRENCY);
        self
    }
}

/// The durable job record. Owned by the caller; the engine only mutates it
/// through these callbacks.
pub trait JobStore: Send + Sync {
    fn load(&self, id: &str) -> Result<Job, PipelineError>;
    fn mark_started(&self, id: &str) -> Result<(), PipelineError>;
    fn set_total(&self, id: &str, total_segments: usize) -> Result<(), PipelineError>;
    fn update_progress(&self, id: &str, translated: usize, percent: u8) -> Result<(), PipelineError>;
    fn mark_completed(&self, id: &str, result_path: &std::path::Path) -> Result<(), PipelineError>;
    fn mark_failed(&self, id: &str, message: &str) -> Result<(), PipelineError>;
}

#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
}

fn now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: Job) -> Result<(), PipelineError> {
        let mut jobs = self.write()?;
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.jobs.read().ok()?.get(id).cloned()
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, Job>>, PipelineError> {
        self.jobs
            .write()
            .map_err(|_| PipelineError::Other(anyhow::anyhow!("job store lock poisoned")))
    }

    fn update(&self, id: &str, apply: impl FnOnce(&mut Job) -> Result<(), PipelineError>) -> Result<(), PipelineError> {
        let mut jobs = self.write()?;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| PipelineError::JobNotFound(id.to_string()))?;
        apply(job)
    }
}

impl JobStore for MemoryJobStore {
    fn load(&self, id: &str) -> Result<Job, PipelineError> {
        self.get(id)
            .ok_or_else(|| PipelineError::JobNotFound(id.to_string()))
    }

    fn mark_started(&self, id: &str) -> Result<(), PipelineError> {
        self.update(id, |job| {
            job.status = job.status.transition(JobStatus::Processing)?;
            job.error_message = None;
            job.started_at = Some(now());
            Ok(())
        })
    }

    fn set_total(&self, id: &str, total_segments: usize) -> Result<(), PipelineError> {
        self.update(id, |job| {
            if job.status != JobStatus::Processing {
                return Err(PipelineError::InvalidTransition {
                    from: job.status,
                    to: JobStatus::Processing,
                });
            }
            job.total_segments = total_segments;
            Ok(())
        })
    }

    fn update_progress(&self, id: &str, translated: usize, percent: u8) -> Result<(), PipelineError> {
        self.update(id, |job| {
            if job.status.is_terminal() {
                return Ok(());
            }
            job.translated_segments = job.translated_segments.max(translated);
            job.progress_percent = job.progress_percent.max(percent);
            Ok(())
        })
    }

    fn mark_completed(&self, id: &str, result_path: &std::path::Path) -> Result<(), PipelineError> {
        self.update(id, |job| {
            job.status = job.status.transition(JobStatus::Completed)?;
            job.progress_percent = 100;
            job.translated_segments = job.total_segments;
            job.result_file_path = Some(result_path.to_path_buf());
            job.completed_at = Some(now());
            Ok(())
        })
    }

    fn mark_failed(&self, id: &str, message: &str) -> Result<(), PipelineError> {
        self.update(id, |job| {
            job.status = job.status.transition(JobStatus::Failed)?;
            job.error_message = Some(message.to_string());
            job.completed_at = Some(now());
            Ok(())
        })
    }
}
