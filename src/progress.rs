use anyhow::{Result, anyhow};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

use crate::jobs::{Job, JobStatus, JobStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub progress_percent: u8,
    pub total_segments: usize,
    pub translated_segments: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ProgressSnapshot {
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            progress_percent: job.progress_percent,
            total_segments: job.total_segments,
            translated_segments: job.translated_segments,
            error_message: job.error_message.clone(),
        }
    }
}

/// Fast ephemeral progress storage for polling. Writes are best-effort.
pub trait ProgressStore: Send + Sync {
    fn put(&self, snapshot: ProgressSnapshot) -> Result<()>;
    fn get(&self, job_id: &str) -> Result<Option<ProgressSnapshot>>;
}

#[derive(Debug)]
pub struct MemoryProgressStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, ProgressSnapshot)>>,
}

impl MemoryProgressStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryProgressStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

impl ProgressStore for MemoryProgressStore {
    fn put(&self, snapshot: ProgressSnapshot) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("progress store lock poisoned"))?;
        let now = Instant::now();
        entries.retain(|_, (written, _)| now.duration_since(*written) < self.ttl);
        entries.insert(snapshot.job_id.clone(), (now, snapshot));
        Ok(())
    }

    fn get(&self, job_id: &str) -> Result<Option<ProgressSnapshot>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("progress store lock poisoned"))?;
        Ok(entries
            .get(job_id)
            .filter(|(written, _)| written.elapsed() < self.ttl)
            .map(|(_, snapshot)| snapshot.clone()))
    }
}

pub(crate) fn publish(store: &dyn ProgressStore, snapshot: ProgressSnapshot) {
    let job_id = snapshot.job_id.clone();
    if let Err(err) = store.put(snapshot) {
        warn!("failed to publish progress for job {}: {:#}", job_id, err);
    }
}

#[derive(Debug, Default)]
struct Committed {
    percent: Option<u8>,
    at: Option<Instant>,
    translated: usize,
}

/// Coalesces per-unit progress into occasional writes to both stores.
pub struct ProgressReporter {
    job_id: String,
    total: usize,
    threshold: u8,
    interval: Duration,
    jobs: Arc<dyn JobStore>,
    store: Arc<dyn ProgressStore>,
    committed: Mutex<Committed>,
}

impl ProgressReporter {
    pub fn new(
        job_id: impl Into<String>,
        total: usize,
        jobs: Arc<dyn JobStore>,
        store: Arc<dyn ProgressStore>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            total,
            threshold: 2,
            interval: Duration::from_millis(200),
            jobs,
            store,
            committed: Mutex::new(Committed::default()),
        }
    }

    pub fn with_throttle(mut self, threshold: u8, interval: Duration) -> Self {
        self.threshold = threshold;
        self.interval = interval;
        self
    }

    pub fn percent(&self, translated: usize) -> u8 {
        if self.total == 0 {
            return 100;
        }
        (translated.min(self.total) * 100 / self.total) as u8
    }

    /// Records that `translated` units are done. Returns whether the report
    /// was committed to the stores.
    pub fn report(&self, translated: usize) -> bool {
        let Ok(mut committed) = self.committed.lock() else {
            return false;
        };
        let translated = translated.max(committed.translated);
        let percent = self.percent(translated).max(committed.percent.unwrap_or_default());

        let due = match (committed.percent, committed.at) {
            (Some(last), Some(at)) => {
                percent.saturating_sub(last) >= self.threshold || at.elapsed() >= self.interval
            }
            _ => true,
        };
        if !due {
            return false;
        }

        if let Err(err) = self.jobs.update_progress(&self.job_id, translated, percent) {
            warn!("failed to record progress for job {}: {}", self.job_id, err);
        }
        publish(
            self.store.as_ref(),
            ProgressSnapshot {
                job_id: self.job_id.clone(),
                status: JobStatus::Processing,
                progress_percent: percent,
                total_segments: self.total,
                translated_segments: translated,
                error_message: None,
            },
        );
        committed.percent = Some(percent);
        committed.at = Some(Instant::now());
        committed.translated = translated;
        true
    }
}
