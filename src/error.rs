use std::path::PathBuf;
use thiserror::Error;

use crate::jobs::JobStatus;

/// Failures that abort a whole job.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("source file unreadable: {}: {reason}", path.display())]
    SourceUnreadable { path: PathBuf, reason: String },

    #[error("failed to parse document {}: {reason}", path.display())]
    DocumentParse { path: PathBuf, reason: String },

    #[error("failed to write translated document {}: {reason}", path.display())]
    Reinject { path: PathBuf, reason: String },

    #[error("segment count mismatch: extracted {expected}, received {actual} translations")]
    SegmentMismatch { expected: usize, actual: usize },

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("invalid job transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    pub(crate) fn parse(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::DocumentParse {
            path: path.into(),
            reason: format!("{:#}", err),
        }
    }

    pub(crate) fn reinject(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Reinject {
            path: path.into(),
            reason: format!("{:#}", err),
        }
    }

    pub(crate) fn unreadable(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::SourceUnreadable {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}
