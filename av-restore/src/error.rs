//! Application-wide error types.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::process::Stage;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Required tool `{tool}` is not available (tried `{binary}`)")]
    MissingDependency { tool: &'static str, binary: String },

    #[error("Could not probe {}: {reason}", path.display())]
    ProbeFailure { path: PathBuf, reason: String },

    #[error("{stage} failed: `{tool}` ended with {status}{}", format_tail(stderr_tail))]
    StageToolFailure {
        stage: Stage,
        tool: String,
        status: String,
        stderr_tail: String,
    },

    #[error(
        "Audio/video drift factor {factor:.4} is outside [0.5, 2.0]; check the capture frame rate"
    )]
    DriftOutOfRange { factor: f64 },

    #[error("Channel {channel} worker failed during {stage}: {source}")]
    WorkerFailure {
        channel: usize,
        stage: Stage,
        #[source]
        source: Box<Error>,
    },

    #[error(
        "Segment length changed from {persisted}s to {requested}s; run `clean` or pass --segment-length {persisted}"
    )]
    SegmentLengthMismatch { persisted: u64, requested: u64 },

    #[error(
        "Work directory {} belongs to a job with {field} `{persisted}`, not `{requested}`; run `clean` or restore the original setting",
        work_dir.display()
    )]
    JobMismatch {
        work_dir: PathBuf,
        field: &'static str,
        persisted: String,
        requested: String,
    },

    #[error("No completed segments found in {}", dir.display())]
    NoSegments { dir: PathBuf },

    #[error("Segment {missing} is missing or incomplete; completed segments must be contiguous")]
    SegmentGap { missing: u64 },

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("{primary} ({} further failure(s): {})", secondary.len(), secondary.join("; "))]
    Aggregate {
        primary: Box<Error>,
        secondary: Vec<String>,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error while {op} {}: {source}", path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

fn format_tail(tail: &str) -> String {
    if tail.is_empty() {
        String::new()
    } else {
        format!("\n{tail}")
    }
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn probe(path: &Path, reason: impl Into<String>) -> Self {
        Self::ProbeFailure {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Whether this error is only a consequence of a cancellation request.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::WorkerFailure { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Collapse a list of failures into a single error, first one wins.
    ///
    /// Errors caused purely by cancellation are dropped when a real failure
    /// exists, since they only echo the primary one.
    pub fn aggregate(mut errors: Vec<Error>) -> Option<Error> {
        if errors.is_empty() {
            return None;
        }
        if errors.iter().all(Error::is_cancelled) {
            return Some(Self::Cancelled);
        }
        errors.retain(|e| !e.is_cancelled());
        let mut iter = errors.into_iter();
        let primary = iter.next()?;
        let secondary: Vec<String> = iter.map(|e| e.to_string()).collect();
        if secondary.is_empty() {
            Some(primary)
        } else {
            Some(Self::Aggregate {
                primary: Box::new(primary),
                secondary,
            })
        }
    }
}
