//! Error types for the capture pipeline.

use std::path::PathBuf;
use thiserror::Error;

use crate::tasking::QueueKind;

/// Main error type for scheduling, import and capture operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A scene file could not be opened or parsed. Recovered per file.
    #[error("Failed to open file '{}': {reason}", path.display())]
    FileOpen { path: PathBuf, reason: String },

    /// `next_sample` called after the last sample was produced
    #[error("Camera generator exhausted after {count} samples")]
    GeneratorExhausted { count: u32 },

    /// `next_sample` called before the first `reset`
    #[error("Camera generator used before reset")]
    GeneratorNotReady,

    /// Push onto a queue that was torn down
    #[error("Task queue '{0}' is closed")]
    QueueClosed(QueueKind),

    /// Affine queue drained from a thread that does not own it
    #[error("Task queue '{0}' may only be drained synchronously on its owning thread")]
    WrongThread(QueueKind),

    /// Drain kept finding work past its pass budget
    #[error("Scheduler did not reach quiescence within {passes} passes")]
    DrainBudgetExceeded { passes: usize },

    /// Invalid configuration or generator parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Capture started without any input
    #[error("No files to import")]
    NoInputFiles,

    /// Scene node not found by path
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Image encoding failed
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Settings (de)serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create an invalid parameter error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// Create a per-file open failure.
    pub fn file_open(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::FileOpen {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;
