//! Error types for the optimization console.

use std::time::Duration;

/// Top-level error type for the console.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Submission error: {0}")]
    Submit(#[from] SubmitError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Download error: {0}")]
    Download(#[from] DownloadError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced synchronously from task submission.
///
/// Any of these means the task was NOT registered.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Invalid task id {id:?}: {reason}")]
    InvalidId { id: String, reason: String },

    #[error("Task {id} already exists")]
    Duplicate { id: String },

    #[error("Failed to write status file: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the compute backend submission call.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Backend request failed: {0}")]
    Request(String),

    #[error("Backend rejected submission for task {task_id}: {reason}")]
    Rejected { task_id: String, reason: String },
}

/// Errors while retrieving a finished task's result artifact.
///
/// Never propagated as a process error; recorded on the task as a
/// download-failure description.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("HTTP fetch failed: {0}")]
    Http(String),

    #[error("Download timed out after {after:?}")]
    TimedOut { after: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the console.
pub type Result<T> = std::result::Result<T, Error>;
