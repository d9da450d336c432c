//! Error types for the notecal ecosystem.

use thiserror::Error;

/// Failures reported by a task source (Notion).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("Task source unavailable: {0}")]
    Unavailable(String),

    #[error("Task source rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },
}

/// Failures reported by a calendar sink (CalDAV).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("Calendar unavailable: {0}")]
    Unavailable(String),

    #[error("Calendar rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

/// A fetched task that cannot be projected into an event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid task '{task_id}': {reason}")]
pub struct InvalidTask {
    pub task_id: String,
    pub reason: String,
}

impl InvalidTask {
    pub fn new(task_id: impl Into<String>, reason: impl Into<String>) -> Self {
        InvalidTask {
            task_id: task_id.into(),
            reason: reason.into(),
        }
    }
}

/// Errors that can occur while running a sync.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("State store error: {0}")]
    Store(String),

    #[error("Stored value for '{key}' is corrupt: {reason}")]
    StateCorrupt { key: String, reason: String },

    #[error("Calendar metadata missing; run a full sync to initialize the calendar")]
    CalendarNotInitialized,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

pub type SourceResult<T> = Result<T, SourceError>;

pub type SinkResult<T> = Result<T, SinkError>;
