use notecal_core::SourceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotionError {
    #[error("Notion request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Notion rate limit hit (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Notion object not found")]
    NotFound,

    #[error("Notion API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Unexpected Notion response: {0}")]
    Decode(String),
}

impl NotionError {
    /// Transport failures, 429 and 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            NotionError::Transport(_) | NotionError::RateLimited { .. } => true,
            NotionError::Api { status, .. } => *status >= 500,
            NotionError::NotFound | NotionError::Decode(_) => false,
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            NotionError::RateLimited { retry_after_secs } => *retry_after_secs,
            _ => None,
        }
    }
}

impl From<NotionError> for SourceError {
    fn from(err: NotionError) -> Self {
        match err {
            NotionError::RateLimited { retry_after_secs } => {
                SourceError::RateLimited { retry_after_secs }
            }
            other => SourceError::Unavailable(other.to_string()),
        }
    }
}

pub type NotionResult<T> = Result<T, NotionError>;
