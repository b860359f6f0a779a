use reqwest::StatusCode;
use std::error::Error as StdError;

/// Error returned by hooks (URL resolvers and byte processors).
pub type HookError = Box<dyn StdError + Send + Sync>;

// Failures that end a load. Cache I/O and hook failures never show up here,
// they are logged and absorbed by the loader.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("URL resolution failed: {0}")]
    Resolution(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Server returned non-retryable status code {status} for {url}")]
    NonRetryableStatus { status: StatusCode, url: String },

    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

impl FetchError {
    /// Whether the failure came from the caller cancelling the load.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }

    /// Status code of the last response, when the failure was a status code.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            FetchError::NonRetryableStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// A single failed attempt that is eligible for retry.
#[derive(Debug, thiserror::Error)]
pub(crate) enum AttemptError {
    #[error("server returned status code {0}")]
    Status(StatusCode),

    #[error("attempt timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}
