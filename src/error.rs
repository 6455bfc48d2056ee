//! Error taxonomy for outbound fetches.
//!
//! Only [`FetchError::Transport`] is retried by the backoff engine. Status and
//! decode failures mean the remote answered, so they surface immediately.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    /// Timeout, refused connection, DNS failure and similar.
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("unexpected status {status} from {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("failed to decode response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request cannot be cloned for retry")]
    NotRetryable,
}

impl FetchError {
    /// Wraps a reqwest failure without its URL, whose query may hold an API key.
    pub fn transport(err: reqwest::Error) -> Self {
        FetchError::Transport(err.without_url())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transport(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}
