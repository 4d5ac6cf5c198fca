use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SkymapError>;

#[derive(Error, Debug)]
pub enum SkymapError {
    #[error("Provider rejected credentials: {0}")]
    Authentication(String),

    #[error("Provider rate limit exceeded")]
    RateLimitExceeded { retry_after: Option<Duration> },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Daily refresh quota exceeded for {handle} ({limit}/day)")]
    QuotaExceeded { handle: String, limit: u32 },

    #[error("Graph inconsistency: {0}")]
    GraphInconsistency(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Job error: {0}")]
    Job(String),
}

impl SkymapError {
    /// Whether the fetch gateway may retry the failed call after backoff.
    /// Only provider throttling is retried at the gateway layer; everything
    /// else either surfaces immediately (auth, validation) or is left to the
    /// job retry policy (transport).
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, SkymapError::RateLimitExceeded { .. })
    }

    /// Provider-supplied wait hint, if the error carried one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SkymapError::RateLimitExceeded { retry_after } => *retry_after,
            _ => None,
        }
    }
}
