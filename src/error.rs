use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::providers::github::{JobType, RateLimitState};

/// GitHub refused the request because a primary or secondary rate limit was hit.
#[derive(Debug, Clone, Error)]
#[error(
    "GitHub rate limit hit for job type {job_type} (status {status_code}, secondary: {secondary}); retry after {}s",
    .retry_after.as_secs()
)]
pub struct RateLimitError {
    pub job_type: JobType,
    pub status_code: u16,
    pub secondary: bool,
    pub retry_after: Duration,
    pub rate_limit: RateLimitState,
    pub body: String,
}

/// The job type has used up its local request budget.
#[derive(Debug, Clone, Error)]
#[error("request budget exhausted for job type {job_type}: used {used} of {max_requests}")]
pub struct BudgetExceededError {
    pub job_type: JobType,
    pub used: i64,
    pub max_requests: i64,
}

/// Work must stop until `resume_at`; carries enough state to resume later.
#[derive(Debug, Clone, Error)]
#[error("job type {job_type} paused until {resume_at}: {reason}")]
pub struct PauseError {
    pub job_type: JobType,
    pub resume_at: DateTime<Utc>,
    pub reason: String,
    pub rate_limit: RateLimitState,
}

/// Non-success HTTP status that was not classified as a rate limit.
#[derive(Debug, Clone, Error)]
#[error("GitHub API returned status {status_code}: {body}")]
pub struct HttpError {
    pub status_code: u16,
    pub body: String,
}

/// A failure that must never be retried, whatever its message says.
#[derive(Debug, Clone, Error)]
#[error("permanent failure: {message}")]
pub struct PermanentError {
    pub message: String,
}

impl PermanentError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    #[error(transparent)]
    BudgetExceeded(#[from] BudgetExceededError),

    #[error(transparent)]
    Pause(#[from] PauseError),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error(transparent)]
    Permanent(#[from] PermanentError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("`{command}` failed: {output}")]
    Git { command: String, output: String },

    #[error("Store error: {0}")]
    Store(#[source] anyhow::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// True for signals that clear up on their own once enough time passes.
    pub fn is_wait_signal(&self) -> bool {
        matches!(self, Self::BudgetExceeded(_) | Self::Pause(_))
    }

    /// Resume deadline carried by a pause, if any.
    pub fn resume_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Pause(pause) => Some(pause.resume_at),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
