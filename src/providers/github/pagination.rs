//! Resumable, one-page-at-a-time walking of GitHub list endpoints.
//!
//! The walker never loops and never sleeps. Each call fetches at most one
//! page and records where to continue in a [`PaginationCheckpoint`] owned by
//! the caller. Rate limits turn into a pause recorded on the checkpoint, so a
//! caller can persist it, stop, and repeat the exact same call later.

use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{PauseError, Result, SyncError};

use super::budget::{JobType, RateLimitState};
use super::client::{GitHubClient, Response};

/// Opaque resume cursor plus pause state for a paginated walk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationCheckpoint {
    /// Next page to fetch; `None` once the walk is complete (or not started).
    pub next_url: Option<String>,
    pub last_rate_limit: RateLimitState,
    pub paused_until: Option<DateTime<Utc>>,
    pub pause_reason: Option<String>,
}

impl PaginationCheckpoint {
    /// Checkpoint that resumes from a cursor returned by an earlier walk.
    pub fn resume_from(next_url: impl Into<String>) -> Self {
        Self {
            next_url: Some(next_url.into()).filter(|u: &String| !u.trim().is_empty()),
            ..Self::default()
        }
    }

    pub fn is_paused_at(&self, now: DateTime<Utc>) -> bool {
        self.paused_until.is_some_and(|until| now < until)
    }

    fn clear_pause(&mut self) {
        self.paused_until = None;
        self.pause_reason = None;
    }
}

impl GitHubClient {
    /// Fetch exactly one page and advance `checkpoint`.
    ///
    /// The endpoint is `checkpoint.next_url` when set, else `start_endpoint`.
    /// On success `next_url` moves to the response's next link (or `None`)
    /// and any pause is cleared.
    ///
    /// # Errors
    ///
    /// - `Pause` without touching the network while `paused_until` is ahead
    /// - `Pause` after GitHub throttles or the ledger pauses; the checkpoint
    ///   then carries `paused_until`, the reason and the rate-limit snapshot,
    ///   and `next_url` is left exactly as it was
    /// - `InvalidInput` when there is neither a cursor nor a start endpoint
    /// - anything else the client returns, unchanged
    pub async fn fetch_next_page(
        &self,
        job_type: &JobType,
        start_endpoint: &str,
        checkpoint: &mut PaginationCheckpoint,
    ) -> Result<Response> {
        let endpoint = match checkpoint.next_url.as_deref().map(str::trim) {
            Some(next) if !next.is_empty() => next.to_string(),
            _ if !start_endpoint.trim().is_empty() => start_endpoint.trim().to_string(),
            _ => {
                return Err(SyncError::InvalidInput(
                    "pagination needs a start endpoint or a checkpoint cursor".to_string(),
                ))
            }
        };

        let now = self.clock().now();
        if checkpoint.is_paused_at(now) {
            let resume_at = checkpoint.paused_until.unwrap_or(now);
            debug!("{job_type} walk still paused until {resume_at}");
            return Err(PauseError {
                job_type: job_type.clone(),
                resume_at,
                reason: checkpoint
                    .pause_reason
                    .clone()
                    .unwrap_or_else(|| "paused".to_string()),
                rate_limit: checkpoint.last_rate_limit.clone(),
            }
            .into());
        }

        match self.get(job_type, &endpoint).await {
            Ok(response) => {
                checkpoint.next_url = response.next_page.clone();
                checkpoint.last_rate_limit = response.rate_limit.clone();
                checkpoint.clear_pause();
                Ok(response)
            }
            Err(SyncError::RateLimit(err)) => {
                let wait = Duration::from_std(err.retry_after).unwrap_or_else(|_| Duration::minutes(1));
                let reason = if err.secondary {
                    "secondary_rate_limit"
                } else {
                    "rate_limit"
                };
                let pause = PauseError {
                    job_type: job_type.clone(),
                    resume_at: self.clock().now() + wait,
                    reason: reason.to_string(),
                    rate_limit: err.rate_limit,
                };
                info!("Pausing {job_type} walk at {endpoint} until {}", pause.resume_at);
                Err(record_pause(checkpoint, pause))
            }
            Err(SyncError::Pause(pause)) => {
                info!("Budget paused {job_type} walk until {}", pause.resume_at);
                Err(record_pause(checkpoint, pause))
            }
            Err(other) => Err(other),
        }
    }
}

fn record_pause(checkpoint: &mut PaginationCheckpoint, pause: PauseError) -> SyncError {
    checkpoint.paused_until = Some(pause.resume_at);
    checkpoint.pause_reason = Some(pause.reason.clone());
    if !pause.rate_limit.is_zero() {
        checkpoint.last_rate_limit = pause.rate_limit.clone();
    }
    pause.into()
}
