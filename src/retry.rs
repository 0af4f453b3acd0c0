//! Error classification and retry scheduling.
//!
//! Nothing here performs I/O or sleeps: callers hand an error, an attempt
//! number and "now" to [`RetryPolicy::decide`] and act on the answer.

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{HttpError, PermanentError, RateLimitError, SyncError};

const FALLBACK_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    RateLimited,
    Network,
    Upstream5xx,
    Conflict,
    Terminal,
    Transient,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Network => "network",
            Self::Upstream5xx => "upstream_5xx",
            Self::Conflict => "conflict",
            Self::Terminal => "terminal",
            Self::Transient => "transient",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub class: ErrorClass,
    pub retryable: bool,
}

impl Classification {
    const fn new(class: ErrorClass, retryable: bool) -> Self {
        Self { class, retryable }
    }
}

const TRANSIENT: Classification = Classification::new(ErrorClass::Transient, true);
const TERMINAL: Classification = Classification::new(ErrorClass::Terminal, false);
const NETWORK: Classification = Classification::new(ErrorClass::Network, true);
const RATE_LIMITED: Classification = Classification::new(ErrorClass::RateLimited, true);

/// Map an HTTP status onto the taxonomy.
pub fn classify_status(status_code: u16) -> Classification {
    match status_code {
        500.. => Classification::new(ErrorClass::Upstream5xx, true),
        429 => RATE_LIMITED,
        408 | 409 | 425 => Classification::new(ErrorClass::Conflict, true),
        _ => TERMINAL,
    }
}

/// Map any error onto the taxonomy.
///
/// Walks the source chain looking for a typed error first, then falls back to
/// sniffing the message. `None` (no error at all) is transient.
pub fn classify_error(err: Option<&(dyn StdError + 'static)>) -> Classification {
    let Some(err) = err else {
        return TRANSIENT;
    };

    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(classification) = classify_typed(e) {
            return classification;
        }
        current = e.source();
    }

    classify_message(&err.to_string())
}

pub fn classify_sync_error(err: &SyncError) -> Classification {
    classify_error(Some(err))
}

fn classify_typed(err: &(dyn StdError + 'static)) -> Option<Classification> {
    if let Some(err) = err.downcast_ref::<SyncError>() {
        return match err {
            SyncError::Permanent(_) | SyncError::Config(_) | SyncError::InvalidInput(_) => {
                Some(TERMINAL)
            }
            SyncError::RateLimit(_) | SyncError::BudgetExceeded(_) | SyncError::Pause(_) => {
                Some(RATE_LIMITED)
            }
            SyncError::Http(http) => Some(classify_status(http.status_code)),
            SyncError::Network(err) => Some(classify_reqwest(err)),
            SyncError::Io(err) => classify_io(err),
            SyncError::Store(err) => err.chain().find_map(classify_typed),
            SyncError::Git { .. } | SyncError::Json(_) => None,
        };
    }
    if err.downcast_ref::<PermanentError>().is_some() {
        return Some(TERMINAL);
    }
    if err.downcast_ref::<RateLimitError>().is_some() {
        return Some(RATE_LIMITED);
    }
    if let Some(http) = err.downcast_ref::<HttpError>() {
        return Some(classify_status(http.status_code));
    }
    if let Some(err) = err.downcast_ref::<reqwest::Error>() {
        return Some(classify_reqwest(err));
    }
    if let Some(err) = err.downcast_ref::<io::Error>() {
        return classify_io(err);
    }
    None
}

fn classify_reqwest(err: &reqwest::Error) -> Classification {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        return NETWORK;
    }
    match err.status() {
        Some(status) => classify_status(status.as_u16()),
        None => NETWORK,
    }
}

fn classify_io(err: &io::Error) -> Option<Classification> {
    match err.kind() {
        io::ErrorKind::TimedOut
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => Some(NETWORK),
        _ => None,
    }
}

fn classify_message(message: &str) -> Classification {
    let message = message.to_lowercase();
    if ["timeout", "temporary", "connection reset"]
        .iter()
        .any(|needle| message.contains(needle))
    {
        NETWORK
    } else if message.contains("rate limit") {
        RATE_LIMITED
    } else {
        TRANSIENT
    }
}

/// Tunables for [`RetryPolicy`], as they appear in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_fraction")]
    pub jitter_fraction: f64,
    /// Attempt ceiling per job kind; `default` applies to unlisted kinds.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: BTreeMap<String, u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_fraction: default_jitter_fraction(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    5 * 60 * 1_000
}

fn default_jitter_fraction() -> f64 {
    0.2
}

fn default_max_attempts() -> BTreeMap<String, u32> {
    BTreeMap::from([
        ("repo_sync".to_string(), 6),
        ("issue_import".to_string(), 8),
        ("webhook_event".to_string(), 4),
    ])
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryDecision {
    pub class: ErrorClass,
    pub retryable: bool,
    /// Retryable, but the attempt ceiling has been reached.
    pub exhausted: bool,
    pub delay: Duration,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

/// Exponential backoff with symmetric jitter and per-job attempt ceilings.
#[derive(Debug)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
    jitter_fraction: f64,
    max_attempts_by_job: BTreeMap<String, u32>,
    rng: Mutex<StdRng>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter_fraction: config.jitter_fraction.clamp(0.0, 1.0),
            max_attempts_by_job: config.max_attempts.clone(),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Make jitter reproducible.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn max_attempts(&self, job_type: &str) -> u32 {
        self.max_attempts_by_job
            .get(job_type)
            .or_else(|| self.max_attempts_by_job.get("default"))
            .copied()
            .unwrap_or(FALLBACK_MAX_ATTEMPTS)
    }

    /// Jittered delay for `attempt` using randomness `r` in `[0, 1]`.
    ///
    /// `r = 0` gives `delay * (1 - jitter)`, `r = 1` gives `delay * (1 + jitter)`,
    /// both clamped to `[0, max_delay]`.
    pub fn backoff_with(&self, attempt: u32, r: f64) -> Duration {
        let exponent = attempt.max(1) - 1;
        let max = self.max_delay.as_secs_f64();
        let delay = (self.base_delay.as_secs_f64() * 2f64.powi(exponent.min(1023) as i32)).min(max);

        let spread = delay * self.jitter_fraction;
        let adjusted = delay - spread + 2.0 * spread * r.clamp(0.0, 1.0);

        Duration::from_secs_f64(adjusted.clamp(0.0, max))
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        let r: f64 = self
            .rng
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .gen_range(0.0..=1.0);
        self.backoff_with(attempt, r)
    }

    /// Decide what to do after attempt number `attempt` failed with `err`.
    pub fn decide(
        &self,
        job_type: &str,
        attempt: u32,
        err: Option<&(dyn StdError + 'static)>,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        let Classification { class, retryable } = classify_error(err);
        let mut decision = RetryDecision {
            class,
            retryable,
            exhausted: false,
            delay: Duration::ZERO,
            next_attempt_at: None,
        };

        if !retryable {
            return decision;
        }

        if attempt >= self.max_attempts(job_type) {
            decision.exhausted = true;
            return decision;
        }

        let delay = self.backoff(attempt);
        decision.delay = delay;
        decision.next_attempt_at = Some(
            now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero()),
        );
        decision
    }
}
