use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::providers::github::{JobType, RateLimitState};

/// Quota gauge for one job type, as last seen in a response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QuotaGauge {
    pub limit: i64,
    pub remaining: i64,
    pub reset_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ThrottleCounts {
    pub primary: u64,
    pub secondary: u64,
}

/// Outcome of the most recent drift-poller pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollerSnapshot {
    pub bindings_scanned: usize,
    pub bindings_checked: usize,
    pub drift_detected: usize,
    pub jobs_enqueued: usize,
    pub enqueue_errors: usize,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    /// Message of the pass at `last_error_at`. Clean passes leave both in
    /// place; the error is current only while `last_error_at` is not older
    /// than `last_success_at`.
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub requests: BTreeMap<JobType, u64>,
    pub quota: BTreeMap<JobType, QuotaGauge>,
    pub throttles: BTreeMap<JobType, ThrottleCounts>,
    pub poller: Option<PollerSnapshot>,
}

/// In-process observability registry.
///
/// Constructed once per process and handed to the client and poller through
/// an `Arc`; tests build their own so nothing leaks between them.
#[derive(Debug, Default)]
pub struct SyncMetrics {
    inner: Mutex<MetricsSnapshot>,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MetricsSnapshot> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record_request(&self, job_type: &JobType) {
        *self.lock().requests.entry(job_type.clone()).or_default() += 1;
    }

    pub fn record_quota(&self, job_type: &JobType, rate_limit: &RateLimitState) {
        if rate_limit.is_zero() {
            return;
        }
        self.lock().quota.insert(
            job_type.clone(),
            QuotaGauge {
                limit: rate_limit.limit,
                remaining: rate_limit.remaining,
                reset_at: rate_limit.reset_at,
            },
        );
    }

    pub fn record_throttle(&self, job_type: &JobType, secondary: bool) {
        let mut inner = self.lock();
        let counts = inner.throttles.entry(job_type.clone()).or_default();
        if secondary {
            counts.secondary += 1;
        } else {
            counts.primary += 1;
        }
    }

    pub fn publish_poller(&self, snapshot: PollerSnapshot) {
        self.lock().poller = Some(snapshot);
    }

    pub fn poller(&self) -> Option<PollerSnapshot> {
        self.lock().poller.clone()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.lock().clone()
    }
}
