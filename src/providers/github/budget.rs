use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{BudgetExceededError, PauseError, Result};

/// Workload tag scoping request budgets and metrics.
///
/// Open-ended: the three well-known tags have constructors, anything else
/// can be built from a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobType(Cow<'static, str>);

impl JobType {
    pub const SYNC: JobType = JobType(Cow::Borrowed("sync"));
    pub const IMPORT: JobType = JobType(Cow::Borrowed("import"));
    pub const WEBHOOK: JobType = JobType(Cow::Borrowed("webhook"));

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Request ceiling for one job type.
///
/// `max_requests <= 0` means unlimited. `reserve_requests` is the slice of
/// the shared GitHub quota this job type must leave for everyone else.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobBudget {
    #[serde(default)]
    pub max_requests: i64,
    #[serde(default)]
    pub reserve_requests: i64,
}

/// Last rate-limit window observed in GitHub response headers.
///
/// The all-empty value means "never observed".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitState {
    pub limit: i64,
    pub remaining: i64,
    pub reset_at: Option<DateTime<Utc>>,
    pub resource: String,
}

impl RateLimitState {
    pub fn is_zero(&self) -> bool {
        self.limit == 0 && self.remaining == 0 && self.reset_at.is_none() && self.resource.is_empty()
    }
}

/// Read-only view of a job type's remaining headroom. `-1` means unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BudgetState {
    pub job_type: JobType,
    pub used: i64,
    pub max_requests: i64,
    pub job_remaining: i64,
    pub api_remaining: i64,
    pub effective_remaining: i64,
}

#[derive(Debug, Default)]
struct LedgerState {
    budgets: HashMap<JobType, JobBudget>,
    used: HashMap<JobType, i64>,
    rate_limit: RateLimitState,
}

impl LedgerState {
    fn budget_for(&self, job_type: &JobType) -> JobBudget {
        self.budgets.get(job_type).copied().unwrap_or_default()
    }
}

/// Process-wide request accounting shared by every in-flight GitHub call.
///
/// A single mutex guards the counters and the observed rate-limit window; it
/// is only ever held for an in-memory decision.
#[derive(Debug, Default)]
pub struct BudgetLedger {
    state: Mutex<LedgerState>,
}

impl BudgetLedger {
    pub fn new(budgets: HashMap<JobType, JobBudget>) -> Self {
        Self {
            state: Mutex::new(LedgerState {
                budgets,
                ..LedgerState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_budget(&self, job_type: JobType, budget: JobBudget) {
        self.lock().budgets.insert(job_type, budget);
    }

    /// Admit one request for `job_type` at `now`, or explain why not.
    ///
    /// # Errors
    ///
    /// - `BudgetExceeded` when the job type's own ceiling is used up
    /// - `Pause` when the observed GitHub quota has fallen into this job
    ///   type's reserve and the window has not reset yet
    pub fn reserve(&self, job_type: &JobType, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.lock();
        let budget = state.budget_for(job_type);
        let used = state.used.get(job_type).copied().unwrap_or(0);

        if budget.max_requests > 0 && used >= budget.max_requests {
            warn!("Budget exhausted for {job_type}: {used}/{}", budget.max_requests);
            return Err(BudgetExceededError {
                job_type: job_type.clone(),
                used,
                max_requests: budget.max_requests,
            }
            .into());
        }

        let rate_limit = &state.rate_limit;
        if !rate_limit.is_zero() && rate_limit.remaining <= budget.reserve_requests {
            if let Some(reset_at) = rate_limit.reset_at.filter(|reset_at| now < *reset_at) {
                warn!(
                    "Pausing {job_type} until {reset_at}: {} requests left, {} reserved",
                    rate_limit.remaining, budget.reserve_requests
                );
                return Err(PauseError {
                    job_type: job_type.clone(),
                    resume_at: reset_at,
                    reason: format!(
                        "GitHub quota remaining {} is within reserve {}",
                        rate_limit.remaining, budget.reserve_requests
                    ),
                    rate_limit: rate_limit.clone(),
                }
                .into());
            }
        }

        *state.used.entry(job_type.clone()).or_insert(0) += 1;
        debug!("Reserved request for {job_type} ({} used)", used + 1);
        Ok(())
    }

    /// Record a freshly observed window. Empty observations are ignored so the
    /// ledger never regresses to "unknown".
    pub fn set_rate_limit(&self, observed: RateLimitState) {
        if observed.is_zero() {
            return;
        }
        self.lock().rate_limit = observed;
    }

    pub fn current_rate_limit(&self) -> RateLimitState {
        self.lock().rate_limit.clone()
    }

    pub fn budget_state(&self, job_type: &JobType) -> BudgetState {
        let state = self.lock();
        let budget = state.budget_for(job_type);
        let used = state.used.get(job_type).copied().unwrap_or(0);

        let job_remaining = if budget.max_requests > 0 {
            (budget.max_requests - used).max(0)
        } else {
            -1
        };

        let api_remaining = if state.rate_limit.is_zero() {
            -1
        } else {
            (state.rate_limit.remaining - budget.reserve_requests).max(0)
        };

        BudgetState {
            job_type: job_type.clone(),
            used,
            max_requests: budget.max_requests,
            job_remaining,
            api_remaining,
            effective_remaining: min_bounded(job_remaining, api_remaining),
        }
    }

    /// Forget counters and the observed window. Budgets are kept.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.used.clear();
        state.rate_limit = RateLimitState::default();
    }
}

fn min_bounded(a: i64, b: i64) -> i64 {
    match (a, b) {
        (-1, other) | (other, -1) => other,
        (a, b) => a.min(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use chrono::Duration;

    fn ledger_with(job_type: JobType, max_requests: i64, reserve_requests: i64) -> BudgetLedger {
        BudgetLedger::new(HashMap::from([(
            job_type,
            JobBudget {
                max_requests,
                reserve_requests,
            },
        )]))
    }

    fn observed(remaining: i64, reset_at: DateTime<Utc>) -> RateLimitState {
        RateLimitState {
            limit: 5000,
            remaining,
            reset_at: Some(reset_at),
            resource: "core".to_string(),
        }
    }

    #[test]
    fn test_reserve_never_exceeds_max_requests() {
        let ledger = ledger_with(JobType::IMPORT, 3, 0);
        let now = Utc::now();

        let mut admitted = 0;
        for _ in 0..10 {
            if ledger.reserve(&JobType::IMPORT, now).is_ok() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 3);
        assert_eq!(ledger.budget_state(&JobType::IMPORT).used, 3);
        let err = ledger.reserve(&JobType::IMPORT, now).unwrap_err();
        match err {
            SyncError::BudgetExceeded(e) => {
                assert_eq!(e.used, 3);
                assert_eq!(e.max_requests, 3);
            }
            other => panic!("expected budget error, got {other:?}"),
        }
    }

    #[test]
    fn test_unlimited_budget_admits_everything() {
        let ledger = BudgetLedger::default();
        let now = Utc::now();
        for _ in 0..100 {
            ledger.reserve(&JobType::WEBHOOK, now).unwrap();
        }
        let state = ledger.budget_state(&JobType::WEBHOOK);
        assert_eq!(state.used, 100);
        assert_eq!(state.job_remaining, -1);
        assert_eq!(state.effective_remaining, -1);
    }

    #[test]
    fn test_reserve_pauses_when_quota_within_reserve() {
        let ledger = ledger_with(JobType::IMPORT, 0, 100);
        let now = Utc::now();
        let reset_at = now + Duration::minutes(10);
        ledger.set_rate_limit(observed(100, reset_at));

        match ledger.reserve(&JobType::IMPORT, now).unwrap_err() {
            SyncError::Pause(pause) => {
                assert_eq!(pause.resume_at, reset_at);
                assert_eq!(pause.job_type, JobType::IMPORT);
            }
            other => panic!("expected pause, got {other:?}"),
        }

        // Other job types without a reserve keep going.
        assert!(ledger.reserve(&JobType::SYNC, now).is_ok());
        // Once the window has reset the import may proceed again.
        assert!(ledger.reserve(&JobType::IMPORT, reset_at).is_ok());
    }

    #[test]
    fn test_zero_rate_limit_update_is_ignored() {
        let ledger = BudgetLedger::default();
        let first = observed(42, Utc::now());
        ledger.set_rate_limit(first.clone());
        ledger.set_rate_limit(RateLimitState::default());
        assert_eq!(ledger.current_rate_limit(), first);
    }

    #[test]
    fn test_effective_remaining_is_min_of_job_and_api() {
        let now = Utc::now();
        for max_requests in [0_i64, 1, 5, 50] {
            for used in [0_i64, 1, 5, 60] {
                for reserve in [0_i64, 10, 200] {
                    for remaining in [None, Some(0_i64), Some(5), Some(150), Some(5000)] {
                        let ledger = ledger_with(JobType::SYNC, max_requests, reserve);
                        {
                            let mut state = ledger.lock();
                            state.used.insert(JobType::SYNC, used);
                        }
                        if let Some(remaining) = remaining {
                            ledger.set_rate_limit(observed(remaining, now));
                        }

                        let state = ledger.budget_state(&JobType::SYNC);
                        let expected = match (state.job_remaining, state.api_remaining) {
                            (-1, -1) => -1,
                            (-1, api) => api,
                            (job, -1) => job,
                            (job, api) => job.min(api),
                        };
                        assert_eq!(state.effective_remaining, expected);
                        assert!(state.api_remaining >= -1);
                        if remaining.is_some() {
                            assert!(state.api_remaining >= 0);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_reset_clears_counters_and_window() {
        let ledger = ledger_with(JobType::SYNC, 1, 0);
        let now = Utc::now();
        ledger.set_rate_limit(observed(10, now));
        ledger.reserve(&JobType::SYNC, now).unwrap();
        assert!(ledger.reserve(&JobType::SYNC, now).is_err());

        ledger.reset();

        assert!(ledger.current_rate_limit().is_zero());
        assert!(ledger.reserve(&JobType::SYNC, now).is_ok());
    }

    #[test]
    fn test_job_type_round_trips_through_serde() {
        let parsed: JobType = serde_json::from_str("\"backfill\"").unwrap();
        assert_eq!(parsed, JobType::new("backfill"));
        assert_eq!(serde_json::to_string(&JobType::IMPORT).unwrap(), "\"import\"");
    }
}
