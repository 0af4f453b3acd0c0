use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::json;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::error::{Result, SyncError};
use crate::metrics::{PollerSnapshot, SyncMetrics};

use super::store::{
    EnqueueGitHubSyncJobInput, ProjectRepoBinding, RepoBindingPollStore, RepoBranchHeadClient,
    RepoSyncJobEnqueuer,
};

pub const REPO_SYNC_JOB: &str = "repo_sync";
pub const POLL_REASON: &str = "poll_reconciler";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_BRANCH: &str = "main";

/// Source of poll ticks.
#[async_trait]
pub trait IntervalTicker: Send {
    /// Resolves when the next poll is due.
    async fn tick(&mut self);
}

/// Wall-clock ticker; the first tick fires immediately.
pub struct TokioTicker {
    interval: Interval,
}

impl TokioTicker {
    pub fn new(period: Duration) -> Self {
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

#[async_trait]
impl IntervalTicker for TokioTicker {
    async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    pub bindings_scanned: usize,
    /// Bindings whose remote head was fetched successfully.
    pub bindings_checked: usize,
    pub drift_detected: usize,
    pub jobs_enqueued: usize,
    pub enqueue_errors: usize,
}

/// Enqueues a `repo_sync` job whenever a binding's remote head moves.
pub struct RepoDriftPoller {
    store: Arc<dyn RepoBindingPollStore>,
    heads: Arc<dyn RepoBranchHeadClient>,
    enqueuer: Arc<dyn RepoSyncJobEnqueuer>,
    metrics: Arc<SyncMetrics>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl RepoDriftPoller {
    pub fn new(
        store: Arc<dyn RepoBindingPollStore>,
        heads: Arc<dyn RepoBranchHeadClient>,
        enqueuer: Arc<dyn RepoSyncJobEnqueuer>,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        Self {
            store,
            heads,
            enqueuer,
            metrics,
            clock: Arc::new(SystemClock),
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Poll on a wall-clock interval until `cancel` fires.
    pub async fn start(&self, cancel: CancellationToken) {
        self.start_with_ticker(TokioTicker::new(self.interval), cancel)
            .await;
    }

    /// Run one pass per tick until `cancel` fires.
    ///
    /// Cancellation is observed between passes; a pass in progress runs to
    /// completion.
    pub async fn start_with_ticker<T: IntervalTicker>(&self, mut ticker: T, cancel: CancellationToken) {
        info!("Repo drift poller started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.run_once().await {
                warn!("Repo drift poll failed: {e}");
            }
        }
        info!("Repo drift poller stopped");
    }

    /// One reconciliation pass over every binding.
    ///
    /// Bindings whose head cannot be fetched are skipped. Enqueue failures
    /// are counted and the pass continues. Only a failure to list bindings
    /// fails the pass. A snapshot is published to the metrics registry
    /// either way.
    pub async fn run_once(&self) -> Result<PollSummary> {
        let started_at = self.clock.now();
        let mut summary = PollSummary::default();
        let mut last_error = None;

        let outcome = match self.store.list_bindings_for_polling().await {
            Ok(bindings) => {
                for binding in bindings {
                    if let Err(e) = self.reconcile(&binding, started_at, &mut summary).await {
                        summary.enqueue_errors += 1;
                        warn!(
                            "Failed to enqueue {REPO_SYNC_JOB} for project {}: {e}",
                            binding.project_id
                        );
                        last_error = Some(e.to_string());
                    }
                }
                Ok(summary.clone())
            }
            Err(e) => {
                last_error = Some(e.to_string());
                Err(SyncError::Store(e))
            }
        };

        self.publish(&summary, started_at, outcome.is_ok(), last_error);

        if outcome.is_ok() {
            debug!(
                "Drift poll: {} scanned, {} checked, {} drifted, {} enqueued",
                summary.bindings_scanned,
                summary.bindings_checked,
                summary.drift_detected,
                summary.jobs_enqueued
            );
        }
        outcome
    }

    async fn reconcile(
        &self,
        binding: &ProjectRepoBinding,
        polled_at: DateTime<Utc>,
        summary: &mut PollSummary,
    ) -> anyhow::Result<()> {
        summary.bindings_scanned += 1;

        let repository = binding.repository_full_name.trim();
        if !binding.enabled || repository.is_empty() {
            return Ok(());
        }
        let branch = match binding.default_branch.trim() {
            "" => DEFAULT_BRANCH,
            b => b,
        };

        let head_sha = match self.heads.get_branch_head_sha(repository, branch).await {
            Ok(sha) => sha,
            Err(e) => {
                warn!("Skipping {repository}@{branch}: {e}");
                return Ok(());
            }
        };
        summary.bindings_checked += 1;

        let previous_sha = binding.last_synced_sha.as_deref().map(str::trim);
        if previous_sha.is_some_and(|sha| sha.eq_ignore_ascii_case(&head_sha)) {
            return Ok(());
        }
        summary.drift_detected += 1;

        info!(
            "{repository}@{branch} moved from {} to {head_sha}",
            previous_sha.unwrap_or("<never synced>")
        );

        self.enqueuer
            .enqueue(EnqueueGitHubSyncJobInput {
                org_id: binding.org_id,
                project_id: Some(binding.project_id),
                job_type: REPO_SYNC_JOB.to_string(),
                payload: json!({
                    "reason": POLL_REASON,
                    "project_id": binding.project_id,
                    "repository_full_name": repository,
                    "branch": branch,
                    "previous_sha": previous_sha,
                    "head_sha": head_sha,
                    "polled_at": polled_at,
                }),
                source_event_id: Some(dedup_key(binding, branch, &head_sha)),
                max_attempts: None,
            })
            .await?;
        summary.jobs_enqueued += 1;
        Ok(())
    }

    fn publish(
        &self,
        summary: &PollSummary,
        ran_at: DateTime<Utc>,
        succeeded: bool,
        last_error: Option<String>,
    ) {
        let previous = self.metrics.poller().unwrap_or_default();
        let errored = last_error.is_some();
        self.metrics.publish_poller(PollerSnapshot {
            bindings_scanned: summary.bindings_scanned,
            bindings_checked: summary.bindings_checked,
            drift_detected: summary.drift_detected,
            jobs_enqueued: summary.jobs_enqueued,
            enqueue_errors: summary.enqueue_errors,
            last_run_at: Some(ran_at),
            last_success_at: if succeeded {
                Some(ran_at)
            } else {
                previous.last_success_at
            },
            last_error_at: if errored {
                Some(ran_at)
            } else {
                previous.last_error_at
            },
            last_error: last_error.or(previous.last_error),
        });
    }
}

/// Queue dedup key; the same detected drift always maps to the same key.
fn dedup_key(binding: &ProjectRepoBinding, branch: &str, head_sha: &str) -> String {
    format!("poll:{}:{branch}:{head_sha}", binding.project_id)
}
