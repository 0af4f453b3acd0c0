//! Records and persistence interfaces the engine consumes.
//!
//! Storage lives elsewhere; these traits are the narrow seams it is reached
//! through. Store implementations report failures as `anyhow::Error`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectIssue {
    pub id: Uuid,
    pub project_id: Uuid,
    pub repository_full_name: String,
    pub github_number: i64,
    pub title: String,
    pub body: Option<String>,
    pub state: String,
    pub url: String,
    pub is_pull_request: bool,
    pub github_updated_at: Option<DateTime<Utc>>,
}

/// Upsert keyed by `(project_id, github_number)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertIssueInput {
    pub project_id: Uuid,
    pub repository_full_name: String,
    pub github_number: i64,
    pub title: String,
    pub body: Option<String>,
    pub state: String,
    pub url: String,
    pub is_pull_request: bool,
    pub author_login: Option<String>,
    pub labels: Vec<String>,
    pub github_created_at: Option<DateTime<Utc>>,
    pub github_updated_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueUpsert {
    pub issue: ProjectIssue,
    /// A new row was inserted.
    pub created: bool,
    /// An existing row's content was modified.
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectIssueSyncCheckpoint {
    pub project_id: Uuid,
    pub repository_full_name: String,
    /// Which remote collection this cursor belongs to, e.g. `issues`.
    pub resource: String,
    /// Next page URL; `None` when the walk ran to completion.
    pub cursor: Option<String>,
    pub last_synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertSyncCheckpointInput {
    pub project_id: Uuid,
    pub repository_full_name: String,
    pub resource: String,
    pub cursor: Option<String>,
    pub last_synced_at: DateTime<Utc>,
}

/// Link between a project and the GitHub repository it mirrors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRepoBinding {
    pub id: Uuid,
    pub org_id: Uuid,
    pub project_id: Uuid,
    pub repository_full_name: String,
    pub default_branch: String,
    pub enabled: bool,
    pub last_synced_sha: Option<String>,
    pub local_repo_path: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnqueueGitHubSyncJobInput {
    /// Tenant the job runs under.
    pub org_id: Uuid,
    pub project_id: Option<Uuid>,
    /// Job kind, e.g. `repo_sync`.
    pub job_type: String,
    pub payload: serde_json::Value,
    /// Dedup key; enqueueing the same id twice is a no-op for the queue.
    pub source_event_id: Option<String>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitHubSyncJob {
    pub id: Uuid,
    pub org_id: Uuid,
    pub project_id: Option<Uuid>,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub source_event_id: Option<String>,
    pub status: String,
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait IssueImportStore: Send + Sync {
    async fn upsert_issue_from_github(&self, input: UpsertIssueInput) -> anyhow::Result<IssueUpsert>;

    async fn upsert_sync_checkpoint(
        &self,
        input: UpsertSyncCheckpointInput,
    ) -> anyhow::Result<ProjectIssueSyncCheckpoint>;
}

#[async_trait]
pub trait RepoCloneStateStore: Send + Sync {
    async fn update_local_clone_state(
        &self,
        project_id: Uuid,
        default_branch: &str,
        local_repo_path: &str,
    ) -> anyhow::Result<ProjectRepoBinding>;
}

#[async_trait]
pub trait RepoBindingPollStore: Send + Sync {
    async fn list_bindings_for_polling(&self) -> anyhow::Result<Vec<ProjectRepoBinding>>;
}

#[async_trait]
pub trait RepoSyncJobEnqueuer: Send + Sync {
    async fn enqueue(&self, input: EnqueueGitHubSyncJobInput) -> anyhow::Result<GitHubSyncJob>;
}

/// Source of the current head commit of a remote branch.
#[async_trait]
pub trait RepoBranchHeadClient: Send + Sync {
    async fn get_branch_head_sha(&self, repo_full_name: &str, branch: &str) -> Result<String>;
}
