//! In-memory store and client fakes for exercising the sync services.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::{HttpError, Result};

use super::store::{
    EnqueueGitHubSyncJobInput, GitHubSyncJob, IssueImportStore, IssueUpsert, ProjectIssue,
    ProjectIssueSyncCheckpoint, ProjectRepoBinding, RepoBindingPollStore, RepoBranchHeadClient,
    RepoCloneStateStore, RepoSyncJobEnqueuer, UpsertIssueInput, UpsertSyncCheckpointInput,
};

#[derive(Default)]
pub struct InMemoryIssueStore {
    issues: Mutex<BTreeMap<(Uuid, i64), ProjectIssue>>,
    checkpoints: Mutex<HashMap<(Uuid, String, String), ProjectIssueSyncCheckpoint>>,
}

impl InMemoryIssueStore {
    pub fn issue(&self, project_id: Uuid, number: i64) -> Option<ProjectIssue> {
        self.issues.lock().unwrap().get(&(project_id, number)).cloned()
    }

    pub fn checkpoints(&self) -> Vec<ProjectIssueSyncCheckpoint> {
        self.checkpoints.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl IssueImportStore for InMemoryIssueStore {
    async fn upsert_issue_from_github(&self, input: UpsertIssueInput) -> anyhow::Result<IssueUpsert> {
        let mut issues = self.issues.lock().unwrap();
        let key = (input.project_id, input.github_number);

        let incoming = ProjectIssue {
            id: issues.get(&key).map_or_else(Uuid::new_v4, |existing| existing.id),
            project_id: input.project_id,
            repository_full_name: input.repository_full_name,
            github_number: input.github_number,
            title: input.title,
            body: input.body,
            state: input.state,
            url: input.url,
            is_pull_request: input.is_pull_request,
            github_updated_at: input.github_updated_at,
        };

        let (created, changed) = match issues.get(&key) {
            None => (true, true),
            Some(existing) => (false, *existing != incoming),
        };
        issues.insert(key, incoming.clone());

        Ok(IssueUpsert {
            issue: incoming,
            created,
            changed,
        })
    }

    async fn upsert_sync_checkpoint(
        &self,
        input: UpsertSyncCheckpointInput,
    ) -> anyhow::Result<ProjectIssueSyncCheckpoint> {
        let checkpoint = ProjectIssueSyncCheckpoint {
            project_id: input.project_id,
            repository_full_name: input.repository_full_name,
            resource: input.resource,
            cursor: input.cursor,
            last_synced_at: input.last_synced_at,
        };
        self.checkpoints.lock().unwrap().insert(
            (
                checkpoint.project_id,
                checkpoint.repository_full_name.clone(),
                checkpoint.resource.clone(),
            ),
            checkpoint.clone(),
        );
        Ok(checkpoint)
    }
}

/// Records every clone-state update as `(project_id, branch, path)`.
#[derive(Default)]
pub struct RecordingCloneStateStore {
    updates: Mutex<Vec<(Uuid, String, String)>>,
}

impl RecordingCloneStateStore {
    pub fn updates(&self) -> Vec<(Uuid, String, String)> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl RepoCloneStateStore for RecordingCloneStateStore {
    async fn update_local_clone_state(
        &self,
        project_id: Uuid,
        default_branch: &str,
        local_repo_path: &str,
    ) -> anyhow::Result<ProjectRepoBinding> {
        self.updates.lock().unwrap().push((
            project_id,
            default_branch.to_string(),
            local_repo_path.to_string(),
        ));
        Ok(ProjectRepoBinding {
            id: Uuid::new_v4(),
            org_id: Uuid::nil(),
            project_id,
            repository_full_name: String::new(),
            default_branch: default_branch.to_string(),
            enabled: true,
            last_synced_sha: None,
            local_repo_path: Some(local_repo_path.to_string()),
            updated_at: Utc::now(),
        })
    }
}

#[derive(Default)]
pub struct StaticBindingStore {
    pub bindings: Vec<ProjectRepoBinding>,
    pub fail: bool,
}

#[async_trait]
impl RepoBindingPollStore for StaticBindingStore {
    async fn list_bindings_for_polling(&self) -> anyhow::Result<Vec<ProjectRepoBinding>> {
        if self.fail {
            bail!("binding store unavailable");
        }
        Ok(self.bindings.clone())
    }
}

/// Keeps enqueued jobs, failing for any project listed in `fail_for`.
#[derive(Default)]
pub struct RecordingEnqueuer {
    jobs: Mutex<Vec<EnqueueGitHubSyncJobInput>>,
    pub fail_for: Vec<Uuid>,
}

impl RecordingEnqueuer {
    pub fn failing_for(projects: Vec<Uuid>) -> Self {
        Self {
            jobs: Mutex::default(),
            fail_for: projects,
        }
    }

    pub fn jobs(&self) -> Vec<EnqueueGitHubSyncJobInput> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl RepoSyncJobEnqueuer for RecordingEnqueuer {
    async fn enqueue(&self, input: EnqueueGitHubSyncJobInput) -> anyhow::Result<GitHubSyncJob> {
        if input.project_id.is_some_and(|id| self.fail_for.contains(&id)) {
            return Err(anyhow!("queue rejected job for {:?}", input.project_id));
        }
        self.jobs.lock().unwrap().push(input.clone());
        Ok(GitHubSyncJob {
            id: Uuid::new_v4(),
            org_id: input.org_id,
            project_id: input.project_id,
            job_type: input.job_type,
            payload: input.payload,
            source_event_id: input.source_event_id,
            status: "queued".to_string(),
            attempt_count: 0,
            created_at: Utc::now(),
        })
    }
}

/// Branch heads keyed by `repo@branch`; unknown pairs answer 404.
#[derive(Default)]
pub struct FakeHeadClient {
    heads: Mutex<HashMap<String, String>>,
}

impl FakeHeadClient {
    pub fn set_head(&self, repo: &str, branch: &str, sha: &str) {
        self.heads
            .lock()
            .unwrap()
            .insert(format!("{repo}@{branch}"), sha.to_string());
    }
}

#[async_trait]
impl RepoBranchHeadClient for FakeHeadClient {
    async fn get_branch_head_sha(&self, repo_full_name: &str, branch: &str) -> Result<String> {
        self.heads
            .lock()
            .unwrap()
            .get(&format!("{repo_full_name}@{branch}"))
            .cloned()
            .ok_or_else(|| {
                HttpError {
                    status_code: 404,
                    body: "Branch not found".to_string(),
                }
                .into()
            })
    }
}
