use std::sync::Arc;

use log::info;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::providers::github::types::{links, GitHubIssue};
use crate::providers::github::{GitHubClient, JobType, PaginationCheckpoint};

use super::store::{
    IssueImportStore, ProjectIssueSyncCheckpoint, UpsertIssueInput, UpsertSyncCheckpointInput,
};

pub const ISSUES_RESOURCE: &str = "issues";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportProjectInput {
    pub project_id: String,
    pub repository_full_name: String,
    /// Cursor from an earlier run; the walk starts from page one when absent.
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportProjectResult {
    pub project_id: Uuid,
    pub repository_full_name: String,
    pub pages: usize,
    pub imported: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub checkpoint: ProjectIssueSyncCheckpoint,
}

/// First page of a repository's issues, oldest update first.
pub fn issues_endpoint(repository_full_name: &str) -> String {
    format!(
        "/repos/{repository_full_name}/issues?state=all&sort=updated&direction=asc&per_page=100"
    )
}

/// Imports every issue and pull request of a repository into the project store.
pub struct IssueImporter {
    client: GitHubClient,
    store: Arc<dyn IssueImportStore>,
}

impl IssueImporter {
    pub fn new(client: GitHubClient, store: Arc<dyn IssueImportStore>) -> Self {
        Self { client, store }
    }

    /// Walk all pages and upsert each issue, then record a sync checkpoint.
    ///
    /// Any page failure aborts the import; the whole call must be repeated.
    /// Rerunning over unchanged remote data creates nothing and updates
    /// nothing.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for a malformed project id or empty repository name
    /// - any walker error (`Pause`, `RateLimit`, `Http`, ...)
    /// - `Store` when the store rejects an upsert or the checkpoint
    pub async fn import_project(&self, input: ImportProjectInput) -> Result<ImportProjectResult> {
        let project_id = Uuid::parse_str(input.project_id.trim()).map_err(|_| {
            SyncError::InvalidInput(format!("project id {:?} is not a UUID", input.project_id))
        })?;
        let repository_full_name = input.repository_full_name.trim().to_string();
        if repository_full_name.is_empty() {
            return Err(SyncError::InvalidInput(
                "repository full name is required".to_string(),
            ));
        }

        info!("Importing issues for {repository_full_name} into project {project_id}");

        let start_endpoint = issues_endpoint(&repository_full_name);
        let mut checkpoint = input
            .cursor
            .as_deref()
            .map(PaginationCheckpoint::resume_from)
            .unwrap_or_default();

        let mut result = ImportProjectResult {
            project_id,
            repository_full_name: repository_full_name.clone(),
            pages: 0,
            imported: 0,
            updated: 0,
            unchanged: 0,
            skipped: 0,
            checkpoint: ProjectIssueSyncCheckpoint {
                project_id,
                repository_full_name: repository_full_name.clone(),
                resource: ISSUES_RESOURCE.to_string(),
                cursor: None,
                last_synced_at: self.client.clock().now(),
            },
        };

        loop {
            let response = self
                .client
                .fetch_next_page(&JobType::IMPORT, &start_endpoint, &mut checkpoint)
                .await?;
            let issues: Vec<GitHubIssue> = response.json()?;
            result.pages += 1;

            for issue in issues {
                let Some(upsert) = upsert_input(project_id, &repository_full_name, issue) else {
                    result.skipped += 1;
                    continue;
                };

                let outcome = self
                    .store
                    .upsert_issue_from_github(upsert)
                    .await
                    .map_err(SyncError::Store)?;

                if outcome.created {
                    result.imported += 1;
                } else if outcome.changed {
                    result.updated += 1;
                } else {
                    result.unchanged += 1;
                }
            }

            info!(
                "Page {} of {repository_full_name}: {} imported, {} updated so far",
                result.pages, result.imported, result.updated
            );

            if checkpoint.next_url.is_none() {
                break;
            }
        }

        result.checkpoint = self
            .store
            .upsert_sync_checkpoint(UpsertSyncCheckpointInput {
                project_id,
                repository_full_name: repository_full_name.clone(),
                resource: ISSUES_RESOURCE.to_string(),
                cursor: checkpoint.next_url.clone(),
                last_synced_at: self.client.clock().now(),
            })
            .await
            .map_err(SyncError::Store)?;

        info!(
            "Imported {repository_full_name}: {} pages, {} new, {} updated, {} unchanged, {} skipped",
            result.pages, result.imported, result.updated, result.unchanged, result.skipped
        );

        Ok(result)
    }
}

/// Map a GitHub record to an upsert, or `None` if it is not importable.
fn upsert_input(
    project_id: Uuid,
    repository_full_name: &str,
    issue: GitHubIssue,
) -> Option<UpsertIssueInput> {
    let title = issue.title.trim();
    if issue.number <= 0 || title.is_empty() {
        return None;
    }

    let is_pull_request = issue.is_pull_request();
    let url = issue
        .html_url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(String::from)
        .unwrap_or_else(|| {
            if is_pull_request {
                links::pull_request_url(repository_full_name, issue.number)
            } else {
                links::issue_url(repository_full_name, issue.number)
            }
        });

    let state = match issue.state.trim() {
        "" => "open".to_string(),
        state => state.to_lowercase(),
    };

    Some(UpsertIssueInput {
        project_id,
        repository_full_name: repository_full_name.to_string(),
        github_number: issue.number,
        title: title.to_string(),
        body: issue.body,
        state,
        url,
        is_pull_request,
        author_login: issue.user.map(|u| u.login),
        labels: issue.labels.into_iter().map(|l| l.name).collect(),
        github_created_at: issue.created_at,
        github_updated_at: issue.updated_at,
        closed_at: issue.closed_at,
    })
}
