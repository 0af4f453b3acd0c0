use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Issue (or pull request) record from `GET /repos/{owner}/{repo}/issues`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitHubIssue {
    /// Issue number within the repository
    #[serde(default)]
    pub number: i64,
    /// Title of the issue
    #[serde(default)]
    pub title: String,
    /// Markdown body
    #[serde(default)]
    pub body: Option<String>,
    /// `open` or `closed`
    #[serde(default)]
    pub state: String,
    /// Browser URL of the issue or pull request
    #[serde(default)]
    pub html_url: Option<String>,
    /// Present only when the record is a pull request
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
    /// Author account
    #[serde(default)]
    pub user: Option<GitHubUser>,
    #[serde(default)]
    pub labels: Vec<GitHubLabel>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

impl GitHubIssue {
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubUser {
    pub login: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubLabel {
    pub name: String,
}

/// Branch record from `GET /repos/{owner}/{repo}/branches/{branch}`.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubBranch {
    pub name: String,
    pub commit: GitHubCommitRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubCommitRef {
    pub sha: String,
}

/// Body of `GET /rate_limit`.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitResponse {
    pub resources: RateLimitResources,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitResources {
    pub core: RateLimitResource,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitResource {
    pub limit: i64,
    pub remaining: i64,
    /// Reset time as a Unix epoch
    pub reset: i64,
}

/// Links for GitHub resources.
pub mod links {
    /// Browser URL for an issue.
    pub fn issue_url(repository_full_name: &str, number: i64) -> String {
        format!("https://github.com/{repository_full_name}/issues/{number}")
    }

    /// Browser URL for a pull request.
    pub fn pull_request_url(repository_full_name: &str, number: i64) -> String {
        format!("https://github.com/{repository_full_name}/pull/{number}")
    }
}
