use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use clap::{Parser, Subcommand};
use log::{debug, info};
use serde::Serialize;
use uuid::Uuid;

use ghsync::auth::Token;
use ghsync::config::Config;
use ghsync::error::{HttpError, SyncError};
use ghsync::metrics::SyncMetrics;
use ghsync::providers::github::types::GitHubIssue;
use ghsync::providers::github::{
    BudgetState, GitHubClient, JobType, PaginationCheckpoint, RateLimitState,
};
use ghsync::sync::issues::issues_endpoint;
use ghsync::sync::store::{EnqueueGitHubSyncJobInput, GitHubSyncJob, ProjectRepoBinding};
use ghsync::sync::{
    EnsureLocalCloneInput, RepoBindingPollStore, RepoBranchHeadClient, RepoCloneManager,
    RepoCloneStateStore, RepoDriftPoller, RepoSyncJobEnqueuer,
};
use tokio_util::sync::CancellationToken;

use crate::output::{emit_json, print_done, print_pause};

#[derive(Parser)]
#[command(name = "ghsync")]
#[command(author, version, about = "GitHub synchronization engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file; defaults to ./ghsync.{toml,json,yaml,yml}
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[arg(long, global = true)]
    base_url: Option<String>,

    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[arg(short, long, global = true, default_value_t = false)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the core API quota
    RateLimit,

    /// Print the head commit of a branch
    Head {
        #[arg(short, long)]
        repo: String,

        #[arg(short, long, default_value = "main")]
        branch: String,
    },

    /// Fetch the next page of a repository's issues, resuming from a checkpoint file
    IssuesPage {
        #[arg(short, long)]
        repo: String,

        #[arg(long)]
        checkpoint: PathBuf,

        #[arg(short, long, default_value = "import")]
        job_type: String,
    },

    /// Clone or refresh a local mirror
    Clone {
        #[arg(short = 'P', long)]
        project: String,

        #[arg(short, long)]
        repo: String,

        #[arg(short, long, default_value = "main")]
        branch: String,

        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Watch bound repositories and report branch head drift
    Poll {
        /// JSON array of project repository bindings, re-read every pass
        #[arg(short, long)]
        bindings: PathBuf,

        /// Run a single pass and print its summary
        #[arg(long, default_value_t = false)]
        once: bool,
    },

    /// Show the retry decision for an HTTP status
    ClassifyStatus {
        status: u16,

        #[arg(short, long, default_value_t = 1)]
        attempt: u32,

        #[arg(short, long, default_value = "repo_sync")]
        job_type: String,
    },
}

#[derive(Serialize)]
struct PageReport {
    items: usize,
    next_url: Option<String>,
    rate_limit: RateLimitState,
    budget: BudgetState,
}

#[derive(Serialize)]
struct HeadReport<'a> {
    repository: &'a str,
    branch: &'a str,
    sha: String,
}

/// Clone state belongs to the platform's store; from the command line it is only logged.
struct LoggedCloneState;

#[async_trait]
impl RepoCloneStateStore for LoggedCloneState {
    async fn update_local_clone_state(
        &self,
        project_id: Uuid,
        default_branch: &str,
        local_repo_path: &str,
    ) -> anyhow::Result<ProjectRepoBinding> {
        info!("Project {project_id} mirrors {default_branch} at {local_repo_path}");
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

/// Bindings kept in a local JSON file.
struct BindingsFile(PathBuf);

#[async_trait]
impl RepoBindingPollStore for BindingsFile {
    async fn list_bindings_for_polling(&self) -> anyhow::Result<Vec<ProjectRepoBinding>> {
        let contents = tokio::fs::read_to_string(&self.0)
            .await
            .with_context(|| format!("Failed to read bindings: {}", self.0.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse bindings: {}", self.0.display()))
    }
}

/// The job queue lives in the platform; drift found from the command line is logged.
struct LoggedEnqueuer;

#[async_trait]
impl RepoSyncJobEnqueuer for LoggedEnqueuer {
    async fn enqueue(&self, input: EnqueueGitHubSyncJobInput) -> anyhow::Result<GitHubSyncJob> {
        info!(
            "{} for org {} ({}): {}",
            input.job_type,
            input.org_id,
            input.source_event_id.as_deref().unwrap_or("-"),
            input.payload
        );
        Ok(GitHubSyncJob {
            id: Uuid::new_v4(),
            org_id: input.org_id,
            project_id: input.project_id,
            job_type: input.job_type,
            payload: input.payload,
            source_event_id: input.source_event_id,
            status: "logged".to_string(),
            attempt_count: 0,
            created_at: Utc::now(),
        })
    }
}

impl Cli {
    fn client(&self, config: &Config) -> Result<GitHubClient> {
        let token = self
            .token
            .as_deref()
            .or(config.github.token.as_deref())
            .map(Token::from);
        let base_url = self.base_url.as_deref().unwrap_or(&config.github.base_url);

        Ok(GitHubClient::with_options(
            base_url,
            token,
            Arc::new(config.budget_ledger()),
            Arc::new(SyncMetrics::new()),
            config.request_timeout(),
            config.github.user_agent.as_deref(),
        )?)
    }

    fn emit<T: Serialize>(&self, value: &T) -> Result<()> {
        emit_json(value, self.output.as_deref(), self.pretty)
    }

    async fn execute_issues_page(
        &self,
        client: &GitHubClient,
        repo: &str,
        checkpoint_path: &Path,
        job_type: &str,
    ) -> Result<()> {
        let mut checkpoint: PaginationCheckpoint = if checkpoint_path.exists() {
            let contents = std::fs::read_to_string(checkpoint_path).with_context(|| {
                format!("Failed to read checkpoint: {}", checkpoint_path.display())
            })?;
            serde_json::from_str(&contents)?
        } else {
            PaginationCheckpoint::default()
        };

        let outcome = client
            .fetch_next_page(&JobType::new(job_type), &issues_endpoint(repo), &mut checkpoint)
            .await;

        std::fs::write(checkpoint_path, serde_json::to_string_pretty(&checkpoint)?)
            .with_context(|| format!("Failed to write checkpoint: {}", checkpoint_path.display()))?;

        match outcome {
            Ok(response) => {
                let issues: Vec<GitHubIssue> = response.json()?;
                self.emit(&PageReport {
                    items: issues.len(),
                    next_url: checkpoint.next_url.clone(),
                    rate_limit: response.rate_limit,
                    budget: response.budget,
                })?;
                if checkpoint.next_url.is_none() {
                    print_done(format!("All issue pages of {repo} fetched"));
                }
                Ok(())
            }
            Err(SyncError::Pause(pause)) => {
                print_pause(pause.resume_at, &pause.reason);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn execute(&self) -> Result<()> {
        let config = Config::load(self.config.as_deref())?;
        debug!("Loaded config: {} budgets", config.budgets.len());

        match &self.command {
            Commands::RateLimit => {
                let client = self.client(&config)?;
                let state = client.fetch_rate_limit().await?;
                self.emit(&state)
            }
            Commands::Head { repo, branch } => {
                let client = self.client(&config)?;
                let sha = client.get_branch_head_sha(repo, branch).await?;
                self.emit(&HeadReport {
                    repository: repo,
                    branch,
                    sha,
                })
            }
            Commands::IssuesPage {
                repo,
                checkpoint,
                job_type,
            } => {
                let client = self.client(&config)?;
                self.execute_issues_page(&client, repo, checkpoint, job_type)
                    .await
            }
            Commands::Clone {
                project,
                repo,
                branch,
                root,
            } => {
                let root = root.clone().unwrap_or_else(|| config.clone_root());
                let manager = RepoCloneManager::new(root, Arc::new(LoggedCloneState))
                    .with_git_binary(config.git_binary());
                let result = manager
                    .ensure_local_clone(EnsureLocalCloneInput {
                        project_id: project.clone(),
                        repository: repo.clone(),
                        default_branch: branch.clone(),
                    })
                    .await?;
                print_done(format!("{} at {}", result.repo_path.display(), result.head_sha));
                self.emit(&result)
            }
            Commands::Poll { bindings, once } => {
                let client = self.client(&config)?;
                let metrics = client.metrics().clone();
                let poller = RepoDriftPoller::new(
                    Arc::new(BindingsFile(bindings.clone())),
                    Arc::new(client),
                    Arc::new(LoggedEnqueuer),
                    metrics.clone(),
                )
                .with_interval(config.poll_interval());

                if *once {
                    let summary = poller.run_once().await?;
                    return self.emit(&summary);
                }

                let cancel = CancellationToken::new();
                let stop = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        stop.cancel();
                    }
                });
                poller.start(cancel).await;
                self.emit(&metrics.snapshot())
            }
            Commands::ClassifyStatus {
                status,
                attempt,
                job_type,
            } => {
                let err = SyncError::from(HttpError {
                    status_code: *status,
                    body: String::new(),
                });
                let decision =
                    config
                        .retry_policy()
                        .decide(job_type, *attempt, Some(&err), Utc::now());
                self.emit(&decision)
            }
        }
    }
}
