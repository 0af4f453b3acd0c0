//! Local mirrors of GitHub repositories.
//!
//! Every (project, repository) pair maps to exactly one directory under the
//! clone root. [`RepoCloneManager::ensure_local_clone`] converges that
//! directory onto `origin/{branch}` regardless of what a previous run left
//! behind.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use log::{debug, info};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::process::Command;
use url::Url;
use uuid::Uuid;

use crate::error::{Result, SyncError};

use super::store::RepoCloneStateStore;

const GITHUB_HOST: &str = "github.com";
const DEFAULT_BRANCH: &str = "main";
const MAX_SLUG_LEN: usize = 80;

/// Where to clone from, after normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloneTarget {
    /// `owner/repo` for GitHub-hosted references, `None` for local paths.
    pub full_name: Option<String>,
    /// URL or path handed to `git clone`.
    pub clone_url: String,
}

/// Normalize a repository reference into a clone target.
///
/// Accepts `owner/repo`, `git@github.com:owner/repo[.git]`,
/// `https://github.com/owner/repo[.git]`, `file://` URLs and absolute paths.
/// GitHub references come back lower-cased.
pub fn resolve_repository_clone_target(repository: &str) -> Result<CloneTarget> {
    let reference = repository.trim();
    if reference.is_empty() {
        return Err(SyncError::InvalidInput("repository is required".to_string()));
    }

    if reference.starts_with("file://") || Path::new(reference).is_absolute() {
        return Ok(CloneTarget {
            full_name: None,
            clone_url: reference.to_string(),
        });
    }

    if let Some(path) = reference.strip_prefix("git@github.com:") {
        let full_name = owner_repo(path).ok_or_else(|| unsupported(reference))?;
        return Ok(CloneTarget {
            clone_url: format!("git@{GITHUB_HOST}:{full_name}.git"),
            full_name: Some(full_name),
        });
    }

    if reference.starts_with("https://") || reference.starts_with("http://") {
        let url = Url::parse(reference).map_err(|_| unsupported(reference))?;
        if !url
            .host_str()
            .is_some_and(|host| host.eq_ignore_ascii_case(GITHUB_HOST))
        {
            return Err(unsupported(reference));
        }
        let full_name = owner_repo(url.path()).ok_or_else(|| unsupported(reference))?;
        return Ok(CloneTarget {
            clone_url: format!("https://{GITHUB_HOST}/{full_name}.git"),
            full_name: Some(full_name),
        });
    }

    if reference.contains("://") || reference.contains(':') {
        return Err(unsupported(reference));
    }

    let full_name = owner_repo(reference).ok_or_else(|| unsupported(reference))?;
    Ok(CloneTarget {
        clone_url: format!("https://{GITHUB_HOST}/{full_name}.git"),
        full_name: Some(full_name),
    })
}

fn unsupported(reference: &str) -> SyncError {
    SyncError::InvalidInput(format!(
        "unsupported repository reference {reference:?}: expected owner/repo, a github.com URL, file:// or an absolute path"
    ))
}

/// Lower-cased `owner/repo` from a path like `/Owner/Repo.git`.
fn owner_repo(path: &str) -> Option<String> {
    let path = path.trim().trim_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    let mut parts = path.split('/');
    let (owner, repo) = (parts.next()?, parts.next()?);
    if parts.next().is_some() || !valid_segment(owner) || !valid_segment(repo) {
        return None;
    }
    Some(format!("{owner}/{repo}").to_lowercase())
}

fn valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Lower-case alphanumerics, everything else collapsed into single dashes.
fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    for c in value.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    let slug: String = slug.chars().take(MAX_SLUG_LEN).collect();
    match slug.trim_end_matches('-') {
        "" => "repo".to_string(),
        s => s.to_string(),
    }
}

fn short_hash(project_id: Uuid, repository: &str) -> String {
    let digest = Sha256::digest(format!("{project_id}|{repository}").to_lowercase().as_bytes());
    digest
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
        .chars()
        .take(6)
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnsureLocalCloneInput {
    pub project_id: String,
    pub repository: String,
    /// Branch to mirror; `main` when empty.
    pub default_branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnsureLocalCloneResult {
    pub project_id: Uuid,
    pub target: CloneTarget,
    pub repo_path: PathBuf,
    pub branch: String,
    /// A fresh `git clone` happened on this call.
    pub cloned: bool,
    pub head_sha: String,
}

pub struct RepoCloneManager {
    root: PathBuf,
    git_binary: String,
    store: Arc<dyn RepoCloneStateStore>,
}

impl RepoCloneManager {
    /// A relative `root` is resolved against the current directory once, here;
    /// git later runs with different working directories.
    pub fn new(root: impl Into<PathBuf>, store: Arc<dyn RepoCloneStateStore>) -> Self {
        let root = root.into();
        Self {
            root: std::path::absolute(&root).unwrap_or(root),
            git_binary: "git".to_string(),
            store,
        }
    }

    pub fn with_git_binary(mut self, git_binary: impl Into<String>) -> Self {
        self.git_binary = git_binary.into();
        self
    }

    /// Directory for a project's mirror: `{slug}-{hash6}` under the root.
    ///
    /// The hash covers the raw repository string, so references that
    /// slugify identically still land in different directories.
    pub fn repo_path(&self, project_id: Uuid, repository: &str) -> PathBuf {
        let repository = repository.trim();
        self.root.join(format!(
            "{}-{}",
            slugify(repository),
            short_hash(project_id, repository)
        ))
    }

    /// Clone or refresh the mirror and hard-reset it onto `origin/{branch}`.
    ///
    /// Any failing git command aborts the call with its combined output;
    /// the directory should then be considered in an unknown state.
    pub async fn ensure_local_clone(
        &self,
        input: EnsureLocalCloneInput,
    ) -> Result<EnsureLocalCloneResult> {
        let project_id = Uuid::parse_str(input.project_id.trim()).map_err(|_| {
            SyncError::InvalidInput(format!("project id {:?} is not a UUID", input.project_id))
        })?;
        let target = resolve_repository_clone_target(&input.repository)?;
        let branch = match input.default_branch.trim() {
            "" => DEFAULT_BRANCH.to_string(),
            b if b.starts_with('-') || b.contains("..") || b.contains(char::is_whitespace) => {
                return Err(SyncError::InvalidInput(format!("invalid branch name {b:?}")))
            }
            b => b.to_string(),
        };
        let repo_path = self.repo_path(project_id, &input.repository);

        let cloned = if repo_path.join(".git").exists() {
            debug!("Reusing existing clone at {}", repo_path.display());
            false
        } else if repo_path.exists() {
            return Err(SyncError::InvalidInput(format!(
                "{} exists but is not a git repository",
                repo_path.display()
            )));
        } else {
            tokio::fs::create_dir_all(&self.root).await?;
            info!("Cloning {} into {}", target.clone_url, repo_path.display());
            let dest = repo_path.to_string_lossy();
            self.git(
                &self.root,
                &["clone", "--", target.clone_url.as_str(), dest.as_ref()],
            )
            .await?;
            true
        };

        self.git(&repo_path, &["fetch", "--prune", "origin"]).await?;

        let remote = format!("origin/{branch}");
        if let Err(err) = self.git(&repo_path, &["checkout", branch.as_str()]).await {
            debug!("Plain checkout of {branch} failed, tracking origin instead: {err}");
            self.git(
                &repo_path,
                &["checkout", "-B", branch.as_str(), remote.as_str()],
            )
            .await?;
        }
        self.git(&repo_path, &["reset", "--hard", remote.as_str()])
            .await?;

        let head_sha = self.git(&repo_path, &["rev-parse", "HEAD"]).await?;

        self.store
            .update_local_clone_state(project_id, &branch, &repo_path.to_string_lossy())
            .await
            .map_err(SyncError::Store)?;

        info!(
            "{} is at {head_sha} on {branch} ({})",
            repo_path.display(),
            if cloned { "cloned" } else { "refreshed" }
        );

        Ok(EnsureLocalCloneResult {
            project_id,
            target,
            repo_path,
            branch,
            cloned,
            head_sha,
        })
    }

    /// Run git non-interactively in `cwd`, returning trimmed stdout.
    async fn git(&self, cwd: &Path, args: &[&str]) -> Result<String> {
        let command = format!("git {}", args.join(" "));
        debug!("Running `{command}` in {}", cwd.display());

        let output = Command::new(&self.git_binary)
            .args(args)
            .current_dir(cwd)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SyncError::Git {
                command: command.clone(),
                output: e.to_string(),
            })?;

        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(SyncError::Git {
                command,
                output: combined.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::RecordingCloneStateStore;
    use std::process::Command as StdCommand;
    use tempfile::TempDir;

    const PROJECT_ID: &str = "0b7e3a55-41a4-4c8e-9d0a-5cbe8d1f2e77";

    fn run(dir: &Path, args: &[&str]) -> String {
        let output = StdCommand::new("git")
            .args(["-c", "user.name=Sync Test", "-c", "user.email=sync@example.com"])
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    /// Origin repository with one commit on `main`.
    fn origin() -> TempDir {
        let dir = TempDir::new().unwrap();
        run(dir.path(), &["init", "--quiet"]);
        run(dir.path(), &["symbolic-ref", "HEAD", "refs/heads/main"]);
        std::fs::write(dir.path().join("README.md"), "hello\n").unwrap();
        run(dir.path(), &["add", "README.md"]);
        run(dir.path(), &["commit", "--quiet", "-m", "initial"]);
        dir
    }

    fn manager(root: &Path) -> (RepoCloneManager, Arc<RecordingCloneStateStore>) {
        let store = Arc::new(RecordingCloneStateStore::default());
        (RepoCloneManager::new(root, store.clone()), store)
    }

    #[test]
    fn test_resolve_github_references() {
        let cases = [
            ("Acme/Widgets", "https://github.com/acme/widgets.git"),
            ("git@github.com:Acme/Widgets.git", "git@github.com:acme/widgets.git"),
            ("git@github.com:acme/widgets", "git@github.com:acme/widgets.git"),
            ("https://github.com/Acme/Widgets", "https://github.com/acme/widgets.git"),
            ("https://GitHub.com/acme/widgets.git/", "https://github.com/acme/widgets.git"),
        ];
        for (input, expected) in cases {
            let target = resolve_repository_clone_target(input).unwrap();
            assert_eq!(target.clone_url, expected, "input {input}");
            assert_eq!(target.full_name.as_deref(), Some("acme/widgets"));
        }
    }

    #[test]
    fn test_resolve_local_references() {
        let target = resolve_repository_clone_target("/srv/git/widgets").unwrap();
        assert_eq!(target.clone_url, "/srv/git/widgets");
        assert_eq!(target.full_name, None);

        let target = resolve_repository_clone_target("file:///srv/git/Widgets").unwrap();
        assert_eq!(target.clone_url, "file:///srv/git/Widgets");
    }

    #[test]
    fn test_resolve_rejects_unsupported_references() {
        for input in [
            "",
            "widgets",
            "acme/widgets/extra",
            "https://gitlab.com/acme/widgets",
            "git@gitlab.com:acme/widgets.git",
            "ssh://github.com/acme/widgets",
            "acme/../widgets",
        ] {
            let err = resolve_repository_clone_target(input).unwrap_err();
            assert!(matches!(err, SyncError::InvalidInput(_)), "input {input:?}");
        }
    }

    #[test]
    fn test_repo_path_does_not_collide_on_similar_slugs() {
        let root = TempDir::new().unwrap();
        let (manager, _) = manager(root.path());
        let project_id = Uuid::parse_str(PROJECT_ID).unwrap();

        let dash = manager.repo_path(project_id, "owner/foo-bar");
        let underscore = manager.repo_path(project_id, "owner/foo_bar");
        assert_ne!(dash, underscore);

        let name = dash.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("owner-foo-bar-"), "{name}");
        assert_eq!(name.len(), "owner-foo-bar-".len() + 6);

        assert_eq!(dash, manager.repo_path(project_id, "Owner/Foo-Bar"));
        assert_ne!(dash, manager.repo_path(Uuid::new_v4(), "owner/foo-bar"));
        assert!(dash.starts_with(root.path()));
    }

    #[tokio::test]
    async fn test_ensure_local_clone_clones_then_fast_forwards() {
        let origin = origin();
        let root = TempDir::new().unwrap();
        let (manager, store) = manager(root.path());
        let repository = origin.path().to_string_lossy().into_owned();
        let input = EnsureLocalCloneInput {
            project_id: PROJECT_ID.to_string(),
            repository: repository.clone(),
            default_branch: String::new(),
        };

        let first = manager.ensure_local_clone(input.clone()).await.unwrap();
        assert!(first.cloned);
        assert_eq!(first.branch, "main");
        assert_eq!(first.head_sha, run(origin.path(), &["rev-parse", "HEAD"]));
        assert!(first.repo_path.join("README.md").exists());

        std::fs::write(origin.path().join("CHANGES.md"), "v2\n").unwrap();
        run(origin.path(), &["add", "CHANGES.md"]);
        run(origin.path(), &["commit", "--quiet", "-m", "second"]);
        // Local drift is discarded by the hard reset.
        std::fs::write(first.repo_path.join("README.md"), "local edit\n").unwrap();

        let second = manager.ensure_local_clone(input).await.unwrap();
        assert!(!second.cloned);
        assert_eq!(second.repo_path, first.repo_path);
        assert_eq!(second.head_sha, run(origin.path(), &["rev-parse", "HEAD"]));
        assert_eq!(
            std::fs::read_to_string(second.repo_path.join("README.md")).unwrap(),
            "hello\n"
        );

        let updates = store.updates();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].1, "main");
        assert_eq!(updates[0].2, first.repo_path.to_string_lossy());
    }

    #[tokio::test]
    async fn test_ensure_local_clone_tracks_new_remote_branch() {
        let origin = origin();
        run(origin.path(), &["branch", "release"]);
        let root = TempDir::new().unwrap();
        let (manager, _) = manager(root.path());

        let result = manager
            .ensure_local_clone(EnsureLocalCloneInput {
                project_id: PROJECT_ID.to_string(),
                repository: origin.path().to_string_lossy().into_owned(),
                default_branch: "release".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(result.branch, "release");
        assert_eq!(
            run(&result.repo_path, &["rev-parse", "--abbrev-ref", "HEAD"]),
            "release"
        );
    }

    #[tokio::test]
    async fn test_ensure_local_clone_falls_back_to_remote_tracking_checkout() {
        let origin = origin();
        let root = TempDir::new().unwrap();
        let (manager, _) = manager(root.path());
        let input = EnsureLocalCloneInput {
            project_id: PROJECT_ID.to_string(),
            repository: origin.path().to_string_lossy().into_owned(),
            default_branch: "main".to_string(),
        };
        let first = manager.ensure_local_clone(input.clone()).await.unwrap();

        // Without guessing, `git checkout release` cannot create the branch
        // from origin/release on its own.
        run(&first.repo_path, &["config", "checkout.guess", "false"]);
        run(origin.path(), &["checkout", "--quiet", "-b", "release"]);
        std::fs::write(origin.path().join("RELEASE.md"), "1.0\n").unwrap();
        run(origin.path(), &["add", "RELEASE.md"]);
        run(origin.path(), &["commit", "--quiet", "-m", "release"]);

        let result = manager
            .ensure_local_clone(EnsureLocalCloneInput {
                default_branch: "release".to_string(),
                ..input
            })
            .await
            .unwrap();

        assert!(!result.cloned);
        assert_eq!(result.head_sha, run(origin.path(), &["rev-parse", "release"]));
        assert_eq!(
            run(&result.repo_path, &["rev-parse", "--abbrev-ref", "HEAD"]),
            "release"
        );
        assert_eq!(
            run(&result.repo_path, &["rev-parse", "--abbrev-ref", "release@{upstream}"]),
            "origin/release"
        );
    }

    #[tokio::test]
    async fn test_ensure_local_clone_with_relative_root() {
        let origin = origin();
        let scratch = tempfile::Builder::new()
            .prefix("clone-root-")
            .tempdir_in(".")
            .unwrap();
        let relative = PathBuf::from(scratch.path().file_name().unwrap()).join("mirrors");
        assert!(relative.is_relative());
        let (manager, store) = manager(&relative);

        let result = manager
            .ensure_local_clone(EnsureLocalCloneInput {
                project_id: PROJECT_ID.to_string(),
                repository: origin.path().to_string_lossy().into_owned(),
                default_branch: "main".to_string(),
            })
            .await
            .unwrap();

        assert!(result.cloned);
        assert!(result.repo_path.is_absolute());
        assert!(result
            .repo_path
            .starts_with(std::env::current_dir().unwrap().join(&relative)));
        assert!(result.repo_path.join("README.md").exists());
        assert_eq!(store.updates()[0].2, result.repo_path.to_string_lossy());
    }

    #[tokio::test]
    async fn test_ensure_local_clone_refuses_non_git_directory() {
        let origin = origin();
        let root = TempDir::new().unwrap();
        let (manager, store) = manager(root.path());
        let repository = origin.path().to_string_lossy().into_owned();
        let project_id = Uuid::parse_str(PROJECT_ID).unwrap();

        let occupied = manager.repo_path(project_id, &repository);
        std::fs::create_dir_all(&occupied).unwrap();
        std::fs::write(occupied.join("notes.txt"), "keep me").unwrap();

        let err = manager
            .ensure_local_clone(EnsureLocalCloneInput {
                project_id: PROJECT_ID.to_string(),
                repository,
                default_branch: "main".to_string(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::InvalidInput(_)));
        assert!(occupied.join("notes.txt").exists());
        assert!(store.updates().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_local_clone_reports_git_output() {
        let origin = origin();
        let root = TempDir::new().unwrap();
        let (manager, store) = manager(root.path());

        let err = manager
            .ensure_local_clone(EnsureLocalCloneInput {
                project_id: PROJECT_ID.to_string(),
                repository: origin.path().to_string_lossy().into_owned(),
                default_branch: "does-not-exist".to_string(),
            })
            .await
            .unwrap_err();

        match err {
            SyncError::Git { command, output } => {
                assert!(command.contains("does-not-exist"), "{command}");
                assert!(!output.is_empty());
            }
            other => panic!("expected git error, got {other:?}"),
        }
        assert!(store.updates().is_empty());
    }
}
