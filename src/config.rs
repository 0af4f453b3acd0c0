use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::providers::github::{BudgetLedger, JobBudget, JobType};
use crate::retry::{RetryConfig, RetryPolicy};

/// Configuration file structure for ghsync.
///
/// Configuration files are loaded from the current directory or a specified
/// path. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub github: GitHubConfig,

    /// Request budgets keyed by job type (`sync`, `import`, `webhook`, ...)
    #[serde(default)]
    pub budgets: BTreeMap<String, JobBudget>,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub clone: CloneConfig,

    #[serde(default)]
    pub poller: PollerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GitHubConfig {
    /// GitHub personal access token
    pub token: Option<String>,

    /// GitHub API base URL
    #[serde(default = "default_github_base_url")]
    pub base_url: String,

    /// Sent as `User-Agent`; defaults to `ghsync/<version>`
    pub user_agent: Option<String>,

    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CloneConfig {
    /// Directory holding local mirrors; defaults to the user cache dir
    pub root: Option<PathBuf>,

    /// Git executable to run
    pub git_binary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PollerConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            base_url: default_github_base_url(),
            user_agent: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval_secs(),
        }
    }
}

fn default_github_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_secs() -> u64 {
    60
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./ghsync.toml
    /// 3. ./ghsync.json
    /// 4. ./ghsync.yaml
    /// 5. ./ghsync.yml
    ///
    /// Returns default configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::discover(Path::new(".")),
        }
    }

    /// Load the first candidate file found in `dir`.
    fn discover(dir: &Path) -> Result<Self> {
        let candidates = ["ghsync.toml", "ghsync.json", "ghsync.yaml", "ghsync.yml"];

        for candidate in &candidates {
            let path = dir.join(candidate);
            if path.exists() {
                return Self::load_from_path(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file path.
    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => toml::from_str(&contents)
                .or_else(|_| serde_json::from_str(&contents))
                .or_else(|_| serde_yaml::from_str(&contents))
                .with_context(|| format!("Failed to parse config file: {}", path.display())),
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)?,
            Some("yaml") | Some("yml") => serde_yaml::to_string(self)?,
            _ => toml::to_string_pretty(self)?,
        };

        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Ledger seeded with the configured budgets. Unlisted job types are unlimited.
    pub fn budget_ledger(&self) -> BudgetLedger {
        let budgets: HashMap<JobType, JobBudget> = self
            .budgets
            .iter()
            .map(|(name, budget)| (JobType::new(name.trim().to_lowercase()), *budget))
            .collect();
        BudgetLedger::new(budgets)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(&self.retry)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.github.timeout_secs.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poller.interval_secs.max(1))
    }

    /// Clone root from the config, else `<cache dir>/ghsync/repos`.
    pub fn clone_root(&self) -> PathBuf {
        self.clone.root.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("ghsync")
                .join("repos")
        })
    }

    pub fn git_binary(&self) -> &str {
        self.clone.git_binary.as_deref().unwrap_or("git")
    }
}
