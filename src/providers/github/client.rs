use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Method;
use serde::de::DeserializeOwned;
use url::Url;

use crate::auth::Token;
use crate::clock::{Clock, SystemClock};
use crate::error::{HttpError, RateLimitError, Result, SyncError};
use crate::metrics::SyncMetrics;
use crate::sync::RepoBranchHeadClient;

use super::budget::{BudgetLedger, BudgetState, JobType, RateLimitState};
use super::headers::{
    next_page, parse_rate_limit_headers, quota_exhausted, retry_after_for_rate_limit,
};
use super::types::{GitHubBranch, RateLimitResponse};

const GITHUB_ACCEPT: &str = "application/vnd.github+json";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_USER_AGENT: &str = concat!("ghsync/", env!("CARGO_PKG_VERSION"));

/// A request resolved against the client's base URL, ready for [`GitHubClient::send`].
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
}

/// Normalized outcome of a successful, non-throttled request.
#[derive(Debug, Clone)]
pub struct Response {
    pub status_code: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub rate_limit: RateLimitState,
    pub budget: BudgetState,
    /// Absolute URL of the next page, from `Link: rel="next"`.
    pub next_page: Option<String>,
}

impl Response {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// GitHub REST client that charges every call to a job type's budget.
///
/// Cheap to clone; clones share the ledger, metrics and connection pool.
#[derive(Clone)]
pub struct GitHubClient {
    /// HTTP client
    client: reqwest::Client,
    /// Base URL for the GitHub API, always ending in `/`
    base_url: Url,
    token: Option<Token>,
    ledger: Arc<BudgetLedger>,
    metrics: Arc<SyncMetrics>,
    clock: Arc<dyn Clock>,
}

impl GitHubClient {
    /// Create a new GitHub API client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - GitHub API base URL (e.g., "https://api.github.com")
    /// * `token` - Optional GitHub personal access token
    /// * `ledger` - Shared budget ledger consulted before every request
    /// * `metrics` - Shared observability registry
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Config` if the base URL is invalid or the HTTP
    /// client cannot be built.
    pub fn new(
        base_url: &str,
        token: Option<Token>,
        ledger: Arc<BudgetLedger>,
        metrics: Arc<SyncMetrics>,
    ) -> Result<Self> {
        Self::with_options(base_url, token, ledger, metrics, DEFAULT_TIMEOUT, None)
    }

    /// Like [`GitHubClient::new`] with an explicit request timeout and
    /// `User-Agent` (GitHub rejects requests without one).
    pub fn with_options(
        base_url: &str,
        token: Option<Token>,
        ledger: Arc<BudgetLedger>,
        metrics: Arc<SyncMetrics>,
        timeout: Duration,
        user_agent: Option<&str>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent.unwrap_or(DEFAULT_USER_AGENT))
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to create HTTP client: {e}")))?;

        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url =
            Url::parse(&base).map_err(|e| SyncError::Config(format!("Invalid base URL: {e}")))?;

        Ok(Self {
            client,
            base_url,
            token,
            ledger,
            metrics,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ledger(&self) -> &Arc<BudgetLedger> {
        &self.ledger
    }

    pub fn metrics(&self) -> &Arc<SyncMetrics> {
        &self.metrics
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Resolve `endpoint` (relative like `/repos/o/r` or absolute) into a request.
    pub fn new_request(&self, method: Method, endpoint: &str) -> Result<ApiRequest> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(SyncError::InvalidInput("endpoint is required".to_string()));
        }

        let url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            Url::parse(endpoint)
        } else {
            self.base_url.join(endpoint.trim_start_matches('/'))
        }
        .map_err(|e| SyncError::InvalidInput(format!("Invalid endpoint {endpoint}: {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(GITHUB_ACCEPT));

        Ok(ApiRequest {
            method,
            url,
            headers,
        })
    }

    /// Execute one request on behalf of `job_type`.
    ///
    /// The client never retries; callers feed errors to the retry policy.
    ///
    /// # Errors
    ///
    /// - `BudgetExceeded` / `Pause` before any network I/O when the ledger refuses
    /// - `RateLimit` for 429s and rate-limit flavoured 403s
    /// - `Http` for any other status >= 400
    /// - `Network` for transport failures
    pub async fn send(&self, job_type: &JobType, request: ApiRequest) -> Result<Response> {
        self.ledger.reserve(job_type, self.clock.now())?;
        self.metrics.record_request(job_type);

        debug!("{} {} ({job_type})", request.method, request.url);

        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token.as_str());
        }

        let response = builder.send().await?;
        let status_code = response.status().as_u16();
        let headers = response.headers().clone();

        // Quota headers count even if the body never arrives.
        let rate_limit = parse_rate_limit_headers(&headers);
        self.ledger.set_rate_limit(rate_limit.clone());
        self.metrics.record_quota(job_type, &rate_limit);

        let body = response.bytes().await?.to_vec();

        if let Some(secondary) = rate_limit_kind(status_code, &headers, &body) {
            let retry_after =
                retry_after_for_rate_limit(&headers, &rate_limit, secondary, self.clock.now());
            self.metrics.record_throttle(job_type, secondary);
            warn!(
                "GitHub throttled {job_type} (status {status_code}, secondary: {secondary}); retry in {}s",
                retry_after.as_secs()
            );
            return Err(RateLimitError {
                job_type: job_type.clone(),
                status_code,
                secondary,
                retry_after,
                rate_limit,
                body: String::from_utf8_lossy(&body).into_owned(),
            }
            .into());
        }

        if status_code >= 400 {
            return Err(HttpError {
                status_code,
                body: String::from_utf8_lossy(&body).into_owned(),
            }
            .into());
        }

        Ok(Response {
            status_code,
            next_page: next_page(&headers),
            headers,
            body,
            rate_limit,
            budget: self.ledger.budget_state(job_type),
        })
    }

    pub async fn get(&self, job_type: &JobType, endpoint: &str) -> Result<Response> {
        let request = self.new_request(Method::GET, endpoint)?;
        self.send(job_type, request).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, job_type: &JobType, endpoint: &str) -> Result<T> {
        self.get(job_type, endpoint).await?.json()
    }

    /// Ask GitHub for the core quota and record it in the ledger.
    pub async fn fetch_rate_limit(&self) -> Result<RateLimitState> {
        let body: RateLimitResponse = self.get_json(&JobType::SYNC, "/rate_limit").await?;
        let core = body.resources.core;
        let state = RateLimitState {
            limit: core.limit,
            remaining: core.remaining,
            reset_at: DateTime::from_timestamp(core.reset, 0),
            resource: "core".to_string(),
        };
        self.ledger.set_rate_limit(state.clone());
        Ok(state)
    }
}

/// `Some(secondary)` when the response is a rate-limit rejection.
fn rate_limit_kind(status_code: u16, headers: &HeaderMap, body: &[u8]) -> Option<bool> {
    let body = String::from_utf8_lossy(body).to_lowercase();
    let secondary = body.contains("secondary rate limit");

    match status_code {
        429 => Some(secondary),
        403 if secondary || body.contains("rate limit") || quota_exhausted(headers) => {
            Some(secondary)
        }
        _ => None,
    }
}

#[async_trait]
impl RepoBranchHeadClient for GitHubClient {
    async fn get_branch_head_sha(&self, repo_full_name: &str, branch: &str) -> Result<String> {
        let endpoint = format!("/repos/{}/branches/{}", repo_full_name.trim(), branch.trim());
        let branch: GitHubBranch = self.get_json(&JobType::SYNC, &endpoint).await?;
        let sha = branch.commit.sha.trim().to_string();
        if sha.is_empty() {
            return Err(SyncError::InvalidInput(format!(
                "branch {} of {repo_full_name} has no head commit",
                branch.name
            )));
        }
        Ok(sha)
    }
}
