use crate::error::{RepoStatsError, Result};
use crate::models::{Issue, RateLimitState, RepoName, RepoStats};
use crate::types::{GitHubIssue, GitHubRepo};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_API_URL: &str = "https://api.github.com";
/// Largest `per_page` the issues listing accepts
pub const MAX_PAGE_SIZE: u32 = 100;
const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

/// Read-only access to repository metadata and open issues.
#[async_trait]
pub trait RepositoryMetadataService: Send + Sync {
    async fn get_repository(&self, repo: &RepoName) -> Result<RepoStats>;

    async fn list_open_issues(&self, repo: &RepoName, page: u32, per_page: u32) -> Result<Vec<Issue>>;
}

pub struct GitHubClient {
    client: Client,
    base_url: Url,
    token: Option<String>,
    rate_limit: Mutex<RateLimitState>,
}

impl GitHubClient {
    pub fn new(token: Option<String>) -> Result<Self> {
        Self::with_base_url(DEFAULT_API_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: Option<String>) -> Result<Self> {
        // Url::join drops the last path segment unless the base ends with '/'
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized)
            .map_err(|e| RepoStatsError::ConfigError(format!("Invalid API URL {}: {}", normalized, e)))?;

        let client = Client::builder()
            .user_agent(concat!("repo-stats/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(GitHubClient {
            client,
            base_url,
            token: token.filter(|t| !t.is_empty()),
            rate_limit: Mutex::new(RateLimitState::default()),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Rate limit state observed on the most recent response
    pub fn rate_limit_state(&self) -> RateLimitState {
        match self.rate_limit.lock() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn repo_url(&self, repo: &RepoName, suffix: &str) -> Result<Url> {
        self.base_url
            .join(&format!("repos/{}/{}{}", repo.owner(), repo.name(), suffix))
            .map_err(|e| RepoStatsError::ConfigError(format!("Invalid request URL for {}: {}", repo, e)))
    }

    /// Sends a GET and maps the status. A rate limit that resets within
    /// `MAX_RATE_LIMIT_WAIT` is waited out once; anything beyond that is
    /// returned as `RateLimitExceeded` for the caller's retry policy.
    async fn make_request(&self, url: &Url) -> Result<Response> {
        let mut waited_for_reset = false;
        loop {
            let mut request = self
                .client
                .get(url.clone())
                .header("Accept", "application/vnd.github.v3+json");

            if let Some(token) = &self.token {
                request = request.header("Authorization", format!("Bearer {}", token));
            }

            let response = request
                .send()
                .await
                .map_err(|e| RepoStatsError::RemoteUnavailable(format!("{}: {}", url, e)))?;

            let rate_limit = Self::read_rate_limit(&response);
            self.record_rate_limit(&rate_limit);

            match response.status() {
                StatusCode::OK => {
                    if rate_limit.remaining < 10 {
                        warn!(remaining = rate_limit.remaining, "Rate limit running low");
                    }
                    return Ok(response);
                }
                StatusCode::NOT_FOUND => {
                    return Err(RepoStatsError::NotFound(format!("Resource not found: {}", url)));
                }
                StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS if rate_limit.is_limited => {
                    let reset_time = SystemTime::UNIX_EPOCH
                        + Duration::from_secs(rate_limit.reset_time.timestamp().max(0) as u64);
                    let wait_time = reset_time
                        .duration_since(SystemTime::now())
                        .unwrap_or(Duration::from_secs(0));

                    if waited_for_reset || wait_time.is_zero() || wait_time > MAX_RATE_LIMIT_WAIT {
                        return Err(RepoStatsError::RateLimitExceeded(format!(
                            "API rate limit exceeded. Reset at: {}",
                            rate_limit.reset_time
                        )));
                    }

                    warn!(wait_secs = wait_time.as_secs() + 1, "Rate limit reached, waiting for reset");
                    sleep(wait_time + Duration::from_secs(1)).await;
                    waited_for_reset = true;
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    return Err(RepoStatsError::RateLimitExceeded(format!("{} returned 429", url)));
                }
                status if status.is_client_error() => {
                    let error_text = response.text().await.unwrap_or_default();
                    return Err(RepoStatsError::RequestRejected(format!(
                        "{} returned {}: {}",
                        url, status, error_text
                    )));
                }
                status => {
                    let error_text = response.text().await.unwrap_or_default();
                    return Err(RepoStatsError::RemoteUnavailable(format!(
                        "{} returned {}: {}",
                        url, status, error_text
                    )));
                }
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T> {
        let response = self.make_request(url).await?;
        let body = response
            .text()
            .await
            .map_err(|e| RepoStatsError::RemoteUnavailable(format!("{}: {}", url, e)))?;

        serde_json::from_str(&body)
            .map_err(|e| RepoStatsError::MalformedResponse(format!("{}: {}", url, e)))
    }

    fn read_rate_limit(response: &Response) -> RateLimitState {
        let headers = response.headers();
        let header = |name: &str| headers.get(name).and_then(|h| h.to_str().ok());

        let remaining = header("X-RateLimit-Remaining").and_then(|s| s.parse::<u32>().ok());
        let limit = header("X-RateLimit-Limit")
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(60);
        let reset_time = header("X-RateLimit-Reset")
            .and_then(|s| s.parse::<i64>().ok())
            .and_then(|timestamp| DateTime::from_timestamp(timestamp, 0))
            .unwrap_or_else(|| Utc::now() + chrono::Duration::hours(1));

        RateLimitState {
            remaining: remaining.unwrap_or(limit),
            limit,
            reset_time,
            is_limited: remaining == Some(0),
        }
    }

    fn record_rate_limit(&self, state: &RateLimitState) {
        match self.rate_limit.lock() {
            Ok(mut current) => *current = state.clone(),
            Err(poisoned) => *poisoned.into_inner() = state.clone(),
        }
    }
}

#[async_trait]
impl RepositoryMetadataService for GitHubClient {
    async fn get_repository(&self, repo: &RepoName) -> Result<RepoStats> {
        let url = self.repo_url(repo, "")?;
        debug!(%url, "Fetching repository info");

        let repo_data: GitHubRepo = self.get_json(&url).await?;
        Ok(RepoStats::from(repo_data))
    }

    async fn list_open_issues(&self, repo: &RepoName, page: u32, per_page: u32) -> Result<Vec<Issue>> {
        if per_page == 0 || per_page > MAX_PAGE_SIZE {
            return Err(RepoStatsError::InvalidPageSize(per_page));
        }

        let mut url = self.repo_url(repo, "/issues")?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("per_page", &per_page.to_string())
            .append_pair("state", "open");
        debug!(%url, page, "Fetching open issues page");

        let issues: Vec<GitHubIssue> = self.get_json(&url).await?;
        Ok(issues.into_iter().map(Issue::from).collect())
    }
}
