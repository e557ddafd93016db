use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepoStatsError {
    #[error("Remote service unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Failed to collect issue page {page}: {source}")]
    PartialCollectionFailure {
        page: u32,
        #[source]
        source: Box<RepoStatsError>,
    },

    #[error("No issues to aggregate for {0}")]
    NoIssuesToAggregate(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Request rejected: {0}")]
    RequestRejected(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("Invalid repository name: {0}")]
    InvalidRepoName(String),

    #[error("Invalid page size: {0} (must be between 1 and 100)")]
    InvalidPageSize(u32),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Run cancelled: {0}")]
    Cancelled(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RepoStatsError {
    /// Whether a failed call may succeed if attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RepoStatsError::RemoteUnavailable(_)
                | RepoStatsError::RateLimitExceeded(_)
                | RepoStatsError::NetworkError(_)
        )
    }

    /// Page index for a partial collection failure.
    pub fn failed_page(&self) -> Option<u32> {
        match self {
            RepoStatsError::PartialCollectionFailure { page, .. } => Some(*page),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RepoStatsError>;
