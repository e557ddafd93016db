use crate::error::{RepoStatsError, Result};
use crate::types::{GitHubIssue, GitHubRepo};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Repository identifier in `owner/name` form
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoName {
    owner: String,
    name: String,
}

impl RepoName {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let owner = owner.into();
        let name = name.into();
        let valid = |part: &str| !part.is_empty() && !part.contains('/') && !part.contains(char::is_whitespace);

        if !valid(&owner) || !valid(&name) {
            return Err(RepoStatsError::InvalidRepoName(format!("{}/{}", owner, name)));
        }

        Ok(Self { owner, name })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepoName {
    type Err = RepoStatsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().split_once('/') {
            Some((owner, name)) => RepoName::new(owner, name),
            None => Err(RepoStatsError::InvalidRepoName(format!(
                "expected owner/name, got: {}",
                s
            ))),
        }
    }
}

impl TryFrom<String> for RepoName {
    type Error = RepoStatsError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<RepoName> for String {
    fn from(value: RepoName) -> Self {
        value.full_name()
    }
}

impl fmt::Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Repository metadata sampled once per run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoStats {
    pub stars: u64,
    pub forks: u64,
    pub open_issues_count: u64,
}

impl From<GitHubRepo> for RepoStats {
    fn from(repo: GitHubRepo) -> Self {
        Self {
            stars: repo.stargazers_count,
            forks: repo.forks_count,
            open_issues_count: repo.open_issues_count,
        }
    }
}

/// Open issue as reported by one page of the issues listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Issue {
    pub id: u64,
    pub reporter_user_id: u64,
}

impl From<GitHubIssue> for Issue {
    fn from(issue: GitHubIssue) -> Self {
        Self {
            id: issue.id,
            reporter_user_id: issue.user.id,
        }
    }
}

/// The 1-based pages needed to cover `open_issues_count` issues at
/// `page_size` issues per page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequestSet {
    open_issues_count: u64,
    page_size: u32,
    num_pages: u32,
}

impl PageRequestSet {
    pub fn new(open_issues_count: u64, page_size: u32) -> Result<Self> {
        if page_size == 0 {
            return Err(RepoStatsError::InvalidPageSize(page_size));
        }

        let num_pages = u32::try_from(open_issues_count.div_ceil(u64::from(page_size)))
            .map_err(|_| {
                RepoStatsError::ConfigError(format!(
                    "{} issues at {} per page exceeds the addressable page range",
                    open_issues_count, page_size
                ))
            })?;

        Ok(Self {
            open_issues_count,
            page_size,
            num_pages,
        })
    }

    pub fn num_pages(&self) -> u32 {
        self.num_pages
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn open_issues_count(&self) -> u64 {
        self.open_issues_count
    }

    pub fn is_empty(&self) -> bool {
        self.num_pages == 0
    }

    pub fn pages(&self) -> impl Iterator<Item = u32> {
        1..=self.num_pages
    }
}

/// Aggregated statistics for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub repo: RepoName,
    pub stars: u64,
    pub forks: u64,
    pub open_issues_count: u64,
    pub issues_collected: usize,
    pub distinct_users: usize,
    pub avg_issues_per_user: f64,
}

/// What started a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Manual,
    Scheduled,
}

impl fmt::Display for RunTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunTrigger::Manual => write!(f, "manual"),
            RunTrigger::Scheduled => write!(f, "scheduled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded { summary: Summary },
    Failed { error: String },
    Cancelled,
}

/// Finished pipeline run, kept in the scheduler history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub repo: RepoName,
    pub trigger: RunTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
}

impl RunRecord {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, RunOutcome::Succeeded { .. })
    }

    pub fn summary(&self) -> Option<&Summary> {
        match &self.outcome {
            RunOutcome::Succeeded { summary } => Some(summary),
            _ => None,
        }
    }
}

/// Rate limit state reported by the last API response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitState {
    pub remaining: u32,
    pub limit: u32,
    pub reset_time: DateTime<Utc>,
    pub is_limited: bool,
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self {
            remaining: 60,
            limit: 60,
            reset_time: Utc::now() + chrono::Duration::hours(1),
            is_limited: false,
        }
    }
}
