use serde::Deserialize;

// GitHub API response structures. Only the fields the pipeline reads are
// declared; a missing one fails deserialization.
#[derive(Debug, Deserialize)]
pub struct GitHubRepo {
    pub stargazers_count: u64,
    pub forks_count: u64,
    pub open_issues_count: u64,
    #[serde(default)]
    pub full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GitHubIssue {
    pub id: u64,
    pub user: GitHubIssueUser,
}

#[derive(Debug, Deserialize)]
pub struct GitHubIssueUser {
    pub id: u64,
    #[serde(default)]
    pub login: Option<String>,
}
