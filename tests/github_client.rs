mod common;

use common::{repo, spawn_mock_api};
use repo_stats::error::RepoStatsError;
use repo_stats::github::{GitHubClient, RepositoryMetadataService};
use repo_stats::models::RepoStats;
use repo_stats::policy::{InvocationPolicy, RetryDelay, TaskRunner};
use serde_json::json;
use std::time::{Duration, Instant};

fn get_test_token() -> Option<String> {
    std::env::var("GITHUB_TOKEN").ok()
}

#[tokio::test]
async fn test_github_client_creation() {
    let client = GitHubClient::new(Some("test_token".to_string()));
    assert!(client.is_ok());

    let client = client.unwrap();
    assert_eq!(client.base_url().as_str(), "https://api.github.com/");
}

#[tokio::test]
async fn test_invalid_base_url() {
    let result = GitHubClient::with_base_url("not a url", None);

    match result {
        Err(RepoStatsError::ConfigError(_)) => {}
        Err(other) => panic!("Expected ConfigError, got: {:?}", other),
        Ok(_) => panic!("Expected ConfigError, got a client"),
    }
}

#[tokio::test]
async fn test_get_repository_info() {
    let (base_url, state) = spawn_mock_api(json!({
        "full_name": "octocat/hello-world",
        "stargazers_count": 1000,
        "forks_count": 200,
        "open_issues_count": 3
    }))
    .await;
    let client = GitHubClient::with_base_url(&base_url, None).expect("Failed to create client");

    let stats = client
        .get_repository(&repo("octocat/hello-world"))
        .await
        .expect("Failed to get repository info");

    assert_eq!(stats.stars, 1000);
    assert_eq!(stats.forks, 200);
    assert_eq!(stats.open_issues_count, 3);
    assert_eq!(state.requests(), vec!["/repos/octocat/hello-world".to_string()]);
}

#[tokio::test]
async fn test_missing_field_is_malformed_response() {
    let (base_url, _state) = spawn_mock_api(json!({
        "stargazers_count": 1000,
        "open_issues_count": 3
    }))
    .await;
    let client = GitHubClient::with_base_url(&base_url, None).expect("Failed to create client");

    let result = client.get_repository(&repo("octocat/hello-world")).await;

    match result.unwrap_err() {
        RepoStatsError::MalformedResponse(msg) => assert!(msg.contains("forks_count"), "{}", msg),
        other => panic!("Expected MalformedResponse error, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_repository_not_found() {
    let (base_url, state) = spawn_mock_api(json!({})).await;
    *state.repo_status.lock().unwrap() = 404;
    let client = GitHubClient::with_base_url(&base_url, None).expect("Failed to create client");

    let result = client.get_repository(&repo("nonexistent/repository")).await;

    match result.unwrap_err() {
        RepoStatsError::NotFound(_) => {}
        other => panic!("Expected NotFound error, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_server_error_is_remote_unavailable() {
    let (base_url, state) = spawn_mock_api(json!({})).await;
    *state.repo_status.lock().unwrap() = 503;
    let client = GitHubClient::with_base_url(&base_url, None).expect("Failed to create client");

    let err = client
        .get_repository(&repo("octocat/hello-world"))
        .await
        .unwrap_err();

    assert!(matches!(err, RepoStatsError::RemoteUnavailable(_)), "{:?}", err);
    assert!(err.is_retryable());
    // The client leaves retrying to the runner
    assert_eq!(state.requests().len(), 1);
}

#[tokio::test]
async fn test_exhausted_rate_limit_far_from_reset() {
    let (base_url, state) = spawn_mock_api(json!({})).await;
    *state.repo_status.lock().unwrap() = 403;
    *state.rate_limit_remaining.lock().unwrap() = Some(0);
    let client = GitHubClient::with_base_url(&base_url, None).expect("Failed to create client");

    let err = client
        .get_repository(&repo("octocat/hello-world"))
        .await
        .unwrap_err();

    assert!(matches!(err, RepoStatsError::RateLimitExceeded(_)), "{:?}", err);
    assert!(client.rate_limit_state().is_limited);
}

#[tokio::test]
async fn test_rate_limit_reset_in_the_past_is_not_waited_on() {
    let (base_url, state) = spawn_mock_api(json!({})).await;
    *state.repo_status.lock().unwrap() = 403;
    *state.rate_limit_remaining.lock().unwrap() = Some(0);
    // Stale header or clock skew
    *state.rate_limit_reset_in.lock().unwrap() = -30;
    let client = GitHubClient::with_base_url(&base_url, None).expect("Failed to create client");

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        client.get_repository(&repo("octocat/hello-world")),
    )
    .await
    .expect("client kept waiting on an already-passed reset");

    let err = result.unwrap_err();
    assert!(matches!(err, RepoStatsError::RateLimitExceeded(_)), "{:?}", err);
    assert_eq!(state.requests().len(), 1);
}

#[tokio::test]
async fn test_short_rate_limit_wait_happens_once() {
    let (base_url, state) = spawn_mock_api(json!({})).await;
    *state.repo_status.lock().unwrap() = 429;
    *state.rate_limit_remaining.lock().unwrap() = Some(0);
    *state.rate_limit_reset_in.lock().unwrap() = 1;
    let client = GitHubClient::with_base_url(&base_url, None).expect("Failed to create client");

    let started = Instant::now();
    let result = tokio::time::timeout(
        Duration::from_secs(10),
        client.get_repository(&repo("octocat/hello-world")),
    )
    .await
    .expect("client waited more than once");

    let err = result.unwrap_err();
    assert!(matches!(err, RepoStatsError::RateLimitExceeded(_)), "{:?}", err);
    assert!(err.is_retryable());
    assert_eq!(state.requests().len(), 2);
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn test_short_rate_limit_wait_then_success() {
    let (base_url, state) = spawn_mock_api(json!({
        "full_name": "octocat/hello-world",
        "stargazers_count": 5,
        "forks_count": 1,
        "open_issues_count": 0
    }))
    .await;
    *state.repo_status.lock().unwrap() = 403;
    *state.rate_limit_remaining.lock().unwrap() = Some(0);
    *state.rate_limit_reset_in.lock().unwrap() = 1;
    let client = GitHubClient::with_base_url(&base_url, None).expect("Failed to create client");

    let reset = state.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        *reset.repo_status.lock().unwrap() = 200;
        *reset.rate_limit_remaining.lock().unwrap() = Some(60);
    });

    let stats = client
        .get_repository(&repo("octocat/hello-world"))
        .await
        .expect("Failed to get repository info after reset");

    assert_eq!(stats.stars, 5);
    assert_eq!(state.requests().len(), 2);
    assert!(!client.rate_limit_state().is_limited);
}

#[tokio::test]
async fn test_client_errors_are_rejected_without_retry() {
    let (base_url, state) = spawn_mock_api(json!({})).await;
    *state.repo_status.lock().unwrap() = 401;
    let client = GitHubClient::with_base_url(&base_url, Some("bad-token".to_string()))
        .expect("Failed to create client");
    let runner = TaskRunner::new(2);
    let policy = InvocationPolicy::none().with_retries(3, RetryDelay::Fixed(Duration::from_millis(5)));
    let target = repo("octocat/hello-world");

    let result: repo_stats::error::Result<RepoStats> = runner
        .invoke("fetch_repo_info", &target.to_string(), &policy, || client.get_repository(&target))
        .await;

    match result {
        Err(RepoStatsError::RequestRejected(msg)) => assert!(msg.contains("401"), "{}", msg),
        other => panic!("Expected RequestRejected error, got: {:?}", other),
    }
    assert_eq!(state.requests().len(), 1);

    *state.repo_status.lock().unwrap() = 422;
    let err = client.get_repository(&target).await.unwrap_err();
    assert!(matches!(err, RepoStatsError::RequestRejected(_)), "{:?}", err);
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_too_many_requests_without_headers_is_rate_limited() {
    let (base_url, state) = spawn_mock_api(json!({})).await;
    *state.repo_status.lock().unwrap() = 429;
    let client = GitHubClient::with_base_url(&base_url, None).expect("Failed to create client");

    let err = client
        .get_repository(&repo("octocat/hello-world"))
        .await
        .unwrap_err();

    assert!(matches!(err, RepoStatsError::RateLimitExceeded(_)), "{:?}", err);
    assert_eq!(state.requests().len(), 1);
}

#[tokio::test]
async fn test_list_open_issues_query() {
    let (base_url, state) = spawn_mock_api(json!({})).await;
    *state.rate_limit_remaining.lock().unwrap() = Some(42);
    let client = GitHubClient::with_base_url(&base_url, None).expect("Failed to create client");

    let issues = client
        .list_open_issues(&repo("octocat/hello-world"), 3, 25)
        .await
        .expect("Failed to list issues");

    assert_eq!(issues.len(), 2);
    assert_eq!(issues[0].id, 3000);
    assert_eq!(issues[0].reporter_user_id, 1);
    assert_eq!(issues[1].reporter_user_id, 2);
    assert_eq!(
        state.requests(),
        vec!["/repos/octocat/hello-world/issues?page=3&per_page=25&state=open".to_string()]
    );

    let rate_limit = client.rate_limit_state();
    assert_eq!(rate_limit.remaining, 42);
    assert_eq!(rate_limit.limit, 60);
    assert!(!rate_limit.is_limited);
}

#[tokio::test]
async fn test_invalid_page_size() {
    let client = GitHubClient::new(None).expect("Failed to create client");

    for per_page in [0, 101] {
        let result = client
            .list_open_issues(&repo("octocat/hello-world"), 1, per_page)
            .await;

        match result.unwrap_err() {
            RepoStatsError::InvalidPageSize(size) => assert_eq!(size, per_page),
            other => panic!("Expected InvalidPageSize error, got: {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_unreachable_host_is_remote_unavailable() {
    // Nothing listens on the discard port
    let client = GitHubClient::with_base_url("http://127.0.0.1:9", None).expect("Failed to create client");

    let err = client
        .get_repository(&repo("octocat/hello-world"))
        .await
        .unwrap_err();

    assert!(matches!(err, RepoStatsError::RemoteUnavailable(_)), "{:?}", err);
}

#[tokio::test]
#[ignore = "Requires valid GitHub token"]
async fn test_live_repository_info() {
    let token = get_test_token().expect("GITHUB_TOKEN not set");
    let client = GitHubClient::new(Some(token)).expect("Failed to create client");

    let stats = client
        .get_repository(&repo("rust-lang/rust"))
        .await
        .expect("Failed to get repository info");

    assert!(stats.stars > 0);
    assert!(stats.forks > 0);
}

#[tokio::test]
#[ignore = "Requires valid GitHub token"]
async fn test_live_open_issues_page() {
    let token = get_test_token().expect("GITHUB_TOKEN not set");
    let client = GitHubClient::new(Some(token)).expect("Failed to create client");

    let issues = client
        .list_open_issues(&repo("rust-lang/rust"), 1, 10)
        .await
        .expect("Failed to list issues");

    assert!(issues.len() <= 10);
    let rate_limit = client.rate_limit_state();
    assert!(rate_limit.remaining <= rate_limit.limit);
}
