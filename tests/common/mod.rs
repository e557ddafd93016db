#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use repo_stats::error::{RepoStatsError, Result};
use repo_stats::github::RepositoryMetadataService;
use repo_stats::models::{Issue, RepoName, RepoStats};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn issue(id: u64, user: u64) -> Issue {
    Issue {
        id,
        reporter_user_id: user,
    }
}

pub fn repo(name: &str) -> RepoName {
    name.parse().expect("valid repo name")
}

/// In-memory metadata service with per-page delays and failures
#[derive(Default)]
pub struct FakeMetadataService {
    pub stats: Option<RepoStats>,
    pub pages: HashMap<u32, Vec<Issue>>,
    pub page_delays: HashMap<u32, Duration>,
    pub failing_pages: HashSet<u32>,
    pub repo_failures_remaining: AtomicU32,
    pub repo_calls: AtomicU32,
    pub page_calls: Mutex<HashMap<u32, u32>>,
    pub completion_order: Mutex<Vec<u32>>,
}

impl FakeMetadataService {
    pub fn new(stats: RepoStats) -> Self {
        Self {
            stats: Some(stats),
            ..Default::default()
        }
    }

    pub fn with_page(mut self, page: u32, issues: Vec<Issue>) -> Self {
        self.pages.insert(page, issues);
        self
    }

    pub fn with_page_delay(mut self, page: u32, delay: Duration) -> Self {
        self.page_delays.insert(page, delay);
        self
    }

    pub fn with_failing_page(mut self, page: u32) -> Self {
        self.failing_pages.insert(page);
        self
    }

    pub fn with_repo_failures(self, failures: u32) -> Self {
        self.repo_failures_remaining.store(failures, Ordering::SeqCst);
        self
    }

    pub fn calls_for_page(&self, page: u32) -> u32 {
        self.page_calls
            .lock()
            .expect("page_calls lock")
            .get(&page)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_page_calls(&self) -> u32 {
        self.page_calls.lock().expect("page_calls lock").values().sum()
    }

    pub fn completion_order(&self) -> Vec<u32> {
        self.completion_order.lock().expect("completion_order lock").clone()
    }
}

#[async_trait]
impl RepositoryMetadataService for FakeMetadataService {
    async fn get_repository(&self, repo: &RepoName) -> Result<RepoStats> {
        self.repo_calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.repo_failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.repo_failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(RepoStatsError::RemoteUnavailable(format!("{} returned 502", repo)));
        }

        self.stats
            .ok_or_else(|| RepoStatsError::NotFound(format!("Resource not found: {}", repo)))
    }

    async fn list_open_issues(&self, _repo: &RepoName, page: u32, _per_page: u32) -> Result<Vec<Issue>> {
        *self
            .page_calls
            .lock()
            .expect("page_calls lock")
            .entry(page)
            .or_insert(0) += 1;

        if let Some(delay) = self.page_delays.get(&page) {
            tokio::time::sleep(*delay).await;
        }

        if self.failing_pages.contains(&page) {
            return Err(RepoStatsError::RemoteUnavailable(format!("page {} returned 500", page)));
        }

        self.completion_order
            .lock()
            .expect("completion_order lock")
            .push(page);

        Ok(self.pages.get(&page).cloned().unwrap_or_default())
    }
}

/// Requests seen by the mock API, as `path?query`
#[derive(Clone, Default)]
pub struct MockApiState {
    pub requests: Arc<Mutex<Vec<String>>>,
    pub repo_body: Arc<Mutex<Value>>,
    pub repo_status: Arc<Mutex<u16>>,
    pub issues_status: Arc<Mutex<u16>>,
    pub rate_limit_remaining: Arc<Mutex<Option<u32>>>,
    /// Seconds from now reported in `x-ratelimit-reset`
    pub rate_limit_reset_in: Arc<Mutex<i64>>,
}

impl MockApiState {
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("requests lock").clone()
    }
}

/// Mock of the GitHub REST API bound to an ephemeral local port.
/// Returns the base URL and the shared state.
pub async fn spawn_mock_api(repo_body: Value) -> (String, MockApiState) {
    let state = MockApiState {
        requests: Arc::new(Mutex::new(Vec::new())),
        repo_body: Arc::new(Mutex::new(repo_body)),
        repo_status: Arc::new(Mutex::new(200)),
        issues_status: Arc::new(Mutex::new(200)),
        rate_limit_remaining: Arc::new(Mutex::new(None)),
        rate_limit_reset_in: Arc::new(Mutex::new(3600)),
    };

    let app = Router::new()
        .route("/repos/:owner/:name", get(mock_repo))
        .route("/repos/:owner/:name/issues", get(mock_issues))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock api");
    let addr = listener.local_addr().expect("mock api address");

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (format!("http://{}", addr), state)
}

fn rate_limit_headers(state: &MockApiState) -> Vec<(String, String)> {
    match *state.rate_limit_remaining.lock().expect("rate limit lock") {
        Some(remaining) => vec![
            ("x-ratelimit-remaining".to_string(), remaining.to_string()),
            ("x-ratelimit-limit".to_string(), "60".to_string()),
            (
                "x-ratelimit-reset".to_string(),
                (chrono::Utc::now().timestamp() + *state.rate_limit_reset_in.lock().expect("reset lock")).to_string(),
            ),
        ],
        None => Vec::new(),
    }
}

fn with_headers(status: StatusCode, headers: Vec<(String, String)>, body: Value) -> axum::response::Response {
    let mut response = (status, Json(body)).into_response();
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (
            axum::http::HeaderName::try_from(name),
            axum::http::HeaderValue::try_from(value),
        ) {
            response.headers_mut().insert(name, value);
        }
    }
    response
}

async fn mock_repo(
    State(state): State<MockApiState>,
    Path((owner, name)): Path<(String, String)>,
) -> axum::response::Response {
    state
        .requests
        .lock()
        .expect("requests lock")
        .push(format!("/repos/{}/{}", owner, name));

    let status = StatusCode::from_u16(*state.repo_status.lock().expect("status lock"))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = if status.is_success() {
        state.repo_body.lock().expect("body lock").clone()
    } else {
        json!({ "message": "mock failure" })
    };

    with_headers(status, rate_limit_headers(&state), body)
}

async fn mock_issues(
    State(state): State<MockApiState>,
    Path((owner, name)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let page: u64 = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    let per_page: u64 = params.get("per_page").and_then(|p| p.parse().ok()).unwrap_or(30);
    let issue_state = params.get("state").cloned().unwrap_or_default();

    state.requests.lock().expect("requests lock").push(format!(
        "/repos/{}/{}/issues?page={}&per_page={}&state={}",
        owner, name, page, per_page, issue_state
    ));

    let status = StatusCode::from_u16(*state.issues_status.lock().expect("status lock"))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if !status.is_success() {
        return with_headers(status, rate_limit_headers(&state), json!({ "message": "mock failure" }));
    }

    // Two issues per page: ids derived from the page, users alternate 1 and 2
    let issues: Vec<Value> = (0..2)
        .map(|i| {
            json!({
                "id": page * 1000 + i,
                "number": page * 10 + i,
                "state": "open",
                "user": { "id": i + 1, "login": format!("user{}", i + 1) }
            })
        })
        .collect();

    with_headers(StatusCode::OK, rate_limit_headers(&state), Value::Array(issues))
}
