use crate::actors::{RunSchedulerMessage, SchedulerStats};
use crate::models::RunRecord;
use crate::pipeline::Pipeline;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use ractor::ActorRef;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

const SCHEDULER_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health check response
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<SchedulerStats>,
}

/// Liveness probe response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessResponse {
    pub status: String,
}

/// Readiness probe response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Response to a manual trigger
#[derive(Debug, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub started: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub scheduler: ActorRef<RunSchedulerMessage>,
    pub pipeline: Arc<Pipeline>,
    pub start_time: Instant,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(health_check))
        .route("/livez", get(liveness_check))
        .route("/readyz", get(readiness_check))
        .route("/runs", get(list_runs).post(trigger_run))
        .route("/runs/latest", get(latest_run))
        .route("/cache", get(cache_stats).delete(clear_cache))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Serve the HTTP surface on `0.0.0.0:port` until the listener fails.
pub async fn start_server(state: AppState, port: u16) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("HTTP server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn scheduler_stats(state: &AppState, timeout: Duration) -> Option<SchedulerStats> {
    match state
        .scheduler
        .call(RunSchedulerMessage::GetStats, Some(timeout))
        .await
    {
        Ok(ractor::rpc::CallResult::Success(stats)) => Some(stats),
        Ok(_) => None,
        Err(e) => {
            error!("Failed to contact run scheduler: {}", e);
            None
        }
    }
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed().as_secs();
    let stats = scheduler_stats(&state, SCHEDULER_CALL_TIMEOUT).await;

    let (status, message) = match &stats {
        None => (HealthStatus::Unhealthy, Some("Run scheduler not responding".to_string())),
        Some(stats) if stats.last_run_succeeded == Some(false) => {
            (HealthStatus::Degraded, Some("Last pipeline run failed".to_string()))
        }
        Some(_) => (HealthStatus::Healthy, None),
    };

    let status_code = match status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    let response = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        message,
        stats,
    };

    (status_code, Json(response))
}

async fn liveness_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(LivenessResponse {
            status: "alive".to_string(),
        }),
    )
}

async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let ready = scheduler_stats(&state, Duration::from_secs(1)).await.is_some();

    let response = ReadinessResponse {
        ready,
        message: (!ready).then(|| "Run scheduler not responding".to_string()),
    };

    let status_code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(response))
}

fn scheduler_unavailable() -> axum::response::Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse {
            error: "Run scheduler not responding".to_string(),
        }),
    )
        .into_response()
}

async fn latest_run(State(state): State<AppState>) -> impl IntoResponse {
    match state
        .scheduler
        .call(RunSchedulerMessage::GetLatest, Some(SCHEDULER_CALL_TIMEOUT))
        .await
    {
        Ok(ractor::rpc::CallResult::Success(Some(record))) => (StatusCode::OK, Json(record)).into_response(),
        Ok(ractor::rpc::CallResult::Success(None)) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "No pipeline run has finished yet".to_string(),
            }),
        )
            .into_response(),
        _ => scheduler_unavailable(),
    }
}

async fn list_runs(State(state): State<AppState>) -> impl IntoResponse {
    match state
        .scheduler
        .call(RunSchedulerMessage::GetHistory, Some(SCHEDULER_CALL_TIMEOUT))
        .await
    {
        Ok(ractor::rpc::CallResult::Success(history)) => {
            (StatusCode::OK, Json::<Vec<RunRecord>>(history)).into_response()
        }
        _ => scheduler_unavailable(),
    }
}

async fn trigger_run(State(state): State<AppState>) -> impl IntoResponse {
    info!("HTTP API: manual run requested");

    match state
        .scheduler
        .call(RunSchedulerMessage::TriggerNow, Some(SCHEDULER_CALL_TIMEOUT))
        .await
    {
        Ok(ractor::rpc::CallResult::Success(true)) => (
            StatusCode::ACCEPTED,
            Json(TriggerResponse {
                started: true,
                message: "Pipeline run started".to_string(),
            }),
        )
            .into_response(),
        Ok(ractor::rpc::CallResult::Success(false)) => (
            StatusCode::CONFLICT,
            Json(TriggerResponse {
                started: false,
                message: "A pipeline run is already in progress".to_string(),
            }),
        )
            .into_response(),
        _ => scheduler_unavailable(),
    }
}

async fn cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.pipeline.runner().stats().await))
}

async fn clear_cache(State(state): State<AppState>) -> impl IntoResponse {
    info!("HTTP API: clearing result cache");
    state.pipeline.runner().clear_cache().await;
    StatusCode::NO_CONTENT
}
