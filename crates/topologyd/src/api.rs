//! HTTP API for health checks, Prometheus metrics, and the topology
//! description

use axum::{
    extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use topology_lib::{ResourceStatus, TopologyHandle};
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub handle: Arc<TopologyHandle>,
}

impl AppState {
    pub fn new(handle: Arc<TopologyHandle>) -> Self {
        Self { handle }
    }
}

/// Health check response - 200 while the topology is operational, 503
/// once any resource has failed
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.handle.status().health().await;

    let status_code = match health.status {
        ResourceStatus::Ready => StatusCode::OK,
        ResourceStatus::Creating | ResourceStatus::Degraded => StatusCode::OK, // still operational
        ResourceStatus::Failed => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness response body
#[derive(serde::Serialize)]
struct ReadinessResponse {
    ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

/// Readiness check response - 200 once every resource is ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.handle.status().health().await;

    let (status_code, response) = match health.status {
        ResourceStatus::Ready => (
            StatusCode::OK,
            ReadinessResponse {
                ready: true,
                reason: None,
            },
        ),
        other => (
            StatusCode::SERVICE_UNAVAILABLE,
            ReadinessResponse {
                ready: false,
                reason: Some(format!("topology is {}", other.as_str())),
            },
        ),
    };

    (status_code, Json(response))
}

/// Structural description of the provisioned topology
async fn topology(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.handle.describe().await)
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder.encode(&metric_families, &mut buffer).unwrap();

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/topology", get(topology))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
