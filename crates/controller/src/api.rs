//! Management API: `/healthz`, `/readyz` and `/metrics`

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use controller_lib::{
    health::{ComponentStatus, HealthRegistry},
    observability::ControllerMetrics,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health: HealthRegistry,
    pub metrics: ControllerMetrics,
}

impl AppState {
    pub fn new(health: HealthRegistry, metrics: ControllerMetrics) -> Self {
        Self { health, metrics }
    }
}

/// Degraded collaborators still leave the controller live
fn liveness_code(status: ComponentStatus) -> StatusCode {
    if status.is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Phase, last tick and per-component status; 503 once the baseline failed
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = state.health.health().await;
    (liveness_code(report.status), Json(report))
}

/// 200 only while the detector loop runs in steady state
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health.readiness().await;
    let code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(readiness))
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the management API on an already bound listener
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "Starting API server");
    axum::serve(listener, create_router(state)).await?;
    Ok(())
}
