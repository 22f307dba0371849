//! System endpoints: health check and effective configuration.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::app_state::AppState;
use crate::config::DispatchParams;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    status: String,
    timestamp: String,
    version: String,
    persistence: bool,
    #[schema(value_type = Object)]
    stats: serde_json::Value,
}

/// `GET /health` — Service health status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Health check",
    description = "Returns service health status, version, the dispatch clock and live entity counts.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    )
)]
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: state.dispatch.now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            persistence: state.persistence.is_some(),
            stats: state.dispatch.stats().await,
        }),
    )
}

/// `GET /config/dispatch` — Effective dispatch parameters.
#[utoipa::path(
    get,
    path = "/config/dispatch",
    tag = "System",
    summary = "Dispatch parameters",
    description = "Fares, windows, thresholds and policies the core runs with.",
    responses(
        (status = 200, description = "Dispatch parameters", body = DispatchParams),
    )
)]
pub async fn dispatch_config_handler(State(state): State<AppState>) -> Json<DispatchParams> {
    Json(state.dispatch.params().clone())
}

/// System routes mounted at the root level (not under /api/v1).
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/config/dispatch", get(dispatch_config_handler))
}
