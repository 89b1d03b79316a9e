//! Health check endpoints.
//!
//! These endpoints are used by load balancers and orchestration systems
//! to determine if the service is healthy and ready to receive traffic.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status: "ok" or "degraded".
    pub status: String,
    pub service: String,
    pub version: String,
    /// Current timestamp (ISO 8601).
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<ComponentStatus>,
}

/// Individual component status.
#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    /// Status: "ok" or "unavailable".
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/livez", get(livez))
}

fn response(status: &str, store: Option<ComponentStatus>) -> HealthResponse {
    HealthResponse {
        status: status.to_string(),
        service: "registrar".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        store,
    }
}

/// Liveness without dependency checks.
async fn healthz() -> impl IntoResponse {
    Json(response("ok", None))
}

/// Readiness: 503 until the event store answers.
async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    match state.registrations().store().health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(response(
                "ok",
                Some(ComponentStatus {
                    status: "ok".to_string(),
                    message: None,
                }),
            )),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(response(
                "degraded",
                Some(ComponentStatus {
                    status: "unavailable".to_string(),
                    message: Some(e.to_string()),
                }),
            )),
        ),
    }
}

async fn livez() -> impl IntoResponse {
    StatusCode::OK
}
