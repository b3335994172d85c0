//! Health check handler.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use crowd_worker::StatusCounts;
use serde::Serialize;

use crate::state::AppState;

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    /// Whether the person detection model initialized
    pub model_loaded: bool,
    pub version: String,
    pub timestamp: String,
    pub tasks: StatusCounts,
    pub active_runners: usize,
}

/// Health check endpoint (liveness probe).
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        model_loaded: state.classifier.is_available(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        tasks: state.registry.status_counts().await,
        active_runners: state.executor.active_jobs(),
    })
}
