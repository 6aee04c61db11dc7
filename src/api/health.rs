use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::config::StorageBackend;
use crate::controller::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    timestamp: chrono::DateTime<chrono::Utc>,
    checks: HealthChecks,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    forecast_endpoint: String,
    storage: &'static str,
    mirror: bool,
}

/// GET /health
///
/// Reports the wiring of this instance. The forecast service is not called.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let storage = match state.cfg.storage.backend {
        StorageBackend::Csv => "csv",
        StorageBackend::Postgres => "postgres",
    };
    let response = HealthResponse {
        status: "healthy",
        timestamp: chrono::Utc::now(),
        checks: HealthChecks {
            forecast_endpoint: state.cfg.forecast.endpoint_url.clone(),
            storage,
            mirror: state.pipeline.repos().mirror.is_some(),
        },
    };
    (StatusCode::OK, Json(response))
}

/// GET /health/live
pub async fn liveness_check() -> impl IntoResponse {
    StatusCode::OK
}
