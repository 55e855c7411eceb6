//! Liveness and readiness checks.

use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub propagation_mode: &'static str,
}

/// Liveness check.
pub async fn health_check() -> &'static str {
    "OK"
}

/// Readiness check. Ready once the service token has been acquired.
#[tracing::instrument(skip_all, name = "aggregator.health.readiness")]
pub async fn readiness_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let (status_code, status) = if state.aggregator.has_service_token() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not_ready")
    };

    (
        status_code,
        Json(ReadinessResponse {
            status,
            propagation_mode: state.aggregator.propagation().as_str(),
        }),
    )
}
