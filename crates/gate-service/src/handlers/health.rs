//! Liveness and readiness checks.

use crate::auth::Freshness;
use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub jwks: &'static str,
    pub keys: usize,
}

/// Liveness check.
pub async fn health_check() -> &'static str {
    "OK"
}

/// Readiness check.
///
/// Not ready while the key set is expired or was never loaded, since every
/// check would fail closed with 401.
#[tracing::instrument(skip_all, name = "gate.health.readiness")]
pub async fn readiness_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let freshness = state.key_cache.freshness();
    let keys = state.key_cache.snapshot().map_or(0, |s| s.keys.len());

    let (status_code, status) = if freshness == Freshness::Expired {
        (StatusCode::SERVICE_UNAVAILABLE, "not_ready")
    } else {
        (StatusCode::OK, "ready")
    };

    (
        status_code,
        Json(ReadinessResponse {
            status,
            jwks: freshness.as_str(),
            keys,
        }),
    )
}
