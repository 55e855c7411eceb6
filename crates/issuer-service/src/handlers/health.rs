//! Liveness and readiness checks.

use crate::models::ReadinessResponse;
use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;

/// Liveness check. Checks nothing beyond the process answering.
pub async fn health_check() -> &'static str {
    "OK"
}

/// Readiness check.
///
/// The ring always holds an active key once constructed, so readiness
/// reports which key is signing and how many are published.
#[tracing::instrument(skip_all, name = "issuer.health.readiness")]
pub async fn readiness_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let snapshot = state.key_ring.snapshot();
    let published = state.key_ring.public_keys().keys.len();

    (
        StatusCode::OK,
        Json(ReadinessResponse {
            status: "ready",
            active_kid: snapshot.active.kid.clone(),
            published_keys: published,
        }),
    )
}
