use crate::errors::IssuerError;
use crate::models::RotateKeyResponse;
use crate::observability::metrics::record_key_rotation;
use crate::routes::AppState;
use axum::{extract::State, Json};
use std::sync::Arc;
use tracing::instrument;

/// Handle key rotation
///
/// POST /api/v1/admin/keys/rotate
///
/// Requires `admin:keys` (enforced by middleware). The previous key stays
/// published for the overlap window.
#[instrument(skip_all, name = "issuer.admin.rotate")]
pub async fn handle_rotate_keys(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RotateKeyResponse>, IssuerError> {
    match state.key_ring.rotate() {
        Ok(kid) => {
            record_key_rotation("admin", "success");
            Ok(Json(RotateKeyResponse { kid }))
        }
        Err(e) => {
            record_key_rotation("admin", "error");
            Err(e)
        }
    }
}
