use crate::observability::metrics::{record_jwks_request, set_published_keys};
use crate::routes::AppState;
use axum::{
    extract::State,
    http::header::{HeaderMap, HeaderValue, CACHE_CONTROL},
    Json,
};
use common::jwks::Jwks;
use std::sync::Arc;
use tracing::instrument;

/// Handle JWKS request
///
/// GET /.well-known/jwks.json
///
/// Returns every published public key (RFC 7517): the active key and any
/// retired key still inside its overlap window. Cacheable for 5 minutes,
/// well under the overlap window, so verifiers pick up a new key before
/// the old one disappears.
#[instrument(name = "issuer.jwks.get", skip_all, fields(keys))]
pub async fn handle_get_jwks(State(state): State<Arc<AppState>>) -> (HeaderMap, Json<Jwks>) {
    let jwks = state.key_ring.public_keys();

    tracing::Span::current().record("keys", jwks.keys.len());
    record_jwks_request();
    set_published_keys(jwks.keys.len());

    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=300"));

    (headers, Json(jwks))
}
