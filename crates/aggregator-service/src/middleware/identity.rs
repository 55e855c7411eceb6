//! Caller identity for aggregation routes.
//!
//! The reverse proxy has already admitted the request through the edge
//! gate, so the token is decoded for identity but not re-verified.

use crate::errors::AggregatorError;
use crate::models::Identity;
use axum::{
    extract::Request,
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};

/// Token from `Authorization: Bearer <token>` (scheme case-insensitive).
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Decode the caller's token into an [`Identity`] request extension.
///
/// # Errors
///
/// `Unauthorized` when the header is missing or the token does not decode.
pub async fn require_identity(
    mut request: Request,
    next: Next,
) -> Result<Response, AggregatorError> {
    let token = extract_bearer_token(request.headers())
        .ok_or_else(|| AggregatorError::Unauthorized("Missing bearer token".to_string()))?;

    let identity = Identity::from_bearer(token).map_err(|e| {
        tracing::debug!(
            target: "aggregator.middleware.identity",
            error = ?e,
            "Bearer token did not decode"
        );
        AggregatorError::Unauthorized("Invalid bearer token".to_string())
    })?;

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}
