//! Bearer-token middleware for the admin surface.
//!
//! Admin requests must carry a token this issuer signed, still inside its
//! lifetime, granting [`ADMIN_KEYS_SCOPE`]. Verification uses the ring's own
//! published keys, so a token signed just before a rotation keeps working.

use crate::errors::IssuerError;
use crate::services::SigningKeyRing;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::IntoResponse,
};
use chrono::Utc;
use common::jwks::{verify_signature, KeySet};
use common::jwt::{self, ClaimsRecord, DEFAULT_CLOCK_SKEW};
use std::sync::Arc;
use tracing::instrument;

/// Scope required to rotate signing keys.
pub const ADMIN_KEYS_SCOPE: &str = "admin:keys";

#[derive(Clone)]
pub struct AuthState {
    pub key_ring: Arc<SigningKeyRing>,
}

fn extract_bearer_token(req: &Request) -> Result<&str, IssuerError> {
    let auth_header = req
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::debug!(target: "issuer.middleware.auth", "Missing Authorization header");
            IssuerError::InvalidToken("Missing Authorization header".to_string())
        })?;

    auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        tracing::debug!(target: "issuer.middleware.auth", "Invalid Authorization header format");
        IssuerError::InvalidToken("Invalid Authorization header format".to_string())
    })
}

fn validate_admin_token(
    token: &str,
    key_ring: &SigningKeyRing,
) -> Result<ClaimsRecord, IssuerError> {
    let invalid =
        || IssuerError::InvalidToken("The access token is invalid or expired".to_string());
    let now = Utc::now();

    verify_signature(token, &KeySet::from_jwks(&key_ring.public_keys_at(now))).map_err(|e| {
        tracing::debug!(
            target: "issuer.middleware.auth",
            error = %e,
            "Admin token signature rejected"
        );
        invalid()
    })?;

    let claims = jwt::decode(token).map_err(|_| invalid())?;

    let skew = i64::try_from(DEFAULT_CLOCK_SKEW.as_secs()).unwrap_or(0);
    match claims.exp {
        Some(exp) if exp.saturating_add(skew) >= now.timestamp() => {}
        _ => {
            tracing::debug!(target: "issuer.middleware.auth", "Admin token expired");
            return Err(invalid());
        }
    }

    if let Some(iat) = claims.iat {
        jwt::validate_iat_at(iat, DEFAULT_CLOCK_SKEW, now.timestamp()).map_err(|_| invalid())?;
    }

    Ok(claims)
}

/// Require a valid issuer token with the `admin:keys` scope.
///
/// # Response
///
/// - 401 if the token is missing, unsigned by this issuer or expired
/// - 403 if the scope is missing
/// - otherwise continues with the `ClaimsRecord` in request extensions
#[instrument(skip_all, name = "issuer.middleware.admin_auth")]
pub async fn require_admin_scope(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, IssuerError> {
    let token = extract_bearer_token(&req)?;
    let claims = validate_admin_token(token, &state.key_ring)?;

    if !claims.has_scope(ADMIN_KEYS_SCOPE) {
        return Err(IssuerError::InsufficientScope {
            required: ADMIN_KEYS_SCOPE.to_string(),
            provided: claims
                .scope
                .as_deref()
                .unwrap_or_default()
                .split_whitespace()
                .map(ToString::to_string)
                .collect(),
        });
    }

    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}
