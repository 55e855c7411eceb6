//! Subrequest endpoint consulted by the reverse proxy.
//!
//! The proxy forwards the client's `Authorization` header (some proxies
//! rename it to `X-Original-Authorization`) and admits the request only on
//! 204. Bodies are always empty.

use crate::auth::gate::{STATUS_ADMIT, STATUS_UNAUTHORIZED};
use crate::observability::metrics::{record_auth_decision, set_jwks_freshness};
use crate::routes::AppState;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use common::policy::Verdict;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

pub const X_ORIGINAL_AUTHORIZATION: HeaderName =
    HeaderName::from_static("x-original-authorization");
pub const X_AUTH_SUBJECT: HeaderName = HeaderName::from_static("x-auth-subject");
pub const X_AUTH_CLIENT_ID: HeaderName = HeaderName::from_static("x-auth-client-id");

/// Raw credential from the request, or "" when neither header is present
/// or the value is not visible ASCII.
fn credential(headers: &HeaderMap) -> &str {
    headers
        .get(header::AUTHORIZATION)
        .or_else(|| headers.get(&X_ORIGINAL_AUTHORIZATION))
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

/// Any method on /auth
#[instrument(skip_all, name = "gate.auth.check")]
pub async fn handle_auth_check(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let start = Instant::now();
    let decision = state.gate.decide(credential(&headers));
    let status = decision.status();

    let (outcome, reason) = match decision.verdict {
        Verdict::Admit => ("admit", "none"),
        Verdict::Deny(reason) => ("deny", reason.as_str()),
    };
    record_auth_decision(outcome, reason, start.elapsed());
    set_jwks_freshness(state.key_cache.freshness());

    tracing::debug!(target: "gate.auth", outcome, reason, status, "Auth check complete");

    let mut response =
        StatusCode::from_u16(status).unwrap_or(StatusCode::UNAUTHORIZED).into_response();

    if status == STATUS_UNAUTHORIZED {
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    }

    if status == STATUS_ADMIT {
        if let Some(claims) = decision.claims {
            let identity = [
                (X_AUTH_SUBJECT, claims.sub),
                (X_AUTH_CLIENT_ID, Some(claims.client_id)),
            ];
            for (name, value) in identity {
                // Values that are not legal header text are dropped, not
                // escaped.
                if let Some(value) = value
                    .filter(|v| !v.is_empty())
                    .and_then(|v| HeaderValue::from_str(&v).ok())
                {
                    response.headers_mut().insert(name, value);
                }
            }
        }
    }

    response
}
