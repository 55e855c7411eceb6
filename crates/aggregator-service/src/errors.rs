use crate::models::{AggregationResult, FailureKind};
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A required target failed. `partial` holds every target's outcome.
    #[error("Required target '{target}' failed: {kind}")]
    RequiredTargetFailed {
        target: String,
        kind: FailureKind,
        partial: AggregationResult,
    },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AggregatorError {
    /// HTTP status for this error, also used as the metrics label.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            AggregatorError::InvalidRequest(_) => 400,
            AggregatorError::Unauthorized(_) => 401,
            AggregatorError::RequiredTargetFailed { .. } => 502,
            AggregatorError::HttpClient(_) | AggregatorError::Internal(_) => 500,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    /// Per-target failures when a required target failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    failures: Option<BTreeMap<String, FailureKind>>,
}

impl IntoResponse for AggregatorError {
    fn into_response(self) -> Response {
        let (status, code, message, failures) = match &self {
            AggregatorError::InvalidRequest(reason) => (
                StatusCode::BAD_REQUEST,
                "INVALID_REQUEST",
                reason.clone(),
                None,
            ),
            AggregatorError::Unauthorized(reason) => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                reason.clone(),
                None,
            ),
            AggregatorError::RequiredTargetFailed {
                target, partial, ..
            } => (
                StatusCode::BAD_GATEWAY,
                "UPSTREAM_FAILED",
                format!("Required service '{target}' is unavailable"),
                Some(partial.failures()),
            ),
            AggregatorError::HttpClient(detail) | AggregatorError::Internal(detail) => {
                tracing::error!(target: "aggregator.errors", error = %detail, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code,
                message,
                failures,
            },
        };

        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::CallOutcome;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_required_target_failed_response() {
        let mut partial = AggregationResult::default();
        partial.insert("students".to_string(), CallOutcome::Failure(FailureKind::Timeout));
        partial.insert("grades".to_string(), CallOutcome::Success(serde_json::json!({})));

        let error = AggregatorError::RequiredTargetFailed {
            target: "students".to_string(),
            kind: FailureKind::Timeout,
            partial,
        };
        assert_eq!(error.status_code(), 502);

        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "UPSTREAM_FAILED");
        assert_eq!(body["error"]["failures"], serde_json::json!({"students": "timeout"}));
    }

    #[tokio::test]
    async fn test_unauthorized_response() {
        let response =
            AggregatorError::Unauthorized("Missing bearer token".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers().get(header::WWW_AUTHENTICATE).unwrap(), "Bearer");
        let body = body_json(response).await;
        assert_eq!(body["error"]["message"], "Missing bearer token");
    }

    #[tokio::test]
    async fn test_internal_error_is_generic() {
        let response = AggregatorError::Internal("pool exhausted".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"]["message"], "An internal error occurred");
    }
}
