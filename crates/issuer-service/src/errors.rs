use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IssuerError {
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Unsupported grant type")]
    UnsupportedGrantType,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Insufficient scope: required {required}, provided {provided:?}")]
    InsufficientScope {
        required: String,
        provided: Vec<String>,
    },

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IssuerError {
    /// HTTP status for this error, also used as the metrics label.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            IssuerError::InvalidCredentials | IssuerError::InvalidToken(_) => 401,
            IssuerError::UnsupportedGrantType | IssuerError::InvalidRequest(_) => 400,
            IssuerError::InsufficientScope { .. } => 403,
            IssuerError::Crypto(_) | IssuerError::Internal(_) => 500,
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
    #[serde(skip_serializing_if = "Option::is_none")]
    required_scope: Option<String>,
}

impl IntoResponse for IssuerError {
    fn into_response(self) -> Response {
        let (status, code, message, required_scope) = match &self {
            IssuerError::Crypto(detail) => {
                tracing::error!(target: "issuer.errors", error = %detail, "Cryptographic failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CRYPTO_ERROR",
                    "An internal cryptographic error occurred".to_string(),
                    None,
                )
            }
            IssuerError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "INVALID_CLIENT",
                "Invalid client credentials".to_string(),
                None,
            ),
            IssuerError::UnsupportedGrantType => (
                StatusCode::BAD_REQUEST,
                "UNSUPPORTED_GRANT_TYPE",
                "Only the client_credentials grant is supported on this endpoint".to_string(),
                None,
            ),
            IssuerError::InvalidRequest(reason) => (
                StatusCode::BAD_REQUEST,
                "INVALID_REQUEST",
                reason.clone(),
                None,
            ),
            IssuerError::InsufficientScope { required, .. } => (
                StatusCode::FORBIDDEN,
                "INSUFFICIENT_SCOPE",
                format!("Requires scope: {required}"),
                Some(required.clone()),
            ),
            IssuerError::InvalidToken(reason) => (
                StatusCode::UNAUTHORIZED,
                "INVALID_TOKEN",
                reason.clone(),
                None,
            ),
            IssuerError::Internal(detail) => {
                tracing::error!(target: "issuer.errors", error = %detail, "Internal error");
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
                required_scope,
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
