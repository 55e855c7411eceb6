use crate::errors::IssuerError;
use crate::models::{ServiceTokenRequest, TokenResponse, UserTokenRequest};
use crate::routes::AppState;
use crate::services::token_service::CLIENT_CREDENTIALS_GRANT;
use axum::{
    async_trait,
    extract::{FromRequest, Request, State},
    http::{header::CONTENT_TYPE, HeaderMap},
    Form, Json,
};
use base64::{engine::general_purpose, Engine as _};
use common::secret::SecretString;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::instrument;

/// Body extractor accepting `application/json` or
/// `application/x-www-form-urlencoded`.
///
/// OAuth clients conventionally post forms; JSON is accepted for tooling.
pub struct FormOrJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for FormOrJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = IssuerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));

        if is_json {
            let Json(value) = Json::<T>::from_request(req, state)
                .await
                .map_err(|e| IssuerError::InvalidRequest(e.body_text()))?;
            Ok(Self(value))
        } else {
            let Form(value) = Form::<T>::from_request(req, state)
                .await
                .map_err(|e| IssuerError::InvalidRequest(e.body_text()))?;
            Ok(Self(value))
        }
    }
}

/// Handle service token request (OAuth 2.0 Client Credentials)
///
/// POST /api/v1/auth/service/token
///
/// Accepts credentials via:
/// - HTTP Basic Auth (preferred)
/// - Request body (`client_id`, `client_secret`)
#[instrument(skip_all, name = "issuer.token.service_request")]
pub async fn handle_service_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    FormOrJson(payload): FormOrJson<ServiceTokenRequest>,
) -> Result<Json<TokenResponse>, IssuerError> {
    if payload.grant_type != CLIENT_CREDENTIALS_GRANT {
        return Err(IssuerError::UnsupportedGrantType);
    }

    let (client_id, client_secret) = extract_client_credentials(&headers, &payload)?;

    let requested_scopes = payload.scope.as_deref().map(|s| {
        s.split_whitespace()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
    });

    let token = state
        .token_service
        .issue_service_token(&client_id, client_secret, requested_scopes)
        .await?;

    Ok(Json(token))
}

/// Handle user token request (password grant)
///
/// POST /api/v1/auth/user/token
#[instrument(skip_all, name = "issuer.token.user_request")]
pub async fn handle_user_token(
    State(state): State<Arc<AppState>>,
    FormOrJson(payload): FormOrJson<UserTokenRequest>,
) -> Result<Json<TokenResponse>, IssuerError> {
    let token = state
        .token_service
        .issue_user_token(&payload.username, SecretString::from(payload.password))
        .await?;

    Ok(Json(token))
}

/// Extract client credentials from the Basic Auth header or request body.
fn extract_client_credentials(
    headers: &HeaderMap,
    payload: &ServiceTokenRequest,
) -> Result<(String, SecretString), IssuerError> {
    if let Some(auth_header) = headers.get("authorization") {
        let auth_str = auth_header
            .to_str()
            .map_err(|_| IssuerError::InvalidCredentials)?;

        if let Some(basic_auth) = auth_str.strip_prefix("Basic ") {
            let decoded = general_purpose::STANDARD
                .decode(basic_auth.trim())
                .map_err(|_| IssuerError::InvalidCredentials)?;

            let credentials =
                String::from_utf8(decoded).map_err(|_| IssuerError::InvalidCredentials)?;

            return match credentials.split_once(':') {
                Some((id, secret)) if !id.is_empty() => {
                    Ok((id.to_string(), SecretString::from(secret)))
                }
                _ => Err(IssuerError::InvalidCredentials),
            };
        }
    }

    match (&payload.client_id, &payload.client_secret) {
        (Some(id), Some(secret)) => Ok((id.clone(), SecretString::from(secret.as_str()))),
        _ => Err(IssuerError::InvalidCredentials),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use common::secret::ExposeSecret;

    fn body(client_id: Option<&str>, client_secret: Option<&str>) -> ServiceTokenRequest {
        ServiceTokenRequest {
            grant_type: CLIENT_CREDENTIALS_GRANT.to_string(),
            client_id: client_id.map(ToString::to_string),
            client_secret: client_secret.map(ToString::to_string),
            scope: None,
        }
    }

    fn basic(raw: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let value = format!("Basic {}", general_purpose::STANDARD.encode(raw));
        headers.insert("authorization", HeaderValue::from_str(&value).unwrap());
        headers
    }

    #[test]
    fn test_basic_auth_preferred_over_body() {
        let (id, secret) =
            extract_client_credentials(&basic("svc:pa:ss"), &body(Some("other"), Some("x")))
                .unwrap();

        assert_eq!(id, "svc");
        assert_eq!(secret.expose_secret(), "pa:ss");
    }

    #[test]
    fn test_body_credentials_fallback() {
        let (id, secret) =
            extract_client_credentials(&HeaderMap::new(), &body(Some("svc"), Some("pw"))).unwrap();

        assert_eq!(id, "svc");
        assert_eq!(secret.expose_secret(), "pw");
    }

    #[test]
    fn test_missing_credentials() {
        let result = extract_client_credentials(&HeaderMap::new(), &body(Some("svc"), None));
        assert!(matches!(result, Err(IssuerError::InvalidCredentials)));
    }

    #[test]
    fn test_malformed_basic_auth() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic !!!"));
        assert!(matches!(
            extract_client_credentials(&headers, &body(None, None)),
            Err(IssuerError::InvalidCredentials)
        ));

        assert!(matches!(
            extract_client_credentials(&basic("no-colon"), &body(None, None)),
            Err(IssuerError::InvalidCredentials)
        ));
    }
}
