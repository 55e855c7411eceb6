use crate::errors::IssuerError;
use crate::models::{PrincipalKind, TokenClaims, TokenResponse};
use crate::observability::metrics::record_token_issuance;
use crate::services::key_ring::SigningKeyRing;
use crate::services::principal_registry::{Principal, PrincipalRegistry};
use chrono::{DateTime, Utc};
use common::secret::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

pub const CLIENT_CREDENTIALS_GRANT: &str = "client_credentials";
pub const PASSWORD_GRANT: &str = "password";

/// Authenticates principals and mints tokens with the key ring.
#[derive(Debug, Clone)]
pub struct TokenService {
    key_ring: Arc<SigningKeyRing>,
    principals: Arc<PrincipalRegistry>,
    token_lifetime_seconds: u64,
    user_token_client_id: String,
}

impl TokenService {
    #[must_use]
    pub fn new(
        key_ring: Arc<SigningKeyRing>,
        principals: Arc<PrincipalRegistry>,
        token_lifetime_seconds: u64,
        user_token_client_id: String,
    ) -> Self {
        Self {
            key_ring,
            principals,
            token_lifetime_seconds,
            user_token_client_id,
        }
    }

    /// Mint a token for `principal` as `client_id` carrying `scopes`.
    ///
    /// # Errors
    ///
    /// Returns `IssuerError::Crypto` if signing fails.
    pub fn issue(
        &self,
        principal: &Principal,
        client_id: &str,
        scopes: &[String],
    ) -> Result<TokenResponse, IssuerError> {
        self.issue_at(principal, client_id, scopes, Utc::now())
    }

    /// [`TokenService::issue`] with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns `IssuerError::Crypto` if signing fails.
    pub fn issue_at(
        &self,
        principal: &Principal,
        client_id: &str,
        scopes: &[String],
        now: DateTime<Utc>,
    ) -> Result<TokenResponse, IssuerError> {
        let lifetime = i64::try_from(self.token_lifetime_seconds)
            .map_err(|e| IssuerError::Internal(format!("Token lifetime out of range: {e}")))?;

        let iat = now.timestamp();
        let scope = scopes.join(" ");
        let claims = TokenClaims {
            sub: principal.subject.clone(),
            client_id: client_id.to_string(),
            email_verified: principal.email_verified,
            iat,
            exp: iat.saturating_add(lifetime),
            scope: scope.clone(),
        };

        let access_token = self.key_ring.sign(&claims)?;

        Ok(TokenResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.token_lifetime_seconds,
            scope,
        })
    }

    /// OAuth 2.0 client credentials grant for `service` principals.
    ///
    /// Requested scopes must be a subset of the principal's scopes; when none
    /// are requested the token carries all of them.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCredentials` for bad credentials and
    /// `InsufficientScope` for a scope the principal does not hold.
    #[instrument(skip_all, name = "issuer.token.service")]
    pub async fn issue_service_token(
        &self,
        client_id: &str,
        client_secret: SecretString,
        requested_scopes: Option<Vec<String>>,
    ) -> Result<TokenResponse, IssuerError> {
        let start = Instant::now();
        let result = self
            .authenticate(client_id, client_secret, PrincipalKind::Service)
            .await
            .and_then(|principal| {
                let scopes = match requested_scopes {
                    Some(requested) => {
                        if !requested.iter().all(|s| principal.scopes.contains(s)) {
                            return Err(IssuerError::InsufficientScope {
                                required: requested.join(" "),
                                provided: principal.scopes.clone(),
                            });
                        }
                        requested
                    }
                    None => principal.scopes.clone(),
                };
                self.issue(&principal, &principal.id, &scopes)
            });

        record_outcome(CLIENT_CREDENTIALS_GRANT, &result, start);
        result
    }

    /// Password grant for `user` principals. The token carries the user's
    /// `email_verified` flag and the configured user client id.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCredentials` for bad credentials.
    #[instrument(skip_all, name = "issuer.token.user")]
    pub async fn issue_user_token(
        &self,
        username: &str,
        password: SecretString,
    ) -> Result<TokenResponse, IssuerError> {
        let start = Instant::now();
        let result = self
            .authenticate(username, password, PrincipalKind::User)
            .await
            .and_then(|principal| {
                self.issue(&principal, &self.user_token_client_id, &principal.scopes)
            });

        record_outcome(PASSWORD_GRANT, &result, start);
        result
    }

    async fn authenticate(
        &self,
        id: &str,
        secret: SecretString,
        kind: PrincipalKind,
    ) -> Result<Arc<Principal>, IssuerError> {
        let principals = Arc::clone(&self.principals);
        let id = id.to_string();

        tokio::task::spawn_blocking(move || {
            principals.authenticate(&id, secret.expose_secret(), kind)
        })
        .await
        .map_err(|e| IssuerError::Internal(format!("Credential check task failed: {e}")))?
    }
}

fn record_outcome(grant_type: &str, result: &Result<TokenResponse, IssuerError>, start: Instant) {
    let status = match result {
        Ok(_) => "success",
        Err(IssuerError::InvalidCredentials) => {
            tracing::debug!(target: "issuer.token", grant_type, "Credential check failed");
            "rejected"
        }
        Err(_) => "error",
    };
    record_token_issuance(grant_type, status, start.elapsed());
}
