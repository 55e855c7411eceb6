//! OAuth 2.0 client credentials token manager.
//!
//! Keeps a service token from the issuer available to the rest of the
//! process through a `tokio::sync::watch` channel:
//!
//! - Acquires a token before [`spawn_token_manager`] returns
//! - Refreshes it ahead of expiry (threshold plus a clock drift margin)
//! - Retries failures with exponential backoff (1s doubling, capped at 30s)
//! - Re-acquires on demand when a downstream rejects the current token
//!   ([`TokenReceiver::request_refresh`])
//!
//! ```rust,ignore
//! use common::token_manager::{spawn_token_manager, TokenManagerConfig};
//! use common::secret::{ExposeSecret, SecretString};
//!
//! let config = TokenManagerConfig::new(
//!     "http://localhost:8082".to_string(),
//!     "aggregator".to_string(),
//!     SecretString::from("secret"),
//! );
//! let (task_handle, token_rx) = spawn_token_manager(config).await?;
//! let header = format!("Bearer {}", token_rx.token().expose_secret());
//!
//! // Downstream answered 401 with this token:
//! token_rx.request_refresh();
//! ```

use crate::secret::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

// =============================================================================
// Constants
// =============================================================================

/// Default refresh threshold (5 minutes before expiration).
pub const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::from_secs(300);

/// Default HTTP request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default path of the issuer's client credentials endpoint.
pub const DEFAULT_TOKEN_PATH: &str = "/api/v1/auth/service/token";

const INITIAL_BACKOFF_MS: u64 = 1000;

const MAX_BACKOFF_MS: u64 = 30_000;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Tokens are refreshed this many seconds earlier than the threshold alone
/// would require, to absorb clock differences with the issuer.
const CLOCK_DRIFT_MARGIN_SECS: i64 = 30;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during token management.
#[derive(Error, Debug, Clone)]
pub enum TokenError {
    #[error("Token acquisition failed: {0}")]
    AcquisitionFailed(String),

    #[error("HTTP client error: {0}")]
    HttpError(String),

    /// The issuer refused the credentials (400 or 401).
    #[error("Authentication rejected: {0}")]
    AuthenticationRejected(String),

    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Token channel closed")]
    ChannelClosed,
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the token manager.
#[derive(Clone)]
pub struct TokenManagerConfig {
    /// Issuer base URL (e.g., `http://localhost:8082`).
    pub auth_uri: String,

    /// Path of the token endpoint under `auth_uri`.
    pub token_path: String,

    pub client_id: String,

    pub client_secret: SecretString,

    /// Refresh the token this long before it expires.
    pub refresh_threshold: Duration,

    pub http_timeout: Duration,
}

impl std::fmt::Debug for TokenManagerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManagerConfig")
            .field("auth_uri", &self.auth_uri)
            .field("token_path", &self.token_path)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("refresh_threshold", &self.refresh_threshold)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

impl TokenManagerConfig {
    /// Create a configuration with default path and timeouts.
    ///
    /// Plain `http://` URLs send the client secret in clear text.
    #[must_use]
    pub fn new(auth_uri: String, client_id: String, client_secret: SecretString) -> Self {
        Self {
            auth_uri: auth_uri.trim_end_matches('/').to_string(),
            token_path: DEFAULT_TOKEN_PATH.to_string(),
            client_id,
            client_secret,
            refresh_threshold: DEFAULT_REFRESH_THRESHOLD,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_token_path(mut self, path: impl Into<String>) -> Self {
        self.token_path = path.into();
        self
    }

    #[must_use]
    pub fn with_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.refresh_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    fn token_url(&self) -> String {
        format!("{}{}", self.auth_uri, self.token_path)
    }
}

// =============================================================================
// Token Receiver
// =============================================================================

/// Read handle for the current service token.
///
/// Cloning is cheap; every clone observes the same token and shares the same
/// refresh trigger.
#[derive(Clone)]
pub struct TokenReceiver {
    rx: watch::Receiver<SecretString>,
    refresh: Arc<Notify>,
}

impl TokenReceiver {
    /// Wrap a bare watch receiver with no manager behind it.
    ///
    /// [`TokenReceiver::request_refresh`] on the result is a no-op.
    #[must_use]
    pub fn from_watch_receiver(receiver: watch::Receiver<SecretString>) -> Self {
        Self {
            rx: receiver,
            refresh: Arc::new(Notify::new()),
        }
    }

    /// Current token, cloned so the borrow is released immediately.
    ///
    /// Never empty once [`spawn_token_manager`] has returned.
    #[must_use]
    pub fn token(&self) -> SecretString {
        self.rx.borrow().clone()
    }

    /// Ask the manager to re-acquire the token now instead of at the next
    /// scheduled refresh.
    ///
    /// Requests made while one is already pending collapse into one
    /// acquisition. The current token stays readable until it is replaced.
    pub fn request_refresh(&self) {
        self.refresh.notify_one();
    }

    /// Wait for the token to change.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::ChannelClosed` if the manager task has stopped.
    pub async fn changed(&mut self) -> Result<(), TokenError> {
        self.rx
            .changed()
            .await
            .map_err(|_| TokenError::ChannelClosed)
    }

    /// Build a receiver over a test channel, returning the refresh trigger so
    /// tests can observe [`TokenReceiver::request_refresh`] calls.
    #[cfg(any(test, feature = "test-utils"))]
    #[must_use]
    pub fn from_test_channel(rx: watch::Receiver<SecretString>) -> (Self, Arc<Notify>) {
        let refresh = Arc::new(Notify::new());
        (
            Self {
                rx,
                refresh: Arc::clone(&refresh),
            },
            refresh,
        )
    }
}

impl std::fmt::Debug for TokenReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenReceiver")
            .field("token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

// =============================================================================
// OAuth Response Types
// =============================================================================

#[derive(Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    #[allow(dead_code)]
    token_type: String,
    expires_in: u64,
    #[allow(dead_code)]
    #[serde(default)]
    scope: Option<String>,
}

impl std::fmt::Debug for OAuthTokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

// =============================================================================
// Manager Task
// =============================================================================

/// Spawn the token manager and wait for the first token.
///
/// Acquisition retries forever; wrap the call in `tokio::time::timeout` to
/// bound startup. Abort the returned handle to stop refreshing.
///
/// # Errors
///
/// - `TokenError::Configuration` - the HTTP client cannot be built
/// - `TokenError::ChannelClosed` - the task ended before the first token
/// - `TokenError::AcquisitionFailed` - the first token was empty
#[instrument(skip_all, name = "common.token_manager.spawn")]
pub async fn spawn_token_manager(
    config: TokenManagerConfig,
) -> Result<(JoinHandle<()>, TokenReceiver), TokenError> {
    let http_client = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
        .build()
        .map_err(|e| TokenError::Configuration(format!("Failed to build HTTP client: {e}")))?;

    let (sender, mut receiver) = watch::channel(SecretString::from(""));
    let refresh = Arc::new(Notify::new());

    let task_refresh = Arc::clone(&refresh);
    let task_handle = tokio::spawn(async move {
        token_refresh_loop(config, http_client, sender, task_refresh).await;
    });

    receiver
        .changed()
        .await
        .map_err(|_| TokenError::ChannelClosed)?;

    if receiver.borrow().expose_secret().is_empty() {
        return Err(TokenError::AcquisitionFailed(
            "Token is empty after acquisition".into(),
        ));
    }

    Ok((
        task_handle,
        TokenReceiver {
            rx: receiver,
            refresh,
        },
    ))
}

/// Seconds to wait before the token expiring at `expires_at` must be replaced.
fn seconds_until_refresh(expires_at: i64, now: i64, threshold: Duration) -> i64 {
    let threshold_secs = i64::try_from(threshold.as_secs()).unwrap_or(i64::MAX);
    expires_at
        .saturating_sub(threshold_secs)
        .saturating_sub(CLOCK_DRIFT_MARGIN_SECS)
        .saturating_sub(now)
}

async fn token_refresh_loop(
    config: TokenManagerConfig,
    http_client: reqwest::Client,
    sender: watch::Sender<SecretString>,
    refresh: Arc<Notify>,
) {
    let mut backoff = INITIAL_BACKOFF_MS;
    let mut initial_acquisition = true;

    loop {
        let expires_at = match acquire_token(&config, &http_client).await {
            Ok((token, expires_at)) => {
                if sender.send(token).is_err() {
                    debug!(
                        target: "common.token_manager",
                        client_id = %config.client_id,
                        "All receivers dropped, stopping refresh loop"
                    );
                    return;
                }

                if initial_acquisition {
                    info!(
                        target: "common.token_manager",
                        client_id = %config.client_id,
                        "Initial token acquired"
                    );
                    initial_acquisition = false;
                } else {
                    debug!(
                        target: "common.token_manager",
                        client_id = %config.client_id,
                        "Token refreshed"
                    );
                }

                backoff = INITIAL_BACKOFF_MS;
                expires_at
            }
            Err(e) => {
                warn!(
                    target: "common.token_manager",
                    client_id = %config.client_id,
                    error = %e,
                    backoff_ms = backoff,
                    "Token acquisition failed, will retry"
                );
                tokio::time::sleep(Duration::from_millis(backoff)).await;
                backoff = backoff.saturating_mul(2).min(MAX_BACKOFF_MS);
                continue;
            }
        };

        let wait_secs = seconds_until_refresh(
            expires_at,
            chrono::Utc::now().timestamp(),
            config.refresh_threshold,
        )
        .max(1);
        let wait = Duration::from_secs(u64::try_from(wait_secs).unwrap_or(1));

        tokio::select! {
            () = tokio::time::sleep(wait) => {
                trace!(target: "common.token_manager", "Scheduled refresh due");
            }
            () = refresh.notified() => {
                info!(
                    target: "common.token_manager",
                    client_id = %config.client_id,
                    "Token refresh requested"
                );
            }
            () = sender.closed() => {
                debug!(
                    target: "common.token_manager",
                    client_id = %config.client_id,
                    "All receivers dropped, stopping refresh loop"
                );
                return;
            }
        }
    }
}

/// Request a token from the issuer.
///
/// Returns the token and its expiration time (Unix seconds).
#[instrument(skip_all, name = "common.token_manager.acquire")]
async fn acquire_token(
    config: &TokenManagerConfig,
    http_client: &reqwest::Client,
) -> Result<(SecretString, i64), TokenError> {
    let url = config.token_url();

    debug!(
        target: "common.token_manager",
        client_id = %config.client_id,
        url = %url,
        "Requesting token from issuer"
    );

    let form_body = [
        ("grant_type", "client_credentials"),
        ("client_id", config.client_id.as_str()),
        ("client_secret", config.client_secret.expose_secret()),
    ];

    let response = http_client
        .post(&url)
        .form(&form_body)
        .send()
        .await
        .map_err(|e| {
            debug!(target: "common.token_manager", error = %e, "HTTP request failed");
            TokenError::HttpError(e.to_string())
        })?;

    let status = response.status();

    if status.is_success() {
        let token_response: OAuthTokenResponse = response.json().await.map_err(|e| {
            warn!(target: "common.token_manager", error = %e, "Failed to parse token response");
            TokenError::InvalidResponse(e.to_string())
        })?;

        if token_response.access_token.is_empty() {
            return Err(TokenError::InvalidResponse("empty access_token".into()));
        }

        let lifetime = i64::try_from(token_response.expires_in).unwrap_or(i64::MAX);
        let expires_at = chrono::Utc::now().timestamp().saturating_add(lifetime);

        debug!(
            target: "common.token_manager",
            expires_in_secs = token_response.expires_in,
            "Token acquired"
        );

        Ok((SecretString::from(token_response.access_token), expires_at))
    } else if status.as_u16() == 401 || status.as_u16() == 400 {
        // Body stays at trace level; it may echo request details.
        let body = response.text().await.unwrap_or_default();
        warn!(
            target: "common.token_manager",
            status = %status,
            "Authentication rejected by issuer"
        );
        trace!(target: "common.token_manager", body = %body, "Rejection body");
        Err(TokenError::AuthenticationRejected(format!("Status {status}")))
    } else if status.is_server_error() {
        warn!(target: "common.token_manager", status = %status, "Issuer returned server error");
        Err(TokenError::HttpError(format!("Issuer server error: {status}")))
    } else {
        warn!(target: "common.token_manager", status = %status, "Unexpected response from issuer");
        Err(TokenError::HttpError(format!("Unexpected status: {status}")))
    }
}

// =============================================================================
// Tests
// =============================================================================
