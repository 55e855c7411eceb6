//! Aggregator configuration.

use common::logging::LogFormat;
use common::secret::SecretString;
use common::token_manager::{TokenManagerConfig, DEFAULT_HTTP_TIMEOUT, DEFAULT_TOKEN_PATH};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8083";

/// Default issuer base URL.
pub const DEFAULT_AUTH_URI: &str = "http://localhost:8082";

/// Default OAuth client id of the aggregator itself.
pub const DEFAULT_CLIENT_ID: &str = "aggregator";

/// Largest timeout for one token request to the issuer.
pub const MAX_AUTH_HTTP_TIMEOUT_SECONDS: u64 = 60;

pub const DEFAULT_STUDENTS_URI: &str = "http://localhost:8080";

pub const DEFAULT_GRADES_URI: &str = "http://localhost:8081";

/// Default per-call timeout, covering the call and its retries.
pub const DEFAULT_DOWNSTREAM_TIMEOUT_MS: u64 = 2000;

/// Bound on a whole inbound request, applied as a route layer.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest per-call timeout. Stays under [`REQUEST_TIMEOUT`] so an
/// aggregation always answers before the route layer cuts it off.
pub const MAX_DOWNSTREAM_TIMEOUT_MS: u64 = 25_000;

/// Default number of retries after an unreachable downstream.
pub const DEFAULT_DOWNSTREAM_RETRIES: u32 = 1;

pub const MAX_DOWNSTREAM_RETRIES: u32 = 5;

/// Default period of the background report card aggregation.
pub const DEFAULT_AGGREGATION_INTERVAL_SECONDS: u64 = 60;

/// Target name of the students service.
pub const STUDENTS_TARGET: &str = "students";

/// Target name of the grades service.
pub const GRADES_TARGET: &str = "grades";

/// Which credential downstream calls carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PropagationMode {
    /// The aggregator's own service token, with the caller's identity in
    /// `X-Forwarded-*` headers.
    #[default]
    ServiceToken,
    /// The caller's bearer token as received.
    Forward,
}

impl PropagationMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PropagationMode::ServiceToken => "service-token",
            PropagationMode::Forward => "forward",
        }
    }
}

impl std::str::FromStr for PropagationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "service-token" | "service_token" => Ok(PropagationMode::ServiceToken),
            "forward" => Ok(PropagationMode::Forward),
            other => Err(format!(
                "PROPAGATION_MODE must be 'service-token' or 'forward', got '{other}'"
            )),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub bind_address: String,
    pub auth_uri: String,
    /// Token endpoint path under `auth_uri`.
    pub auth_token_path: String,
    pub auth_http_timeout: Duration,
    pub client_id: String,
    pub client_secret: SecretString,
    /// Downstream base URLs keyed by target name.
    pub targets: HashMap<String, String>,
    pub downstream_timeout: Duration,
    pub downstream_retries: u32,
    pub propagation_mode: PropagationMode,
    /// `None` disables the background aggregation.
    pub aggregation_interval: Option<Duration>,
    /// Whether a failed grades call fails the whole report.
    pub grades_required: bool,
    pub log_format: LogFormat,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("auth_uri", &self.auth_uri)
            .field("auth_token_path", &self.auth_token_path)
            .field("auth_http_timeout", &self.auth_http_timeout)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("targets", &self.targets)
            .field("downstream_timeout", &self.downstream_timeout)
            .field("downstream_retries", &self.downstream_retries)
            .field("propagation_mode", &self.propagation_mode)
            .field("aggregation_interval", &self.aggregation_interval)
            .field("grades_required", &self.grades_required)
            .field("log_format", &self.log_format)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid URL in {0}: {1}")]
    InvalidUrl(String, String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Invalid propagation mode: {0}")]
    InvalidPropagationMode(String),

    #[error("Invalid log format: {0}")]
    InvalidLogFormat(String),
}

fn parse_url(
    vars: &HashMap<String, String>,
    name: &str,
    default: &str,
) -> Result<String, ConfigError> {
    let value = vars.get(name).map_or(default, String::as_str).trim();
    if !(value.starts_with("http://") || value.starts_with("https://")) {
        return Err(ConfigError::InvalidUrl(
            name.to_string(),
            format!("must be an http(s) URL, got '{value}'"),
        ));
    }
    Ok(value.trim_end_matches('/').to_string())
}

fn parse_number<T>(vars: &HashMap<String, String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match vars.get(name) {
        Some(raw) => raw.trim().parse().map_err(|e| {
            ConfigError::InvalidValue(name.to_string(), format!("'{raw}' is not valid: {e}"))
        }),
        None => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// See [`Config::from_vars`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a map (for testing).
    ///
    /// # Errors
    ///
    /// Returns `MissingEnvVar` when `CLIENT_SECRET` is unset, otherwise a
    /// `ConfigError` naming the offending variable.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let auth_uri = parse_url(vars, "AUTH_URI", DEFAULT_AUTH_URI)?;

        let auth_token_path = vars
            .get("AUTH_TOKEN_PATH")
            .map_or(DEFAULT_TOKEN_PATH, |raw| raw.trim())
            .to_string();
        if !auth_token_path.starts_with('/') {
            return Err(ConfigError::InvalidValue(
                "AUTH_TOKEN_PATH".to_string(),
                format!("must start with '/', got '{auth_token_path}'"),
            ));
        }

        let auth_timeout_secs: u64 = parse_number(
            vars,
            "AUTH_HTTP_TIMEOUT_SECONDS",
            DEFAULT_HTTP_TIMEOUT.as_secs(),
        )?;
        if !(1..=MAX_AUTH_HTTP_TIMEOUT_SECONDS).contains(&auth_timeout_secs) {
            return Err(ConfigError::InvalidValue(
                "AUTH_HTTP_TIMEOUT_SECONDS".to_string(),
                format!(
                    "must be between 1 and {MAX_AUTH_HTTP_TIMEOUT_SECONDS}, got {auth_timeout_secs}"
                ),
            ));
        }

        let client_id = vars
            .get("CLIENT_ID")
            .cloned()
            .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string());
        if client_id.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "CLIENT_ID".to_string(),
                "must not be empty".to_string(),
            ));
        }

        let client_secret = vars
            .get("CLIENT_SECRET")
            .filter(|s| !s.is_empty())
            .map(|s| SecretString::from(s.clone()))
            .ok_or_else(|| ConfigError::MissingEnvVar("CLIENT_SECRET".to_string()))?;

        let targets = HashMap::from([
            (
                STUDENTS_TARGET.to_string(),
                parse_url(vars, "STUDENTS_URI", DEFAULT_STUDENTS_URI)?,
            ),
            (
                GRADES_TARGET.to_string(),
                parse_url(vars, "GRADES_URI", DEFAULT_GRADES_URI)?,
            ),
        ]);

        let timeout_ms: u64 =
            parse_number(vars, "DOWNSTREAM_TIMEOUT_MS", DEFAULT_DOWNSTREAM_TIMEOUT_MS)?;
        if !(1..=MAX_DOWNSTREAM_TIMEOUT_MS).contains(&timeout_ms) {
            return Err(ConfigError::InvalidValue(
                "DOWNSTREAM_TIMEOUT_MS".to_string(),
                format!("must be between 1 and {MAX_DOWNSTREAM_TIMEOUT_MS}, got {timeout_ms}"),
            ));
        }

        let downstream_retries: u32 =
            parse_number(vars, "DOWNSTREAM_RETRIES", DEFAULT_DOWNSTREAM_RETRIES)?;
        if downstream_retries > MAX_DOWNSTREAM_RETRIES {
            return Err(ConfigError::InvalidValue(
                "DOWNSTREAM_RETRIES".to_string(),
                format!("must not exceed {MAX_DOWNSTREAM_RETRIES}, got {downstream_retries}"),
            ));
        }

        let propagation_mode = vars
            .get("PROPAGATION_MODE")
            .map(|raw| raw.parse::<PropagationMode>())
            .transpose()
            .map_err(ConfigError::InvalidPropagationMode)?
            .unwrap_or_default();

        let interval_secs: u64 = parse_number(
            vars,
            "AGGREGATION_INTERVAL_SECONDS",
            DEFAULT_AGGREGATION_INTERVAL_SECONDS,
        )?;
        let aggregation_interval = (interval_secs > 0).then(|| Duration::from_secs(interval_secs));

        let grades_required = match vars
            .get("GRADES_REQUIRED")
            .map(|s| s.trim().to_ascii_lowercase())
        {
            None => false,
            Some(raw) => match raw.as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => {
                    return Err(ConfigError::InvalidValue(
                        "GRADES_REQUIRED".to_string(),
                        format!("must be true or false, got '{raw}'"),
                    ))
                }
            },
        };

        let log_format = vars
            .get("LOG_FORMAT")
            .map(|raw| raw.parse::<LogFormat>())
            .transpose()
            .map_err(ConfigError::InvalidLogFormat)?
            .unwrap_or_default();

        Ok(Config {
            bind_address,
            auth_uri,
            auth_token_path,
            auth_http_timeout: Duration::from_secs(auth_timeout_secs),
            client_id,
            client_secret,
            targets,
            downstream_timeout: Duration::from_millis(timeout_ms),
            downstream_retries,
            propagation_mode,
            aggregation_interval,
            grades_required,
            log_format,
        })
    }

    /// Token manager settings for the aggregator's own credentials.
    #[must_use]
    pub fn token_manager_config(&self) -> TokenManagerConfig {
        TokenManagerConfig::new(
            self.auth_uri.clone(),
            self.client_id.clone(),
            self.client_secret.clone(),
        )
        .with_token_path(self.auth_token_path.clone())
        .with_http_timeout(self.auth_http_timeout)
    }
}
