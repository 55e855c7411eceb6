//! Edge gate configuration.

use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use common::logging::LogFormat;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8090";

/// Default JWKS location (the issuer's well-known endpoint).
pub const DEFAULT_JWKS_URL: &str = "http://localhost:8082/.well-known/jwks.json";

/// Default age at which a fetched key set stops being fresh (5 minutes).
pub const DEFAULT_JWKS_CACHE_TTL_SECONDS: u64 = 300;

/// Default time a stale key set is still served while refreshes fail.
pub const DEFAULT_JWKS_GRACE_SECONDS: u64 = 600;

/// Default time between background refreshes.
pub const DEFAULT_JWKS_REFRESH_INTERVAL_SECONDS: u64 = 60;

/// Default timeout for one JWKS fetch.
pub const DEFAULT_JWKS_HTTP_TIMEOUT_SECONDS: u64 = 5;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub jwks_url: String,
    pub jwks_cache_ttl: Duration,
    pub jwks_grace: Duration,
    pub jwks_refresh_interval: Duration,
    pub jwks_http_timeout: Duration,
    /// Tolerance applied to `exp` by the admission policy.
    pub policy_clock_skew: Duration,
    pub log_format: LogFormat,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid JWKS URL: {0}")]
    InvalidJwksUrl(String),

    #[error("Invalid duration in {0}: {1}")]
    InvalidDuration(String, String),

    #[error("Invalid clock skew: {0}")]
    InvalidClockSkew(String),

    #[error("Invalid log format: {0}")]
    InvalidLogFormat(String),
}

/// Parse a positive number of seconds.
fn parse_seconds(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<Duration, ConfigError> {
    let Some(raw) = vars.get(name) else {
        return Ok(Duration::from_secs(default));
    };

    let value: u64 = raw.trim().parse().map_err(|e| {
        ConfigError::InvalidDuration(
            name.to_string(),
            format!("must be a positive integer, got '{raw}': {e}"),
        )
    })?;

    if value == 0 {
        return Err(ConfigError::InvalidDuration(
            name.to_string(),
            "must be greater than 0".to_string(),
        ));
    }

    Ok(Duration::from_secs(value))
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
    /// Returns a `ConfigError` naming the offending variable.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let jwks_url = vars
            .get("JWKS_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_JWKS_URL.to_string());
        if !(jwks_url.starts_with("http://") || jwks_url.starts_with("https://")) {
            return Err(ConfigError::InvalidJwksUrl(format!(
                "JWKS_URL must be an http(s) URL, got '{jwks_url}'"
            )));
        }

        let jwks_cache_ttl =
            parse_seconds(vars, "JWKS_CACHE_TTL_SECONDS", DEFAULT_JWKS_CACHE_TTL_SECONDS)?;
        let jwks_grace = parse_seconds(vars, "JWKS_GRACE_SECONDS", DEFAULT_JWKS_GRACE_SECONDS)?;
        let jwks_refresh_interval = parse_seconds(
            vars,
            "JWKS_REFRESH_INTERVAL_SECONDS",
            DEFAULT_JWKS_REFRESH_INTERVAL_SECONDS,
        )?;
        let jwks_http_timeout = parse_seconds(
            vars,
            "JWKS_HTTP_TIMEOUT_SECONDS",
            DEFAULT_JWKS_HTTP_TIMEOUT_SECONDS,
        )?;

        let policy_clock_skew = match vars.get("POLICY_CLOCK_SKEW_SECONDS") {
            Some(raw) => {
                let value: u64 = raw.trim().parse().map_err(|e| {
                    ConfigError::InvalidClockSkew(format!(
                        "POLICY_CLOCK_SKEW_SECONDS must be a valid integer, got '{raw}': {e}"
                    ))
                })?;
                if value > MAX_CLOCK_SKEW.as_secs() {
                    return Err(ConfigError::InvalidClockSkew(format!(
                        "POLICY_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {value}",
                        MAX_CLOCK_SKEW.as_secs()
                    )));
                }
                Duration::from_secs(value)
            }
            None => DEFAULT_CLOCK_SKEW,
        };

        let log_format = vars
            .get("LOG_FORMAT")
            .map(|raw| raw.parse::<LogFormat>())
            .transpose()
            .map_err(ConfigError::InvalidLogFormat)?
            .unwrap_or_default();

        Ok(Config {
            bind_address,
            jwks_url,
            jwks_cache_ttl,
            jwks_grace,
            jwks_refresh_interval,
            jwks_http_timeout,
            policy_clock_skew,
            log_format,
        })
    }
}
