//! Token issuer configuration.
//!
//! Loaded from environment variables; see [`Config::from_vars`] for the
//! full list and defaults.

use crate::models::PrincipalKind;
use common::logging::LogFormat;
use common::secret::SecretString;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::env;
use std::fmt;
use thiserror::Error;

/// Default bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8082";

/// Default key id prefix (`{prefix}-{YYYY}-{NN}`).
pub const DEFAULT_KEY_PREFIX: &str = "auth";

/// Default token lifetime (1 hour).
pub const DEFAULT_TOKEN_LIFETIME_SECONDS: u64 = 3600;

/// Longest token lifetime (1 day).
pub const MAX_TOKEN_LIFETIME_SECONDS: u64 = 86_400;

/// Default time a retired key stays published (2 hours).
pub const DEFAULT_KEY_OVERLAP_SECONDS: u64 = 7200;

/// Longest time a retired key stays published (30 days).
pub const MAX_KEY_OVERLAP_SECONDS: u64 = 30 * 86_400;

/// Default signing key age that triggers rotation (1 day).
pub const DEFAULT_KEY_ROTATION_INTERVAL_SECONDS: u64 = 86_400;

/// Default bcrypt cost for hashing configured plaintext secrets.
pub const DEFAULT_BCRYPT_COST: u32 = 12;

pub const MIN_BCRYPT_COST: u32 = 10;

pub const MAX_BCRYPT_COST: u32 = 14;

/// Default `client_id` stamped on tokens from the user grant.
pub const DEFAULT_USER_TOKEN_CLIENT_ID: &str = "frontend";

/// A principal as declared in `ISSUER_PRINCIPALS`.
///
/// Exactly one of `secret` (hashed at startup) or `secret_hash` (bcrypt) must
/// be set.
#[derive(Clone, Deserialize)]
pub struct PrincipalConfig {
    pub id: String,
    pub kind: PrincipalKind,
    #[serde(default)]
    pub secret: Option<SecretString>,
    #[serde(default)]
    pub secret_hash: Option<String>,
    /// Token `sub`; defaults to `id`.
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl fmt::Debug for PrincipalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrincipalConfig")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("secret_hash", &self.secret_hash.as_ref().map(|_| "[REDACTED]"))
            .field("email_verified", &self.email_verified)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct Config {
    pub bind_address: String,
    pub key_prefix: String,
    pub token_lifetime_seconds: u64,
    pub key_overlap_seconds: u64,
    /// `None` disables age-based rotation (admin rotation still works).
    pub key_rotation_interval_seconds: Option<u64>,
    pub bcrypt_cost: u32,
    pub user_token_client_id: String,
    pub principals: Vec<PrincipalConfig>,
    pub log_format: LogFormat,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("key_prefix", &self.key_prefix)
            .field("token_lifetime_seconds", &self.token_lifetime_seconds)
            .field("key_overlap_seconds", &self.key_overlap_seconds)
            .field("key_rotation_interval_seconds", &self.key_rotation_interval_seconds)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .field("user_token_client_id", &self.user_token_client_id)
            .field("principals", &self.principals.len())
            .field("log_format", &self.log_format)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid number in {0}: {1}")]
    InvalidNumber(String, String),

    #[error("Invalid bcrypt cost: {0}")]
    InvalidBcryptCost(String),

    #[error("Invalid key settings: {0}")]
    InvalidKeySettings(String),

    #[error("Invalid principals: {0}")]
    InvalidPrincipals(String),

    #[error("Invalid log format: {0}")]
    InvalidLogFormat(String),
}

fn parse_u64(vars: &HashMap<String, String>, name: &str, default: u64) -> Result<u64, ConfigError> {
    match vars.get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidNumber(name.to_string(), format!("{raw:?}: {e}"))),
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
    /// | Variable | Default |
    /// |---|---|
    /// | `BIND_ADDRESS` | `0.0.0.0:8082` |
    /// | `ISSUER_KEY_PREFIX` | `auth` |
    /// | `TOKEN_LIFETIME_SECONDS` | 3600 (at most 1 day) |
    /// | `KEY_OVERLAP_SECONDS` | 7200, >= token lifetime, at most 30 days |
    /// | `KEY_ROTATION_INTERVAL_SECONDS` | 86400, 0 disables |
    /// | `BCRYPT_COST` | 12 (10-14) |
    /// | `USER_TOKEN_CLIENT_ID` | `frontend` |
    /// | `ISSUER_PRINCIPALS` | required JSON array |
    /// | `LOG_FORMAT` | `text` |
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` naming the offending variable.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let key_prefix = vars
            .get("ISSUER_KEY_PREFIX")
            .cloned()
            .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string());
        if key_prefix.is_empty()
            || !key_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(ConfigError::InvalidKeySettings(format!(
                "ISSUER_KEY_PREFIX must be non-empty [A-Za-z0-9-], got {key_prefix:?}"
            )));
        }

        let token_lifetime_seconds =
            parse_u64(vars, "TOKEN_LIFETIME_SECONDS", DEFAULT_TOKEN_LIFETIME_SECONDS)?;
        if !(1..=MAX_TOKEN_LIFETIME_SECONDS).contains(&token_lifetime_seconds) {
            return Err(ConfigError::InvalidKeySettings(format!(
                "TOKEN_LIFETIME_SECONDS must be between 1 and {MAX_TOKEN_LIFETIME_SECONDS}, \
                 got {token_lifetime_seconds}"
            )));
        }

        let key_overlap_seconds =
            parse_u64(vars, "KEY_OVERLAP_SECONDS", DEFAULT_KEY_OVERLAP_SECONDS)?;
        if key_overlap_seconds < token_lifetime_seconds {
            return Err(ConfigError::InvalidKeySettings(format!(
                "KEY_OVERLAP_SECONDS ({key_overlap_seconds}) must be at least \
                 TOKEN_LIFETIME_SECONDS ({token_lifetime_seconds})"
            )));
        }
        if key_overlap_seconds > MAX_KEY_OVERLAP_SECONDS {
            return Err(ConfigError::InvalidKeySettings(format!(
                "KEY_OVERLAP_SECONDS must not exceed {MAX_KEY_OVERLAP_SECONDS}, \
                 got {key_overlap_seconds}"
            )));
        }

        let key_rotation_interval_seconds = match parse_u64(
            vars,
            "KEY_ROTATION_INTERVAL_SECONDS",
            DEFAULT_KEY_ROTATION_INTERVAL_SECONDS,
        )? {
            0 => None,
            secs => Some(secs),
        };

        let bcrypt_cost = match vars.get("BCRYPT_COST") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .map_err(|e| ConfigError::InvalidBcryptCost(format!("{raw:?}: {e}")))?,
            None => DEFAULT_BCRYPT_COST,
        };
        if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&bcrypt_cost) {
            return Err(ConfigError::InvalidBcryptCost(format!(
                "{bcrypt_cost} (must be {MIN_BCRYPT_COST}-{MAX_BCRYPT_COST})"
            )));
        }

        let user_token_client_id = vars
            .get("USER_TOKEN_CLIENT_ID")
            .cloned()
            .unwrap_or_else(|| DEFAULT_USER_TOKEN_CLIENT_ID.to_string());

        let principals_json = vars
            .get("ISSUER_PRINCIPALS")
            .ok_or_else(|| ConfigError::MissingEnvVar("ISSUER_PRINCIPALS".to_string()))?;
        let principals: Vec<PrincipalConfig> = serde_json::from_str(principals_json)
            .map_err(|e| ConfigError::InvalidPrincipals(format!("not a valid JSON array: {e}")))?;
        validate_principals(&principals)?;

        let log_format = vars
            .get("LOG_FORMAT")
            .map(|raw| raw.parse::<LogFormat>())
            .transpose()
            .map_err(ConfigError::InvalidLogFormat)?
            .unwrap_or_default();

        Ok(Config {
            bind_address,
            key_prefix,
            token_lifetime_seconds,
            key_overlap_seconds,
            key_rotation_interval_seconds,
            bcrypt_cost,
            user_token_client_id,
            principals,
            log_format,
        })
    }
}

fn validate_principals(principals: &[PrincipalConfig]) -> Result<(), ConfigError> {
    if principals.is_empty() {
        return Err(ConfigError::InvalidPrincipals(
            "at least one principal is required".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for p in principals {
        if p.id.trim().is_empty() {
            return Err(ConfigError::InvalidPrincipals(
                "principal id must not be empty".to_string(),
            ));
        }
        if !seen.insert(p.id.as_str()) {
            return Err(ConfigError::InvalidPrincipals(format!(
                "duplicate principal id '{}'",
                p.id
            )));
        }
        if p.secret.is_some() == p.secret_hash.is_some() {
            return Err(ConfigError::InvalidPrincipals(format!(
                "principal '{}' needs exactly one of secret or secret_hash",
                p.id
            )));
        }
        if let Some(bad) = p
            .scopes
            .iter()
            .find(|s| s.is_empty() || s.contains(char::is_whitespace))
        {
            return Err(ConfigError::InvalidPrincipals(format!(
                "principal '{}' has invalid scope {bad:?}",
                p.id
            )));
        }
    }

    Ok(())
}
