//! In-memory registry of principals allowed to obtain tokens.

use crate::config::PrincipalConfig;
use crate::crypto;
use crate::errors::IssuerError;
use crate::models::PrincipalKind;
use common::secret::ExposeSecret;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::instrument;

/// A registered principal.
#[derive(Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub kind: PrincipalKind,
    pub subject: String,
    pub email_verified: bool,
    pub scopes: Vec<String>,
    secret_hash: String,
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("subject", &"[REDACTED]")
            .field("email_verified", &self.email_verified)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

pub struct PrincipalRegistry {
    principals: HashMap<String, Arc<Principal>>,
    // Verified against when the id is unknown so both paths cost one bcrypt.
    dummy_hash: String,
}

impl fmt::Debug for PrincipalRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrincipalRegistry")
            .field("principals", &self.principals.len())
            .finish_non_exhaustive()
    }
}

impl PrincipalRegistry {
    /// Build the registry, hashing plaintext secrets at `bcrypt_cost`.
    ///
    /// Pre-hashed secrets are checked for a parseable bcrypt format so a typo
    /// fails at startup rather than on the first token request.
    ///
    /// # Errors
    ///
    /// Returns `IssuerError::Crypto` if hashing fails or a configured hash is
    /// malformed.
    #[instrument(skip_all, name = "issuer.principals.load")]
    pub fn from_config(configs: &[PrincipalConfig], bcrypt_cost: u32) -> Result<Self, IssuerError> {
        let mut principals = HashMap::with_capacity(configs.len());

        for config in configs {
            let secret_hash = match (&config.secret, &config.secret_hash) {
                (Some(secret), _) => {
                    crypto::hash_client_secret(secret.expose_secret(), bcrypt_cost)?
                }
                (None, Some(hash)) => {
                    crypto::verify_client_secret("", hash).map_err(|_| {
                        IssuerError::Crypto(format!(
                            "Principal '{}' has a malformed secret_hash",
                            config.id
                        ))
                    })?;
                    hash.clone()
                }
                (None, None) => {
                    return Err(IssuerError::Crypto(format!(
                        "Principal '{}' has no secret",
                        config.id
                    )))
                }
            };

            principals.insert(
                config.id.clone(),
                Arc::new(Principal {
                    id: config.id.clone(),
                    kind: config.kind,
                    subject: config.subject.clone().unwrap_or_else(|| config.id.clone()),
                    email_verified: config.email_verified,
                    scopes: config.scopes.clone(),
                    secret_hash,
                }),
            );
        }

        let dummy_hash = crypto::hash_client_secret("unknown-principal", bcrypt_cost)?;

        tracing::info!(
            target: "issuer.principals",
            count = principals.len(),
            "Principal registry loaded"
        );

        Ok(Self {
            principals,
            dummy_hash,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.principals.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.principals.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Principal>> {
        self.principals.get(id).cloned()
    }

    /// Check `secret` for principal `id` of the given `kind`.
    ///
    /// bcrypt runs exactly once whatever the outcome. Unknown ids, wrong
    /// secrets and kind mismatches all yield `InvalidCredentials`.
    ///
    /// This blocks for the bcrypt cost; async callers should run it on the
    /// blocking pool.
    ///
    /// # Errors
    ///
    /// Returns `IssuerError::InvalidCredentials` on any mismatch, or
    /// `IssuerError::Crypto` if bcrypt itself fails.
    pub fn authenticate(
        &self,
        id: &str,
        secret: &str,
        kind: PrincipalKind,
    ) -> Result<Arc<Principal>, IssuerError> {
        let principal = self.principals.get(id);

        let hash_to_verify = match principal {
            Some(p) => p.secret_hash.as_str(),
            None => self.dummy_hash.as_str(),
        };
        let is_valid = crypto::verify_client_secret(secret, hash_to_verify)?;

        match principal {
            Some(p) if is_valid && p.kind == kind => Ok(Arc::clone(p)),
            Some(p) if is_valid => {
                tracing::debug!(
                    target: "issuer.principals",
                    kind = p.kind.as_str(),
                    expected = kind.as_str(),
                    "Principal used the wrong grant"
                );
                Err(IssuerError::InvalidCredentials)
            }
            _ => Err(IssuerError::InvalidCredentials),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::MIN_BCRYPT_COST;

    fn configs() -> Vec<PrincipalConfig> {
        serde_json::from_str(
            r#"[
                {"id": "aggregator", "kind": "service", "secret": "agg-secret",
                 "scopes": ["read", "admin:keys"]},
                {"id": "alice", "kind": "user", "secret": "pw", "subject": "user-1",
                 "email_verified": true}
            ]"#,
        )
        .unwrap()
    }

    fn registry() -> PrincipalRegistry {
        PrincipalRegistry::from_config(&configs(), MIN_BCRYPT_COST).unwrap()
    }

    #[test]
    fn test_loads_principals_with_subject_defaults() {
        let registry = registry();
        assert_eq!(registry.len(), 2);

        let aggregator = registry.get("aggregator").unwrap();
        assert_eq!(aggregator.subject, "aggregator");
        assert_eq!(aggregator.scopes, vec!["read", "admin:keys"]);

        let alice = registry.get("alice").unwrap();
        assert_eq!(alice.subject, "user-1");
        assert!(alice.email_verified);
    }

    #[test]
    fn test_authenticate_success() {
        let principal = registry()
            .authenticate("aggregator", "agg-secret", PrincipalKind::Service)
            .unwrap();
        assert_eq!(principal.id, "aggregator");
    }

    #[test]
    fn test_authenticate_failures_are_indistinguishable() {
        let registry = registry();

        let wrong_secret = registry.authenticate("aggregator", "nope", PrincipalKind::Service);
        let unknown = registry.authenticate("ghost", "agg-secret", PrincipalKind::Service);
        let wrong_kind = registry.authenticate("alice", "pw", PrincipalKind::Service);

        for result in [wrong_secret, unknown, wrong_kind] {
            assert!(matches!(result, Err(IssuerError::InvalidCredentials)));
        }
    }

    #[test]
    fn test_prehashed_secret() {
        let hash = crypto::hash_client_secret("hashed-secret", MIN_BCRYPT_COST).unwrap();
        let json = serde_json::json!([{"id": "svc", "kind": "service", "secret_hash": hash}]);
        let configs: Vec<PrincipalConfig> = serde_json::from_value(json).unwrap();

        let registry = PrincipalRegistry::from_config(&configs, MIN_BCRYPT_COST).unwrap();
        assert!(registry
            .authenticate("svc", "hashed-secret", PrincipalKind::Service)
            .is_ok());
    }

    #[test]
    fn test_malformed_hash_rejected_at_startup() {
        let configs: Vec<PrincipalConfig> = serde_json::from_str(
            r#"[{"id": "svc", "kind": "service", "secret_hash": "not-bcrypt"}]"#,
        )
        .unwrap();

        let result = PrincipalRegistry::from_config(&configs, MIN_BCRYPT_COST);
        assert!(matches!(result, Err(IssuerError::Crypto(msg)) if msg.contains("svc")));
    }

    #[test]
    fn test_debug_hides_hashes_and_subjects() {
        let registry = registry();
        let principal = registry.get("alice").unwrap();

        let debug_str = format!("{principal:?} {registry:?}");
        assert!(!debug_str.contains("user-1"));
        assert!(!debug_str.contains("$2"));
    }
}
