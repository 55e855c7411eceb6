//! Key generation, token signing and secret hashing.

use crate::config::{MAX_BCRYPT_COST, MIN_BCRYPT_COST};
use crate::errors::IssuerError;
use crate::models::TokenClaims;
use common::secret::{ExposeSecret, SecretBox};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair};
use tracing::instrument;

/// Freshly generated Ed25519 key material.
#[derive(Debug)]
pub struct GeneratedKey {
    /// PKCS#8 v2 document holding the private key.
    pub private_key_pkcs8: SecretBox<Vec<u8>>,
    /// Raw 32-byte public key.
    pub public_key: Vec<u8>,
}

/// Generate an Ed25519 keypair from the system CSPRNG.
///
/// # Errors
///
/// Returns `IssuerError::Crypto` if ring cannot generate or re-parse the key.
#[instrument(skip_all)]
pub fn generate_signing_key() -> Result<GeneratedKey, IssuerError> {
    let rng = SystemRandom::new();

    let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
        .map_err(|e| IssuerError::Crypto(format!("Keypair generation failed: {e}")))?;

    let key_pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
        .map_err(|e| IssuerError::Crypto(format!("Keypair parsing failed: {e}")))?;

    Ok(GeneratedKey {
        public_key: key_pair.public_key().as_ref().to_vec(),
        private_key_pkcs8: SecretBox::new(Box::new(pkcs8.as_ref().to_vec())),
    })
}

/// Sign `claims` as a compact EdDSA JWS with `typ = "JWT"` and `kid`.
///
/// # Errors
///
/// Returns `IssuerError::Crypto` if the key is not valid PKCS#8 or signing fails.
#[instrument(skip_all)]
pub fn sign_token(
    claims: &TokenClaims,
    private_key_pkcs8: &SecretBox<Vec<u8>>,
    kid: &str,
) -> Result<String, IssuerError> {
    let der = private_key_pkcs8.expose_secret();
    Ed25519KeyPair::from_pkcs8_maybe_unchecked(der)
        .map_err(|e| IssuerError::Crypto(format!("Invalid private key format: {e}")))?;

    let mut header = Header::new(Algorithm::EdDSA);
    header.typ = Some("JWT".to_string());
    header.kid = Some(kid.to_string());

    encode(&header, claims, &EncodingKey::from_ed_der(der))
        .map_err(|e| IssuerError::Crypto(format!("JWT signing operation failed: {e}")))
}

/// Hash a secret with bcrypt at `cost`.
///
/// # Errors
///
/// Returns `IssuerError::Crypto` for a cost outside 10-14 or a bcrypt failure.
#[instrument(skip_all)]
pub fn hash_client_secret(secret: &str, cost: u32) -> Result<String, IssuerError> {
    if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&cost) {
        return Err(IssuerError::Crypto(format!(
            "Invalid bcrypt cost: {cost} (must be {MIN_BCRYPT_COST}-{MAX_BCRYPT_COST})"
        )));
    }

    bcrypt::hash(secret, cost)
        .map_err(|e| IssuerError::Crypto(format!("Secret hashing failed: {e}")))
}

/// Check `secret` against a bcrypt hash.
///
/// # Errors
///
/// Returns `IssuerError::Crypto` if the hash is malformed.
#[instrument(skip_all)]
pub fn verify_client_secret(secret: &str, hash: &str) -> Result<bool, IssuerError> {
    bcrypt::verify(secret, hash)
        .map_err(|e| IssuerError::Crypto(format!("Secret verification failed: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::jwks::{verify_signature, Jwk, Jwks, KeySet};

    fn claims() -> TokenClaims {
        TokenClaims {
            sub: "svc-aggregator".to_string(),
            client_id: "aggregator".to_string(),
            email_verified: false,
            iat: 1_700_000_000,
            exp: 1_700_003_600,
            scope: "read".to_string(),
        }
    }

    #[test]
    fn test_generated_keys_are_unique() {
        let a = generate_signing_key().unwrap();
        let b = generate_signing_key().unwrap();

        assert_eq!(a.public_key.len(), 32);
        assert_ne!(a.public_key, b.public_key);
    }

    #[test]
    fn test_signed_token_verifies_with_public_key() {
        let key = generate_signing_key().unwrap();
        let token = sign_token(&claims(), &key.private_key_pkcs8, "auth-2026-01").unwrap();

        let keys = KeySet::from_jwks(&Jwks {
            keys: vec![Jwk::ed25519("auth-2026-01", &key.public_key)],
        });
        assert!(verify_signature(&token, &keys).is_ok());

        let decoded = common::jwt::decode(&token).unwrap();
        assert_eq!(decoded.client_id, "aggregator");
        assert_eq!(decoded.sub.as_deref(), Some("svc-aggregator"));
        assert_eq!(common::jwt::extract_kid(&token).unwrap(), "auth-2026-01");
    }

    #[test]
    fn test_sign_with_garbage_key_fails() {
        let garbage = SecretBox::new(Box::new(vec![1_u8, 2, 3]));
        assert!(matches!(sign_token(&claims(), &garbage, "k"), Err(IssuerError::Crypto(_))));
    }

    #[test]
    fn test_hash_and_verify_secret() {
        let hash = hash_client_secret("s3cr3t", MIN_BCRYPT_COST).unwrap();

        assert!(verify_client_secret("s3cr3t", &hash).unwrap());
        assert!(!verify_client_secret("wrong", &hash).unwrap());
    }

    #[test]
    fn test_hash_rejects_cost_out_of_range() {
        assert!(hash_client_secret("x", 4).is_err());
        assert!(hash_client_secret("x", 15).is_err());
    }

    #[test]
    fn test_generated_key_debug_redacts_private_key() {
        let key = generate_signing_key().unwrap();
        assert!(format!("{key:?}").contains("REDACTED"));
    }
}
