//! JWKS documents and Ed25519 signature verification.
//!
//! [`Jwks`] is the RFC 7517 document served by the issuer at
//! `/.well-known/jwks.json`. [`KeySet`] is the verification-ready form: only
//! Ed25519/EdDSA keys, indexed by `kid`, with decoding keys built once.
//!
//! [`verify_signature`] is pure. Fetching, caching and refreshing a key set is
//! the caller's concern.

use crate::jwt::{decode_ed25519_public_key_jwk, extract_kid};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

/// JWK key type for Edwards-curve keys.
pub const KTY_OKP: &str = "OKP";

/// JWK curve name for Ed25519.
pub const CRV_ED25519: &str = "Ed25519";

/// JWS algorithm name for Ed25519 signatures.
pub const ALG_EDDSA: &str = "EdDSA";

/// Signature verification failure.
///
/// One variant on purpose: callers never learn whether the kid was unknown
/// or the signature mismatched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("The access token is invalid or expired")]
    BadSignature,
}

/// JSON Web Key as published by the issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type ("OKP" for Ed25519).
    pub kty: String,

    /// Key ID used to select the verification key.
    pub kid: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// Public key value (base64url, no padding).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
}

impl Jwk {
    /// Build a signing JWK for a raw 32-byte Ed25519 public key.
    #[must_use]
    pub fn ed25519(kid: impl Into<String>, public_key: &[u8]) -> Self {
        Self {
            kty: KTY_OKP.to_string(),
            kid: kid.into(),
            crv: Some(CRV_ED25519.to_string()),
            x: Some(crate::jwt::encode_segment(public_key)),
            alg: Some(ALG_EDDSA.to_string()),
            key_use: Some("sig".to_string()),
        }
    }
}

/// JWKS document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

/// Verification keys indexed by kid.
///
/// Immutable once built. Refreshing means building a new set.
#[derive(Clone, Default)]
pub struct KeySet {
    keys: HashMap<String, DecodingKey>,
}

impl fmt::Debug for KeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kids: Vec<&str> = self.keys.keys().map(String::as_str).collect();
        kids.sort_unstable();
        f.debug_struct("KeySet").field("kids", &kids).finish()
    }
}

impl KeySet {
    /// Build a key set from a JWKS document.
    ///
    /// Keys that are not Ed25519/EdDSA, or whose `x` does not decode to 32
    /// bytes, are skipped with a warning. A later key with a duplicate kid
    /// replaces the earlier one.
    #[must_use]
    pub fn from_jwks(jwks: &Jwks) -> Self {
        let mut keys = HashMap::with_capacity(jwks.keys.len());

        for jwk in &jwks.keys {
            match accept_key(jwk) {
                Some(raw) => {
                    keys.insert(jwk.kid.clone(), DecodingKey::from_ed_der(&raw));
                }
                None => {
                    tracing::warn!(
                        target: "common.jwks",
                        kid = %jwk.kid,
                        kty = %jwk.kty,
                        "Skipping unusable JWK"
                    );
                }
            }
        }

        Self { keys }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    #[must_use]
    pub fn contains(&self, kid: &str) -> bool {
        self.keys.contains_key(kid)
    }

    fn get(&self, kid: &str) -> Option<&DecodingKey> {
        self.keys.get(kid)
    }
}

fn accept_key(jwk: &Jwk) -> Option<Vec<u8>> {
    if jwk.kty != KTY_OKP || jwk.crv.as_deref() != Some(CRV_ED25519) {
        return None;
    }
    if jwk.alg.as_deref().is_some_and(|alg| alg != ALG_EDDSA) {
        return None;
    }
    let raw = decode_ed25519_public_key_jwk(jwk.x.as_deref()?).ok()?;
    (raw.len() == 32).then_some(raw)
}

/// Verify a token's EdDSA signature against `keys`.
///
/// The header `kid` must name a key in the set and the header `alg` must be
/// EdDSA. The payload must carry a numeric `exp` claim, but expiry itself is
/// not judged here.
///
/// # Errors
///
/// Returns `SignatureError::BadSignature` for every failure.
pub fn verify_signature(token: &str, keys: &KeySet) -> Result<(), SignatureError> {
    let kid = extract_kid(token).map_err(|e| {
        tracing::debug!(target: "common.jwks", error = ?e, "Token kid extraction failed");
        SignatureError::BadSignature
    })?;

    let Some(key) = keys.get(&kid) else {
        tracing::debug!(target: "common.jwks", kid = %kid, "Token kid not in key set");
        return Err(SignatureError::BadSignature);
    };

    let mut validation = Validation::new(Algorithm::EdDSA);
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::from(["exp".to_string()]);

    jsonwebtoken::decode::<serde_json::Value>(token, key, &validation)
        .map(|_| ())
        .map_err(|e| {
            tracing::debug!(
                target: "common.jwks",
                kid = %kid,
                error = %e,
                "Token verification failed"
            );
            SignatureError::BadSignature
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use ring::rand::SystemRandom;
    use ring::signature::{Ed25519KeyPair, KeyPair};

    struct Signer {
        kid: String,
        pkcs8: Vec<u8>,
        public_key: Vec<u8>,
    }

    impl Signer {
        fn generate(kid: &str) -> Self {
            let pkcs8 = Ed25519KeyPair::generate_pkcs8(&SystemRandom::new()).unwrap();
            let pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap();
            Self {
                kid: kid.to_string(),
                pkcs8: pkcs8.as_ref().to_vec(),
                public_key: pair.public_key().as_ref().to_vec(),
            }
        }

        fn jwk(&self) -> Jwk {
            Jwk::ed25519(&self.kid, &self.public_key)
        }

        fn sign(&self, claims: &serde_json::Value) -> String {
            let mut header = Header::new(Algorithm::EdDSA);
            header.kid = Some(self.kid.clone());
            encode(&header, claims, &EncodingKey::from_ed_der(&self.pkcs8)).unwrap()
        }
    }

    fn claims_with_exp() -> serde_json::Value {
        serde_json::json!({"client_id": "aggregator", "sub": "svc", "exp": 4_000_000_000_i64})
    }

    #[test]
    fn test_valid_signature_verifies() {
        let signer = Signer::generate("auth-2026-01");
        let keys = KeySet::from_jwks(&Jwks { keys: vec![signer.jwk()] });

        assert!(verify_signature(&signer.sign(&claims_with_exp()), &keys).is_ok());
    }

    #[test]
    fn test_expired_but_signed_token_still_verifies() {
        let signer = Signer::generate("auth-2026-01");
        let keys = KeySet::from_jwks(&Jwks { keys: vec![signer.jwk()] });
        let token = signer.sign(&serde_json::json!({"client_id": "x", "exp": 1}));

        assert!(verify_signature(&token, &keys).is_ok());
    }

    #[test]
    fn test_token_without_exp_is_rejected() {
        let signer = Signer::generate("auth-2026-01");
        let keys = KeySet::from_jwks(&Jwks { keys: vec![signer.jwk()] });
        let token = signer.sign(&serde_json::json!({"client_id": "aggregator"}));

        assert_eq!(verify_signature(&token, &keys), Err(SignatureError::BadSignature));
    }

    #[test]
    fn test_unknown_kid_is_rejected() {
        let published = Signer::generate("auth-2026-01");
        let rogue = Signer::generate("auth-2026-99");
        let keys = KeySet::from_jwks(&Jwks { keys: vec![published.jwk()] });

        assert_eq!(
            verify_signature(&rogue.sign(&claims_with_exp()), &keys),
            Err(SignatureError::BadSignature)
        );
    }

    #[test]
    fn test_signature_from_other_key_with_same_kid_is_rejected() {
        let published = Signer::generate("auth-2026-01");
        let impostor = Signer::generate("auth-2026-01");
        let keys = KeySet::from_jwks(&Jwks { keys: vec![published.jwk()] });

        assert_eq!(
            verify_signature(&impostor.sign(&claims_with_exp()), &keys),
            Err(SignatureError::BadSignature)
        );
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let signer = Signer::generate("auth-2026-01");
        let keys = KeySet::from_jwks(&Jwks { keys: vec![signer.jwk()] });
        let token = signer.sign(&claims_with_exp());

        let (header, rest) = token.split_once('.').unwrap();
        let (_, signature) = rest.split_once('.').unwrap();
        let forged = crate::jwt::encode_segment(
            br#"{"client_id":"aggregator","exp":4000000000,"email_verified":true}"#,
        );
        let tampered = format!("{header}.{forged}.{signature}");

        assert_eq!(verify_signature(&tampered, &keys), Err(SignatureError::BadSignature));
    }

    #[test]
    fn test_unsigned_example_token_is_rejected() {
        let keys = KeySet::from_jwks(&Jwks { keys: vec![Signer::generate("k").jwk()] });
        assert_eq!(
            verify_signature("H.eyJjbGllbnRfaWQiOiJhZ2dyZWdhdG9yIn0.S", &keys),
            Err(SignatureError::BadSignature)
        );
    }

    #[test]
    fn test_empty_key_set_rejects_everything() {
        let signer = Signer::generate("auth-2026-01");
        assert_eq!(
            verify_signature(&signer.sign(&claims_with_exp()), &KeySet::default()),
            Err(SignatureError::BadSignature)
        );
    }

    #[test]
    fn test_key_set_skips_unusable_keys() {
        let good = Signer::generate("good");
        let mut rsa = good.jwk();
        rsa.kid = "rsa".to_string();
        rsa.kty = "RSA".to_string();
        let mut wrong_alg = good.jwk();
        wrong_alg.kid = "wrong-alg".to_string();
        wrong_alg.alg = Some("RS256".to_string());
        let mut short = good.jwk();
        short.kid = "short".to_string();
        short.x = Some(crate::jwt::encode_segment(&[1, 2, 3]));
        let mut no_alg = good.jwk();
        no_alg.kid = "no-alg".to_string();
        no_alg.alg = None;

        let keys = KeySet::from_jwks(&Jwks {
            keys: vec![good.jwk(), rsa, wrong_alg, short, no_alg],
        });

        assert_eq!(keys.len(), 2);
        assert!(keys.contains("good"));
        assert!(keys.contains("no-alg"));
        assert!(!keys.contains("rsa"));
    }

    #[test]
    fn test_jwks_document_serialization() {
        let jwk = Jwk::ed25519("auth-2026-01", &[7u8; 32]);
        let json = serde_json::to_value(Jwks { keys: vec![jwk] }).unwrap();

        let key = &json["keys"][0];
        assert_eq!(key["kty"], "OKP");
        assert_eq!(key["crv"], "Ed25519");
        assert_eq!(key["alg"], "EdDSA");
        assert_eq!(key["use"], "sig");
        assert_eq!(key["kid"], "auth-2026-01");
        assert_eq!(key["x"].as_str().unwrap().len(), 43);
    }

    #[test]
    fn test_key_set_debug_lists_kids_only() {
        let keys = KeySet::from_jwks(&Jwks { keys: vec![Signer::generate("auth-2026-01").jwk()] });
        let debug_str = format!("{keys:?}");
        assert!(debug_str.contains("auth-2026-01"));
    }
}
