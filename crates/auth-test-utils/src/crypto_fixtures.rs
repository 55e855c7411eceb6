//! Deterministic cryptographic fixtures for testing
//!
//! Every keypair is derived from a one-byte seed, so the same seed always
//! yields the same key, kid and signatures across runs.

use common::jwks::{Jwk, Jwks, KeySet};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use ring::signature::{Ed25519KeyPair, KeyPair};
use thiserror::Error;

/// Test fixture error type
#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),
}

/// Deterministic Ed25519 keypair with a kid.
///
/// # Example
/// ```rust,ignore
/// let keypair = TestKeypair::from_seed(1, "auth-test-01");
/// let claims = serde_json::json!({"client_id": "aggregator", "exp": 4_000_000_000_i64});
/// let token = keypair.sign(&claims);
/// ```
#[derive(Clone, Debug)]
pub struct TestKeypair {
    pub kid: String,
    pub public_key: Vec<u8>,
    pub pkcs8: Vec<u8>,
}

impl TestKeypair {
    /// Build the keypair for `seed`.
    ///
    /// # Panics
    ///
    /// Panics if ring rejects the derived seed, which does not happen for
    /// 32-byte inputs.
    pub fn from_seed(seed: u8, kid: &str) -> Self {
        Self::try_from_seed(seed, kid).expect("deterministic Ed25519 seed is always valid")
    }

    /// Fallible form of [`TestKeypair::from_seed`].
    pub fn try_from_seed(seed: u8, kid: &str) -> Result<Self, FixtureError> {
        let seed_bytes = seed_bytes(seed);
        let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed_bytes)
            .map_err(|e| FixtureError::Crypto(format!("Failed to derive test keypair: {e:?}")))?;

        Ok(Self {
            kid: kid.to_string(),
            public_key: key_pair.public_key().as_ref().to_vec(),
            pkcs8: build_pkcs8_from_seed(&seed_bytes),
        })
    }

    /// JWK publishing this keypair's public half.
    pub fn jwk(&self) -> Jwk {
        Jwk::ed25519(&self.kid, &self.public_key)
    }

    /// JWKS JSON body for this keypair alone.
    pub fn jwk_json(&self) -> serde_json::Value {
        serde_json::to_value(Jwks {
            keys: vec![self.jwk()],
        })
        .expect("JWKS serializes")
    }

    /// Verification key set containing only this keypair.
    pub fn key_set(&self) -> KeySet {
        key_set(&[self])
    }

    /// Sign `claims` as an EdDSA JWT with this keypair's kid.
    pub fn sign(&self, claims: &serde_json::Value) -> String {
        let mut header = Header::new(Algorithm::EdDSA);
        header.typ = Some("JWT".to_string());
        header.kid = Some(self.kid.clone());

        jsonwebtoken::encode(&header, claims, &EncodingKey::from_ed_der(&self.pkcs8))
            .expect("signing with a fixture key succeeds")
    }
}

/// Key set publishing several fixture keypairs, as during rotation.
pub fn key_set(keypairs: &[&TestKeypair]) -> KeySet {
    KeySet::from_jwks(&Jwks {
        keys: keypairs.iter().map(|k| k.jwk()).collect(),
    })
}

fn seed_bytes(seed: u8) -> [u8; 32] {
    let mut seed_bytes = [0u8; 32];
    seed_bytes[0] = seed;
    for (i, byte) in seed_bytes.iter_mut().enumerate().skip(1) {
        *byte = seed.wrapping_mul(i as u8).wrapping_add(i as u8);
    }
    seed_bytes
}

/// Build a PKCS#8 v1 document around a raw Ed25519 seed.
///
/// Test-only; production keys come from `ring::rand::SystemRandom`.
pub fn build_pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
    // SEQUENCE { INTEGER 0, SEQUENCE { OID 1.3.101.112 }, OCTET STRING { OCTET STRING seed } }
    let mut pkcs8 = Vec::with_capacity(48);
    pkcs8.extend_from_slice(&[0x30, 0x2e]);
    pkcs8.extend_from_slice(&[0x02, 0x01, 0x00]);
    pkcs8.extend_from_slice(&[0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70]);
    pkcs8.extend_from_slice(&[0x04, 0x22, 0x04, 0x20]);
    pkcs8.extend_from_slice(seed);
    pkcs8
}
