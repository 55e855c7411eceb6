use crate::auth::jwks::KeySetCache;
use common::jwks::{verify_signature, KeySet, SignatureError};

/// Signature check used by [`EdgeAuthGate`](crate::auth::EdgeAuthGate).
///
/// Implementations must be cheap and non-blocking: the gate calls this on
/// every subrequest with no await point.
pub trait TokenVerifier: Send + Sync {
    /// # Errors
    ///
    /// Returns `BadSignature` if the token's signature does not verify.
    fn verify(&self, token: &str) -> Result<(), SignatureError>;
}

impl TokenVerifier for KeySetCache {
    fn verify(&self, token: &str) -> Result<(), SignatureError> {
        KeySetCache::verify(self, token)
    }
}

/// Verifier over a fixed key set.
#[derive(Debug, Clone)]
pub struct StaticKeyVerifier {
    keys: KeySet,
}

impl StaticKeyVerifier {
    #[must_use]
    pub fn new(keys: KeySet) -> Self {
        Self { keys }
    }
}

impl TokenVerifier for StaticKeyVerifier {
    fn verify(&self, token: &str) -> Result<(), SignatureError> {
        verify_signature(token, &self.keys)
    }
}
