//! Signing key ring with copy-on-write rotation.
//!
//! The ring is an immutable [`KeyRingSnapshot`] behind an [`ArcSwap`]:
//! signers `load()` the current snapshot without locking, and rotation builds
//! a new snapshot and swaps it in. A token is always signed with the active
//! key of the snapshot it loaded, and that key stays published for the
//! overlap window after it is retired, so tokens issued across a rotation
//! keep verifying.
//!
//! The key that the next rotation will activate is generated ahead of time
//! and published alongside the active key. Verifiers that cache the JWKS
//! therefore already hold it when it starts signing.

use crate::crypto::{self, GeneratedKey};
use crate::errors::IssuerError;
use crate::models::TokenClaims;
use arc_swap::ArcSwap;
use chrono::{DateTime, Duration, Utc};
use common::jwks::{Jwk, Jwks, KeySet};
use common::secret::SecretBox;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::instrument;

/// One signing key.
pub struct SigningKey {
    pub kid: String,
    pub created_at: DateTime<Utc>,
    pub public_key: Vec<u8>,
    private_key_pkcs8: SecretBox<Vec<u8>>,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("created_at", &self.created_at)
            .field("private_key_pkcs8", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    fn from_generated(kid: String, created_at: DateTime<Utc>, generated: GeneratedKey) -> Self {
        Self {
            kid,
            created_at,
            public_key: generated.public_key,
            private_key_pkcs8: generated.private_key_pkcs8,
        }
    }

    fn jwk(&self) -> Jwk {
        Jwk::ed25519(&self.kid, &self.public_key)
    }
}

/// A key that no longer signs but is still published for verification.
#[derive(Debug, Clone)]
pub struct RetiredKey {
    pub key: Arc<SigningKey>,
    pub retired_at: DateTime<Utc>,
}

/// Immutable view of the ring at one point in time.
#[derive(Debug)]
pub struct KeyRingSnapshot {
    pub active: Arc<SigningKey>,
    /// When `active` started signing.
    pub activated_at: DateTime<Utc>,
    /// Published, not yet signing. Promoted by the next rotation.
    pub next: Arc<SigningKey>,
    pub retired: Vec<RetiredKey>,
    next_sequence: u32,
}

/// Issuer's signing keys: one active key, one pre-published next key, and
/// retired keys inside the overlap window.
pub struct SigningKeyRing {
    current: ArcSwap<KeyRingSnapshot>,
    prefix: String,
    overlap: Duration,
    // Serializes writers so kid sequence numbers never collide.
    writer: Mutex<()>,
}

impl fmt::Debug for SigningKeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyRing")
            .field("prefix", &self.prefix)
            .field("overlap", &self.overlap)
            .field("current", &self.current.load())
            .finish_non_exhaustive()
    }
}

fn format_kid(prefix: &str, now: DateTime<Utc>, sequence: u32) -> String {
    format!("{prefix}-{}-{sequence:02}", now.format("%Y"))
}

impl SigningKeyRing {
    /// Create a ring with freshly generated active and next keys.
    ///
    /// # Errors
    ///
    /// Returns `IssuerError::Crypto` if key generation fails.
    pub fn new(prefix: &str, overlap: std::time::Duration) -> Result<Self, IssuerError> {
        Self::new_at(prefix, overlap, Utc::now())
    }

    /// [`SigningKeyRing::new`] with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns `IssuerError::Crypto` if key generation fails.
    pub fn new_at(
        prefix: &str,
        overlap: std::time::Duration,
        now: DateTime<Utc>,
    ) -> Result<Self, IssuerError> {
        let overlap = Duration::from_std(overlap)
            .map_err(|e| IssuerError::Internal(format!("Key overlap out of range: {e}")))?;

        let kid = format_kid(prefix, now, 1);
        let active = Arc::new(SigningKey::from_generated(
            kid.clone(),
            now,
            crypto::generate_signing_key()?,
        ));
        let next = Arc::new(SigningKey::from_generated(
            format_kid(prefix, now, 2),
            now,
            crypto::generate_signing_key()?,
        ));

        tracing::info!(
            target: "issuer.keys",
            kid = %kid,
            next_kid = %next.kid,
            "Initial signing keys generated"
        );

        Ok(Self {
            current: ArcSwap::from_pointee(KeyRingSnapshot {
                active,
                activated_at: now,
                next,
                retired: Vec::new(),
                next_sequence: 3,
            }),
            prefix: prefix.to_string(),
            overlap,
            writer: Mutex::new(()),
        })
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<KeyRingSnapshot> {
        self.current.load_full()
    }

    #[must_use]
    pub fn active_kid(&self) -> String {
        self.current.load().active.kid.clone()
    }

    /// Kid the next rotation will activate.
    #[must_use]
    pub fn next_kid(&self) -> String {
        self.current.load().next.kid.clone()
    }

    /// Sign `claims` with the active key of the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns `IssuerError::Crypto` if signing fails.
    pub fn sign(&self, claims: &TokenClaims) -> Result<String, IssuerError> {
        let snapshot = self.current.load();
        crypto::sign_token(claims, &snapshot.active.private_key_pkcs8, &snapshot.active.kid)
    }

    /// Activate the pre-published next key, retire the current one, and
    /// generate a fresh next key.
    ///
    /// Retired keys whose overlap window already closed are pruned in the
    /// same swap. Returns the newly active kid.
    ///
    /// # Errors
    ///
    /// Returns `IssuerError::Crypto` if key generation fails; the ring is
    /// left unchanged.
    pub fn rotate(&self) -> Result<String, IssuerError> {
        self.rotate_at(Utc::now())
    }

    /// [`SigningKeyRing::rotate`] with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns `IssuerError::Crypto` if key generation fails.
    #[instrument(skip_all, name = "issuer.keys.rotate")]
    pub fn rotate_at(&self, now: DateTime<Utc>) -> Result<String, IssuerError> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = self.current.load_full();

        let next = Arc::new(SigningKey::from_generated(
            format_kid(&self.prefix, now, previous.next_sequence),
            now,
            crypto::generate_signing_key()?,
        ));
        let next_kid = next.kid.clone();
        let active = Arc::clone(&previous.next);
        let kid = active.kid.clone();

        let mut retired: Vec<RetiredKey> = previous
            .retired
            .iter()
            .filter(|r| self.is_published(r, now))
            .cloned()
            .collect();
        retired.push(RetiredKey {
            key: Arc::clone(&previous.active),
            retired_at: now,
        });

        self.current.store(Arc::new(KeyRingSnapshot {
            active,
            activated_at: now,
            next,
            retired,
            next_sequence: previous.next_sequence.saturating_add(1),
        }));

        tracing::info!(
            target: "issuer.keys",
            kid = %kid,
            retired_kid = %previous.active.kid,
            next_kid = %next_kid,
            "Signing key rotated"
        );

        Ok(kid)
    }

    /// Drop retired keys whose overlap window has closed. Returns how many
    /// were dropped.
    pub fn prune_expired(&self) -> usize {
        self.prune_expired_at(Utc::now())
    }

    /// [`SigningKeyRing::prune_expired`] with an explicit clock.
    pub fn prune_expired_at(&self, now: DateTime<Utc>) -> usize {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = self.current.load_full();

        let retired: Vec<RetiredKey> = previous
            .retired
            .iter()
            .filter(|r| self.is_published(r, now))
            .cloned()
            .collect();

        let pruned = previous.retired.len() - retired.len();
        if pruned > 0 {
            self.current.store(Arc::new(KeyRingSnapshot {
                active: Arc::clone(&previous.active),
                activated_at: previous.activated_at,
                next: Arc::clone(&previous.next),
                retired,
                next_sequence: previous.next_sequence,
            }));
            tracing::info!(target: "issuer.keys", pruned, "Pruned expired signing keys");
        }

        pruned
    }

    /// Every key a verifier should currently accept: active, then next, then
    /// retired keys newest first.
    #[must_use]
    pub fn public_keys(&self) -> Jwks {
        self.public_keys_at(Utc::now())
    }

    /// [`SigningKeyRing::public_keys`] with an explicit clock.
    ///
    /// Retired keys past their window are left out even before they are
    /// pruned.
    #[must_use]
    pub fn public_keys_at(&self, now: DateTime<Utc>) -> Jwks {
        let snapshot = self.current.load();
        let mut keys = Vec::with_capacity(snapshot.retired.len() + 2);
        keys.push(snapshot.active.jwk());
        keys.push(snapshot.next.jwk());
        keys.extend(
            snapshot
                .retired
                .iter()
                .rev()
                .filter(|r| self.is_published(r, now))
                .map(|r| r.key.jwk()),
        );
        Jwks { keys }
    }

    /// Verification key set for [`SigningKeyRing::public_keys_at`].
    #[must_use]
    pub fn key_set_at(&self, now: DateTime<Utc>) -> KeySet {
        KeySet::from_jwks(&self.public_keys_at(now))
    }

    /// Time since the active key started signing.
    #[must_use]
    pub fn active_age_at(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.current.load().activated_at)
    }

    /// A window ending past the representable range never closes.
    fn is_published(&self, retired: &RetiredKey, now: DateTime<Utc>) -> bool {
        retired
            .retired_at
            .checked_add_signed(self.overlap)
            .map_or(true, |closes_at| now < closes_at)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::jwks::{verify_signature, SignatureError};

    const OVERLAP: std::time::Duration = std::time::Duration::from_secs(7200);

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn claims(now: DateTime<Utc>) -> TokenClaims {
        TokenClaims {
            sub: "svc".to_string(),
            client_id: "aggregator".to_string(),
            email_verified: false,
            iat: now.timestamp(),
            exp: now.timestamp() + 3600,
            scope: String::new(),
        }
    }

    fn kids(jwks: &Jwks) -> Vec<String> {
        jwks.keys.iter().map(|k| k.kid.clone()).collect()
    }

    #[test]
    fn test_kid_format_and_monotonic_sequence() {
        let ring = SigningKeyRing::new_at("auth", OVERLAP, t0()).unwrap();
        assert_eq!(ring.active_kid(), "auth-2026-01");
        assert_eq!(ring.next_kid(), "auth-2026-02");

        assert_eq!(ring.rotate_at(t0()).unwrap(), "auth-2026-02");
        assert_eq!(ring.rotate_at(t0()).unwrap(), "auth-2026-03");

        // The key activated next year was generated this year.
        let next_year = Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(ring.rotate_at(next_year).unwrap(), "auth-2026-04");
        assert_eq!(ring.next_kid(), "auth-2027-05");
    }

    #[test]
    fn test_public_keys_lists_active_then_next_then_retired() {
        let ring = SigningKeyRing::new_at("auth", OVERLAP, t0()).unwrap();
        assert_eq!(kids(&ring.public_keys_at(t0())), vec!["auth-2026-01", "auth-2026-02"]);

        ring.rotate_at(t0()).unwrap();
        assert_eq!(
            kids(&ring.public_keys_at(t0())),
            vec!["auth-2026-02", "auth-2026-03", "auth-2026-01"]
        );
    }

    #[test]
    fn test_key_set_fetched_before_rotation_verifies_new_active_key() {
        let ring = SigningKeyRing::new_at("auth", OVERLAP, t0()).unwrap();
        let cached_before_rotation = ring.key_set_at(t0());

        ring.rotate_at(t0() + Duration::hours(24)).unwrap();
        let token = ring.sign(&claims(t0() + Duration::hours(24))).unwrap();

        assert!(verify_signature(&token, &cached_before_rotation).is_ok());
    }

    #[test]
    fn test_huge_overlap_keeps_retired_keys_published() {
        let overlap = std::time::Duration::from_secs(1_000_000_000_000_000);
        let ring = SigningKeyRing::new_at("auth", overlap, t0()).unwrap();
        ring.rotate_at(t0()).unwrap();

        assert_eq!(ring.public_keys_at(t0() + Duration::days(365)).keys.len(), 3);
        assert_eq!(ring.prune_expired_at(t0() + Duration::days(365)), 0);
    }

    #[test]
    fn test_token_round_trip_against_public_keys() {
        let ring = SigningKeyRing::new_at("auth", OVERLAP, t0()).unwrap();
        let token = ring.sign(&claims(t0())).unwrap();

        assert!(verify_signature(&token, &ring.key_set_at(t0())).is_ok());
        let decoded = common::jwt::decode(&token).unwrap();
        assert_eq!(decoded.sub.as_deref(), Some("svc"));
        assert_eq!(decoded.client_id, "aggregator");
    }

    #[test]
    fn test_retired_key_verifies_inside_overlap_window() {
        let ring = SigningKeyRing::new_at("auth", OVERLAP, t0()).unwrap();
        let old_token = ring.sign(&claims(t0())).unwrap();

        ring.rotate_at(t0()).unwrap();

        let just_inside = t0() + Duration::seconds(7199);
        assert!(verify_signature(&old_token, &ring.key_set_at(just_inside)).is_ok());
    }

    #[test]
    fn test_retired_key_rejected_after_overlap_window() {
        let ring = SigningKeyRing::new_at("auth", OVERLAP, t0()).unwrap();
        let old_token = ring.sign(&claims(t0())).unwrap();

        ring.rotate_at(t0()).unwrap();

        let after = t0() + Duration::seconds(7200);
        assert_eq!(
            verify_signature(&old_token, &ring.key_set_at(after)),
            Err(SignatureError::BadSignature)
        );
        assert_eq!(kids(&ring.public_keys_at(after)), vec!["auth-2026-02", "auth-2026-03"]);
    }

    #[test]
    fn test_prune_drops_only_expired_keys() {
        let ring = SigningKeyRing::new_at("auth", OVERLAP, t0()).unwrap();
        ring.rotate_at(t0()).unwrap();
        ring.rotate_at(t0() + Duration::hours(1)).unwrap();

        assert_eq!(ring.prune_expired_at(t0() + Duration::minutes(30)), 0);
        assert_eq!(ring.snapshot().retired.len(), 2);

        assert_eq!(ring.prune_expired_at(t0() + Duration::hours(2)), 1);
        let snapshot = ring.snapshot();
        assert_eq!(snapshot.retired.len(), 1);
        assert_eq!(snapshot.retired.first().unwrap().key.kid, "auth-2026-02");
        assert_eq!(snapshot.active.kid, "auth-2026-03");
    }

    #[test]
    fn test_rotation_prunes_closed_windows() {
        let ring = SigningKeyRing::new_at("auth", OVERLAP, t0()).unwrap();
        ring.rotate_at(t0()).unwrap();
        ring.rotate_at(t0() + Duration::hours(3)).unwrap();

        let retired: Vec<_> = ring.snapshot().retired.iter().map(|r| r.key.kid.clone()).collect();
        assert_eq!(retired, vec!["auth-2026-02"]);
    }

    #[test]
    fn test_active_age() {
        let ring = SigningKeyRing::new_at("auth", OVERLAP, t0()).unwrap();
        assert_eq!(ring.active_age_at(t0() + Duration::hours(5)), Duration::hours(5));

        ring.rotate_at(t0() + Duration::hours(5)).unwrap();
        assert_eq!(ring.active_age_at(t0() + Duration::hours(6)), Duration::hours(1));
    }

    #[tokio::test]
    async fn test_tokens_issued_during_rotation_always_verify() {
        let ring = Arc::new(SigningKeyRing::new("auth", OVERLAP).unwrap());

        let signers: Vec<_> = (0..8)
            .map(|_| {
                let ring = Arc::clone(&ring);
                tokio::spawn(async move {
                    let mut tokens = Vec::new();
                    for _ in 0..25 {
                        tokens.push(ring.sign(&claims(Utc::now())).unwrap());
                        tokio::task::yield_now().await;
                    }
                    tokens
                })
            })
            .collect();

        for _ in 0..10 {
            ring.rotate().unwrap();
            tokio::task::yield_now().await;
        }

        let keys = KeySet::from_jwks(&ring.public_keys());
        for signer in signers {
            for token in signer.await.unwrap() {
                assert!(verify_signature(&token, &keys).is_ok());
            }
        }
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let ring = SigningKeyRing::new_at("auth", OVERLAP, t0()).unwrap();
        let debug_str = format!("{ring:?}");
        assert!(debug_str.contains("auth-2026-01"));
        assert!(debug_str.contains("[REDACTED]"));
    }
}
