//! Cached verification keys fetched from the issuer's JWKS endpoint.
//!
//! The cache holds an immutable [`KeySetSnapshot`] behind an
//! [`ArcSwapOption`]. Request handling only ever `load()`s the current
//! snapshot; the background refresh task builds a complete new key set and
//! `store()`s it, so readers never wait on the network or on a lock.
//!
//! A snapshot ages through three states:
//!
//! | Age | State | Behaviour |
//! |---|---|---|
//! | `<= ttl` | Fresh | served |
//! | `<= ttl + grace` | Stale | served, refresh failures logged |
//! | beyond, or never loaded | Expired | verification fails closed |
//!
//! A token whose `kid` is missing from a usable snapshot wakes the refresh
//! task early (at most once per [`MIN_FORCED_REFRESH_INTERVAL`]) so a key
//! published after the last fetch is picked up without waiting a full
//! refresh interval.

use crate::errors::GateError;
use crate::observability::metrics::record_jwks_refresh;
use arc_swap::ArcSwapOption;
use common::jwks::{verify_signature, Jwks, KeySet, SignatureError};
use common::jwt::extract_kid;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::instrument;

/// Age classification of the cached key set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    Expired,
}

impl Freshness {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Freshness::Fresh => "fresh",
            Freshness::Stale => "stale",
            Freshness::Expired => "expired",
        }
    }

    /// Whether keys in this state may be used for verification.
    #[must_use]
    pub fn is_usable(self) -> bool {
        !matches!(self, Freshness::Expired)
    }
}

/// Minimum spacing between refreshes triggered by unknown kids.
pub const MIN_FORCED_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// One fetched key set and when it was fetched.
#[derive(Debug)]
pub struct KeySetSnapshot {
    pub keys: KeySet,
    pub fetched_at: Instant,
}

pub struct KeySetCache {
    jwks_url: String,
    http_client: reqwest::Client,
    ttl: Duration,
    grace: Duration,
    current: ArcSwapOption<KeySetSnapshot>,
    refresh_wanted: Notify,
    last_forced_refresh: Mutex<Option<Instant>>,
}

impl std::fmt::Debug for KeySetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySetCache")
            .field("jwks_url", &self.jwks_url)
            .field("ttl", &self.ttl)
            .field("grace", &self.grace)
            .field("current", &self.current.load())
            .finish_non_exhaustive()
    }
}

impl KeySetCache {
    /// Create an empty cache. Nothing verifies until the first successful
    /// [`KeySetCache::refresh`] or [`KeySetCache::replace`].
    ///
    /// # Errors
    ///
    /// Returns `GateError::HttpClient` if the HTTP client cannot be built.
    pub fn new(
        jwks_url: String,
        ttl: Duration,
        grace: Duration,
        http_timeout: Duration,
    ) -> Result<Self, GateError> {
        let http_client = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(|e| GateError::HttpClient(e.to_string()))?;

        Ok(Self {
            jwks_url,
            http_client,
            ttl,
            grace,
            current: ArcSwapOption::empty(),
            refresh_wanted: Notify::new(),
            last_forced_refresh: Mutex::new(None),
        })
    }

    /// Current snapshot, if any key set was ever loaded.
    #[must_use]
    pub fn snapshot(&self) -> Option<Arc<KeySetSnapshot>> {
        self.current.load_full()
    }

    #[must_use]
    pub fn freshness(&self) -> Freshness {
        self.freshness_at(Instant::now())
    }

    #[must_use]
    pub fn freshness_at(&self, now: Instant) -> Freshness {
        self.classify(self.current.load().as_deref(), now)
    }

    fn classify(&self, snapshot: Option<&KeySetSnapshot>, now: Instant) -> Freshness {
        match snapshot {
            None => Freshness::Expired,
            Some(snapshot) => {
                let age = now.saturating_duration_since(snapshot.fetched_at);
                if age <= self.ttl {
                    Freshness::Fresh
                } else if age <= self.ttl + self.grace {
                    Freshness::Stale
                } else {
                    Freshness::Expired
                }
            }
        }
    }

    /// Swap in a new key set, fetched now.
    pub fn replace(&self, keys: KeySet) {
        self.current.store(Some(Arc::new(KeySetSnapshot {
            keys,
            fetched_at: Instant::now(),
        })));
    }

    /// Fetch the JWKS document and swap in the resulting key set.
    ///
    /// On any failure the previous snapshot stays in place. Returns the
    /// number of usable keys loaded.
    ///
    /// # Errors
    ///
    /// Returns `KeyFetch` for transport or status errors, `KeyDecode` for an
    /// unparseable document, and `NoUsableKeys` when no Ed25519 key survives.
    #[instrument(skip_all, name = "gate.auth.jwks.refresh")]
    pub async fn refresh(&self) -> Result<usize, GateError> {
        let result = self.fetch().await.map(|keys| {
            let count = keys.len();
            self.replace(keys);
            count
        });

        match &result {
            Ok(count) => {
                tracing::debug!(target: "gate.auth.jwks", keys = count, "JWKS refreshed");
                record_jwks_refresh("success");
            }
            Err(e) => {
                tracing::warn!(
                    target: "gate.auth.jwks",
                    error = %e,
                    freshness = self.freshness().as_str(),
                    "JWKS refresh failed"
                );
                record_jwks_refresh("error");
            }
        }

        result
    }

    async fn fetch(&self) -> Result<KeySet, GateError> {
        let response = self
            .http_client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| GateError::KeyFetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GateError::KeyFetch(format!(
                "endpoint returned {}",
                response.status()
            )));
        }

        let jwks: Jwks = response
            .json()
            .await
            .map_err(|e| GateError::KeyDecode(e.to_string()))?;

        let keys = KeySet::from_jwks(&jwks);
        if keys.is_empty() {
            return Err(GateError::NoUsableKeys);
        }

        Ok(keys)
    }

    /// Verify `token` against the cached keys.
    ///
    /// An unknown kid also asks the refresh task for an early fetch; this
    /// call never waits for it.
    ///
    /// # Errors
    ///
    /// Returns `BadSignature` for an unknown kid, a bad signature, or when
    /// the cache is expired or was never loaded.
    pub fn verify(&self, token: &str) -> Result<(), SignatureError> {
        self.verify_at(token, Instant::now())
    }

    /// [`KeySetCache::verify`] with an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`KeySetCache::verify`].
    pub fn verify_at(&self, token: &str, now: Instant) -> Result<(), SignatureError> {
        let guard = self.current.load();
        let snapshot = guard.as_deref();

        match (snapshot, self.classify(snapshot, now).is_usable()) {
            (Some(snapshot), true) => {
                if let Ok(kid) = extract_kid(token) {
                    if !snapshot.keys.contains(&kid) {
                        self.request_refresh_at(now, &kid);
                    }
                }
                verify_signature(token, &snapshot.keys)
            }
            _ => {
                tracing::warn!(
                    target: "gate.auth.jwks",
                    "Key set expired or never loaded, failing closed"
                );
                Err(SignatureError::BadSignature)
            }
        }
    }

    /// Resolves once a verification asked for an early refresh.
    pub async fn refresh_requested(&self) {
        self.refresh_wanted.notified().await;
    }

    fn request_refresh_at(&self, now: Instant, kid: &str) {
        let mut last = self
            .last_forced_refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let due = last.map_or(true, |at| {
            now.saturating_duration_since(at) >= MIN_FORCED_REFRESH_INTERVAL
        });
        if due {
            *last = Some(now);
            tracing::info!(
                target: "gate.auth.jwks",
                kid = %kid,
                "Unknown kid, requesting early JWKS refresh"
            );
            self.refresh_wanted.notify_one();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use auth_test_utils::{mount_jwks, TestKeypair, TestTokenBuilder, JWKS_PATH};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TTL: Duration = Duration::from_secs(300);
    const GRACE: Duration = Duration::from_secs(600);

    fn cache(url: String) -> KeySetCache {
        KeySetCache::new(url, TTL, GRACE, Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_empty_cache_fails_closed() {
        let cache = cache("http://127.0.0.1:1/jwks".to_string());
        let keypair = TestKeypair::from_seed(1, "auth-test-01");
        let token = TestTokenBuilder::new().sign_with(&keypair);

        assert_eq!(cache.freshness(), Freshness::Expired);
        assert_eq!(cache.verify(&token), Err(SignatureError::BadSignature));
    }

    #[tokio::test(start_paused = true)]
    async fn test_freshness_transitions() {
        let keypair = TestKeypair::from_seed(1, "auth-test-01");
        let cache = cache("http://127.0.0.1:1/jwks".to_string());
        cache.replace(keypair.key_set());
        let token = TestTokenBuilder::new().sign_with(&keypair);

        assert_eq!(cache.freshness(), Freshness::Fresh);
        assert!(cache.verify(&token).is_ok());

        tokio::time::advance(TTL + Duration::from_secs(1)).await;
        assert_eq!(cache.freshness(), Freshness::Stale);
        assert!(cache.verify(&token).is_ok());

        tokio::time::advance(GRACE).await;
        assert_eq!(cache.freshness(), Freshness::Expired);
        assert_eq!(cache.verify(&token), Err(SignatureError::BadSignature));
    }

    #[tokio::test]
    async fn test_refresh_loads_keys() {
        let keypair = TestKeypair::from_seed(2, "auth-test-02");
        let server = MockServer::start().await;
        mount_jwks(&server, &[&keypair]).await;

        let cache = cache(format!("{}{JWKS_PATH}", server.uri()));
        assert_eq!(cache.refresh().await.unwrap(), 1);

        let token = TestTokenBuilder::new().sign_with(&keypair);
        assert!(cache.verify(&token).is_ok());

        let other = TestKeypair::from_seed(3, "auth-test-03");
        let foreign = TestTokenBuilder::new().sign_with(&other);
        assert_eq!(cache.verify(&foreign), Err(SignatureError::BadSignature));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_keys() {
        let keypair = TestKeypair::from_seed(4, "auth-test-04");
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let cache = cache(format!("{}{JWKS_PATH}", server.uri()));
        cache.replace(keypair.key_set());

        assert!(matches!(cache.refresh().await, Err(GateError::KeyFetch(_))));
        let token = TestTokenBuilder::new().sign_with(&keypair);
        assert!(cache.verify(&token).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_kid_requests_refresh_at_most_once_per_interval() {
        let known = TestKeypair::from_seed(1, "auth-test-01");
        let unknown = TestKeypair::from_seed(2, "auth-test-02");
        let cache = cache("http://127.0.0.1:1/jwks".to_string());
        cache.replace(known.key_set());
        let token = TestTokenBuilder::new().sign_with(&unknown);
        let wait = || tokio::time::timeout(Duration::from_millis(10), cache.refresh_requested());

        // Known kid: no request.
        assert!(cache.verify(&TestTokenBuilder::new().sign_with(&known)).is_ok());
        assert!(wait().await.is_err());

        assert_eq!(cache.verify(&token), Err(SignatureError::BadSignature));
        assert!(wait().await.is_ok());

        assert_eq!(cache.verify(&token), Err(SignatureError::BadSignature));
        assert!(wait().await.is_err());

        tokio::time::advance(MIN_FORCED_REFRESH_INTERVAL).await;
        assert_eq!(cache.verify(&token), Err(SignatureError::BadSignature));
        assert!(wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_rejects_unusable_documents() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/empty"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"keys": []})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/garbage"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let empty = cache(format!("{}/empty", server.uri()));
        assert!(matches!(empty.refresh().await, Err(GateError::NoUsableKeys)));

        let garbage = cache(format!("{}/garbage", server.uri()));
        assert!(matches!(garbage.refresh().await, Err(GateError::KeyDecode(_))));
        assert!(garbage.snapshot().is_none());
    }
}
