//! Background JWKS refresh.
//!
//! Requests never wait on a fetch; they read whatever snapshot the last
//! successful refresh stored. Besides the interval, a verification that saw
//! an unknown kid wakes the task for an immediate fetch.

use crate::auth::KeySetCache;
use crate::observability::metrics::set_jwks_freshness;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Refresh the key cache every `refresh_interval` until `cancel_token` fires.
///
/// Failures are logged by [`KeySetCache::refresh`] and leave the previous
/// snapshot in place.
pub async fn start_jwks_refresh_task(
    key_cache: Arc<KeySetCache>,
    refresh_interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "gate.tasks.jwks_refresh",
        refresh_interval_secs = refresh_interval.as_secs(),
        "JWKS refresh task started"
    );

    let mut interval = tokio::time::interval(refresh_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The startup fetch already ran; skip the immediate tick.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                // Errors are already logged and counted.
                let _ = key_cache.refresh().await;
                set_jwks_freshness(key_cache.freshness());
            }
            () = key_cache.refresh_requested() => {
                let _ = key_cache.refresh().await;
                set_jwks_freshness(key_cache.freshness());
                interval.reset();
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "gate.tasks.jwks_refresh",
                    "JWKS refresh task received shutdown signal, exiting"
                );
                break;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use auth_test_utils::{mount_jwks, TestKeypair, TestTokenBuilder, JWKS_PATH};
    use common::jwks::SignatureError;
    use wiremock::MockServer;

    fn cache_for(server: &MockServer) -> Arc<KeySetCache> {
        Arc::new(
            KeySetCache::new(
                format!("{}{JWKS_PATH}", server.uri()),
                Duration::from_secs(300),
                Duration::from_secs(600),
                Duration::from_secs(2),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_key_published_after_last_fetch_is_picked_up_early() {
        let old_key = TestKeypair::from_seed(6, "auth-test-06");
        let new_key = TestKeypair::from_seed(7, "auth-test-07");

        // The issuer has rotated; the gate still holds the old key set.
        let server = MockServer::start().await;
        mount_jwks(&server, &[&new_key, &old_key]).await;
        let cache = cache_for(&server);
        cache.replace(old_key.key_set());

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(start_jwks_refresh_task(
            Arc::clone(&cache),
            Duration::from_secs(60),
            cancel_token.clone(),
        ));

        let token = TestTokenBuilder::new().sign_with(&new_key);
        assert_eq!(cache.verify(&token), Err(SignatureError::BadSignature));

        let mut verified = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if cache.verify(&token).is_ok() {
                verified = true;
                break;
            }
        }
        assert!(verified, "new key was not fetched before the scheduled refresh");
        assert_eq!(server.received_requests().await.unwrap().len(), 1);

        let old_token = TestTokenBuilder::new().sign_with(&old_key);
        assert!(cache.verify(&old_token).is_ok());

        cancel_token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_task_loads_keys_and_exits_on_cancel() {
        let keypair = TestKeypair::from_seed(5, "auth-test-05");
        let server = MockServer::start().await;
        mount_jwks(&server, &[&keypair]).await;

        let cache = cache_for(&server);
        let cancel_token = CancellationToken::new();

        let handle = tokio::spawn(start_jwks_refresh_task(
            Arc::clone(&cache),
            Duration::from_millis(20),
            cancel_token.clone(),
        ));

        let token = TestTokenBuilder::new().sign_with(&keypair);
        let mut verified = false;
        for _ in 0..50 {
            if cache.verify(&token).is_ok() {
                verified = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(verified, "refresh task never loaded the key set");

        cancel_token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("task should exit after cancel")
            .unwrap();
    }
}
