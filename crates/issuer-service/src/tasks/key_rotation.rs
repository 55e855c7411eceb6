//! Signing key rotation task.
//!
//! Every tick the task rotates the active key once it is older than the
//! configured interval, then prunes retired keys whose overlap window has
//! closed. Pruning runs even when age-based rotation is disabled so keys
//! retired through the admin endpoint still age out.

use crate::observability::metrics::{record_key_rotation, set_published_keys};
use crate::services::SigningKeyRing;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default time between rotation checks.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// What one rotation check did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationCycle {
    /// Kid of the new active key, if the ring rotated.
    pub rotated_to: Option<String>,
    pub pruned: usize,
}

/// Run one rotation check against `now`.
pub fn run_rotation_cycle_at(
    key_ring: &SigningKeyRing,
    rotation_interval: Option<Duration>,
    now: DateTime<Utc>,
) -> RotationCycle {
    let due = rotation_interval.is_some_and(|interval| {
        key_ring
            .active_age_at(now)
            .to_std()
            .is_ok_and(|age| age >= interval)
    });

    let rotated_to = if due {
        match key_ring.rotate_at(now) {
            Ok(kid) => {
                record_key_rotation("scheduled", "success");
                Some(kid)
            }
            Err(e) => {
                record_key_rotation("scheduled", "error");
                warn!(
                    target: "issuer.tasks.key_rotation",
                    error = %e,
                    "Scheduled key rotation failed"
                );
                None
            }
        }
    } else {
        None
    };

    let pruned = key_ring.prune_expired_at(now);
    set_published_keys(key_ring.public_keys_at(now).keys.len());

    RotationCycle { rotated_to, pruned }
}

/// Run the rotation loop until `cancel_token` fires.
///
/// `rotation_interval = None` disables age-based rotation.
pub async fn start_key_rotation_task(
    key_ring: Arc<SigningKeyRing>,
    rotation_interval: Option<Duration>,
    check_interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "issuer.tasks.key_rotation",
        rotation_interval_secs = rotation_interval.map(|d| d.as_secs()),
        check_interval_secs = check_interval.as_secs(),
        "Key rotation task started"
    );

    let mut interval = tokio::time::interval(check_interval);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let cycle = run_rotation_cycle_at(&key_ring, rotation_interval, Utc::now());
                if let Some(kid) = &cycle.rotated_to {
                    info!(
                        target: "issuer.tasks.key_rotation",
                        kid = %kid,
                        "Rotated signing key on schedule"
                    );
                }
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "issuer.tasks.key_rotation",
                    "Key rotation task received shutdown signal, exiting"
                );
                break;
            }
        }
    }
}
