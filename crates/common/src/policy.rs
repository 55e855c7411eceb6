//! Claims-based admission policy.
//!
//! Decides whether a decoded, signature-checked [`ClaimsRecord`] may reach a
//! protected service:
//!
//! 1. An `exp` in the past (beyond clock skew) denies with `ExpiredToken`.
//! 2. The trusted service client (`aggregator`) is admitted regardless of
//!    `email_verified`. The id is fixed, not configurable.
//! 3. Any other principal is admitted only when `email_verified` is `true`.
//!
//! The policy is pure: no I/O, no clock reads except in [`authorize`].

use crate::jwt::{ClaimsRecord, DEFAULT_CLOCK_SKEW};
use std::fmt;
use std::time::Duration;

/// The only client id that bypasses the verified-email requirement.
pub const TRUSTED_CLIENT_ID: &str = "aggregator";

/// Reason a request was denied at the edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenyReason {
    /// Token missing, structurally invalid, or of the wrong claim types.
    MalformedToken,
    /// `exp` is in the past beyond the configured skew.
    ExpiredToken,
    /// Signature did not verify against any known key, or no key set is usable.
    BadSignature,
    /// Token is valid but the principal is not allowed through.
    PolicyDenied,
}

impl DenyReason {
    /// Stable label used in logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DenyReason::MalformedToken => "malformed_token",
            DenyReason::ExpiredToken => "expired_token",
            DenyReason::BadSignature => "bad_signature",
            DenyReason::PolicyDenied => "policy_denied",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Admit,
    Deny(DenyReason),
}

impl Verdict {
    #[must_use]
    pub fn is_admit(self) -> bool {
        matches!(self, Verdict::Admit)
    }
}

/// Admission policy; only the clock skew on `exp` is tunable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionPolicy {
    clock_skew: Duration,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            clock_skew: DEFAULT_CLOCK_SKEW,
        }
    }
}

impl AdmissionPolicy {
    #[must_use]
    pub fn new(clock_skew: Duration) -> Self {
        Self { clock_skew }
    }

    #[must_use]
    pub fn clock_skew(&self) -> Duration {
        self.clock_skew
    }

    /// Evaluate `claims` against the current wall clock.
    #[must_use]
    pub fn authorize(&self, claims: &ClaimsRecord) -> Verdict {
        self.authorize_at(claims, chrono::Utc::now().timestamp())
    }

    /// Evaluate `claims` as if the current time were `now` (Unix seconds).
    #[must_use]
    pub fn authorize_at(&self, claims: &ClaimsRecord, now: i64) -> Verdict {
        if let Some(exp) = claims.exp {
            let skew = i64::try_from(self.clock_skew.as_secs()).unwrap_or(i64::MAX);
            if exp.saturating_add(skew) < now {
                return Verdict::Deny(DenyReason::ExpiredToken);
            }
        }

        if claims.client_id == TRUSTED_CLIENT_ID {
            return Verdict::Admit;
        }

        if claims.email_verified {
            Verdict::Admit
        } else {
            Verdict::Deny(DenyReason::PolicyDenied)
        }
    }
}

/// Evaluate `claims` with the default policy and the current wall clock.
#[must_use]
pub fn authorize(claims: &ClaimsRecord) -> Verdict {
    AdmissionPolicy::default().authorize(claims)
}

/// Deterministic form of [`authorize`] with an explicit clock and skew.
#[must_use]
pub fn authorize_at(claims: &ClaimsRecord, now: i64, skew: Duration) -> Verdict {
    AdmissionPolicy::new(skew).authorize_at(claims, now)
}
