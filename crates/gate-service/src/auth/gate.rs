//! The subrequest admission decision.
//!
//! Order is fixed: decode, then signature, then policy. A token whose
//! signature does not verify never reaches the policy, so unverified claims
//! can't admit anything.

use crate::auth::verifier::TokenVerifier;
use common::jwt::{self, ClaimsRecord};
use common::policy::{AdmissionPolicy, DenyReason, Verdict};
use std::fmt;
use std::sync::Arc;

/// Status answered to the proxy for an admitted request.
pub const STATUS_ADMIT: u16 = 204;
pub const STATUS_UNAUTHORIZED: u16 = 401;
pub const STATUS_FORBIDDEN: u16 = 403;

/// Map a verdict onto the subrequest status contract.
#[must_use]
pub fn status_for(verdict: Verdict) -> u16 {
    match verdict {
        Verdict::Admit => STATUS_ADMIT,
        Verdict::Deny(DenyReason::PolicyDenied) => STATUS_FORBIDDEN,
        Verdict::Deny(
            DenyReason::MalformedToken | DenyReason::ExpiredToken | DenyReason::BadSignature,
        ) => STATUS_UNAUTHORIZED,
    }
}

/// Verdict plus, when the token decoded and verified, its claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub verdict: Verdict,
    pub claims: Option<ClaimsRecord>,
}

impl Decision {
    fn deny(reason: DenyReason) -> Self {
        Self {
            verdict: Verdict::Deny(reason),
            claims: None,
        }
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        status_for(self.verdict)
    }
}

/// Stateless admission gate. Safe to share across requests.
#[derive(Clone)]
pub struct EdgeAuthGate {
    verifier: Arc<dyn TokenVerifier>,
    policy: AdmissionPolicy,
}

impl fmt::Debug for EdgeAuthGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgeAuthGate")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Strip surrounding whitespace and an optional `Bearer ` scheme
/// (case-insensitive). `None` when nothing is left.
fn strip_bearer(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    let token = match (trimmed.get(..7), trimmed.get(7..)) {
        (Some(scheme), Some(rest)) if scheme.eq_ignore_ascii_case("bearer ") => rest.trim(),
        _ => trimmed,
    };
    (!token.is_empty()).then_some(token)
}

impl EdgeAuthGate {
    #[must_use]
    pub fn new(verifier: Arc<dyn TokenVerifier>, policy: AdmissionPolicy) -> Self {
        Self { verifier, policy }
    }

    #[must_use]
    pub fn policy(&self) -> &AdmissionPolicy {
        &self.policy
    }

    /// Subrequest contract: token string in, 204/401/403 out.
    #[must_use]
    pub fn handle(&self, raw: &str) -> u16 {
        self.decide(raw).status()
    }

    #[must_use]
    pub fn evaluate(&self, raw: &str) -> Verdict {
        self.decide(raw).verdict
    }

    #[must_use]
    pub fn decide(&self, raw: &str) -> Decision {
        self.decide_at(raw, chrono::Utc::now().timestamp())
    }

    /// [`EdgeAuthGate::decide`] against an explicit `now` (Unix seconds).
    #[must_use]
    pub fn decide_at(&self, raw: &str, now: i64) -> Decision {
        let Some(token) = strip_bearer(raw) else {
            tracing::debug!(target: "gate.auth", "Empty token");
            return Decision::deny(DenyReason::MalformedToken);
        };

        let claims = match jwt::decode(token) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::debug!(target: "gate.auth", error = ?e, "Token failed to decode");
                return Decision::deny(DenyReason::MalformedToken);
            }
        };

        if let Err(e) = self.verifier.verify(token) {
            tracing::debug!(target: "gate.auth", error = %e, "Token signature rejected");
            return Decision::deny(DenyReason::BadSignature);
        }

        match self.policy.authorize_at(&claims, now) {
            Verdict::Admit => Decision {
                verdict: Verdict::Admit,
                claims: Some(claims),
            },
            Verdict::Deny(reason) => {
                tracing::debug!(
                    target: "gate.auth",
                    reason = reason.as_str(),
                    client_id = %claims.client_id,
                    "Token denied by policy"
                );
                Decision::deny(reason)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::verifier::StaticKeyVerifier;
    use auth_test_utils::{unsigned_token, TestKeypair, TestTokenBuilder};
    use common::jwks::SignatureError;
    use std::time::Duration;

    struct AcceptAll;

    impl TokenVerifier for AcceptAll {
        fn verify(&self, _token: &str) -> Result<(), SignatureError> {
            Ok(())
        }
    }

    struct RejectAll;

    impl TokenVerifier for RejectAll {
        fn verify(&self, _token: &str) -> Result<(), SignatureError> {
            Err(SignatureError::BadSignature)
        }
    }

    fn gate(verifier: impl TokenVerifier + 'static) -> EdgeAuthGate {
        EdgeAuthGate::new(Arc::new(verifier), AdmissionPolicy::default())
    }

    #[test]
    fn test_trusted_client_example_admits() {
        let gate = gate(AcceptAll);
        assert_eq!(gate.handle("H.eyJjbGllbnRfaWQiOiJhZ2dyZWdhdG9yIn0.S"), 204);
    }

    #[test]
    fn test_unverified_email_example_forbidden() {
        let gate = gate(AcceptAll);
        let token =
            unsigned_token(&serde_json::json!({"client_id": "other", "email_verified": false}));
        assert_eq!(gate.handle(&token), 403);
        assert_eq!(gate.evaluate(&token), Verdict::Deny(DenyReason::PolicyDenied));
    }

    #[test]
    fn test_garbage_is_unauthorized() {
        let gate = gate(AcceptAll);
        assert_eq!(gate.handle("garbage"), 401);
        assert_eq!(gate.evaluate("garbage"), Verdict::Deny(DenyReason::MalformedToken));
        assert_eq!(gate.handle("a.b"), 401);
        assert_eq!(gate.handle("a.!!!.c"), 401);
    }

    #[test]
    fn test_empty_and_bearer_only_are_unauthorized() {
        let gate = gate(AcceptAll);
        for raw in ["", "   ", "Bearer ", "bearer    "] {
            assert_eq!(gate.handle(raw), 401, "{raw:?}");
        }
    }

    #[test]
    fn test_bearer_prefix_is_stripped() {
        let gate = gate(AcceptAll);
        let token = "H.eyJjbGllbnRfaWQiOiJhZ2dyZWdhdG9yIn0.S";

        for raw in [
            format!("Bearer {token}"),
            format!("bearer {token}"),
            format!("BEARER   {token}  "),
            format!("  {token}"),
        ] {
            assert_eq!(gate.handle(&raw), 204, "{raw:?}");
        }
    }

    #[test]
    fn test_bad_signature_never_reaches_policy() {
        let gate = gate(RejectAll);
        let token = "H.eyJjbGllbnRfaWQiOiJhZ2dyZWdhdG9yIn0.S";

        assert_eq!(gate.evaluate(token), Verdict::Deny(DenyReason::BadSignature));
        assert_eq!(gate.handle(token), 401);
    }

    #[test]
    fn test_expired_token_is_unauthorized() {
        let gate = gate(AcceptAll);
        let token = unsigned_token(&serde_json::json!({"client_id": "aggregator", "exp": 1_000}));

        let decision = gate.decide_at(&token, 2_000);
        assert_eq!(decision.verdict, Verdict::Deny(DenyReason::ExpiredToken));
        assert_eq!(decision.status(), 401);
        assert!(decision.claims.is_none());
    }

    #[test]
    fn test_signed_tokens_with_real_keys() {
        let keypair = TestKeypair::from_seed(7, "auth-test-07");
        let gate = gate(StaticKeyVerifier::new(keypair.key_set()));

        let verified_user = TestTokenBuilder::new()
            .client_id("frontend")
            .for_subject("user-1")
            .email_verified(true)
            .sign_with(&keypair);
        let decision = gate.decide(&verified_user);
        assert_eq!(decision.status(), 204);
        assert_eq!(decision.claims.unwrap().sub.as_deref(), Some("user-1"));

        let unverified = TestTokenBuilder::new()
            .client_id("frontend")
            .sign_with(&keypair);
        assert_eq!(gate.handle(&unverified), 403);

        let other_keypair = TestKeypair::from_seed(8, "auth-test-07");
        let forged = TestTokenBuilder::new()
            .client_id("aggregator")
            .sign_with(&other_keypair);
        assert_eq!(gate.handle(&forged), 401);
    }

    #[test]
    fn test_only_aggregator_bypasses_email_verification() {
        let gate = EdgeAuthGate::new(
            Arc::new(AcceptAll),
            AdmissionPolicy::new(Duration::from_secs(30)),
        );

        let trusted = unsigned_token(&serde_json::json!({"client_id": "aggregator"}));
        let padded = unsigned_token(&serde_json::json!({"client_id": " aggregator "}));
        let other = unsigned_token(&serde_json::json!({"client_id": "batch-aggregator"}));
        assert_eq!(gate.handle(&trusted), 204);
        assert_eq!(gate.handle(&padded), 403);
        assert_eq!(gate.handle(&other), 403);
    }

    #[test]
    fn test_strip_bearer() {
        assert_eq!(strip_bearer("Bearer abc"), Some("abc"));
        assert_eq!(strip_bearer("abc"), Some("abc"));
        assert_eq!(strip_bearer("Bearerabc"), Some("Bearerabc"));
        assert_eq!(strip_bearer(" "), None);
    }
}
