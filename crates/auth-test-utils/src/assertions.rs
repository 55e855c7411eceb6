//! Custom test assertions for expressive tests
//!
//! Trait-based checks on issued tokens, built on `common::jwt`.

use common::jwt::{decode, extract_kid, ClaimsRecord};

/// Custom assertions for tokens
///
/// # Example
/// ```rust,ignore
/// token
///     .assert_valid_jwt()
///     .assert_signed_by("auth-2026-01")
///     .assert_for_subject("svc-grades");
/// ```
pub trait TokenAssertions {
    /// Assert three segments with a decodable claims payload and a kid
    fn assert_valid_jwt(&self) -> &Self;

    /// Assert the header names `kid`
    fn assert_signed_by(&self, kid: &str) -> &Self;

    fn assert_for_subject(&self, subject: &str) -> &Self;

    fn assert_client_id(&self, client_id: &str) -> &Self;

    fn assert_has_scope(&self, scope: &str) -> &Self;

    /// Assert `exp - iat` equals `seconds`
    fn assert_lifetime(&self, seconds: i64) -> &Self;
}

fn claims_of(token: &str) -> ClaimsRecord {
    decode(token).unwrap_or_else(|e| panic!("token does not decode: {e:?}"))
}

impl TokenAssertions for String {
    fn assert_valid_jwt(&self) -> &Self {
        assert_eq!(
            self.split('.').count(),
            3,
            "JWT must have 3 parts (header.payload.signature)"
        );
        claims_of(self);
        assert!(extract_kid(self).is_ok(), "JWT header must carry a kid");
        self
    }

    fn assert_signed_by(&self, kid: &str) -> &Self {
        assert_eq!(extract_kid(self).ok().as_deref(), Some(kid), "unexpected signing kid");
        self
    }

    fn assert_for_subject(&self, subject: &str) -> &Self {
        assert_eq!(claims_of(self).sub.as_deref(), Some(subject), "unexpected subject");
        self
    }

    fn assert_client_id(&self, client_id: &str) -> &Self {
        assert_eq!(claims_of(self).client_id, client_id, "unexpected client_id");
        self
    }

    fn assert_has_scope(&self, scope: &str) -> &Self {
        let claims = claims_of(self);
        assert!(
            claims.has_scope(scope),
            "token scope {:?} does not contain {scope:?}",
            claims.scope
        );
        self
    }

    fn assert_lifetime(&self, seconds: i64) -> &Self {
        let claims = claims_of(self);
        let (Some(iat), Some(exp)) = (claims.iat, claims.exp) else {
            panic!("token must carry both iat and exp");
        };
        assert_eq!(exp - iat, seconds, "unexpected token lifetime");
        self
    }
}
