//! Builder patterns for test token construction
//!
//! Produces claims as JSON, unsigned tokens for structural tests, and tokens
//! signed with a [`TestKeypair`].

use crate::crypto_fixtures::TestKeypair;
use chrono::{Duration, Utc};
use common::jwt::encode_segment;
use serde_json::{json, Map, Value};

/// Builder for test token claims
///
/// Defaults: `client_id = "test-client"`, `sub = "test-subject"`,
/// `email_verified` absent, `exp` one hour out, `iat` now.
///
/// # Example
/// ```rust,ignore
/// let token = TestTokenBuilder::new()
///     .client_id("frontend")
///     .email_verified(true)
///     .expires_in(60)
///     .sign_with(&keypair);
/// ```
#[derive(Debug, Clone)]
pub struct TestTokenBuilder {
    client_id: Option<String>,
    sub: Option<String>,
    email_verified: Option<Value>,
    scope: Option<String>,
    exp: Option<i64>,
    iat: Option<i64>,
}

impl TestTokenBuilder {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            client_id: Some("test-client".to_string()),
            sub: Some("test-subject".to_string()),
            email_verified: None,
            scope: None,
            exp: Some((now + Duration::seconds(3600)).timestamp()),
            iat: Some(now.timestamp()),
        }
    }

    pub fn client_id(mut self, client_id: &str) -> Self {
        self.client_id = Some(client_id.to_string());
        self
    }

    pub fn without_client_id(mut self) -> Self {
        self.client_id = None;
        self
    }

    pub fn for_subject(mut self, subject: &str) -> Self {
        self.sub = Some(subject.to_string());
        self
    }

    pub fn email_verified(mut self, verified: bool) -> Self {
        self.email_verified = Some(Value::Bool(verified));
        self
    }

    /// Set `email_verified` to an arbitrary JSON value (e.g. the string `"true"`).
    pub fn email_verified_raw(mut self, value: Value) -> Self {
        self.email_verified = Some(value);
        self
    }

    pub fn with_scope(mut self, scope: &str) -> Self {
        self.scope = Some(scope.to_string());
        self
    }

    /// Set expiration in seconds from now (negative for already expired).
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.exp = Some((Utc::now() + Duration::seconds(seconds)).timestamp());
        self
    }

    pub fn expires_at(mut self, timestamp: i64) -> Self {
        self.exp = Some(timestamp);
        self
    }

    pub fn without_exp(mut self) -> Self {
        self.exp = None;
        self
    }

    pub fn issued_at(mut self, timestamp: i64) -> Self {
        self.iat = Some(timestamp);
        self
    }

    /// Build the claims as a JSON object.
    pub fn build(self) -> Value {
        let mut claims = Map::new();
        if let Some(client_id) = self.client_id {
            claims.insert("client_id".into(), json!(client_id));
        }
        if let Some(sub) = self.sub {
            claims.insert("sub".into(), json!(sub));
        }
        if let Some(verified) = self.email_verified {
            claims.insert("email_verified".into(), verified);
        }
        if let Some(scope) = self.scope {
            claims.insert("scope".into(), json!(scope));
        }
        if let Some(exp) = self.exp {
            claims.insert("exp".into(), json!(exp));
        }
        if let Some(iat) = self.iat {
            claims.insert("iat".into(), json!(iat));
        }
        Value::Object(claims)
    }

    /// Sign the claims with `keypair`.
    pub fn sign_with(self, keypair: &TestKeypair) -> String {
        keypair.sign(&self.build())
    }

    /// Encode the claims as `H.<payload>.S` with no real header or signature.
    pub fn unsigned(self) -> String {
        unsigned_token(&self.build())
    }
}

impl Default for TestTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode arbitrary claims as an unsigned three-segment token.
pub fn unsigned_token(claims: &Value) -> String {
    format!("H.{}.S", encode_segment(claims.to_string().as_bytes()))
}
