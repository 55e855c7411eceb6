//! Bearer token decoding shared across Bastion services.
//!
//! This module is the structural half of token handling:
//! - Size limits applied before any parsing
//! - Payload decoding into a [`ClaimsRecord`]
//! - Key ID extraction from the header for JWKS lookup
//! - iat validation with clock skew tolerance
//!
//! Nothing here checks signatures or expiry. A decoded [`ClaimsRecord`] is
//! untrusted until the token has passed [`crate::jwks::verify_signature`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{decode, extract_kid};
//!
//! let claims = decode(raw)?;          // structural only
//! let kid = extract_kid(raw)?;        // pick the verification key
//! ```

use base64::{
    alphabet,
    engine::{general_purpose::GeneralPurpose, DecodePaddingMode, GeneralPurposeConfig},
    Engine,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum accepted token size in bytes (8KB).
///
/// Typical tokens from the issuer are 300-400 bytes. Anything larger than
/// this is rejected before base64 decoding or signature work.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Default clock skew tolerance applied to `exp` by the admission policy.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(30);

/// Upper bound for any configured clock skew (10 minutes).
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

/// Base64url engine that accepts both padded and unpadded segments.
///
/// Issuers differ on whether they strip `=`; the payload is decoded either way.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while decoding a token.
///
/// Display strings are intentionally generic; detail goes to debug logs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds [`MAX_JWT_SIZE_BYTES`].
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Token is not three base64url segments with a JSON object payload.
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Token header has no usable `kid`.
    #[error("The access token is invalid or expired")]
    MissingKid,

    /// Token `iat` claim is too far in the future.
    #[error("The access token is invalid or expired")]
    IatTooFarInFuture,
}

// =============================================================================
// Claims
// =============================================================================

/// Decoded token payload.
///
/// Only the claims the platform reads are modelled; anything else in the
/// payload is ignored. `sub` is redacted in Debug output.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimsRecord {
    /// Issuer-assigned caller identity. Absent decodes as an empty string.
    #[serde(default)]
    pub client_id: String,

    /// Whether the subject's email was verified. Only a literal JSON `true`
    /// counts; absence or any other value is `false`.
    #[serde(default, deserialize_with = "strict_true")]
    pub email_verified: bool,

    /// Expiration (Unix epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// Issued-at (Unix epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// Subject identifier - redacted in Debug output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Space-separated grants.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl fmt::Debug for ClaimsRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimsRecord")
            .field("client_id", &self.client_id)
            .field("email_verified", &self.email_verified)
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .field("sub", &self.sub.as_ref().map(|_| "[REDACTED]"))
            .field("scope", &self.scope)
            .finish()
    }
}

impl ClaimsRecord {
    /// Check whether the token grants `scope`.
    ///
    /// Scopes are space-separated; partial matches do not count.
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scope
            .as_deref()
            .is_some_and(|s| s.split_whitespace().any(|granted| granted == scope))
    }
}

fn strict_true<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(matches!(value, serde_json::Value::Bool(true)))
}

// =============================================================================
// Functions
// =============================================================================

fn check_size(token: &str) -> Result<(), JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }
    Ok(())
}

/// Split a compact token into its header, payload and signature segments.
fn split_segments(token: &str) -> Result<(&str, &str, &str), JwtValidationError> {
    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(payload), Some(signature), None) => Ok((header, payload, signature)),
        _ => {
            tracing::debug!(
                target: "common.jwt",
                parts = token.split('.').count(),
                "Token rejected: invalid JWT format"
            );
            Err(JwtValidationError::MalformedToken)
        }
    }
}

/// Decode one base64url segment into a JSON object.
fn decode_json_segment(
    segment: &str,
    what: &'static str,
) -> Result<serde_json::Value, JwtValidationError> {
    let bytes = URL_SAFE_LENIENT.decode(segment).map_err(|e| {
        tracing::debug!(
            target: "common.jwt",
            error = %e,
            segment = what,
            "Failed to decode JWT segment base64"
        );
        JwtValidationError::MalformedToken
    })?;

    let value: serde_json::Value = serde_json::from_slice(&bytes).map_err(|e| {
        tracing::debug!(
            target: "common.jwt",
            error = %e,
            segment = what,
            "Failed to parse JWT segment JSON"
        );
        JwtValidationError::MalformedToken
    })?;

    if !value.is_object() {
        tracing::debug!(target: "common.jwt", segment = what, "JWT segment is not a JSON object");
        return Err(JwtValidationError::MalformedToken);
    }

    Ok(value)
}

/// Structurally decode a token into its claims.
///
/// Splits on `.`, requires exactly three segments, base64url-decodes the
/// payload and parses it as a JSON object. Expiry and signature are not
/// evaluated.
///
/// # Errors
///
/// - `TokenTooLarge` - token exceeds [`MAX_JWT_SIZE_BYTES`]
/// - `MalformedToken` - wrong segment count, bad base64, non-object JSON, or
///   claims of the wrong JSON type
pub fn decode(token: &str) -> Result<ClaimsRecord, JwtValidationError> {
    check_size(token)?;
    let (_, payload, _) = split_segments(token)?;
    let value = decode_json_segment(payload, "payload")?;

    serde_json::from_value(value).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "JWT claims have unexpected types");
        JwtValidationError::MalformedToken
    })
}

/// Extract the `kid` (key ID) from a token header without verifying it.
///
/// Used to pick the verification key out of a JWKS when several keys are
/// published during rotation. The token MUST still be verified afterwards.
///
/// # Errors
///
/// - `TokenTooLarge` - token exceeds [`MAX_JWT_SIZE_BYTES`]
/// - `MalformedToken` - structure, base64 or JSON invalid
/// - `MissingKid` - header has no non-empty string `kid`
pub fn extract_kid(token: &str) -> Result<String, JwtValidationError> {
    check_size(token)?;
    let (header, _, _) = split_segments(token)?;
    let header = decode_json_segment(header, "header")?;

    header
        .get("kid")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .ok_or(JwtValidationError::MissingKid)
}

/// Validate the `iat` (issued-at) claim with clock skew tolerance.
///
/// # Errors
///
/// Returns `IatTooFarInFuture` if `iat` is more than `clock_skew` ahead of now.
pub fn validate_iat(iat: i64, clock_skew: Duration) -> Result<(), JwtValidationError> {
    validate_iat_at(iat, clock_skew, chrono::Utc::now().timestamp())
}

/// Deterministic `iat` validation against an explicit `now`.
///
/// # Errors
///
/// Returns `IatTooFarInFuture` if `iat > now + clock_skew`.
pub fn validate_iat_at(iat: i64, clock_skew: Duration, now: i64) -> Result<(), JwtValidationError> {
    let clock_skew_secs = i64::try_from(clock_skew.as_secs()).unwrap_or(i64::MAX);
    let max_iat = now.saturating_add(clock_skew_secs);

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}

/// Decode an Ed25519 public key from a JWK `x` field (base64url, no padding).
///
/// # Errors
///
/// Returns `base64::DecodeError` if `x` is not valid base64url.
pub fn decode_ed25519_public_key_jwk(x_b64url: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_LENIENT.decode(x_b64url)
}

/// Encode raw bytes as an unpadded base64url segment.
#[must_use]
pub fn encode_segment(bytes: &[u8]) -> String {
    URL_SAFE_LENIENT.encode(bytes)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn token_with_payload(payload: &str) -> String {
        format!("H.{}.S", encode_segment(payload.as_bytes()))
    }

    // -------------------------------------------------------------------------
    // decode
    // -------------------------------------------------------------------------

    #[test]
    fn test_decode_aggregator_example() {
        let claims = decode("H.eyJjbGllbnRfaWQiOiJhZ2dyZWdhdG9yIn0.S").unwrap();

        assert_eq!(claims.client_id, "aggregator");
        assert!(!claims.email_verified);
        assert_eq!(claims.exp, None);
        assert_eq!(claims.sub, None);
    }

    #[test]
    fn test_decode_full_claims() {
        let token = token_with_payload(concat!(
            r#"{"client_id":"frontend","email_verified":true,"exp":1700000600,"#,
            r#""iat":1700000000,"sub":"user-42","scope":"read write","extra":[1,2]}"#,
        ));

        let claims = decode(&token).unwrap();
        assert_eq!(claims.client_id, "frontend");
        assert!(claims.email_verified);
        assert_eq!(claims.exp, Some(1_700_000_600));
        assert_eq!(claims.iat, Some(1_700_000_000));
        assert_eq!(claims.sub.as_deref(), Some("user-42"));
        assert!(claims.has_scope("write"));
    }

    #[test]
    fn test_decode_fewer_than_three_segments_is_malformed() {
        for raw in ["garbage", "", "a.b", "only.", ".x"] {
            assert_eq!(
                decode(raw),
                Err(JwtValidationError::MalformedToken),
                "input {raw:?}"
            );
        }
    }

    #[test]
    fn test_decode_more_than_three_segments_is_malformed() {
        let token = format!("{}.S", token_with_payload(r#"{"client_id":"x"}"#));
        assert_eq!(decode(&token), Err(JwtValidationError::MalformedToken));
    }

    #[test]
    fn test_decode_invalid_base64_is_malformed() {
        assert_eq!(decode("H.!!!not-base64!!!.S"), Err(JwtValidationError::MalformedToken));
    }

    #[test]
    fn test_decode_non_json_payload_is_malformed() {
        let token = token_with_payload("not json");
        assert_eq!(decode(&token), Err(JwtValidationError::MalformedToken));
    }

    #[test]
    fn test_decode_non_object_payload_is_malformed() {
        for payload in ["[]", "42", r#""client_id""#, "null"] {
            let token = token_with_payload(payload);
            assert_eq!(decode(&token), Err(JwtValidationError::MalformedToken), "{payload}");
        }
    }

    #[test]
    fn test_decode_wrong_claim_type_is_malformed() {
        let token = token_with_payload(r#"{"client_id":"x","exp":"tomorrow"}"#);
        assert_eq!(decode(&token), Err(JwtValidationError::MalformedToken));
    }

    #[test]
    fn test_decode_accepts_padded_payload() {
        let padded = base64::engine::general_purpose::URL_SAFE.encode(r#"{"client_id":"ab"}"#);
        assert!(padded.ends_with('='));

        let claims = decode(&format!("H.{padded}.S")).unwrap();
        assert_eq!(claims.client_id, "ab");
    }

    #[test]
    fn test_decode_email_verified_only_literal_true() {
        for (payload, expected) in [
            (r#"{"email_verified":true}"#, true),
            (r#"{"email_verified":false}"#, false),
            (r#"{"email_verified":"true"}"#, false),
            (r#"{"email_verified":1}"#, false),
            (r#"{"email_verified":null}"#, false),
            (r#"{}"#, false),
        ] {
            let claims = decode(&token_with_payload(payload)).unwrap();
            assert_eq!(claims.email_verified, expected, "{payload}");
        }
    }

    #[test]
    fn test_decode_oversized_token() {
        let oversized = "a".repeat(MAX_JWT_SIZE_BYTES + 1);
        assert_eq!(decode(&oversized), Err(JwtValidationError::TokenTooLarge));
    }

    #[test]
    fn test_claims_debug_redacts_sub() {
        let claims = ClaimsRecord {
            client_id: "frontend".to_string(),
            sub: Some("alice@example.com".to_string()),
            ..ClaimsRecord::default()
        };

        let debug_str = format!("{claims:?}");
        assert!(!debug_str.contains("alice@example.com"));
        assert!(debug_str.contains("[REDACTED]"));
        assert!(debug_str.contains("frontend"));
    }

    #[test]
    fn test_has_scope_requires_exact_match() {
        let claims = ClaimsRecord {
            scope: Some("admin:keys read".to_string()),
            ..ClaimsRecord::default()
        };

        assert!(claims.has_scope("admin:keys"));
        assert!(!claims.has_scope("admin"));
        assert!(!ClaimsRecord::default().has_scope("read"));
    }

    // -------------------------------------------------------------------------
    // extract_kid
    // -------------------------------------------------------------------------

    #[test]
    fn test_extract_kid_valid_token() {
        let header = encode_segment(br#"{"alg":"EdDSA","typ":"JWT","kid":"auth-2026-01"}"#);
        let token = format!("{header}.payload.signature");

        assert_eq!(extract_kid(&token).unwrap(), "auth-2026-01");
    }

    #[test]
    fn test_extract_kid_missing_or_empty_kid() {
        for header in [r#"{"alg":"EdDSA"}"#, r#"{"alg":"EdDSA","kid":""}"#, r#"{"kid":7}"#] {
            let token = format!("{}.payload.signature", encode_segment(header.as_bytes()));
            assert_eq!(extract_kid(&token), Err(JwtValidationError::MissingKid), "{header}");
        }
    }

    #[test]
    fn test_extract_kid_malformed_token() {
        assert_eq!(extract_kid("not-a-jwt"), Err(JwtValidationError::MalformedToken));
        assert_eq!(
            extract_kid("!!!invalid!!!.payload.signature"),
            Err(JwtValidationError::MalformedToken)
        );
    }

    // -------------------------------------------------------------------------
    // validate_iat
    // -------------------------------------------------------------------------

    #[test]
    fn test_validate_iat_at_boundary() {
        let now = 1_700_000_000_i64;
        let skew = Duration::from_secs(300);

        assert!(validate_iat_at(now - 3600, skew, now).is_ok());
        assert!(validate_iat_at(now + 300, skew, now).is_ok());
        assert_eq!(
            validate_iat_at(now + 301, skew, now),
            Err(JwtValidationError::IatTooFarInFuture)
        );
    }

    #[test]
    fn test_validate_iat_current_time() {
        let now = chrono::Utc::now().timestamp();
        assert!(validate_iat(now, DEFAULT_CLOCK_SKEW).is_ok());
    }

    // -------------------------------------------------------------------------
    // Key decoding
    // -------------------------------------------------------------------------

    #[test]
    fn test_decode_ed25519_public_key_jwk() {
        let x = "11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo";
        assert_eq!(decode_ed25519_public_key_jwk(x).unwrap().len(), 32);
        assert!(decode_ed25519_public_key_jwk("not-valid-base64url!!!").is_err());
    }
}
