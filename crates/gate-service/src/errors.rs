use thiserror::Error;

/// Errors raised while maintaining the gate's verification keys.
///
/// None of these reach a client: the subrequest endpoint only ever answers
/// 204, 401 or 403, and a key failure surfaces there as a fail-closed 401.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("JWKS fetch failed: {0}")]
    KeyFetch(String),

    #[error("JWKS document invalid: {0}")]
    KeyDecode(String),

    #[error("JWKS document has no usable Ed25519 keys")]
    NoUsableKeys,
}
