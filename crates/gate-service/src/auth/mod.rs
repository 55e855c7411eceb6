//! Token admission for the edge gate.
//!
//! - `jwks` - cached verification keys refreshed in the background
//! - `verifier` - the signature check the gate depends on
//! - `gate` - the subrequest decision: token string in, status out

pub mod gate;
pub mod jwks;
pub mod verifier;

pub use gate::{Decision, EdgeAuthGate};
pub use jwks::{Freshness, KeySetCache};
pub use verifier::{StaticKeyVerifier, TokenVerifier};
