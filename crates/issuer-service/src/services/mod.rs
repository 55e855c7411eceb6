//! Service layer for the token issuer.
//!
//! - `key_ring` - signing keys, rotation and the published key set
//! - `principal_registry` - configured principals and credential checks
//! - `token_service` - grant handling and token minting

pub mod key_ring;
pub mod principal_registry;
pub mod token_service;

pub use key_ring::SigningKeyRing;
pub use principal_registry::{Principal, PrincipalRegistry};
pub use token_service::TokenService;
