//! # Auth Test Utilities
//!
//! Shared test support for the Bastion services.
//!
//! This crate provides:
//! - Deterministic Ed25519 fixtures (fixed keys for reproducible tests)
//! - `TestTokenBuilder` for signed and unsigned test tokens
//! - wiremock helpers serving a JWKS or a token endpoint
//! - `TokenAssertions` for expressive checks on issued tokens
//!
//! ## Usage
//!
//! ```rust,ignore
//! use auth_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let keypair = TestKeypair::from_seed(1, "auth-test-01");
//!     let jwks_server = mock_jwks_server(&[&keypair]).await;
//!
//!     let token = TestTokenBuilder::new()
//!         .client_id("frontend")
//!         .email_verified(true)
//!         .sign_with(&keypair);
//!
//!     token.assert_valid_jwt().assert_signed_by("auth-test-01");
//! }
//! ```

pub mod assertions;
pub mod crypto_fixtures;
pub mod mock_servers;
pub mod token_builders;

pub use assertions::*;
pub use crypto_fixtures::*;
pub use mock_servers::*;
pub use token_builders::*;
