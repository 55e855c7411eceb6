//! Common utilities and types shared across Bastion components.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for bearer token decoding (claims, key id, size limits)
pub mod jwt;

/// Module for the claims-based admission policy
pub mod policy;

/// Module for JWKS documents, verification key sets and signature checks
pub mod jwks;

/// Module for tracing subscriber setup
pub mod logging;

/// Module for OAuth 2.0 token management with automatic refresh
pub mod token_manager;
