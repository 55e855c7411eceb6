//! Token issuer service library.
//!
//! Mints short-lived EdDSA bearer tokens for configured principals and
//! publishes the verification keys as a JWKS document.
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> services/*.rs -> crypto.rs
//! ```
//!
//! The signing keys live in [`services::SigningKeyRing`], an atomically
//! swapped snapshot shared by the handlers and the rotation task.

pub mod config;
pub mod crypto;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod routes;
pub mod services;
pub mod tasks;
