//! Edge authentication gate library.
//!
//! Answers a reverse proxy's per-request subrequest with 204, 401 or 403.
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> handlers/auth.rs -> auth::EdgeAuthGate
//!                                          |-> common::jwt (decode)
//!                                          |-> auth::TokenVerifier (signature)
//!                                          '-> common::policy (admission)
//! ```
//!
//! Verification keys are cached in [`auth::KeySetCache`] and refreshed by a
//! background task; a request never waits on the network.

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod routes;
pub mod tasks;
