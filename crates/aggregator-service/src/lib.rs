//! Aggregator service library.
//!
//! Fans authenticated requests out to downstream microservices
//! concurrently and merges the answers, reporting per-target failures
//! instead of failing wholesale.
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> middleware/identity.rs -> handlers/*.rs
//!     -> services/report_cards.rs -> services/aggregator.rs
//!     -> services/downstream_client.rs
//! ```
//!
//! The aggregator's own service token comes from
//! [`common::token_manager`]; the periodic task in [`tasks`] asks it to
//! re-authenticate when a downstream rejects the token.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod routes;
pub mod services;
pub mod tasks;
