//! HTTP request handlers for the edge gate.

pub mod auth;
pub mod health;
pub mod metrics;

pub use auth::handle_auth_check;
pub use health::{health_check, readiness_check};
pub use metrics::metrics_handler;
