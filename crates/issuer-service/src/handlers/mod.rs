//! HTTP request handlers for the token issuer.

pub mod admin_handler;
pub mod auth_handler;
pub mod health;
pub mod jwks_handler;
pub mod metrics;

pub use admin_handler::handle_rotate_keys;
pub use auth_handler::{handle_service_token, handle_user_token};
pub use health::{health_check, readiness_check};
pub use jwks_handler::handle_get_jwks;
pub use metrics::metrics_handler;
