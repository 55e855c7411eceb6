pub mod auth;
pub mod http_metrics;

pub use auth::{require_admin_scope, AuthState, ADMIN_KEYS_SCOPE};
pub use http_metrics::http_metrics_middleware;
