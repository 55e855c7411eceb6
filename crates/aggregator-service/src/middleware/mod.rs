pub mod http_metrics;
pub mod identity;

pub use http_metrics::http_metrics_middleware;
pub use identity::require_identity;
