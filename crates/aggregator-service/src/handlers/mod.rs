//! HTTP request handlers for the aggregator.

pub mod aggregate;
pub mod health;
pub mod metrics;
pub mod report_cards;

pub use aggregate::handle_aggregate;
pub use health::{health_check, readiness_check};
pub use metrics::metrics_handler;
pub use report_cards::handle_report_cards;
