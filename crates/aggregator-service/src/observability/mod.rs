//! Observability for the aggregator.

pub mod metrics;
