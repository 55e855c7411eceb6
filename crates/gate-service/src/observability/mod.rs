//! Observability for the edge gate.

pub mod metrics;
