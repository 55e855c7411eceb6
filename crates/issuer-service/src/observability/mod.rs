//! Observability for the token issuer: metric definitions and the
//! Prometheus recorder.

pub mod metrics;
