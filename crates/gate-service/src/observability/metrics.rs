//! Metrics definitions for the edge gate.
//!
//! All metrics follow Prometheus naming conventions:
//! - `gate_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! - `outcome`: admit, deny
//! - `reason`: none plus the four deny reasons
//! - `status`: success, error
//! - `endpoint`: fixed route list, anything else is `/other`

use crate::auth::Freshness;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle used by
/// `/metrics`.
///
/// Decision buckets are sub-millisecond: the decision itself never touches
/// the network.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("gate_http_request".to_string()),
            &[0.001, 0.002, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("gate_auth_decision".to_string()),
            &[0.0001, 0.00025, 0.0005, 0.001, 0.0025, 0.005, 0.010],
        )
        .map_err(|e| format!("Failed to set decision buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// Decision Metrics
// ============================================================================

/// Metric: `gate_auth_decision_duration_seconds`, `gate_auth_decisions_total`
/// Labels: `outcome`, `reason`
pub fn record_auth_decision(outcome: &'static str, reason: &'static str, duration: Duration) {
    histogram!("gate_auth_decision_duration_seconds", "outcome" => outcome)
        .record(duration.as_secs_f64());

    counter!("gate_auth_decisions_total", "outcome" => outcome, "reason" => reason)
        .increment(1);
}

// ============================================================================
// Key Metrics
// ============================================================================

/// Metric: `gate_jwks_refresh_total`
/// Labels: `status`
pub fn record_jwks_refresh(status: &'static str) {
    counter!("gate_jwks_refresh_total", "status" => status).increment(1);
}

/// Metric: `gate_jwks_freshness`
///
/// 2 = fresh, 1 = stale, 0 = expired or never loaded.
pub fn set_jwks_freshness(freshness: Freshness) {
    let value = match freshness {
        Freshness::Fresh => 2.0,
        Freshness::Stale => 1.0,
        Freshness::Expired => 0.0,
    };
    gauge!("gate_jwks_freshness").set(value);
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `gate_http_requests_total`, `gate_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("gate_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("gate_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// 401 and 403 are the gate's normal answers, not failures.
fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        401 | 403 => "denied",
        408 | 504 => "timeout",
        _ => "error",
    }
}

fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/auth" => "/auth",
        "/health" => "/health",
        "/ready" => "/ready",
        "/metrics" => "/metrics",
        _ => "/other",
    }
}
