//! Metrics definitions for the token issuer.
//!
//! All metrics follow Prometheus naming conventions:
//! - `issuer_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! - `grant_type`: 2 values (client_credentials, password)
//! - `status`: success, rejected, error
//! - `trigger`: scheduled, admin
//! - `endpoint`: fixed route list, anything else is `/other`

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle used by
/// `/metrics`.
///
/// Token issuance buckets start at 50ms: bcrypt dominates and finer
/// buckets would expose secret-check timing.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("issuer_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.200, 0.350, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("issuer_token_issuance".to_string()),
            &[0.050, 0.100, 0.200, 0.350, 0.500, 1.000, 2.000],
        )
        .map_err(|e| format!("Failed to set token issuance buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// Token Metrics
// ============================================================================

/// Metric: `issuer_token_issuance_duration_seconds`, `issuer_token_issuance_total`
/// Labels: `grant_type`, `status`
pub fn record_token_issuance(grant_type: &str, status: &str, duration: Duration) {
    histogram!(
        "issuer_token_issuance_duration_seconds",
        "grant_type" => grant_type.to_string(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!(
        "issuer_token_issuance_total",
        "grant_type" => grant_type.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Key Metrics
// ============================================================================

/// Metric: `issuer_key_rotation_total`
/// Labels: `trigger`, `status`
pub fn record_key_rotation(trigger: &str, status: &str) {
    counter!(
        "issuer_key_rotation_total",
        "trigger" => trigger.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Metric: `issuer_published_keys`
#[allow(clippy::cast_precision_loss)]
pub fn set_published_keys(count: usize) {
    gauge!("issuer_published_keys").set(count as f64);
}

/// Metric: `issuer_jwks_requests_total`
pub fn record_jwks_request() {
    counter!("issuer_jwks_requests_total").increment(1);
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `issuer_http_requests_total`, `issuer_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("issuer_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("issuer_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/health" => "/health",
        "/ready" => "/ready",
        "/metrics" => "/metrics",
        "/.well-known/jwks.json" => "/.well-known/jwks.json",
        "/api/v1/auth/service/token" => "/api/v1/auth/service/token",
        "/api/v1/auth/user/token" => "/api/v1/auth/user/token",
        "/api/v1/admin/keys/rotate" => "/api/v1/admin/keys/rotate",
        _ => "/other",
    }
}
