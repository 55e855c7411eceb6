//! Metrics definitions for the aggregator.
//!
//! All metrics follow Prometheus naming conventions:
//! - `aggregator_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! - `target`: configured target names only (unknown names are rejected
//!   before any call)
//! - `outcome`: success, timeout, unreachable, rejected
//! - `status`: complete, partial, failed

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle used by
/// `/metrics`.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    let latency_buckets = [
        0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.000, 5.000,
    ];

    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("aggregator_http_request".to_string()),
            &latency_buckets,
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("aggregator_downstream_call".to_string()),
            &latency_buckets,
        )
        .map_err(|e| format!("Failed to set downstream call buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("aggregator_aggregation".to_string()),
            &latency_buckets,
        )
        .map_err(|e| format!("Failed to set aggregation buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// Fan-out Metrics
// ============================================================================

/// Metric: `aggregator_downstream_call_duration_seconds`, `aggregator_downstream_calls_total`
/// Labels: `target`, `outcome`
pub fn record_downstream_call(target: &str, outcome: &'static str, duration: Duration) {
    histogram!("aggregator_downstream_call_duration_seconds", "target" => target.to_string())
        .record(duration.as_secs_f64());

    counter!(
        "aggregator_downstream_calls_total",
        "target" => target.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Metric: `aggregator_aggregation_duration_seconds`, `aggregator_aggregations_total`
/// Labels: `status`
pub fn record_aggregation(status: &'static str, duration: Duration) {
    histogram!("aggregator_aggregation_duration_seconds", "status" => status)
        .record(duration.as_secs_f64());

    counter!("aggregator_aggregations_total", "status" => status).increment(1);
}

// ============================================================================
// Background Task Metrics
// ============================================================================

/// Metric: `aggregator_report_cards`
#[allow(clippy::cast_precision_loss)]
pub fn set_report_cards(count: usize) {
    gauge!("aggregator_report_cards").set(count as f64);
}

/// Metric: `aggregator_token_refresh_requests_total`
pub fn record_token_refresh_request() {
    counter!("aggregator_token_refresh_requests_total").increment(1);
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `aggregator_http_requests_total`, `aggregator_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("aggregator_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("aggregator_http_requests_total",
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
        "/api/v1/report-cards" => "/api/v1/report-cards",
        "/api/v1/aggregate" => "/api/v1/aggregate",
        _ => "/other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_paths() {
        record_downstream_call("students", "success", Duration::from_millis(12));
        record_downstream_call("grades", "timeout", Duration::from_millis(2000));
        record_aggregation("partial", Duration::from_millis(2001));
        set_report_cards(3);
        record_token_refresh_request();
        record_http_request("GET", "/api/v1/report-cards", 502, Duration::from_millis(40));
    }

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(normalize_endpoint("/api/v1/report-cards"), "/api/v1/report-cards");
        assert_eq!(normalize_endpoint("/api/v1/report-cards/1"), "/other");
    }

    #[test]
    fn test_categorize_status_code() {
        assert_eq!(categorize_status_code(200), "success");
        assert_eq!(categorize_status_code(504), "timeout");
        assert_eq!(categorize_status_code(502), "error");
    }
}
