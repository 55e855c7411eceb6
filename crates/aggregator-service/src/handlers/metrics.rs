//! Prometheus scrape endpoint.

use axum::extract::State;
use metrics_exporter_prometheus::PrometheusHandle;

/// GET /metrics
#[tracing::instrument(skip_all, name = "aggregator.metrics.scrape")]
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}
