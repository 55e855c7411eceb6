//! HTTP routes for the aggregator.

use crate::config::{Config, REQUEST_TIMEOUT};
use crate::handlers;
use crate::middleware::{http_metrics_middleware, require_identity};
use crate::services::{Aggregator, ReportCardService};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,

    pub aggregator: Arc<Aggregator>,

    /// Shared with the periodic aggregation task.
    pub report_cards: Arc<ReportCardService>,
}

/// Build the application routes.
///
/// - `/health`, `/ready`, `/metrics` - operational, unauthenticated
/// - `/api/v1/report-cards` - students merged with grades
/// - `/api/v1/aggregate` - generic fan-out over configured targets
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .with_state(Arc::clone(&state));

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let api_routes = Router::new()
        .route("/api/v1/report-cards", get(handlers::handle_report_cards))
        .route("/api/v1/aggregate", post(handlers::handle_aggregate))
        .route_layer(middleware::from_fn(require_identity))
        .with_state(state);

    public_routes
        .merge(metrics_routes)
        .merge(api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(middleware::from_fn(http_metrics_middleware))
}
