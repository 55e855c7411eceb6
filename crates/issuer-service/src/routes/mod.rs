//! HTTP routes for the token issuer.

use crate::config::Config;
use crate::handlers;
use crate::middleware::{http_metrics_middleware, require_admin_scope, AuthState};
use crate::services::{SigningKeyRing, TokenService};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,

    /// Signing keys; shared with the rotation task.
    pub key_ring: Arc<SigningKeyRing>,

    pub token_service: TokenService,
}

/// Build the application routes.
///
/// - `/health`, `/ready`, `/metrics` - operational, unauthenticated
/// - `/.well-known/jwks.json` - published verification keys
/// - `/api/v1/auth/service/token` - client credentials grant
/// - `/api/v1/auth/user/token` - password grant
/// - `/api/v1/admin/keys/rotate` - requires `admin:keys`
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let auth_state = Arc::new(AuthState {
        key_ring: Arc::clone(&state.key_ring),
    });

    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/.well-known/jwks.json", get(handlers::handle_get_jwks))
        .route("/api/v1/auth/service/token", post(handlers::handle_service_token))
        .route("/api/v1/auth/user/token", post(handlers::handle_user_token))
        .with_state(Arc::clone(&state));

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let admin_routes = Router::new()
        .route("/api/v1/admin/keys/rotate", post(handlers::handle_rotate_keys))
        .route_layer(middleware::from_fn_with_state(auth_state, require_admin_scope))
        .with_state(state);

    // Layer order (bottom-to-top execution): timeout innermost, metrics
    // outermost so framework-level rejections are counted.
    public_routes
        .merge(metrics_routes)
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}
