//! HTTP routes for the edge gate.

use crate::auth::{EdgeAuthGate, KeySetCache};
use crate::config::Config;
use crate::handlers;
use crate::middleware::http_metrics_middleware;
use axum::{
    middleware,
    routing::{any, get},
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

    pub gate: Arc<EdgeAuthGate>,

    /// Verification keys; shared with the refresh task.
    pub key_cache: Arc<KeySetCache>,
}

/// Build the application routes.
///
/// - `/auth` - subrequest check, any method
/// - `/health`, `/ready`, `/metrics` - operational
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let gate_routes = Router::new()
        .route("/auth", any(handlers::handle_auth_check))
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .with_state(state);

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    gate_routes
        .merge(metrics_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::auth::StaticKeyVerifier;
    use auth_test_utils::{TestKeypair, TestTokenBuilder};
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use common::policy::AdmissionPolicy;
    use http_body_util::BodyExt;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::collections::HashMap;
    use tower::ServiceExt;

    fn app(keypair: &TestKeypair, loaded: bool) -> Router {
        let config = Config::from_vars(&HashMap::new()).unwrap();
        let key_cache = Arc::new(
            KeySetCache::new(
                config.jwks_url.clone(),
                config.jwks_cache_ttl,
                config.jwks_grace,
                config.jwks_http_timeout,
            )
            .unwrap(),
        );
        if loaded {
            key_cache.replace(keypair.key_set());
        }

        let gate = Arc::new(EdgeAuthGate::new(
            Arc::new(StaticKeyVerifier::new(keypair.key_set())),
            AdmissionPolicy::default(),
        ));

        let state = Arc::new(AppState {
            config,
            gate,
            key_cache,
        });
        build_routes(state, PrometheusBuilder::new().build_recorder().handle())
    }

    async fn check(
        app: Router,
        method: &str,
        authorization: Option<&str>,
    ) -> axum::response::Response {
        let mut request = Request::builder().method(method).uri("/auth");
        if let Some(value) = authorization {
            request = request.header(header::AUTHORIZATION, value);
        }
        app.oneshot(request.body(Body::empty()).unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn test_admitted_request_carries_identity() {
        let keypair = TestKeypair::from_seed(11, "auth-test-11");
        let token = TestTokenBuilder::new()
            .client_id("frontend")
            .for_subject("user-9")
            .email_verified(true)
            .sign_with(&keypair);

        let response = check(app(&keypair, true), "GET", Some(&format!("Bearer {token}"))).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()["x-auth-subject"], "user-9");
        assert_eq!(response.headers()["x-auth-client-id"], "frontend");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_any_method_is_checked() {
        let keypair = TestKeypair::from_seed(11, "auth-test-11");
        let token = TestTokenBuilder::new().client_id("aggregator").sign_with(&keypair);

        for method in ["POST", "DELETE", "HEAD"] {
            let response = check(app(&keypair, true), method, Some(&token)).await;
            assert_eq!(response.status(), StatusCode::NO_CONTENT, "{method}");
        }
    }

    #[tokio::test]
    async fn test_missing_header_is_unauthorized() {
        let keypair = TestKeypair::from_seed(11, "auth-test-11");

        let response = check(app(&keypair, true), "GET", None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
    }

    #[tokio::test]
    async fn test_policy_denial_is_forbidden() {
        let keypair = TestKeypair::from_seed(11, "auth-test-11");
        let token = TestTokenBuilder::new().client_id("other").sign_with(&keypair);

        let response = check(app(&keypair, true), "GET", Some(&token)).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());
        assert!(response.headers().get("x-auth-subject").is_none());
    }

    #[tokio::test]
    async fn test_ready_reflects_key_cache() {
        let keypair = TestKeypair::from_seed(11, "auth-test-11");

        let request = || Request::builder().uri("/ready").body(Body::empty()).unwrap();

        let cold = app(&keypair, false).oneshot(request()).await.unwrap();
        assert_eq!(cold.status(), StatusCode::SERVICE_UNAVAILABLE);

        let warm = app(&keypair, true).oneshot(request()).await.unwrap();
        assert_eq!(warm.status(), StatusCode::OK);
        let bytes = warm.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["jwks"], "fresh");
        assert_eq!(body["keys"], 1);
    }
}
