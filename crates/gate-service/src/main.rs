//! Edge gate
//!
//! Subrequest authentication endpoint for the reverse proxy.

use common::logging::{init_tracing, LogFormat};
use common::policy::AdmissionPolicy;
use gate_service::auth::{EdgeAuthGate, KeySetCache};
use gate_service::config::Config;
use gate_service::observability::metrics::{init_metrics_recorder, set_jwks_freshness};
use gate_service::routes::{self, AppState};
use gate_service::tasks::start_jwks_refresh_task;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // LOG_FORMAT is validated strictly with the rest of the config below.
    let log_format = std::env::var("LOG_FORMAT")
        .ok()
        .and_then(|raw| raw.parse::<LogFormat>().ok())
        .unwrap_or_default();
    init_tracing("gate_service=debug,edge_gate=debug,tower_http=info", log_format);

    info!("Starting edge gate");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        jwks_url = %config.jwks_url,
        jwks_cache_ttl_secs = config.jwks_cache_ttl.as_secs(),
        jwks_grace_secs = config.jwks_grace.as_secs(),
        jwks_refresh_interval_secs = config.jwks_refresh_interval.as_secs(),
        policy_clock_skew_secs = config.policy_clock_skew.as_secs(),
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;

    let key_cache = Arc::new(
        KeySetCache::new(
            config.jwks_url.clone(),
            config.jwks_cache_ttl,
            config.jwks_grace,
            config.jwks_http_timeout,
        )
        .map_err(|e| {
            error!("Failed to build JWKS client: {}", e);
            e
        })?,
    );

    // The gate starts even if the issuer is down; it fails closed until a
    // refresh succeeds.
    match key_cache.refresh().await {
        Ok(keys) => info!(keys, "Initial JWKS fetch succeeded"),
        Err(e) => warn!(
            error = %e,
            "Initial JWKS fetch failed, denying all tokens until a refresh succeeds"
        ),
    }
    set_jwks_freshness(key_cache.freshness());

    let gate = Arc::new(EdgeAuthGate::new(
        Arc::clone(&key_cache) as Arc<dyn gate_service::auth::TokenVerifier>,
        AdmissionPolicy::new(config.policy_clock_skew),
    ));

    let cancel_token = CancellationToken::new();
    let refresh_handle = tokio::spawn(start_jwks_refresh_task(
        Arc::clone(&key_cache),
        config.jwks_refresh_interval,
        cancel_token.clone(),
    ));

    let bind_address = config.bind_address.clone();
    let state = Arc::new(AppState {
        config,
        gate,
        key_cache,
    });
    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Edge gate listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel_token.cancel();
    if let Err(e) = refresh_handle.await {
        error!("JWKS refresh task ended abnormally: {}", e);
    }

    info!("Edge gate shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
