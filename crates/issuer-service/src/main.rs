//! Token issuer
//!
//! Issues signed bearer tokens and serves the JWKS document used by the
//! edge gate to verify them.

use common::logging::{init_tracing, LogFormat};
use issuer_service::config::Config;
use issuer_service::observability::metrics::init_metrics_recorder;
use issuer_service::routes::{self, AppState};
use issuer_service::services::{PrincipalRegistry, SigningKeyRing, TokenService};
use issuer_service::tasks::key_rotation::{start_key_rotation_task, DEFAULT_CHECK_INTERVAL};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // LOG_FORMAT is validated strictly with the rest of the config below.
    let log_format = std::env::var("LOG_FORMAT")
        .ok()
        .and_then(|raw| raw.parse::<LogFormat>().ok())
        .unwrap_or_default();
    init_tracing("issuer_service=debug,token_issuer=debug,tower_http=debug", log_format);

    info!("Starting token issuer");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        key_prefix = %config.key_prefix,
        token_lifetime_seconds = config.token_lifetime_seconds,
        key_overlap_seconds = config.key_overlap_seconds,
        principals = config.principals.len(),
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;

    let key_ring = Arc::new(
        SigningKeyRing::new(&config.key_prefix, Duration::from_secs(config.key_overlap_seconds))
            .map_err(|e| {
                error!("Failed to generate initial signing key: {}", e);
                e
            })?,
    );

    let principals = PrincipalRegistry::from_config(&config.principals, config.bcrypt_cost)
        .map_err(|e| {
            error!("Failed to load principals: {}", e);
            e
        })?;

    let token_service = TokenService::new(
        Arc::clone(&key_ring),
        Arc::new(principals),
        config.token_lifetime_seconds,
        config.user_token_client_id.clone(),
    );

    let cancel_token = CancellationToken::new();
    let rotation_handle = tokio::spawn(start_key_rotation_task(
        Arc::clone(&key_ring),
        config.key_rotation_interval_seconds.map(Duration::from_secs),
        DEFAULT_CHECK_INTERVAL,
        cancel_token.clone(),
    ));

    let bind_address = config.bind_address.clone();
    let state = Arc::new(AppState {
        config,
        key_ring,
        token_service,
    });
    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Token issuer listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel_token.cancel();
    if let Err(e) = rotation_handle.await {
        error!("Key rotation task ended abnormally: {}", e);
    }

    info!("Token issuer shutdown complete");

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
