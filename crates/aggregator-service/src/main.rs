//! Aggregator
//!
//! Merges students and grades into report cards, and exposes a generic
//! fan-out endpoint over the configured downstream services.

use aggregator_service::config::Config;
use aggregator_service::observability::metrics::init_metrics_recorder;
use aggregator_service::routes::{self, AppState};
use aggregator_service::services::{Aggregator, HttpDownstreamClient, ReportCardService};
use aggregator_service::tasks::start_report_card_task;
use common::logging::{init_tracing, LogFormat};
use common::token_manager::spawn_token_manager;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Bound on waiting for the first service token at startup.
const TOKEN_ACQUISITION_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // LOG_FORMAT is validated strictly with the rest of the config below.
    let log_format = std::env::var("LOG_FORMAT")
        .ok()
        .and_then(|raw| raw.parse::<LogFormat>().ok())
        .unwrap_or_default();
    init_tracing(
        "aggregator_service=debug,aggregator=debug,common=info,tower_http=debug",
        log_format,
    );

    info!("Starting aggregator");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        auth_uri = %config.auth_uri,
        auth_token_path = %config.auth_token_path,
        client_id = %config.client_id,
        downstream_timeout_ms =
            u64::try_from(config.downstream_timeout.as_millis()).unwrap_or(u64::MAX),
        downstream_retries = config.downstream_retries,
        propagation_mode = config.propagation_mode.as_str(),
        aggregation_interval_secs = config.aggregation_interval.map(|d| d.as_secs()),
        grades_required = config.grades_required,
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;

    let token_config = config.token_manager_config();
    let (token_task, token_receiver) =
        tokio::time::timeout(TOKEN_ACQUISITION_TIMEOUT, spawn_token_manager(token_config))
            .await
            .map_err(|_| {
                error!("Timed out acquiring the initial service token");
                "timed out acquiring the initial service token"
            })?
            .map_err(|e| {
                error!("Failed to start token manager: {}", e);
                e
            })?;

    info!("Service token acquired");

    let client = HttpDownstreamClient::new().map_err(|e| {
        error!("Failed to build downstream client: {}", e);
        e
    })?;

    let aggregator = Arc::new(Aggregator::new(
        Arc::new(client),
        config.targets.clone(),
        config.propagation_mode,
        token_receiver.clone(),
    ));
    let report_cards = Arc::new(ReportCardService::new(
        Arc::clone(&aggregator),
        config.downstream_timeout,
        config.downstream_retries,
        config.grades_required,
    ));

    let cancel_token = CancellationToken::new();
    let report_task = config.aggregation_interval.map(|interval| {
        tokio::spawn(start_report_card_task(
            Arc::clone(&report_cards),
            token_receiver.clone(),
            config.client_id.clone(),
            interval,
            cancel_token.clone(),
        ))
    });

    let bind_address = config.bind_address.clone();
    let state = Arc::new(AppState {
        config,
        aggregator,
        report_cards,
    });
    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Aggregator listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel_token.cancel();
    if let Some(handle) = report_task {
        if let Err(e) = handle.await {
            error!("Report card task ended abnormally: {}", e);
        }
    }
    token_task.abort();

    info!("Aggregator shutdown complete");

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
