//! Admission gate HTTP server.
//!
//! Issues tickets for confirmed orders and validates credentials at the gate.

use admission_core::environment::{OsEntropy, SystemClock};
use admission_core::keys::KeyMaterialGenerator;
use admission_gate::{
    auth::StaticOperatorDirectory,
    config::Config,
    issuance::Issuer,
    metrics,
    server::{AppState, build_router},
    validation::Validator,
};
use admission_postgres::PostgresTicketStore;
use anyhow::Context;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Load configuration
    let config = Config::from_env();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.server.default_log_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Admission Gate HTTP Server");

    config.validate().context("Invalid configuration")?;
    info!(
        bind = %config.bind_address(),
        store_timeout_ms = config.gate.store_timeout_ms,
        manual_entry_enabled = config.gate.manual_entry_enabled,
        "Configuration loaded"
    );

    let metrics_handle = metrics::install_recorder().context("Failed to install metrics")?;

    // Setup ticket store
    info!("Connecting to ticket store database...");
    let store = PostgresTicketStore::connect(&config.database.url, &config.database.pool_settings())
        .await
        .context("Failed to connect to ticket store")?;
    if config.database.run_migrations {
        info!("Running ticket store migrations...");
        store.migrate().await.context("Failed to migrate ticket store")?;
        info!("Ticket store migrations complete");
    }
    let store = Arc::new(store);
    info!("Ticket store connected");

    // Setup services
    let clock = Arc::new(SystemClock);
    let issuer = Issuer::new(
        store.clone(),
        clock.clone(),
        KeyMaterialGenerator::new(Arc::new(OsEntropy)),
        config.gate.key_generation_attempts,
    );
    let validator = Validator::new(store.clone(), clock, config.gate.store_timeout());

    let operator_tokens = config.auth.operator_token_pairs()?;
    if operator_tokens.is_empty() {
        warn!("No operator tokens configured; validation endpoints will refuse every caller");
    }
    if config.auth.issuer_token.is_none() {
        warn!("No issuer token configured; issuance endpoints will refuse every caller");
    }

    let state = AppState {
        store,
        issuer,
        validator,
        operators: Arc::new(StaticOperatorDirectory::new(operator_tokens)),
        issuer_token: config.auth.issuer_token.as_deref().map(Arc::from),
        manual_entry_enabled: config.gate.manual_entry_enabled,
        metrics: Some(metrics_handle),
    };

    let app = build_router(state);

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    // Run server with graceful shutdown, bounded by SHUTDOWN_TIMEOUT
    let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = stop_rx.changed().await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => result?,
        () = shutdown_signal() => {
            let _ = stop_tx.send(true);
            let grace = Duration::from_secs(config.server.shutdown_timeout);
            match tokio::time::timeout(grace, &mut server).await {
                Ok(result) => result?,
                Err(_) => warn!(grace_secs = grace.as_secs(), "Shutdown timeout elapsed; dropping open connections"),
            }
        }
    }

    info!("Server stopped");
    Ok(())
}

/// Graceful shutdown signal handler.
///
/// Waits for:
/// - Ctrl+C (SIGINT)
/// - SIGTERM (in production environments)
///
/// If a handler cannot be installed, that signal is never observed.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
