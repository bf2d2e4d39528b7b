//! Daemon lifecycle: open the engine, serve the API, shut down in order.

use std::sync::Arc;

use anyhow::Context;
use sendguard_core::{Engine, alerter, db, executor};
use tokio::net::TcpListener;

use crate::api::{AppState, create_router};
use crate::config::Config;

/// Runs the daemon until Ctrl+C or SIGTERM.
///
/// `dry_run` forces the logging executor regardless of configuration.
///
/// # Errors
///
/// Returns an error if the database cannot be opened, prior state cannot be
/// loaded, or the listen address cannot be bound.
pub async fn run(config: Config, dry_run: bool) -> anyhow::Result<()> {
    let database = config.database_path()?;
    let database = database
        .to_str()
        .context("database path is not valid UTF-8")?
        .to_string();
    let pool = db::connect(&database)
        .await
        .with_context(|| format!("failed to open database {database}"))?;

    let settings = config.settings.clone();
    let executor = executor::from_settings(&settings.executor, dry_run);
    let alerter = alerter::from_settings(&settings.alerter);
    let engine = Arc::new(
        Engine::open(settings, pool.clone(), executor, alerter)
            .await
            .context("failed to load engine state")?,
    );
    let running = engine.start()?;

    let state = AppState::new(Arc::clone(&engine), config.server.webhook_secret.clone());
    let app = create_router(state, &config.server);

    let listener = match TcpListener::bind(config.server.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            running.stop().await;
            return Err(e).with_context(|| format!("failed to bind {}", config.server.listen));
        }
    };
    tracing::info!(
        listen = %config.server.listen,
        database = %database,
        dry_run,
        "sendguard listening"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    tracing::info!("sendguard shutting down");
    running.stop().await;
    pool.close().await;

    served.context("HTTP server failed")
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
