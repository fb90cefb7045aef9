use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sourcepin_api::config::ServerConfig;
use sourcepin_api::router::build_app_router;
use sourcepin_api::state::AppState;
use sourcepin_api::{background, ws};
use sourcepin_git::GitVersion;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "sourcepin_api=debug,sourcepin_pipeline=debug,sourcepin_git=debug,tower_http=debug"
                .into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env().context("Invalid configuration")?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        repo_provider = config.repo_provider.kind(),
        deployment_mode = ?config.deployment_mode,
        "Loaded server configuration"
    );

    // --- Git client ---
    let git_version = GitVersion::detect()
        .await
        .context("Could not determine the git client version")?;
    tracing::info!(
        version = %git_version,
        atomic_push = git_version.supports_atomic_push(),
        "Detected git client"
    );

    // --- App state ---
    let state = AppState::build(config.clone(), git_version)
        .await
        .context("Could not initialise services")?;

    // --- Heartbeat ---
    let heartbeat_handle = ws::start_heartbeat(Arc::clone(&state.ws_manager));

    // --- Log retention ---
    let retention_cancel = CancellationToken::new();
    let retention_handle = tokio::spawn(background::log_retention::run(
        Arc::clone(&state.logs),
        config.log_sweep_interval,
        retention_cancel.clone(),
    ));

    // --- Router ---
    let app = build_app_router(state.clone(), &config);

    // --- Start server ---
    let host: std::net::IpAddr = config
        .host
        .parse()
        .with_context(|| format!("Invalid HOST address '{}'", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!(
        running_jobs = state.engine.running_jobs().await,
        "Server stopped accepting connections, cleaning up"
    );

    // Cancelled jobs still report to their callbacks before the process exits.
    if state.engine.shutdown(config.shutdown_grace).await {
        tracing::info!("All jobs finished");
    }

    retention_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), retention_handle).await;
    tracing::info!("Log retention job stopped");

    let ws_count = state.ws_manager.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    state.ws_manager.shutdown_all().await;
    state.logs.close_all().await;

    heartbeat_handle.abort();
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
