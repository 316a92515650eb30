//! cgpt-api - CreatorGPT pipeline supervisor
//!
//! Runs the extraction, enrichment and scoring workers for a channel and
//! streams their progress to browsers over WebSocket and SSE.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use cgpt_api::config::ApiConfig;
use cgpt_api::hub::run_broadcaster;
use cgpt_api::AppState;
use cgpt_common::config::{load_toml_or_default, resolve_work_dir, WORK_DIR_ENV};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for cgpt-api
#[derive(Parser, Debug)]
#[command(name = "cgpt-api")]
#[command(about = "CreatorGPT analysis pipeline supervisor")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "CGPT_API_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind (overrides config)
    #[arg(long, env = "CGPT_API_HOST")]
    host: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(short, long, env = "CGPT_API_PORT")]
    port: Option<u16>,

    /// Directory the stages run in
    #[arg(short, long)]
    work_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config: ApiConfig =
        load_toml_or_default(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    config.validate().context("Invalid configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},tower_http=info", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting cgpt-api (pipeline supervisor)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let work_dir = resolve_work_dir(
        args.work_dir.as_deref(),
        WORK_DIR_ENV,
        config.work_dir.as_deref(),
    );
    tokio::fs::create_dir_all(&work_dir)
        .await
        .with_context(|| format!("Failed to create work directory {}", work_dir.display()))?;
    info!("Work directory: {}", work_dir.display());
    for stage in &config.stages {
        info!(
            stage = %stage.name,
            program = %stage.program,
            fatal = stage.fatal,
            band = ?stage.band,
            "Configured stage"
        );
    }

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.host, config.port))?;
    let heartbeat = config.heartbeat_interval();

    let (state, snapshots) = AppState::new(config, work_dir);
    tokio::spawn(run_broadcaster(snapshots, state.hub.clone(), heartbeat));

    let app = cgpt_api::build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Live updates: ws://{}/ws/analysis", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
