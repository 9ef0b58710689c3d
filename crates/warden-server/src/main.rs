//! Warden Server Binary
//!
//! Loads the layered configuration, builds the authentication stack and
//! serves the reference routes.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use warden_auth::config::{validate_config, ConfigLoader, CONFIG_PATH_ENV};
use warden_auth::AuthStack;
use warden_common_log::LogConfig;

mod routes;

/// Authentication gateway with adaptive rate limiting.
#[derive(Debug, Parser)]
#[command(name = "warden-server", author, version, about)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON).
    #[arg(short, long, env = CONFIG_PATH_ENV)]
    config: Option<PathBuf>,

    /// Override `server.host`.
    #[arg(long)]
    host: Option<String>,

    /// Override `server.port`.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_config_path(path);
    }
    let mut config = loader.load()?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let logging = &config.logging;
    warden_common_log::init(
        LogConfig::from_settings(&logging.level, &logging.format, logging.file.clone())
            .with_env_overrides(),
    )?;

    info!("Starting Warden Server v{}", env!("CARGO_PKG_VERSION"));

    match validate_config(&config) {
        Ok(warnings) => {
            for warning in warnings {
                warn!("{warning}");
            }
        }
        Err(errors) => {
            for err in &errors {
                error!("{err}");
            }
            bail!("configuration has {} error(s)", errors.len());
        }
    }

    let stack = Arc::new(AuthStack::from_config(&config.auth).context("Failed to build auth stack")?);
    let cleanup = stack.spawn_cleanup_tasks();

    let addr = config
        .server
        .socket_addr()
        .context("Invalid server.host/server.port")?;
    let listener = TcpListener::bind(addr).await?;
    info!(
        %addr,
        auth = stack.middleware.is_enabled(),
        "Server listening"
    );

    axum::serve(
        listener,
        routes::router(stack).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    for task in cleanup {
        task.abort();
    }
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
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
                error!("Failed to install SIGTERM handler: {e}");
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

    info!("Shutdown signal received, starting graceful shutdown");
}
