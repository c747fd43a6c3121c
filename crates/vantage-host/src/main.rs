//! Vantage Host Daemon
//!
//! The host daemon runs on the machine being accessed and owns the
//! whole control plane: direct listener, router connection, user
//! authentication, and live sessions.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vantage_core::config::{self, HostConfig, Settings};
use vantage_host::HostOrchestrator;

#[derive(Parser)]
#[command(name = "vantage-host")]
#[command(about = "Vantage remote-access host daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Direct listener port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Vantage host starting...");

    // Load configuration, creating the default file on first run so the
    // watcher has something to watch.
    let config_path = args
        .config
        .unwrap_or_else(config::default_config_path);
    let mut settings = if config_path.exists() {
        Settings::load(&config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }
        tracing::info!("Writing default configuration to {:?}", config_path);
        Settings::create(&config_path, HostConfig::default())?
    };

    // Override the listener port if specified
    if let Some(port) = args.port {
        settings.set_tcp_port(port);
    }

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Setup signal handlers
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    let mut host = HostOrchestrator::new(settings);
    host.start().await.context("Failed to start the host")?;
    host.run(cancel).await;

    tracing::info!("Host shutdown complete");
    Ok(())
}
