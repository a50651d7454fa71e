#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::path::PathBuf;

use clap::Parser;
use postrider_common::{Signal, logging};
use postrider_pipeline::PluginRegistry;
use tokio::sync::broadcast;
use tracing::{debug, info};

#[derive(Debug, Parser)]
#[command(name = "postrider", about = "An MTA message-processing core")]
struct Args {
    /// Path to the configuration file; discovered if omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => find_config_file()?,
    };
    let config = postrider::Config::from_path(&config_path)?;

    logging::init();
    info!(config = %config_path.display(), "Postrider starting");

    let manager = config.build(&PluginRegistry::with_builtins())?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(16);
    tokio::spawn(async move {
        if let Err(e) = shutdown(shutdown_tx).await {
            tracing::error!(error = %e, "Shutdown signal handling failed");
        }
    });

    // Returns once shutdown has been broadcast and the workers drained.
    manager.serve(shutdown_rx).await?;
    Ok(())
}

/// Wait for CTRL+C or SIGTERM, then fan the shutdown signal out.
async fn shutdown(broadcast: broadcast::Sender<Signal>) -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            info!("Terminate signal received, shutting down");
        }
    }

    debug!(receivers = broadcast.receiver_count(), "Broadcasting shutdown");
    broadcast
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    Ok(())
}

/// Find the configuration file using the following precedence:
/// 1. `POSTRIDER_CONFIG` environment variable
/// 2. ./postrider.config.ron (current working directory)
/// 3. /etc/postrider/postrider.config.ron (system-wide config)
fn find_config_file() -> anyhow::Result<PathBuf> {
    if let Ok(env_path) = std::env::var("POSTRIDER_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "POSTRIDER_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    let default_paths = vec![
        PathBuf::from("./postrider.config.ron"),
        PathBuf::from("/etc/postrider/postrider.config.ron"),
    ];

    for path in &default_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - POSTRIDER_CONFIG environment variable\n{paths_tried}"
    )
}
