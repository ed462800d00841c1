//! Multiview Server - standalone headless server for the multiview IPTV tuner.
//!
//! Accepts a declarative layout over HTTP, composites the referenced IPTV
//! channels into a single MPEG-TS program via an external transcoder, and
//! serves that program to any number of concurrent HTTP clients.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::RwLock;
use tokio::signal;

use multiview_core::{bootstrap_services, start_server, AppState};

use crate::config::ServerConfig;

/// Multiview Server - headless IPTV multiview compositor and streamer.
#[derive(Parser, Debug)]
#[command(name = "multiview-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "MULTIVIEW_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file and `PORT`).
    #[arg(short = 'p', long, env = "PORT")]
    port: Option<u16>,

    /// M3U playlist source: an `http(s)://` URL or a local file path
    /// (overrides config file and `M3U_SOURCE`).
    #[arg(short = 'm', long, env = "M3U_SOURCE")]
    m3u_source: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Multiview Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(m3u_source) = args.m3u_source {
        config.m3u_source = m3u_source;
    }

    log::info!(
        "Configuration: port={}, m3u_source={}, encoder_preference={}",
        config.port,
        if config.m3u_source.is_empty() { "(none)" } else { &config.m3u_source },
        config.encoder_preference,
    );

    let core_config = config.to_core_config();
    let services = bootstrap_services(&core_config).context("Failed to bootstrap services")?;

    if !core_config.m3u_source.is_empty() {
        match services.catalog.refresh().await {
            Ok(count) => log::info!("Loaded {} channel(s) from catalog source", count),
            Err(e) => log::warn!("Initial catalog refresh failed: {}", e),
        }
    } else {
        log::warn!("No M3U_SOURCE configured; catalog will remain empty");
    }

    services.start_background_tasks();
    log::info!("Background tasks started");

    let app_state = AppState::new(
        Arc::clone(&services.supervisor),
        Arc::clone(&services.catalog),
        Arc::new(RwLock::new(core_config)),
    );

    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state).await {
            log::error!("Server error: {}", e);
        }
    });

    shutdown_signal().await;
    log::info!("Shutdown signal received, cleaning up...");

    services.shutdown().await;
    server_handle.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
