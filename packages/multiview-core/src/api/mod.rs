//! HTTP API layer.
//!
//! This module contains thin handlers that delegate to the supervisor,
//! catalog, and broadcaster. It provides the router construction and server
//! startup functionality.

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::catalog::Catalog;
use crate::state::Config;
use crate::supervisor::Supervisor;

pub mod http;
pub mod response;
mod stream;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),

    /// No available ports in the specified range.
    #[error("No available ports in range {start}-{end}")]
    NoAvailablePort { start: u16, end: u16 },
}

/// Shared application state for the API layer.
///
/// Thin wrapper holding references to the services; all business logic lives
/// in the services themselves.
#[derive(Clone)]
pub struct AppState {
    /// Owns session mode, current/last layout, and the encoder handle.
    pub supervisor: Arc<Supervisor>,
    /// Channel catalog, refreshable from the configured M3U source.
    pub catalog: Arc<Catalog>,
    /// Application configuration (idle timeout, port, encoder preference, ...).
    pub config: Arc<RwLock<Config>>,
}

impl AppState {
    pub fn new(supervisor: Arc<Supervisor>, catalog: Arc<Catalog>, config: Arc<RwLock<Config>>) -> Self {
        Self {
            supervisor,
            catalog,
            config,
        }
    }
}

async fn find_available_port(
    start: u16,
    end: u16,
) -> Result<(u16, tokio::net::TcpListener), ServerError> {
    for port in start..=end {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => return Ok((port, listener)),
            Err(_) => continue,
        }
    }
    Err(ServerError::NoAvailablePort { start, end })
}

/// Starts the HTTP server on the configured port, falling back to a small
/// scan range if the configured port is `0`.
pub async fn start_server(state: AppState) -> Result<(), ServerError> {
    let preferred_port = state.config.read().port;
    let (port, listener) = if preferred_port > 0 {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], preferred_port));
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => (preferred_port, listener),
            Err(e) => return Err(ServerError::Bind(e)),
        }
    } else {
        find_available_port(8004, 8014).await?
    };

    log::info!("[Server] listening on http://0.0.0.0:{}", port);
    let app = http::create_router(state);

    // into_make_service_with_connect_info to enable ConnectInfo<SocketAddr> extraction
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;
    Ok(())
}
