//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together: catalog, broadcaster,
//! supervisor, then the idle watchdog task.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::broadcaster::Broadcaster;
use crate::catalog::Catalog;
use crate::layout::resolve_encoder_profile;
use crate::protocol_constants::IDLE_WATCHDOG_INTERVAL_SECS;
use crate::state::Config;
use crate::supervisor::{EncodeEnvironment, Supervisor};

#[cfg(test)]
use crate::supervisor::Mode;

/// Container for all bootstrapped services.
#[derive(Clone)]
pub struct BootstrappedServices {
    pub catalog: Arc<Catalog>,
    pub broadcaster: Arc<Broadcaster>,
    pub supervisor: Arc<Supervisor>,
    pub config: Config,
    cancel_token: CancellationToken,
}

impl BootstrappedServices {
    /// Spawns the idle-watchdog background task. Separate from
    /// [`bootstrap_services`] so callers can finish wiring (e.g. attaching
    /// an initial catalog refresh) before background work starts touching
    /// shared state.
    pub fn start_background_tasks(&self) {
        let supervisor = Arc::clone(&self.supervisor);
        let idle_timeout = Duration::from_secs(self.config.idle_timeout_secs);
        let cancel = self.cancel_token.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(IDLE_WATCHDOG_INTERVAL_SECS));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        supervisor.idle_watchdog_tick(idle_timeout).await;
                    }
                }
            }
        });
    }

    /// Initiates graceful shutdown of all services.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] beginning graceful shutdown...");
        self.cancel_token.cancel();
        self.supervisor.stop().await;
        log::info!("[Bootstrap] shutdown complete");
    }
}

/// Bootstraps all application services with their dependencies.
///
/// Wiring order:
/// 1. Channel catalog (pointed at `M3U_SOURCE`, not yet refreshed)
/// 2. Broadcaster (spawns its pump task)
/// 3. Session supervisor (owns the broadcaster and catalog references)
///
/// # Errors
///
/// This never fails today (no fallible step in wiring); it returns a
/// `Result` so adding one later - e.g. validating `M3U_SOURCE` eagerly -
/// doesn't change the signature.
pub fn bootstrap_services(config: &Config) -> Result<BootstrappedServices, std::convert::Infallible> {
    let catalog = Arc::new(Catalog::new(
        config.m3u_source.clone(),
        config.default_user_agent.clone(),
        config.parsed_source_headers(),
    ));

    let broadcaster = Broadcaster::new();

    let profile = resolve_encoder_profile(&config.encoder_preference);
    let env = EncodeEnvironment {
        profile,
        default_ua: config.default_user_agent.clone(),
        extra_headers: config.parsed_source_headers(),
        inset_scale: config.inset_scale,
        inset_margin: config.inset_margin,
        legacy_audio_source_index: config.legacy_audio_source_index,
    };
    let supervisor = Supervisor::new(Arc::clone(&broadcaster), Arc::clone(&catalog), env);

    Ok(BootstrappedServices {
        catalog,
        broadcaster,
        supervisor,
        config: config.clone(),
        cancel_token: CancellationToken::new(),
    })
}
