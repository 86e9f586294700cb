//! Stale session reaper
//!
//! Periodically releases BUSY agent sessions whose `last_active` is older
//! than the idle timeout, so an agent held by a client that vanished does
//! not stay locked forever. The release re-checks staleness in the same
//! conditional update, so a session re-taken after the scan is left alone.

use std::sync::Arc;

use dropdesk_core::config::SessionsConfig;
use dropdesk_core::{AgentError, AgentService};
use tokio::sync::broadcast;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Run the reaper loop until the shutdown signal fires.
///
/// Spawned from `main.rs`. Exits immediately if `reaper_enabled` is `false`.
pub async fn run_reaper_loop(
    service: Arc<AgentService>,
    config: SessionsConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    if !config.reaper_enabled {
        tracing::info!("Session reaper disabled via config");
        return;
    }

    let mut ticker = interval(Duration::from_secs(config.reaper_interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        interval_secs = config.reaper_interval_secs,
        idle_timeout_secs = config.idle_timeout_secs,
        "Session reaper started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match run_reaper_tick(&service, &config).await {
                    Ok(0) => {}
                    Ok(released) => tracing::info!(released = released, "Reaper tick complete"),
                    Err(e) => tracing::warn!(error = %e, "Reaper tick failed"),
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Session reaper shutting down");
                return;
            }
        }
    }
}

/// A single reaper pass. Returns how many sessions were released.
///
/// Public for unit testing.
pub async fn run_reaper_tick(
    service: &AgentService,
    config: &SessionsConfig,
) -> Result<usize, AgentError> {
    let released = service
        .release_stale(Duration::from_secs(config.idle_timeout_secs))
        .await?;
    Ok(released.len())
}
