//! Background cleanup task for idle rate limiter state.
//!
//! Every closed connection leaves a key in the per-connection message
//! limiter; this task periodically evicts keys whose quota has recharged.

use crate::config::CleanupConfig;
use crate::server::FileRelay;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// Spawn a background cleanup task.
///
/// The task exits when the relay shuts down. Returns a handle that can
/// also be used to abort it.
pub fn spawn_cleanup_task(
    relay: Arc<FileRelay>,
    config: CleanupConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("Cleanup task disabled");
            return;
        }

        let interval_secs = config.interval_secs.max(1);
        tracing::info!("Cleanup task started (interval: {}s)", interval_secs);

        let shutdown = relay.shutdown_token();
        let mut timer = interval(Duration::from_secs(interval_secs));

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("Cleanup task stopping");
                    return;
                }
                _ = timer.tick() => {}
            }

            let limits = relay.rate_limits();
            let before = limits.connection_keys_count() + limits.message_keys_count();
            limits.shrink();
            let after = limits.connection_keys_count() + limits.message_keys_count();

            if before > after {
                tracing::info!("Cleanup: evicted {} idle rate limiter keys", before - after);
            } else {
                tracing::debug!("Cleanup: no idle rate limiter keys");
            }
        }
    })
}
