//! Periodic reload of the allowlist file.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::store::AllowlistStore;

/// Poll the backing file every `interval` and publish a new snapshot when its
/// modification time or length changed.
///
/// Returns `None` when `interval` is zero (polling disabled).
pub fn spawn_reload_task(
    store: Arc<AllowlistStore>,
    interval: Duration,
    shutdown: CancellationToken,
) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        tracing::info!("Allowlist file polling disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        // The store loaded the file at open.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::debug!("reload: shutdown signal, stopping");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let store = store.clone();
            match tokio::task::spawn_blocking(move || store.reload_if_changed()).await {
                Ok(Some(snapshot)) => {
                    tracing::info!(use_cases = snapshot.len(), "reload: allowlist refreshed");
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "reload: task panicked");
                }
            }
        }
    }))
}
