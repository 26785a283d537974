//! Background maintenance sweep for `strata serve`.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::state::Engine;

/// Run a maintenance sweep every `interval_secs` until `cancel` fires.
///
/// Returns `None` when the interval is zero. A failed sweep is logged and
/// retried on the next tick.
pub fn spawn_sweep_loop(
    engine: Arc<Engine>,
    interval_secs: u64,
    cancel: CancellationToken,
) -> Option<JoinHandle<()>> {
    if interval_secs == 0 {
        tracing::info!("background sweep disabled");
        return None;
    }

    tracing::info!(interval_secs, "background sweep enabled");
    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        // Skip the first immediate tick.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match engine.run_maintenance_sweep().await {
                        Ok(report) if report.is_idle() => {
                            tracing::debug!("sweep found no work");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(error = %e, "maintenance sweep failed (will retry)");
                        }
                    }
                }
                _ = cancel.cancelled() => {
                    tracing::info!("background sweep shutting down");
                    break;
                }
            }
        }
    }))
}
