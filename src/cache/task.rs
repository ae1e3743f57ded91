//! Background Management
//!
//! Runs `manage()` on a tokio interval for caches that should not depend on
//! foreground traffic to trip their cadence. Cycles run on the blocking pool
//! since the SQLite backend does synchronous I/O.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::object::ObjectCache;
use crate::error::{Error, Result};

/// Handle to a running management loop
#[derive(Debug)]
pub struct ManagementTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ManagementTask {
    /// Start managing `cache` every `every`
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(cache: Arc<dyn ObjectCache>, every: Duration) -> Result<Self> {
        if every.is_zero() {
            return Err(Error::Config(
                "management interval must be greater than zero".to_string(),
            ));
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(cache, every, cancel.clone()));
        Ok(Self { cancel, handle })
    }

    /// Token that stops the loop when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the loop and wait for an in-flight cycle to finish
    pub async fn shutdown(self) -> Result<()> {
        self.cancel.cancel();
        self.handle
            .await
            .map_err(|e| Error::Internal(format!("management task panicked: {}", e)))
    }
}

#[instrument(skip(cache, cancel), fields(cache = %cache.name()))]
async fn run(cache: Arc<dyn ObjectCache>, every: Duration, cancel: CancellationToken) {
    info!(?every, "Starting cache management loop");

    let mut tick = interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // First tick completes immediately
    tick.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Cache management loop shutting down");
                break;
            }

            _ = tick.tick() => {
                let target = Arc::clone(&cache);
                match tokio::task::spawn_blocking(move || target.manage()).await {
                    Ok(Ok(report)) if report.skipped => debug!("Cycle already running, skipped"),
                    Ok(Ok(report)) => debug!(
                        expired = report.expired,
                        evicted = report.evicted,
                        relocated = report.relocated,
                        remaining = report.remaining,
                        "Managed cache"
                    ),
                    Ok(Err(e)) if e.is_retryable() => warn!(error = %e, "Management cycle failed, will retry"),
                    Ok(Err(e)) => error!(error = %e, "Management cycle failed"),
                    Err(e) => error!(error = %e, "Management cycle panicked"),
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
