use crate::sync::orchestrator::{TickOrchestrator, TickOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;

/// Runs one tick per interval until the shutdown token is cancelled.
///
/// Cancellation is only observed between ticks: a tick in flight always runs
/// to completion so the cursor is never left behind a finished load.
pub struct SyncDriver {
    orchestrator: Arc<TickOrchestrator>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl SyncDriver {
    pub fn new(
        orchestrator: Arc<TickOrchestrator>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            orchestrator,
            interval,
            shutdown,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        tracing::info!(interval_secs = self.interval.as_secs_f64(), "sync loop started");

        while !self.shutdown.is_cancelled() {
            match self.orchestrator.run_tick().await {
                TickOutcome::Committed { range, rows } => {
                    tracing::debug!(%range, rows = rows.total(), "tick committed");
                }
                TickOutcome::Idle { tip, start_block } => {
                    tracing::debug!(tip, start_block, "tick idle");
                }
                TickOutcome::Failed(err) => {
                    tracing::debug!(kind = err.kind(), "tick failed; retrying next interval");
                }
            }

            select! {
                _ = self.shutdown.cancelled() => break,
                _ = time::sleep(self.interval) => {}
            }
        }

        tracing::info!("sync loop stopped");
    }
}
