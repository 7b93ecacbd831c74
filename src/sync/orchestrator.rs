use crate::chain::TipReader;
use crate::cursor::CursorStore;
use crate::error::{ChainReadError, CursorStoreError, ExtractionError, LoadError, TickError};
use crate::extract::{DatasetKind, ExtractionDelegate, ExtractionRequest};
use crate::runtime::telemetry::Telemetry;
use crate::sync::policy::SyncPolicy;
use crate::sync::window::{next_window, BlockRange};
use crate::warehouse::WarehouseLoader;
use serde::Serialize;
use std::sync::Arc;
use tokio::time::timeout;

/// The four collaborators a tick talks to.
#[derive(Clone)]
pub struct SyncServices {
    pub cursor: Arc<CursorStore>,
    pub tip_reader: Arc<dyn TipReader>,
    pub extractor: Arc<dyn ExtractionDelegate>,
    pub loader: Arc<dyn WarehouseLoader>,
}

/// Step of the tick currently executing, as seen by the status surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TickPhase {
    Idle = 0,
    LoadingCursor = 1,
    ReadingTip = 2,
    Extracting = 3,
    LoadingListings = 4,
    LoadingProducts = 5,
    Committing = 6,
}

impl TickPhase {
    pub fn loading(kind: DatasetKind) -> Self {
        match kind {
            DatasetKind::Listings => TickPhase::LoadingListings,
            DatasetKind::Products => TickPhase::LoadingProducts,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => TickPhase::LoadingCursor,
            2 => TickPhase::ReadingTip,
            3 => TickPhase::Extracting,
            4 => TickPhase::LoadingListings,
            5 => TickPhase::LoadingProducts,
            6 => TickPhase::Committing,
            _ => TickPhase::Idle,
        }
    }
}

/// Rows appended per dataset during one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadedRows {
    pub listings: u64,
    pub products: u64,
}

impl LoadedRows {
    pub fn get(&self, kind: DatasetKind) -> u64 {
        match kind {
            DatasetKind::Listings => self.listings,
            DatasetKind::Products => self.products,
        }
    }

    fn add(&mut self, kind: DatasetKind, rows: u64) {
        match kind {
            DatasetKind::Listings => self.listings += rows,
            DatasetKind::Products => self.products += rows,
        }
    }

    pub fn total(&self) -> u64 {
        self.listings + self.products
    }
}

#[derive(Debug)]
pub enum TickOutcome {
    /// Every dataset loaded and the cursor now sits at `range.end()`.
    Committed { range: BlockRange, rows: LoadedRows },
    /// Nothing is confirmed past the cursor yet.
    Idle { tip: u64, start_block: u64 },
    /// The tick stopped early; the cursor was not moved.
    Failed(TickError),
}

impl TickOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, TickOutcome::Committed { .. })
    }

    pub fn error(&self) -> Option<&TickError> {
        match self {
            TickOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Sequences one tick: read tip, compute window, extract, load every dataset
/// in plan order, then advance the cursor.
///
/// The cursor is only written after the last load succeeded. Any failure is
/// counted in telemetry and leaves the cursor where it was, so the same window
/// comes back on the next tick.
pub struct TickOrchestrator {
    services: SyncServices,
    policy: SyncPolicy,
    telemetry: Arc<Telemetry>,
}

impl TickOrchestrator {
    pub fn new(services: SyncServices, policy: SyncPolicy, telemetry: Arc<Telemetry>) -> Self {
        Self {
            services,
            policy,
            telemetry,
        }
    }

    pub fn cursor(&self) -> &Arc<CursorStore> {
        &self.services.cursor
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    pub async fn run_tick(&self) -> TickOutcome {
        self.telemetry.record_run();

        let outcome = match self.execute().await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(kind = err.kind(), error = %err, "sync tick failed");
                self.telemetry.record_error(&err);
                TickOutcome::Failed(err)
            }
        };

        self.telemetry.set_phase(TickPhase::Idle);
        outcome
    }

    async fn execute(&self) -> Result<TickOutcome, TickError> {
        let start_block = self.start_block().await?;

        self.telemetry.set_phase(TickPhase::ReadingTip);
        let tip = timeout(self.policy.tip_timeout, self.services.tip_reader.get_tip())
            .await
            .map_err(|_| ChainReadError::Timeout {
                method: "get_tip",
                timeout: self.policy.tip_timeout,
            })??;
        self.telemetry.record_tip(tip);

        let Some(range) = next_window(
            tip,
            self.policy.confirmation_lag,
            start_block,
            self.policy.max_window_blocks,
        ) else {
            tracing::debug!(
                tip,
                start_block,
                confirmation_lag = self.policy.confirmation_lag,
                "no confirmed blocks past the cursor"
            );
            self.telemetry.record_idle();
            return Ok(TickOutcome::Idle { tip, start_block });
        };

        tracing::info!(tip, start = range.start(), end = range.end(), "running job for blocks");

        self.telemetry.set_phase(TickPhase::Extracting);
        let request = ExtractionRequest {
            range,
            batch_size: self.policy.batch_size,
            max_workers: self.policy.max_workers,
        };
        let output = timeout(
            self.policy.extract_timeout,
            self.services.extractor.extract(&request),
        )
        .await
        .map_err(|_| ExtractionError::Timeout {
            timeout: self.policy.extract_timeout,
        })??;

        let mut rows = LoadedRows::default();
        for target in &self.policy.load_plan {
            let kind = target.kind();
            self.telemetry.set_phase(TickPhase::loading(kind));

            let loaded = match output.dataset(kind) {
                Some(dataset) => timeout(
                    self.policy.load_timeout,
                    self.services
                        .loader
                        .load(kind.schema(), dataset.path(), target.table()),
                )
                .await
                .map_err(|_| LoadError::Timeout {
                    timeout: self.policy.load_timeout,
                })
                .and_then(|result| result)
                .map_err(|source| TickError::Load {
                    dataset: kind,
                    source,
                })?,
                None => {
                    tracing::debug!(dataset = %kind, "no artifact produced, nothing to load");
                    0
                }
            };

            rows.add(kind, loaded);
            self.telemetry.record_rows(kind, loaded);
        }

        self.telemetry.set_phase(TickPhase::Committing);
        self.services.cursor.advance(range.end()).await?;
        self.telemetry.record_commit();

        tracing::info!(
            start = range.start(),
            end = range.end(),
            listings = rows.listings,
            products = rows.products,
            "job complete"
        );
        Ok(TickOutcome::Committed { range, rows })
    }

    /// Cached start block, loading the cursor first if an earlier attempt
    /// failed or this is the first tick.
    async fn start_block(&self) -> Result<u64, TickError> {
        if let Some(start) = self.services.cursor.start_block() {
            return Ok(start);
        }

        self.telemetry.set_phase(TickPhase::LoadingCursor);
        self.services.cursor.load().await?;
        self.services
            .cursor
            .start_block()
            .ok_or(TickError::CursorStore(CursorStoreError::NotLoaded))
    }
}
