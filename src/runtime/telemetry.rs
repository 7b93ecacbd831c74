use crate::cursor::CursorStore;
use crate::error::TickError;
use crate::extract::DatasetKind;
use crate::sync::orchestrator::TickPhase;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(60);

const NO_TIP: u64 = u64::MAX;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs the fmt subscriber once. `RUST_LOG` wins over `default_directive`.
pub fn init_tracing(default_directive: &str) {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Most recent tick failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastError {
    pub kind: &'static str,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Process-lifetime health counters. Written by the tick loop only, read by
/// anyone.
#[derive(Debug)]
pub struct Telemetry {
    started_at: DateTime<Utc>,
    started: Instant,
    runs: AtomicU64,
    committed_ticks: AtomicU64,
    idle_ticks: AtomicU64,
    errors: AtomicU64,
    listings_rows: AtomicU64,
    products_rows: AtomicU64,
    last_tip: AtomicU64,
    phase: AtomicU8,
    last_error: Mutex<Option<LastError>>,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            started: Instant::now(),
            runs: AtomicU64::new(0),
            committed_ticks: AtomicU64::new(0),
            idle_ticks: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            listings_rows: AtomicU64::new(0),
            products_rows: AtomicU64::new(0),
            last_tip: AtomicU64::new(NO_TIP),
            phase: AtomicU8::new(TickPhase::Idle as u8),
            last_error: Mutex::new(None),
        }
    }
}

impl Telemetry {
    pub fn record_run(&self) {
        self.runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_commit(&self) {
        self.committed_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_idle(&self) {
        self.idle_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tip(&self, tip: u64) {
        self.last_tip.store(tip, Ordering::Relaxed);
    }

    pub fn record_rows(&self, kind: DatasetKind, rows: u64) {
        if rows == 0 {
            return;
        }
        let counter = match kind {
            DatasetKind::Listings => &self.listings_rows,
            DatasetKind::Products => &self.products_rows,
        };
        counter.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn record_error(&self, err: &TickError) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        let entry = LastError {
            kind: err.kind(),
            message: err.to_string(),
            at: Utc::now(),
        };
        *self
            .last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(entry);
    }

    pub fn set_phase(&self, phase: TickPhase) {
        self.phase.store(phase as u8, Ordering::Relaxed);
    }

    pub fn phase(&self) -> TickPhase {
        TickPhase::from_u8(self.phase.load(Ordering::Relaxed))
    }

    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn rows(&self, kind: DatasetKind) -> u64 {
        match kind {
            DatasetKind::Listings => self.listings_rows.load(Ordering::Relaxed),
            DatasetKind::Products => self.products_rows.load(Ordering::Relaxed),
        }
    }

    pub fn last_error(&self) -> Option<LastError> {
        self.last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    fn last_tip(&self) -> Option<u64> {
        match self.last_tip.load(Ordering::Relaxed) {
            NO_TIP => None,
            tip => Some(tip),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RowCounts {
    pub listings: u64,
    pub products: u64,
}

/// Point-in-time view served by the status surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub start_block: Option<u64>,
    pub cursor: Option<u64>,
    pub last_tip: Option<u64>,
    pub phase: TickPhase,
    pub runs: u64,
    pub committed_ticks: u64,
    pub idle_ticks: u64,
    pub rows_loaded: RowCounts,
    pub errors: u64,
    pub last_error: Option<LastError>,
}

/// Read-only handle combining telemetry with the cached cursor position.
#[derive(Clone)]
pub struct HealthReporter {
    telemetry: Arc<Telemetry>,
    cursor: Arc<CursorStore>,
}

impl HealthReporter {
    pub fn new(telemetry: Arc<Telemetry>, cursor: Arc<CursorStore>) -> Self {
        Self { telemetry, cursor }
    }

    pub fn start_block(&self) -> Option<u64> {
        self.cursor.start_block()
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let telemetry = &self.telemetry;
        HealthSnapshot {
            started_at: telemetry.started_at(),
            uptime_secs: telemetry.uptime().as_secs(),
            start_block: self.cursor.start_block(),
            cursor: self.cursor.block_number(),
            last_tip: telemetry.last_tip(),
            phase: telemetry.phase(),
            runs: telemetry.runs(),
            committed_ticks: telemetry.committed_ticks.load(Ordering::Relaxed),
            idle_ticks: telemetry.idle_ticks.load(Ordering::Relaxed),
            rows_loaded: RowCounts {
                listings: telemetry.rows(DatasetKind::Listings),
                products: telemetry.rows(DatasetKind::Products),
            },
            errors: telemetry.errors(),
            last_error: telemetry.last_error(),
        }
    }
}

/// Spawns a background task that periodically logs the health snapshot and
/// row throughput since the previous report.
pub fn spawn_metrics_reporter(
    reporter: HealthReporter,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = reporter.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "ledger_mirror::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let snapshot = reporter.snapshot();
                    let loaded = |s: &HealthSnapshot| s.rows_loaded.listings + s.rows_loaded.products;
                    let delta = loaded(&snapshot).saturating_sub(loaded(&last_snapshot));
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "ledger_mirror::metrics",
                        rows_per_sec = format!("{throughput:.2}"),
                        start_block = ?snapshot.start_block,
                        last_tip = ?snapshot.last_tip,
                        runs = snapshot.runs,
                        listings_rows = snapshot.rows_loaded.listings,
                        products_rows = snapshot.rows_loaded.products,
                        errors = snapshot.errors,
                        last_error = snapshot.last_error.as_ref().map(|e| e.message.as_str()),
                        "sync health snapshot"
                    );

                    last_snapshot = snapshot;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
