//! Durable sync watermark: the single persisted row recording the last block
//! that was fully extracted and loaded, plus the in-memory `start_block` cache
//! the orchestrator reads every tick.

pub mod memory;
pub mod postgres;

pub use memory::MemoryCursorRepository;
pub use postgres::PostgresCursorRepository;

use crate::error::CursorStoreError;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Primary key of the singleton cursor row.
pub const CURSOR_ROW_ID: i32 = 1;

const UNLOADED: u64 = u64::MAX;

/// Persisted cursor record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cursor {
    pub id: i32,
    /// Last block fully processed, inclusive.
    pub block_number: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Cursor {
    /// First block that has not been processed yet.
    pub fn start_block(&self) -> u64 {
        self.block_number.saturating_add(1)
    }
}

/// Persistence seam for the cursor row.
pub trait CursorRepository: Send + Sync {
    /// Returns the cursor row, atomically creating it at `initial_block` when it
    /// does not exist yet. Concurrent callers must observe the same row.
    fn load_or_init(&self, initial_block: u64) -> BoxFuture<'_, Result<Cursor, CursorStoreError>>;

    /// Persists a new block number. Implementations must reject values lower
    /// than the stored one.
    fn save(&self, block_number: u64) -> BoxFuture<'_, Result<Cursor, CursorStoreError>>;
}

/// Owns the cursor on behalf of the tick loop and caches `start_block` so the
/// status surface can read it without touching the database.
pub struct CursorStore {
    repository: Arc<dyn CursorRepository>,
    epoch_start: u64,
    start_block: AtomicU64,
}

impl CursorStore {
    /// `epoch_start` is the first block ever mirrored; a fresh cursor is created
    /// at `epoch_start - 1`. Callers validate that it is at least 1.
    pub fn new(repository: Arc<dyn CursorRepository>, epoch_start: u64) -> Self {
        Self {
            repository,
            epoch_start,
            start_block: AtomicU64::new(UNLOADED),
        }
    }

    pub fn epoch_start(&self) -> u64 {
        self.epoch_start
    }

    /// First unprocessed block, or `None` until [`Self::load`] succeeded.
    pub fn start_block(&self) -> Option<u64> {
        match self.start_block.load(Ordering::SeqCst) {
            UNLOADED => None,
            value => Some(value),
        }
    }

    /// Last fully processed block, or `None` until [`Self::load`] succeeded.
    pub fn block_number(&self) -> Option<u64> {
        self.start_block().map(|start| start.saturating_sub(1))
    }

    /// Loads (or creates) the persisted cursor and primes the in-memory cache.
    pub async fn load(&self) -> Result<u64, CursorStoreError> {
        let initial = self.epoch_start.saturating_sub(1);
        let cursor = self.repository.load_or_init(initial).await?;
        self.start_block
            .store(cursor.start_block(), Ordering::SeqCst);
        tracing::info!(
            block_number = cursor.block_number,
            start_block = cursor.start_block(),
            "cursor loaded"
        );
        Ok(cursor.block_number)
    }

    /// Persists `block_number` and, only once the write succeeded, moves the
    /// cached `start_block` to `block_number + 1`.
    pub async fn advance(&self, block_number: u64) -> Result<u64, CursorStoreError> {
        let current = self.block_number().ok_or(CursorStoreError::NotLoaded)?;
        if block_number < current {
            return Err(CursorStoreError::Regression {
                current,
                requested: block_number,
            });
        }

        tracing::info!(block_number, "setting cursor");
        let cursor = self.repository.save(block_number).await?;
        self.start_block
            .store(cursor.start_block(), Ordering::SeqCst);
        tracing::info!(block_number = cursor.block_number, "cursor set");
        Ok(cursor.block_number)
    }
}
