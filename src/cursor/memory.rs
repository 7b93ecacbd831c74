//! Process-local cursor repository. Used for dry runs and tests; it gives no
//! durability across restarts.

use super::{Cursor, CursorRepository, CURSOR_ROW_ID};
use crate::error::CursorStoreError;
use chrono::Utc;
use futures::future::BoxFuture;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemoryCursorRepository {
    row: Mutex<Option<Cursor>>,
}

impl MemoryCursorRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts with an existing row at `block_number`, as if a previous run had
    /// already committed it.
    pub fn with_block(block_number: u64) -> Self {
        Self {
            row: Mutex::new(Some(Cursor {
                id: CURSOR_ROW_ID,
                block_number,
                created_at: Utc::now(),
                updated_at: None,
            })),
        }
    }

    pub fn current(&self) -> Option<Cursor> {
        self.row.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl CursorRepository for MemoryCursorRepository {
    fn load_or_init(&self, initial_block: u64) -> BoxFuture<'_, Result<Cursor, CursorStoreError>> {
        Box::pin(async move {
            let mut row = self.row.lock().unwrap_or_else(|p| p.into_inner());
            let cursor = row.get_or_insert_with(|| {
                tracing::info!(block_number = initial_block, "creating new cursor");
                Cursor {
                    id: CURSOR_ROW_ID,
                    block_number: initial_block,
                    created_at: Utc::now(),
                    updated_at: None,
                }
            });
            Ok(cursor.clone())
        })
    }

    fn save(&self, block_number: u64) -> BoxFuture<'_, Result<Cursor, CursorStoreError>> {
        Box::pin(async move {
            let mut row = self.row.lock().unwrap_or_else(|p| p.into_inner());
            let cursor = row.as_mut().ok_or(CursorStoreError::Missing)?;
            if block_number < cursor.block_number {
                return Err(CursorStoreError::Regression {
                    current: cursor.block_number,
                    requested: block_number,
                });
            }
            cursor.block_number = block_number;
            cursor.updated_at = Some(Utc::now());
            Ok(cursor.clone())
        })
    }
}
