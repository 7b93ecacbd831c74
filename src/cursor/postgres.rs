//! Postgres-backed cursor repository (`etl_cursor` table).

use super::{Cursor, CursorRepository, CURSOR_ROW_ID};
use crate::error::CursorStoreError;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;

const MAX_CONNECTIONS: u32 = 2;

#[derive(Debug, Clone)]
pub struct PostgresCursorRepository {
    pool: PgPool,
}

impl PostgresCursorRepository {
    pub async fn connect(database_url: &str, acquire_timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await
            .context("failed to connect to cursor database")?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies the bundled schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run cursor migrations")
    }

    async fn insert_if_absent(&self, initial_block: u64) -> Result<Cursor, CursorStoreError> {
        let initial = to_db(initial_block)?;
        let inserted = sqlx::query(
            "INSERT INTO etl_cursor (id, block_number) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING",
        )
        .bind(CURSOR_ROW_ID)
        .bind(initial)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 1 {
            tracing::info!(block_number = initial_block, "created new cursor in the database");
        }

        let row = sqlx::query(
            "SELECT id, block_number, created_at, updated_at FROM etl_cursor WHERE id = $1",
        )
        .bind(CURSOR_ROW_ID)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(CursorStoreError::Missing)?;

        cursor_from_row(&row)
    }

    async fn update(&self, block_number: u64) -> Result<Cursor, CursorStoreError> {
        let requested = to_db(block_number)?;
        let updated = sqlx::query(
            r#"
            UPDATE etl_cursor
            SET block_number = $2, updated_at = NOW()
            WHERE id = $1 AND block_number <= $2
            RETURNING id, block_number, created_at, updated_at
            "#,
        )
        .bind(CURSOR_ROW_ID)
        .bind(requested)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = updated {
            return cursor_from_row(&row);
        }

        let current: Option<i64> =
            sqlx::query_scalar("SELECT block_number FROM etl_cursor WHERE id = $1")
                .bind(CURSOR_ROW_ID)
                .fetch_optional(&self.pool)
                .await?;

        match current {
            Some(current) => Err(CursorStoreError::Regression {
                current: from_db(current)?,
                requested: block_number,
            }),
            None => Err(CursorStoreError::Missing),
        }
    }
}

impl CursorRepository for PostgresCursorRepository {
    fn load_or_init(&self, initial_block: u64) -> BoxFuture<'_, Result<Cursor, CursorStoreError>> {
        Box::pin(self.insert_if_absent(initial_block))
    }

    fn save(&self, block_number: u64) -> BoxFuture<'_, Result<Cursor, CursorStoreError>> {
        Box::pin(self.update(block_number))
    }
}

fn cursor_from_row(row: &PgRow) -> Result<Cursor, CursorStoreError> {
    let block_number: i64 = row.try_get("block_number")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: Option<DateTime<Utc>> = row.try_get("updated_at")?;
    Ok(Cursor {
        id: row.try_get("id")?,
        block_number: from_db(block_number)?,
        created_at,
        updated_at,
    })
}

fn to_db(block_number: u64) -> Result<i64, CursorStoreError> {
    i64::try_from(block_number).map_err(|_| CursorStoreError::OutOfRange(i64::MAX))
}

fn from_db(value: i64) -> Result<u64, CursorStoreError> {
    u64::try_from(value).map_err(|_| CursorStoreError::OutOfRange(value))
}
