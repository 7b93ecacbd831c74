//! Error taxonomy for the sync service.
//!
//! `ConfigError` is fatal and only raised while the process boots. The four
//! per-tick kinds are caught at the tick boundary by the orchestrator, counted,
//! and leave the persisted cursor untouched so the same window is retried on
//! the next tick.

use crate::extract::DatasetKind;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Missing or malformed startup configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("env var {name} must be defined")]
    Missing { name: &'static str },

    #[error("env var {name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error(transparent)]
    Validation(#[from] anyhow::Error),
}

/// Failure to read the current head height from the ledger node.
#[derive(Debug, Error)]
pub enum ChainReadError {
    #[error("ledger rpc {method} timed out after {timeout:?}")]
    Timeout {
        method: &'static str,
        timeout: Duration,
    },

    #[error("ledger rpc {method} failed: {message}")]
    Rpc {
        method: &'static str,
        message: String,
    },

    #[error("ledger rpc {method} returned malformed block number {value:?}")]
    Malformed { method: &'static str, value: String },
}

/// Failure raised by the extraction delegate. Output artifacts are absent or
/// incomplete whenever one of these is returned.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("failed to spawn extraction command {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("extraction command exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("extraction did not finish within {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("failed to prepare extraction artifact {path}: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure raised while loading one dataset into the warehouse.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read dataset {path}: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("record on line {line} violates schema at field {field}: {reason}")]
    Schema {
        line: usize,
        field: String,
        reason: String,
    },

    #[error("failed to obtain warehouse credentials: {0}")]
    Credentials(String),

    #[error("warehouse request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("warehouse rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("load job {job_id} failed: {message}; errors: [{}]", .errors.join("; "))]
    Job {
        job_id: String,
        message: String,
        errors: Vec<String>,
    },

    #[error("warehouse returned an unexpected response: {0}")]
    Malformed(String),

    #[error("load did not finish within {timeout:?}")]
    Timeout { timeout: Duration },
}

/// Failure to read or persist the cursor row.
#[derive(Debug, Error)]
pub enum CursorStoreError {
    #[error("cursor store unavailable: {0}")]
    Database(#[from] sqlx::Error),

    #[error("cursor row is missing; cannot update")]
    Missing,

    #[error("cursor has not been loaded yet")]
    NotLoaded,

    #[error("refusing to move cursor backwards from {current} to {requested}")]
    Regression { current: u64, requested: u64 },

    #[error("stored block number {0} is out of range")]
    OutOfRange(i64),
}

/// Error surfaced by a single tick. Every variant leaves the cursor untouched.
#[derive(Debug, Error)]
pub enum TickError {
    #[error(transparent)]
    ChainRead(#[from] ChainReadError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("{dataset} load failed: {source}")]
    Load {
        dataset: DatasetKind,
        #[source]
        source: LoadError,
    },

    #[error(transparent)]
    CursorStore(#[from] CursorStoreError),
}

impl TickError {
    /// Stable label used in logs and the health snapshot.
    pub fn kind(&self) -> &'static str {
        match self {
            TickError::ChainRead(_) => "chain_read",
            TickError::Extraction(_) => "extraction",
            TickError::Load { .. } => "load",
            TickError::CursorStore(_) => "cursor_store",
        }
    }
}
