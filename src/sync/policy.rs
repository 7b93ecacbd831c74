use crate::extract::DatasetKind;
use crate::runtime::config::SyncConfig;
use crate::warehouse::TableId;
use std::time::Duration;

/// One step of the load sequence: which dataset goes to which table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTarget {
    kind: DatasetKind,
    table: TableId,
}

impl LoadTarget {
    pub fn new(kind: DatasetKind, table: TableId) -> Self {
        Self { kind, table }
    }

    pub fn kind(&self) -> DatasetKind {
        self.kind
    }

    pub fn table(&self) -> &TableId {
        &self.table
    }
}

/// Per-tick knobs of the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPolicy {
    pub confirmation_lag: u64,
    pub batch_size: usize,
    pub max_workers: usize,
    pub max_window_blocks: Option<u64>,
    pub load_plan: Vec<LoadTarget>,
    pub tip_timeout: Duration,
    pub extract_timeout: Duration,
    pub load_timeout: Duration,
}

impl SyncPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            confirmation_lag: config.confirmation_lag(),
            batch_size: config.batch_size(),
            max_workers: config.max_workers(),
            max_window_blocks: config.max_window_blocks(),
            load_plan: config.load_plan(),
            tip_timeout: config.rpc_timeout(),
            extract_timeout: config.extract_timeout(),
            load_timeout: config.load_timeout(),
        }
    }
}
