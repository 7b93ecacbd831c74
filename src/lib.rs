pub mod chain;
pub mod cursor;
pub mod error;
pub mod extract;
pub mod runtime;
pub mod sync;
pub mod warehouse;

pub use chain::{EthRpcClient, RpcClientOptions, TipReader};
pub use cursor::{
    Cursor, CursorRepository, CursorStore, MemoryCursorRepository, PostgresCursorRepository,
};
pub use error::{
    ChainReadError, ConfigError, CursorStoreError, ExtractionError, LoadError, TickError,
};
pub use extract::{
    CommandExtractor, DatasetKind, ExtractionDelegate, ExtractionOutput, ExtractionRequest,
    OutputDataset,
};
pub use runtime::config::{SyncConfig, SyncConfigBuilder};
pub use runtime::runner::Runner;
pub use runtime::status::StatusServer;
pub use runtime::telemetry::{init_tracing, HealthReporter, HealthSnapshot, Telemetry};
pub use sync::{
    next_window, BlockRange, LoadTarget, LoadedRows, SyncDriver, SyncPolicy, SyncServices,
    TickOrchestrator, TickOutcome, TickPhase,
};
pub use warehouse::{BigQueryLoader, DatasetSchema, TableId, TokenSource, WarehouseLoader};
