//! Ledger node access: the `TipReader` seam consumed by the orchestrator and
//! the JSON-RPC client that implements it.

pub mod client;
pub mod metrics;
pub mod options;

pub use client::{parse_quantity, EthRpcClient};
pub use metrics::RpcMetricsSnapshot;
pub use options::RpcClientOptions;

use crate::error::ChainReadError;
use futures::future::BoxFuture;

/// Reads the current head height of the monitored ledger.
pub trait TipReader: Send + Sync {
    fn get_tip(&self) -> BoxFuture<'_, Result<u64, ChainReadError>>;
}
