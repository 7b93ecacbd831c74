//! JSON-RPC client for Ethereum-compatible ledger nodes. Only the head height
//! is read here; block contents are the extraction job's business.

use crate::chain::metrics::{RpcMetrics, RpcMetricsSnapshot};
use crate::chain::options::RpcClientOptions;
use crate::chain::TipReader;
use crate::error::ChainReadError;
use crate::runtime::config::SyncConfig;
use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use std::sync::Arc;
use tokio::time::{timeout, Instant};

const BLOCK_NUMBER_METHOD: &str = "eth_blockNumber";

#[derive(Debug, Clone)]
pub struct EthRpcClient {
    endpoint: Arc<String>,
    client: HttpClient,
    options: RpcClientOptions,
    metrics: Arc<RpcMetrics>,
}

impl TipReader for EthRpcClient {
    fn get_tip(&self) -> BoxFuture<'_, Result<u64, ChainReadError>> {
        Box::pin(self.block_number())
    }
}

impl EthRpcClient {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::with_options(url, RpcClientOptions::default())
    }

    pub fn with_options(url: impl Into<String>, options: RpcClientOptions) -> Result<Self> {
        options.validate()?;

        let endpoint = url.into();
        let max_response_body_size = options.max_response_body_bytes.min(u32::MAX as usize) as u32;
        let client = HttpClientBuilder::default()
            .request_timeout(options.request_timeout)
            .max_response_size(max_response_body_size)
            .build(&endpoint)
            .map_err(|err| anyhow!("failed to build ledger RPC client: {err}"))?;

        Ok(Self {
            endpoint: Arc::new(endpoint),
            client,
            options,
            metrics: Arc::new(RpcMetrics::default()),
        })
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let options = RpcClientOptions {
            request_timeout: config.rpc_timeout(),
            ..RpcClientOptions::default()
        };
        Self::with_options(config.provider_url().to_owned(), options)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn metrics(&self) -> RpcMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Fetches the latest block height. Exactly one request is issued; retrying
    /// is left to the next tick.
    pub async fn block_number(&self) -> Result<u64, ChainReadError> {
        let start = Instant::now();
        let response = timeout(
            self.options.request_timeout,
            self.client
                .request::<String, _>(BLOCK_NUMBER_METHOD, rpc_params![]),
        )
        .await;

        let raw = match response {
            Err(_) => {
                self.metrics.record_timeout(start.elapsed());
                return Err(ChainReadError::Timeout {
                    method: BLOCK_NUMBER_METHOD,
                    timeout: self.options.request_timeout,
                });
            }
            Ok(Err(err)) => {
                self.metrics.record_failure(start.elapsed());
                return Err(ChainReadError::Rpc {
                    method: BLOCK_NUMBER_METHOD,
                    message: err.to_string(),
                });
            }
            Ok(Ok(raw)) => raw,
        };

        match parse_quantity(&raw) {
            Some(height) => {
                self.metrics.record_success(start.elapsed());
                tracing::debug!(tip = height, "current block");
                Ok(height)
            }
            None => {
                self.metrics.record_failure(start.elapsed());
                Err(ChainReadError::Malformed {
                    method: BLOCK_NUMBER_METHOD,
                    value: raw,
                })
            }
        }
    }
}

/// Parses a JSON-RPC hex quantity such as `"0x98cf17"`.
pub fn parse_quantity(raw: &str) -> Option<u64> {
    let digits = raw.trim().strip_prefix("0x")?;
    if digits.is_empty() || digits.len() > 16 {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}
