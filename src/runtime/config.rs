use crate::extract::DatasetKind;
use crate::runtime::telemetry;
use crate::sync::policy::LoadTarget;
use crate::warehouse::{bigquery, TableId};
use anyhow::{bail, Context, Result};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_RUN_INTERVAL_SECS: u64 = 15;
pub const DEFAULT_CONFIRMATION_LAG: u64 = 4;
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_MAX_WORKERS: usize = 5;
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_EPOCH_START: u64 = 10_014_455;
pub const DEFAULT_EXTRACT_COMMAND: &str = "ethereumetl";
pub const DEFAULT_EXTRACT_TIMEOUT_SECS: u64 = 3600;
pub const DEFAULT_LOAD_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_DB_ACQUIRE_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_STATUS_ADDR: &str = "0.0.0.0:8080";

/// Runtime configuration for the sync service.
///
/// Instances only come out of [`SyncConfig::builder`] (or the env layer on top
/// of it), so every consumer sees validated values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    provider_url: String,
    listings_table: TableId,
    products_table: TableId,
    load_order: Vec<DatasetKind>,
    database_url: String,
    run_interval: Duration,
    confirmation_lag: u64,
    batch_size: usize,
    max_workers: usize,
    log_level: String,
    epoch_start: u64,
    max_window_blocks: Option<u64>,
    extract_command: Vec<String>,
    extract_output_dir: PathBuf,
    extract_timeout: Duration,
    load_timeout: Duration,
    rpc_timeout: Duration,
    db_acquire_timeout: Duration,
    status_addr: SocketAddr,
    metrics_interval: Duration,
    bigquery_api_url: String,
    bigquery_access_token: Option<String>,
    bigquery_poll_interval: Duration,
}

impl SyncConfig {
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Ledger node JSON-RPC endpoint, also handed to the extraction job.
    pub fn provider_url(&self) -> &str {
        &self.provider_url
    }

    pub fn listings_table(&self) -> &TableId {
        &self.listings_table
    }

    pub fn products_table(&self) -> &TableId {
        &self.products_table
    }

    /// Destination table for each dataset, in load order.
    pub fn load_plan(&self) -> Vec<LoadTarget> {
        self.load_order
            .iter()
            .map(|kind| {
                let table = match kind {
                    DatasetKind::Listings => self.listings_table.clone(),
                    DatasetKind::Products => self.products_table.clone(),
                };
                LoadTarget::new(*kind, table)
            })
            .collect()
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Sleep between two ticks.
    pub fn run_interval(&self) -> Duration {
        self.run_interval
    }

    /// Blocks kept between the ledger tip and the end of a window.
    pub fn confirmation_lag(&self) -> u64 {
        self.confirmation_lag
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Default tracing directive used when `RUST_LOG` is unset.
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// First block ever mirrored. A fresh cursor starts just below it.
    pub fn epoch_start(&self) -> u64 {
        self.epoch_start
    }

    pub fn max_window_blocks(&self) -> Option<u64> {
        self.max_window_blocks
    }

    /// Extraction program followed by its leading arguments.
    pub fn extract_command(&self) -> &[String] {
        &self.extract_command
    }

    pub fn extract_output_dir(&self) -> &Path {
        &self.extract_output_dir
    }

    pub fn extract_timeout(&self) -> Duration {
        self.extract_timeout
    }

    /// Upper bound for one dataset load, polling included.
    pub fn load_timeout(&self) -> Duration {
        self.load_timeout
    }

    pub fn rpc_timeout(&self) -> Duration {
        self.rpc_timeout
    }

    pub fn db_acquire_timeout(&self) -> Duration {
        self.db_acquire_timeout
    }

    pub fn status_addr(&self) -> SocketAddr {
        self.status_addr
    }

    /// Interval used by the health log reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    pub fn bigquery_api_url(&self) -> &str {
        &self.bigquery_api_url
    }

    /// Static bearer token; `None` means the metadata server is asked.
    pub fn bigquery_access_token(&self) -> Option<&str> {
        self.bigquery_access_token.as_deref()
    }

    pub fn bigquery_poll_interval(&self) -> Duration {
        self.bigquery_poll_interval
    }

    pub fn validate(&self) -> Result<()> {
        validate_url(&self.provider_url, "provider_url")?;
        validate_url(&self.bigquery_api_url, "bigquery_api_url")?;
        ensure_not_empty(&self.database_url, "database_url")?;
        ensure_not_empty(&self.log_level, "log_level")?;

        if self.extract_command.is_empty() {
            bail!("extract_command cannot be empty");
        }

        if self.load_order.is_empty() {
            bail!("load_order cannot be empty");
        }
        for (index, kind) in self.load_order.iter().enumerate() {
            if self.load_order[..index].contains(kind) {
                bail!("load_order lists {kind} more than once");
            }
        }

        if self.epoch_start == 0 {
            bail!("epoch_start must be at least 1");
        }

        if self.batch_size == 0 {
            bail!("batch_size must be greater than 0");
        }

        if self.max_workers == 0 {
            bail!("max_workers must be greater than 0");
        }

        if self.max_window_blocks == Some(0) {
            bail!("max_window_blocks must be greater than 0 when set");
        }

        for (value, field) in [
            (self.run_interval, "run_interval"),
            (self.extract_timeout, "extract_timeout"),
            (self.load_timeout, "load_timeout"),
            (self.rpc_timeout, "rpc_timeout"),
            (self.db_acquire_timeout, "db_acquire_timeout"),
            (self.metrics_interval, "metrics_interval"),
            (self.bigquery_poll_interval, "bigquery_poll_interval"),
        ] {
            if value.is_zero() {
                bail!("{field} must be greater than 0");
            }
        }

        if let Some(token) = &self.bigquery_access_token {
            ensure_not_empty(token, "bigquery_access_token")?;
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct SyncConfigBuilder {
    provider_url: Option<String>,
    listings_table: Option<TableId>,
    products_table: Option<TableId>,
    load_order: Option<Vec<DatasetKind>>,
    database_url: Option<String>,
    run_interval: Option<Duration>,
    confirmation_lag: Option<u64>,
    batch_size: Option<usize>,
    max_workers: Option<usize>,
    log_level: Option<String>,
    epoch_start: Option<u64>,
    max_window_blocks: Option<u64>,
    extract_command: Option<Vec<String>>,
    extract_output_dir: Option<PathBuf>,
    extract_timeout: Option<Duration>,
    load_timeout: Option<Duration>,
    rpc_timeout: Option<Duration>,
    db_acquire_timeout: Option<Duration>,
    status_addr: Option<SocketAddr>,
    metrics_interval: Option<Duration>,
    bigquery_api_url: Option<String>,
    bigquery_access_token: Option<String>,
    bigquery_poll_interval: Option<Duration>,
}

impl SyncConfigBuilder {
    pub fn provider_url(mut self, url: impl Into<String>) -> Self {
        self.provider_url = Some(url.into());
        self
    }

    pub fn listings_table(mut self, table: TableId) -> Self {
        self.listings_table = Some(table);
        self
    }

    pub fn products_table(mut self, table: TableId) -> Self {
        self.products_table = Some(table);
        self
    }

    pub fn load_order(mut self, order: Vec<DatasetKind>) -> Self {
        self.load_order = Some(order);
        self
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn run_interval(mut self, interval: Duration) -> Self {
        self.run_interval = Some(interval);
        self
    }

    pub fn confirmation_lag(mut self, lag: u64) -> Self {
        self.confirmation_lag = Some(lag);
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    pub fn max_workers(mut self, workers: usize) -> Self {
        self.max_workers = Some(workers);
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    pub fn epoch_start(mut self, block: u64) -> Self {
        self.epoch_start = Some(block);
        self
    }

    pub fn max_window_blocks(mut self, blocks: u64) -> Self {
        self.max_window_blocks = Some(blocks);
        self
    }

    pub fn extract_command(mut self, command: Vec<String>) -> Self {
        self.extract_command = Some(command);
        self
    }

    pub fn extract_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.extract_output_dir = Some(dir.into());
        self
    }

    pub fn extract_timeout(mut self, timeout: Duration) -> Self {
        self.extract_timeout = Some(timeout);
        self
    }

    pub fn load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = Some(timeout);
        self
    }

    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = Some(timeout);
        self
    }

    pub fn db_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.db_acquire_timeout = Some(timeout);
        self
    }

    pub fn status_addr(mut self, addr: SocketAddr) -> Self {
        self.status_addr = Some(addr);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn bigquery_api_url(mut self, url: impl Into<String>) -> Self {
        self.bigquery_api_url = Some(url.into());
        self
    }

    pub fn bigquery_access_token(mut self, token: impl Into<String>) -> Self {
        self.bigquery_access_token = Some(token.into());
        self
    }

    pub fn bigquery_poll_interval(mut self, interval: Duration) -> Self {
        self.bigquery_poll_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<SyncConfig> {
        let status_addr = match self.status_addr {
            Some(addr) => addr,
            None => DEFAULT_STATUS_ADDR
                .parse()
                .context("default status address is invalid")?,
        };

        let config = SyncConfig {
            provider_url: trimmed(self.provider_url.context("provider_url is required")?),
            listings_table: self.listings_table.context("listings_table is required")?,
            products_table: self.products_table.context("products_table is required")?,
            load_order: self
                .load_order
                .unwrap_or_else(|| DatasetKind::ALL.to_vec()),
            database_url: trimmed(self.database_url.context("database_url is required")?),
            run_interval: self
                .run_interval
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_RUN_INTERVAL_SECS)),
            confirmation_lag: self.confirmation_lag.unwrap_or(DEFAULT_CONFIRMATION_LAG),
            batch_size: self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            max_workers: self.max_workers.unwrap_or(DEFAULT_MAX_WORKERS),
            log_level: trimmed(
                self.log_level
                    .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_owned()),
            ),
            epoch_start: self.epoch_start.unwrap_or(DEFAULT_EPOCH_START),
            max_window_blocks: self.max_window_blocks,
            extract_command: self
                .extract_command
                .unwrap_or_else(|| vec![DEFAULT_EXTRACT_COMMAND.to_owned()]),
            extract_output_dir: self
                .extract_output_dir
                .unwrap_or_else(std::env::temp_dir),
            extract_timeout: self
                .extract_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_EXTRACT_TIMEOUT_SECS)),
            load_timeout: self
                .load_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_LOAD_TIMEOUT_SECS)),
            rpc_timeout: self
                .rpc_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS)),
            db_acquire_timeout: self
                .db_acquire_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_DB_ACQUIRE_TIMEOUT_SECS)),
            status_addr,
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            bigquery_api_url: trimmed(
                self.bigquery_api_url
                    .unwrap_or_else(|| bigquery::DEFAULT_API_URL.to_owned()),
            ),
            bigquery_access_token: self.bigquery_access_token.map(trimmed),
            bigquery_poll_interval: self
                .bigquery_poll_interval
                .unwrap_or(bigquery::DEFAULT_POLL_INTERVAL),
        };

        config.validate()?;
        Ok(config)
    }
}

fn trimmed(value: String) -> String {
    value.trim().to_owned()
}

fn ensure_not_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}

fn validate_url(url: &str, field: &str) -> Result<()> {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("{field} must start with http:// or https://");
    }
    Ok(())
}
