//! Environment layer on top of [`SyncConfigBuilder`].
//!
//! Blank values are treated as unset. Any missing required variable or
//! unparseable value is a [`ConfigError`] and aborts startup.

use crate::error::ConfigError;
use crate::runtime::config::{SyncConfig, SyncConfigBuilder};
use crate::warehouse::TableId;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

pub const PROVIDER_URL: &str = "PROVIDER_URL";
pub const BIGQUERY_MARKETPLACE_TABLE_ID: &str = "BIGQUERY_MARKETPLACE_TABLE_ID";
pub const BIGQUERY_DSHOP_TABLE_ID: &str = "BIGQUERY_DSHOP_TABLE_ID";
pub const DATABASE_URL: &str = "DATABASE_URL";
pub const RUN_INTERVAL_SECS: &str = "RUN_INTERVAL_SECS";
pub const JOB_BLOCK_LAG: &str = "JOB_BLOCK_LAG";
pub const JOB_BLOCK_BATCH_SIZE: &str = "JOB_BLOCK_BATCH_SIZE";
pub const JOB_MAX_WORKERS: &str = "JOB_MAX_WORKERS";
pub const LOG_LEVEL: &str = "LOG_LEVEL";
pub const START_BLOCK_EPOCH: &str = "START_BLOCK_EPOCH";
pub const MAX_WINDOW_BLOCKS: &str = "MAX_WINDOW_BLOCKS";
pub const EXTRACT_COMMAND: &str = "EXTRACT_COMMAND";
pub const EXTRACT_OUTPUT_DIR: &str = "EXTRACT_OUTPUT_DIR";
pub const EXTRACT_TIMEOUT_SECS: &str = "EXTRACT_TIMEOUT_SECS";
pub const LOAD_TIMEOUT_SECS: &str = "LOAD_TIMEOUT_SECS";
pub const RPC_TIMEOUT_SECS: &str = "RPC_TIMEOUT_SECS";
pub const DB_ACQUIRE_TIMEOUT_SECS: &str = "DB_ACQUIRE_TIMEOUT_SECS";
pub const STATUS_ADDR: &str = "STATUS_ADDR";
pub const METRICS_INTERVAL_SECS: &str = "METRICS_INTERVAL_SECS";
pub const BIGQUERY_API_URL: &str = "BIGQUERY_API_URL";
pub const BIGQUERY_ACCESS_TOKEN: &str = "BIGQUERY_ACCESS_TOKEN";
pub const BIGQUERY_POLL_INTERVAL_MS: &str = "BIGQUERY_POLL_INTERVAL_MS";

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);
        let mut builder = SyncConfigBuilder::default()
            .provider_url(env.required(PROVIDER_URL)?)
            .listings_table(env.required_parsed::<TableId>(BIGQUERY_MARKETPLACE_TABLE_ID)?)
            .products_table(env.required_parsed::<TableId>(BIGQUERY_DSHOP_TABLE_ID)?)
            .database_url(env.required(DATABASE_URL)?);

        if let Some(secs) = env.parsed::<u64>(RUN_INTERVAL_SECS)? {
            builder = builder.run_interval(Duration::from_secs(secs));
        }
        if let Some(lag) = env.parsed::<u64>(JOB_BLOCK_LAG)? {
            builder = builder.confirmation_lag(lag);
        }
        if let Some(size) = env.parsed::<usize>(JOB_BLOCK_BATCH_SIZE)? {
            builder = builder.batch_size(size);
        }
        if let Some(workers) = env.parsed::<usize>(JOB_MAX_WORKERS)? {
            builder = builder.max_workers(workers);
        }
        if let Some(level) = env.optional(LOG_LEVEL) {
            builder = builder.log_level(level);
        }
        if let Some(block) = env.parsed::<u64>(START_BLOCK_EPOCH)? {
            builder = builder.epoch_start(block);
        }
        if let Some(blocks) = env.parsed::<u64>(MAX_WINDOW_BLOCKS)? {
            builder = builder.max_window_blocks(blocks);
        }
        if let Some(command) = env.optional(EXTRACT_COMMAND) {
            builder =
                builder.extract_command(command.split_whitespace().map(str::to_owned).collect());
        }
        if let Some(dir) = env.optional(EXTRACT_OUTPUT_DIR) {
            builder = builder.extract_output_dir(dir);
        }
        if let Some(secs) = env.parsed::<u64>(EXTRACT_TIMEOUT_SECS)? {
            builder = builder.extract_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = env.parsed::<u64>(LOAD_TIMEOUT_SECS)? {
            builder = builder.load_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = env.parsed::<u64>(RPC_TIMEOUT_SECS)? {
            builder = builder.rpc_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = env.parsed::<u64>(DB_ACQUIRE_TIMEOUT_SECS)? {
            builder = builder.db_acquire_timeout(Duration::from_secs(secs));
        }
        if let Some(addr) = env.parsed::<SocketAddr>(STATUS_ADDR)? {
            builder = builder.status_addr(addr);
        }
        if let Some(secs) = env.parsed::<u64>(METRICS_INTERVAL_SECS)? {
            builder = builder.metrics_interval(Duration::from_secs(secs));
        }
        if let Some(url) = env.optional(BIGQUERY_API_URL) {
            builder = builder.bigquery_api_url(url);
        }
        if let Some(token) = env.optional(BIGQUERY_ACCESS_TOKEN) {
            builder = builder.bigquery_access_token(token);
        }
        if let Some(millis) = env.parsed::<u64>(BIGQUERY_POLL_INTERVAL_MS)? {
            builder = builder.bigquery_poll_interval(Duration::from_millis(millis));
        }

        Ok(builder.build()?)
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.optional(name).ok_or(ConfigError::Missing { name })
    }

    fn parsed<T>(&self, name: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.optional(name)
            .map(|raw| {
                raw.parse::<T>().map_err(|err| ConfigError::Invalid {
                    name,
                    reason: format!("{raw:?}: {err}"),
                })
            })
            .transpose()
    }

    fn required_parsed<T>(&self, name: &'static str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.parsed(name)?.ok_or(ConfigError::Missing { name })
    }
}
