use anyhow::{Context, Result};
use ledger_mirror::{
    init_tracing, BigQueryLoader, CommandExtractor, CursorStore, EthRpcClient,
    PostgresCursorRepository, Runner, SyncConfig, SyncServices,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let config = SyncConfig::from_env().context("invalid configuration")?;
    init_tracing(config.log_level());

    let repository =
        PostgresCursorRepository::connect(config.database_url(), config.db_acquire_timeout())
            .await?;
    repository.migrate().await?;

    let services = SyncServices {
        cursor: Arc::new(CursorStore::new(Arc::new(repository), config.epoch_start())),
        tip_reader: Arc::new(EthRpcClient::from_config(&config)?),
        extractor: Arc::new(CommandExtractor::from_config(&config)?),
        loader: Arc::new(BigQueryLoader::from_config(&config)?),
    };

    let mut runner = Runner::new(config, services);
    runner.run_until_signal().await
}
