use std::time::Duration;

use crate::support::helpers::init_tracing;
use crate::support::mock_rpc::{MockLedger, MockRpcServer};
use anyhow::Result;
use ledger_mirror::{ChainReadError, EthRpcClient, RpcClientOptions, TipReader};

fn client(url: &str) -> Result<EthRpcClient> {
    EthRpcClient::with_options(
        url,
        RpcClientOptions {
            request_timeout: Duration::from_secs(2),
            ..RpcClientOptions::default()
        },
    )
}

#[tokio::test]
async fn reads_hex_block_number() -> Result<()> {
    init_tracing();
    let ledger = MockLedger::new(10_014_487);
    let server = MockRpcServer::start(ledger.clone()).await?;
    let client = client(server.url())?;

    assert_eq!(client.get_tip().await?, 10_014_487);

    ledger.set_tip(10_014_500);
    assert_eq!(client.get_tip().await?, 10_014_500);
    assert_eq!(ledger.requests(), 2);
    assert_eq!(client.metrics().total_requests, 2);
    assert_eq!(client.metrics().total_errors, 0);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn malformed_quantity_is_rejected() -> Result<()> {
    init_tracing();
    let ledger = MockLedger::new(1);
    ledger.return_malformed(true);
    let server = MockRpcServer::start(ledger.clone()).await?;
    let client = client(server.url())?;

    let err = client.get_tip().await.unwrap_err();
    match err {
        ChainReadError::Malformed { value, .. } => assert_eq!(value, "latest"),
        other => panic!("expected malformed error, got {other}"),
    }

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn rpc_error_is_reported_once_without_retry() -> Result<()> {
    init_tracing();
    let ledger = MockLedger::new(1);
    ledger.return_errors(true);
    let server = MockRpcServer::start(ledger.clone()).await?;
    let client = client(server.url())?;

    let err = client.get_tip().await.unwrap_err();
    assert!(matches!(err, ChainReadError::Rpc { .. }), "{err}");
    assert!(err.to_string().contains("header not found"), "{err}");
    assert_eq!(ledger.requests(), 1);

    server.shutdown().await;
    Ok(())
}
