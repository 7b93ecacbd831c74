use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::support::fakes::{FlakyCursorRepository, Harness};
use crate::support::helpers::{base_config, init_tracing, wait_until};
use anyhow::Result;
use ledger_mirror::{
    CursorStore, DatasetKind, HealthReporter, MemoryCursorRepository, Runner, StatusServer,
    Telemetry,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn status_surface_reports_committed_cursor() -> Result<()> {
    init_tracing();
    let harness = Harness::at_block(50, 100);
    harness.loader.set_rows(DatasetKind::Listings, 7);
    harness.loader.set_rows(DatasetKind::Products, 3);
    let config = base_config()
        .run_interval(Duration::from_millis(50))
        .build()?;

    let mut runner = Runner::new(config, harness.services());
    runner.start().await?;
    let addr = runner.status_addr().expect("status server bound");

    wait_until("first commit", WAIT, || harness.cursor.start_block() == Some(97)).await?;

    let body = reqwest::get(format!("http://{addr}/")).await?.text().await?;
    assert_eq!(body, "Cursor: 97");

    let status: Value = reqwest::get(format!("http://{addr}/status"))
        .await?
        .json()
        .await?;
    assert_eq!(status["start_block"], 97);
    assert_eq!(status["cursor"], 96);
    assert_eq!(status["last_tip"], 100);
    assert_eq!(status["committed_ticks"], 1);
    assert_eq!(status["rows_loaded"]["listings"], 7);
    assert_eq!(status["rows_loaded"]["products"], 3);
    assert_eq!(status["errors"], 0);
    assert!(status["last_error"].is_null());

    runner.stop().await?;
    assert!(!runner.is_running());
    Ok(())
}

#[tokio::test]
async fn failed_tick_is_visible_and_loop_continues() -> Result<()> {
    init_tracing();
    let harness = Harness::at_block(50, 100);
    harness.tip.fail_next();
    let config = base_config()
        .run_interval(Duration::from_millis(50))
        .build()?;

    let mut runner = Runner::new(config, harness.services());
    runner.start().await?;

    wait_until("commit after failed tick", WAIT, || {
        harness.cursor.start_block() == Some(97)
    })
    .await?;

    let snapshot = runner.health().snapshot();
    assert_eq!(snapshot.errors, 1);
    let last_error = snapshot.last_error.expect("last error recorded");
    assert_eq!(last_error.kind, "chain_read");
    assert!(last_error.message.contains("connection refused"), "{}", last_error.message);

    runner.stop().await?;
    Ok(())
}

#[tokio::test]
async fn unavailable_store_at_startup_is_retried() -> Result<()> {
    init_tracing();
    let repository = FlakyCursorRepository::with_block(50);
    repository.fail_loads(2);
    let harness = Harness::new(repository, 1, 100);
    let config = base_config()
        .run_interval(Duration::from_millis(50))
        .build()?;

    let mut runner = Runner::new(config, harness.services());
    runner.start().await?;

    wait_until("cursor loaded and committed", WAIT, || {
        harness.repository.persisted() == Some(96)
    })
    .await?;
    assert!(runner.health().snapshot().errors >= 1);

    runner.stop().await?;
    Ok(())
}

#[tokio::test]
async fn stop_interrupts_the_interval_sleep() -> Result<()> {
    init_tracing();
    let harness = Harness::at_block(50, 100);
    let config = base_config()
        .run_interval(Duration::from_secs(3600))
        .build()?;

    let mut runner = Runner::new(config, harness.services());
    runner.start().await?;
    wait_until("first commit", WAIT, || harness.cursor.start_block() == Some(97)).await?;

    let started = Instant::now();
    runner.stop().await?;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(harness.tip.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn stop_waits_for_in_flight_tick() -> Result<()> {
    init_tracing();
    let harness = Harness::at_block(50, 100);
    let pause = harness.extractor.pause();
    pause.arm();
    let config = base_config()
        .run_interval(Duration::from_millis(50))
        .build()?;

    let mut runner = Runner::new(config, harness.services());
    runner.start().await?;
    pause.wait_until_paused(WAIT).await?;

    let stopping = tokio::spawn(async move {
        let result = runner.stop().await;
        (runner, result)
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!stopping.is_finished());

    pause.release();
    let (runner, result) = stopping.await?;
    result?;

    assert!(!runner.is_running());
    assert_eq!(harness.cursor.start_block(), Some(97));
    assert_eq!(harness.repository.persisted(), Some(96));
    assert_eq!(
        harness.loader.loaded_kinds(),
        vec![DatasetKind::Listings, DatasetKind::Products]
    );
    Ok(())
}

#[tokio::test]
async fn unloaded_cursor_is_reported_as_such() -> Result<()> {
    init_tracing();
    let cursor = Arc::new(CursorStore::new(Arc::new(MemoryCursorRepository::new()), 10));
    let reporter = HealthReporter::new(Arc::new(Telemetry::default()), cursor);
    let server = StatusServer::bind("127.0.0.1:0".parse()?, reporter).await?;
    let addr = server.local_addr()?;
    let shutdown = CancellationToken::new();
    let serving = tokio::spawn(server.serve(shutdown.clone()));

    let body = reqwest::get(format!("http://{addr}/")).await?.text().await?;
    assert_eq!(body, "Cursor: not loaded");

    let status: Value = reqwest::get(format!("http://{addr}/status"))
        .await?
        .json()
        .await?;
    assert!(status["start_block"].is_null());
    assert_eq!(status["phase"], "idle");

    shutdown.cancel();
    serving.await??;
    Ok(())
}
