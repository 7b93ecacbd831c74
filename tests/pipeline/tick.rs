use std::time::Duration;

use crate::support::fakes::{default_policy, FakeExtractor, FlakyCursorRepository, Harness};
use crate::support::helpers::{init_tracing, listings_table, products_table};
use futures::future::BoxFuture;
use ledger_mirror::{
    BlockRange, CursorStoreError, DatasetKind, ExtractionDelegate, ExtractionError,
    ExtractionOutput, ExtractionRequest, LoadTarget, TickError, TickOutcome, TickPhase,
};

fn committed(outcome: &TickOutcome) -> (BlockRange, u64, u64) {
    match outcome {
        TickOutcome::Committed { range, rows } => (*range, rows.listings, rows.products),
        other => panic!("expected a committed tick, got {other:?}"),
    }
}

#[tokio::test]
async fn first_run_starts_at_epoch() {
    init_tracing();
    let harness = Harness::new(FlakyCursorRepository::default(), 10_014_455, 10_014_460);

    let outcome = harness.orchestrator.run_tick().await;

    let (range, _, _) = committed(&outcome);
    assert_eq!(range.start(), 10_014_455);
    assert_eq!(range.end(), 10_014_456);
    assert_eq!(harness.repository.persisted(), Some(10_014_456));
    assert_eq!(harness.cursor.start_block(), Some(10_014_457));
}

#[tokio::test]
async fn first_run_with_empty_window_creates_cursor_below_epoch() {
    init_tracing();
    let harness = Harness::new(FlakyCursorRepository::default(), 500, 100);

    let outcome = harness.orchestrator.run_tick().await;

    assert!(matches!(
        outcome,
        TickOutcome::Idle {
            tip: 100,
            start_block: 500
        }
    ));
    assert_eq!(harness.repository.persisted(), Some(499));
    assert_eq!(harness.cursor.start_block(), Some(500));
}

#[tokio::test]
async fn confirmed_window_is_extracted_loaded_and_committed() {
    init_tracing();
    let harness = Harness::at_block(50, 100);
    harness.loader.set_rows(DatasetKind::Listings, 7);
    harness.loader.set_rows(DatasetKind::Products, 3);

    let outcome = harness.orchestrator.run_tick().await;

    let (range, listings, products) = committed(&outcome);
    assert_eq!(range, BlockRange::new(51, 96).unwrap());
    assert_eq!((listings, products), (7, 3));
    assert_eq!(harness.repository.persisted(), Some(96));
    assert_eq!(harness.cursor.start_block(), Some(97));

    let requests = harness.extractor.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].range, range);
    assert_eq!(requests[0].batch_size, 100);
    assert_eq!(requests[0].max_workers, 5);

    let calls = harness.loader.calls();
    assert_eq!(
        harness.loader.loaded_kinds(),
        [DatasetKind::Listings, DatasetKind::Products]
    );
    assert_eq!(calls[0].table, listings_table());
    assert_eq!(calls[1].table, products_table());
    assert_eq!(calls[1].path, FakeExtractor::artifact_path(DatasetKind::Products));

    assert_eq!(harness.telemetry.rows(DatasetKind::Listings), 7);
    assert_eq!(harness.telemetry.rows(DatasetKind::Products), 3);
    assert_eq!(harness.telemetry.errors(), 0);
    assert_eq!(harness.telemetry.phase(), TickPhase::Idle);
}

#[tokio::test]
async fn unconfirmed_tip_is_a_no_op() {
    init_tracing();
    let harness = Harness::at_block(50, 53);
    harness.cursor.load().await.unwrap();

    let outcome = harness.orchestrator.run_tick().await;

    assert!(matches!(outcome, TickOutcome::Idle { tip: 53, start_block: 51 }));
    assert!(harness.extractor.requests().is_empty());
    assert!(harness.loader.calls().is_empty());
    assert_eq!(harness.repository.saves(), 0);
    assert_eq!(harness.repository.persisted(), Some(50));
    assert_eq!(harness.telemetry.errors(), 0);
    assert_eq!(harness.telemetry.rows(DatasetKind::Listings), 0);
    assert_eq!(harness.telemetry.runs(), 1);
}

#[tokio::test]
async fn tip_failure_stops_before_extraction() {
    init_tracing();
    let harness = Harness::at_block(50, 100);
    harness.tip.fail_next();

    let outcome = harness.orchestrator.run_tick().await;

    assert!(matches!(outcome.error(), Some(TickError::ChainRead(_))));
    assert!(harness.extractor.requests().is_empty());
    assert_eq!(harness.repository.persisted(), Some(50));
    assert_eq!(harness.telemetry.errors(), 1);
    assert_eq!(harness.telemetry.last_error().unwrap().kind, "chain_read");
}

#[tokio::test]
async fn extraction_failure_skips_loads_and_keeps_cursor() {
    init_tracing();
    let harness = Harness::at_block(50, 100);
    harness.extractor.fail_next(1);

    let outcome = harness.orchestrator.run_tick().await;

    assert!(matches!(
        outcome.error(),
        Some(TickError::Extraction(ExtractionError::Failed { .. }))
    ));
    assert!(harness.loader.calls().is_empty());
    assert_eq!(harness.repository.saves(), 0);
    assert_eq!(harness.cursor.start_block(), Some(51));
    assert_eq!(harness.telemetry.errors(), 1);
    let last = harness.telemetry.last_error().unwrap();
    assert!(last.message.contains("ipfs gateway unreachable"), "{}", last.message);
}

#[tokio::test]
async fn first_load_failure_never_attempts_second() {
    init_tracing();
    let harness = Harness::at_block(50, 100);
    harness.loader.fail(DatasetKind::Listings);

    let outcome = harness.orchestrator.run_tick().await;

    match outcome.error() {
        Some(TickError::Load { dataset, .. }) => assert_eq!(*dataset, DatasetKind::Listings),
        other => panic!("expected listings load failure, got {other:?}"),
    }
    assert_eq!(harness.loader.loaded_kinds(), [DatasetKind::Listings]);
    assert_eq!(harness.repository.persisted(), Some(50));
    assert_eq!(harness.telemetry.errors(), 1);
}

#[tokio::test]
async fn second_load_failure_keeps_cursor_but_counts_first_rows() {
    init_tracing();
    let harness = Harness::at_block(50, 100);
    harness.loader.set_rows(DatasetKind::Listings, 4);
    harness.loader.fail(DatasetKind::Products);

    let outcome = harness.orchestrator.run_tick().await;

    assert!(matches!(
        outcome.error(),
        Some(TickError::Load {
            dataset: DatasetKind::Products,
            ..
        })
    ));
    assert_eq!(harness.repository.persisted(), Some(50));
    assert_eq!(harness.cursor.start_block(), Some(51));
    assert_eq!(harness.telemetry.rows(DatasetKind::Listings), 4);
    let last = harness.telemetry.last_error().unwrap();
    assert!(last.message.starts_with("products load failed"), "{}", last.message);
    assert!(last.message.contains("price: expected INTEGER"), "{}", last.message);
}

#[tokio::test]
async fn failed_window_is_retried_verbatim() {
    init_tracing();
    let harness = Harness::at_block(50, 100);
    harness.loader.fail(DatasetKind::Products);
    harness.orchestrator.run_tick().await;

    harness.loader.recover(DatasetKind::Products);
    let outcome = harness.orchestrator.run_tick().await;

    let (range, _, _) = committed(&outcome);
    let requests = harness.extractor.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].range, requests[1].range);
    assert_eq!(range, BlockRange::new(51, 96).unwrap());
    // The listings dataset of the failed tick was appended once already.
    assert_eq!(
        harness.loader.loaded_kinds(),
        [
            DatasetKind::Listings,
            DatasetKind::Products,
            DatasetKind::Listings,
            DatasetKind::Products
        ]
    );
}

#[tokio::test]
async fn missing_products_artifact_loads_zero_rows() {
    init_tracing();
    let harness = Harness::at_block(50, 100);
    harness.loader.set_rows(DatasetKind::Listings, 2);
    harness.extractor.produce_only(&[DatasetKind::Listings]);

    let outcome = harness.orchestrator.run_tick().await;

    let (_, listings, products) = committed(&outcome);
    assert_eq!((listings, products), (2, 0));
    assert_eq!(harness.loader.loaded_kinds(), [DatasetKind::Listings]);
    assert_eq!(harness.repository.persisted(), Some(96));
}

#[tokio::test]
async fn commit_failure_keeps_start_block_for_retry() {
    init_tracing();
    let harness = Harness::at_block(50, 100);
    harness.repository.fail_saves(1);

    let outcome = harness.orchestrator.run_tick().await;
    assert!(matches!(
        outcome.error(),
        Some(TickError::CursorStore(CursorStoreError::Database(_)))
    ));
    assert_eq!(harness.cursor.start_block(), Some(51));
    assert_eq!(harness.repository.persisted(), Some(50));

    let outcome = harness.orchestrator.run_tick().await;
    let (range, _, _) = committed(&outcome);
    assert_eq!(range.start(), 51);
    assert_eq!(harness.cursor.start_block(), Some(97));
}

#[tokio::test]
async fn cursor_load_is_retried_each_tick() {
    init_tracing();
    let repository = FlakyCursorRepository::with_block(50);
    repository.fail_loads(2);
    let harness = Harness::new(repository, 1, 100);

    for _ in 0..2 {
        let outcome = harness.orchestrator.run_tick().await;
        assert_eq!(outcome.error().map(TickError::kind), Some("cursor_store"));
        assert_eq!(harness.tip.calls(), 0);
    }

    let outcome = harness.orchestrator.run_tick().await;
    assert!(outcome.is_committed());
    assert_eq!(harness.telemetry.errors(), 2);
    assert_eq!(harness.telemetry.runs(), 3);
}

#[tokio::test]
async fn cursor_never_moves_backwards() {
    init_tracing();
    let harness = Harness::at_block(50, 100);
    let mut observed = Vec::new();

    for (tip, fail_extract) in [(100, false), (98, false), (120, true), (120, false), (60, false)] {
        harness.tip.set_tip(tip);
        if fail_extract {
            harness.extractor.fail_next(1);
        }
        harness.orchestrator.run_tick().await;
        observed.push(harness.repository.persisted().unwrap());
    }

    assert_eq!(observed, [96, 96, 96, 116, 116]);
    assert!(observed.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[tokio::test]
async fn window_cap_commits_a_prefix() {
    init_tracing();
    let mut policy = default_policy();
    policy.max_window_blocks = Some(10);
    let harness = Harness::with_policy(FlakyCursorRepository::with_block(50), 1, 100, policy);

    let (first, _, _) = committed(&harness.orchestrator.run_tick().await);
    let (second, _, _) = committed(&harness.orchestrator.run_tick().await);

    assert_eq!(first, BlockRange::new(51, 60).unwrap());
    assert_eq!(second, BlockRange::new(61, 70).unwrap());
    assert_eq!(harness.repository.persisted(), Some(70));
}

#[tokio::test]
async fn load_plan_order_is_followed() {
    init_tracing();
    let mut policy = default_policy();
    policy.load_plan = vec![
        LoadTarget::new(DatasetKind::Products, products_table()),
        LoadTarget::new(DatasetKind::Listings, listings_table()),
    ];
    let harness = Harness::with_policy(FlakyCursorRepository::with_block(50), 1, 100, policy);
    harness.loader.fail(DatasetKind::Products);

    harness.orchestrator.run_tick().await;

    assert_eq!(harness.loader.loaded_kinds(), [DatasetKind::Products]);
}

struct StalledExtractor;

impl ExtractionDelegate for StalledExtractor {
    fn extract<'a>(
        &'a self,
        _request: &'a ExtractionRequest,
    ) -> BoxFuture<'a, Result<ExtractionOutput, ExtractionError>> {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ExtractionOutput::default())
        })
    }
}

#[tokio::test]
async fn stalled_extraction_times_out_as_extraction_error() {
    init_tracing();
    let mut policy = default_policy();
    policy.extract_timeout = Duration::from_millis(50);
    let harness =
        Harness::with_policy(FlakyCursorRepository::with_block(50), 1, 100, policy.clone());

    let mut services = harness.services();
    services.extractor = std::sync::Arc::new(StalledExtractor);
    let orchestrator =
        ledger_mirror::TickOrchestrator::new(services, policy, harness.telemetry.clone());

    let outcome = orchestrator.run_tick().await;

    assert!(matches!(
        outcome.error(),
        Some(TickError::Extraction(ExtractionError::Timeout { .. }))
    ));
    assert_eq!(harness.repository.persisted(), Some(50));
}
