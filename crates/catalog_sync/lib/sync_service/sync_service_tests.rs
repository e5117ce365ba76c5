use std::sync::Arc;

use catalog_core::ScanPhase;
use tokio_util::sync::CancellationToken;

use super::test_support::{records, MemoryStore, ScriptedSource};
use super::types::{
    FailureReason, FetchError, FetchErrorKind, RunStatus, StoreErrorKind, SyncConfig,
};
use super::write_policy::{DeviceClass, FixedDeviceClass};
use super::{Error, SyncService};

fn service(store: Arc<MemoryStore>) -> SyncService<Arc<MemoryStore>> {
    SyncService::new(store, Arc::new(FixedDeviceClass(DeviceClass::Normal)), "run-1")
        .with_event_capacity(8)
}

fn full_catalog() -> ScriptedSource {
    ScriptedSource::new("xtream")
        .script(ScanPhase::Live, None, vec![Ok(records(ScanPhase::Live, 0..40))])
        .script(
            ScanPhase::Movies,
            None,
            vec![
                Ok(records(ScanPhase::Movies, 0..30)),
                Ok(records(ScanPhase::Movies, 30..45)),
            ],
        )
        .script(ScanPhase::Series, None, vec![Ok(records(ScanPhase::Series, 0..10))])
        .script(ScanPhase::Episodes, None, vec![Ok(records(ScanPhase::Episodes, 0..25))])
}

#[tokio::test]
async fn clean_run_writes_everything_it_discovers() {
    let store = Arc::new(MemoryStore::default());

    let report = service(Arc::clone(&store))
        .run_source(Arc::new(full_catalog()), SyncConfig::default(), CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.discovered.total(), 120);
    assert_eq!(report.discovered.get(ScanPhase::Movies), 45);
    assert_eq!(report.written, 120);
    assert_eq!(report.failed_writes, 0);
    assert_eq!(store.item_count(), 120);
}

#[tokio::test]
async fn repeated_run_does_not_duplicate_items() {
    let store = Arc::new(MemoryStore::default());
    let service = service(Arc::clone(&store));

    for _ in 0..2 {
        let report = service
            .run_source(Arc::new(full_catalog()), SyncConfig::default(), CancellationToken::new())
            .await
            .expect("run");
        assert_eq!(report.status, RunStatus::Succeeded);
    }

    assert_eq!(store.upsert_calls(), 240);
    assert_eq!(store.item_count(), 120);
}

#[tokio::test]
async fn rejected_write_makes_the_run_partial() {
    let store = Arc::new(MemoryStore::rejecting(["movies-7".to_string()]));

    let report = service(Arc::clone(&store))
        .run_source(Arc::new(full_catalog()), SyncConfig::default(), CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(report.status, RunStatus::PartialSuccess);
    assert_eq!(report.written, 119);
    assert_eq!(report.failed_writes, 1);
    assert_eq!(report.write_failures.len(), 1);
    assert_eq!(report.write_failures[0].provider_id, "movies-7");
    assert_eq!(store.failures().len(), 1);
}

#[tokio::test]
async fn every_discovered_item_gets_exactly_one_write_attempt_per_phase() {
    let source = ScriptedSource::new("xtream")
        .script(ScanPhase::Live, None, vec![Ok(records(ScanPhase::Live, 0..40))])
        .script(
            ScanPhase::Movies,
            None,
            vec![
                Ok(records(ScanPhase::Movies, 0..30)),
                Err(FetchError::new(FetchErrorKind::Network, "reset")),
            ],
        )
        .script(ScanPhase::Series, None, vec![Ok(records(ScanPhase::Series, 0..10))])
        .script(ScanPhase::Episodes, None, vec![Ok(records(ScanPhase::Episodes, 0..25))]);
    let store = Arc::new(MemoryStore::rejecting(["series-4".to_string()]));

    let report = service(Arc::clone(&store))
        .run_source(Arc::new(source), SyncConfig::default(), CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(report.status, RunStatus::PartialSuccess);
    for phase in ScanPhase::ALL {
        let writes = report.write_totals(phase);
        assert_eq!(
            report.discovered.get(phase),
            writes.attempted,
            "{phase:?}: discovered vs attempted"
        );
        assert_eq!(writes.attempted, writes.succeeded + writes.failed);
    }
    assert_eq!(report.write_totals(ScanPhase::Movies).attempted, 30);
    assert_eq!(report.write_totals(ScanPhase::Series).failed, 1);
    assert_eq!(report.failed_writes, 1);
    assert_eq!(store.item_count(), 104);
}

#[tokio::test]
async fn provider_error_with_nothing_written_fails_the_run() {
    let source = ScriptedSource::new("xtream").script(
        ScanPhase::Live,
        None,
        vec![Err(FetchError::new(FetchErrorKind::Unauthorized, "bad credentials"))],
    );
    let store = Arc::new(MemoryStore::default());

    let report = service(Arc::clone(&store))
        .run_source(
            Arc::new(source),
            SyncConfig::for_phases([ScanPhase::Live]),
            CancellationToken::new(),
        )
        .await
        .expect("run");

    assert_eq!(report.status, RunStatus::Failed(FailureReason::Unauthenticated));
    assert_eq!(
        report.first_failure_reason(),
        Some(FailureReason::Unauthenticated)
    );
    assert_eq!(store.item_count(), 0);
}

#[tokio::test]
async fn provider_error_next_to_written_items_is_partial() {
    let source = ScriptedSource::new("xtream")
        .script(
            ScanPhase::Live,
            None,
            vec![
                Ok(records(ScanPhase::Live, 0..5)),
                Err(FetchError::new(FetchErrorKind::Network, "reset")),
            ],
        )
        .script(ScanPhase::Movies, None, vec![Ok(records(ScanPhase::Movies, 0..5))]);
    let store = Arc::new(MemoryStore::default());

    let report = service(Arc::clone(&store))
        .run_source(
            Arc::new(source),
            SyncConfig::for_phases([ScanPhase::Live, ScanPhase::Movies]),
            CancellationToken::new(),
        )
        .await
        .expect("run");

    assert_eq!(report.status, RunStatus::PartialSuccess);
    // Items discovered before the error are kept.
    assert_eq!(store.item_count(), 10);
    assert_eq!(report.first_failure_reason(), Some(FailureReason::Network));
}

#[tokio::test]
async fn lost_store_aborts_the_run() {
    let store = Arc::new(MemoryStore::unavailable_after(3));

    let err = service(Arc::clone(&store))
        .run_source(Arc::new(full_catalog()), SyncConfig::default(), CancellationToken::new())
        .await
        .expect_err("store loss must surface");

    assert!(matches!(
        err,
        Error::Store(ref store_err) if store_err.kind == StoreErrorKind::Unavailable
    ));
    assert_eq!(store.item_count(), 3);
}

#[tokio::test]
async fn invalid_config_is_rejected_before_scanning() {
    let source = Arc::new(full_catalog());
    let mut config = SyncConfig::default();
    config.batch_size = 0;

    let err = service(Arc::new(MemoryStore::default()))
        .run_source(Arc::clone(&source), config, CancellationToken::new())
        .await
        .expect_err("zero batch size");

    assert!(matches!(err, Error::Orchestration(_)));
    assert!(source.requests().is_empty());
}
