use std::sync::Arc;

use catalog_core::{ContentCategory, ScanPhase};
use tokio_util::sync::CancellationToken;

use super::{CatalogScanner, PhaseStatus, ScanContext, PROGRESS_INTERVAL};
use crate::sync_service::events::{event_channel, CatalogEvent, EventReceiver};
use crate::sync_service::test_support::{records, ScriptedSource, TestRecord};
use crate::sync_service::types::{FetchError, FetchErrorKind, RequestHeaders, SyncConfig};

fn context(
    config: SyncConfig,
    capacity: usize,
) -> (Arc<ScanContext>, EventReceiver, CancellationToken) {
    let (sink, receiver) = event_channel(capacity);
    let cancel = CancellationToken::new();
    let ctx = Arc::new(ScanContext::new(
        config,
        "test",
        sink,
        RequestHeaders::new(),
        cancel.clone(),
    ));
    (ctx, receiver, cancel)
}

fn discovered_in(events: &[CatalogEvent], phase: ScanPhase) -> usize {
    events
        .iter()
        .filter(|event| {
            matches!(event, CatalogEvent::ItemDiscovered { phase: p, .. } if *p == phase)
        })
        .count()
}

#[tokio::test]
async fn every_phase_reports_what_it_discovered() {
    let source = ScriptedSource::new("test")
        .script(
            ScanPhase::Live,
            None,
            vec![Ok(records(ScanPhase::Live, 0..3)), Ok(records(ScanPhase::Live, 3..5))],
        )
        .script(ScanPhase::Movies, None, vec![Ok(records(ScanPhase::Movies, 0..4))])
        .script(ScanPhase::Episodes, None, vec![]);
    let (ctx, receiver, _cancel) = context(
        SyncConfig::for_phases([ScanPhase::Episodes, ScanPhase::Live, ScanPhase::Movies]),
        256,
    );

    let outcomes = CatalogScanner::new(Arc::new(source))
        .scan(Arc::clone(&ctx))
        .await
        .expect("scan");
    let events: Vec<_> = receiver.try_iter().collect();

    let phases: Vec<_> = outcomes.iter().map(|outcome| outcome.phase).collect();
    assert_eq!(phases, vec![ScanPhase::Live, ScanPhase::Movies, ScanPhase::Episodes]);
    assert!(outcomes
        .iter()
        .all(|outcome| outcome.status == PhaseStatus::Completed));

    assert_eq!(discovered_in(&events, ScanPhase::Live), 5);
    assert_eq!(discovered_in(&events, ScanPhase::Movies), 4);
    assert_eq!(discovered_in(&events, ScanPhase::Episodes), 0);

    for outcome in &outcomes {
        let completed = events.iter().find_map(|event| match event {
            CatalogEvent::PhaseComplete { phase, count, .. } if *phase == outcome.phase => {
                Some(*count)
            }
            _ => None,
        });
        assert_eq!(completed, Some(outcome.discovered), "{}", outcome.phase);
    }

    // The completion event is the last event of its phase.
    let live_events: Vec<_> = events
        .iter()
        .filter(|event| event.phase() == ScanPhase::Live)
        .collect();
    assert!(matches!(
        live_events.last(),
        Some(CatalogEvent::PhaseComplete { count: 5, .. })
    ));
}

#[tokio::test]
async fn progress_snapshots_are_periodic_and_monotonic() {
    let batches = (0..6)
        .map(|chunk| Ok(records(ScanPhase::Movies, chunk * 200..(chunk + 1) * 200)))
        .collect();
    let source = ScriptedSource::new("test").script(ScanPhase::Movies, None, batches);
    let (ctx, receiver, _cancel) = context(SyncConfig::for_phases([ScanPhase::Movies]), 4096);

    CatalogScanner::new(Arc::new(source))
        .scan(Arc::clone(&ctx))
        .await
        .expect("scan");

    let snapshots: Vec<u64> = receiver
        .try_iter()
        .filter_map(|event| match event {
            CatalogEvent::ScanProgress { counts, .. } => Some(counts.get(ScanPhase::Movies)),
            _ => None,
        })
        .collect();
    assert_eq!(snapshots, vec![PROGRESS_INTERVAL, 2 * PROGRESS_INTERVAL]);
}

#[tokio::test]
async fn category_filter_fans_out_one_fetch_per_category() {
    let mut config = SyncConfig::for_phases([ScanPhase::Movies]);
    config.category_filters.insert(
        ScanPhase::Movies,
        vec!["1".to_string(), "2".to_string(), "3".to_string()],
    );
    let source = Arc::new(
        ScriptedSource::new("test")
            .script(ScanPhase::Movies, Some("1"), vec![Ok(records(ScanPhase::Movies, 0..2))])
            .script(ScanPhase::Movies, Some("2"), vec![Ok(records(ScanPhase::Movies, 2..5))])
            .script(ScanPhase::Movies, Some("3"), vec![]),
    );
    let (ctx, receiver, _cancel) = context(config, 256);

    let outcomes = CatalogScanner::new(Arc::clone(&source))
        .scan(Arc::clone(&ctx))
        .await
        .expect("scan");

    assert_eq!(outcomes[0].status, PhaseStatus::Completed);
    assert_eq!(outcomes[0].discovered, 5);
    let mut categories: Vec<_> = source
        .requests()
        .into_iter()
        .filter_map(|(_, category)| category)
        .collect();
    categories.sort();
    assert_eq!(categories, vec!["1", "2", "3"]);
    let events: Vec<_> = receiver.try_iter().collect();
    assert_eq!(discovered_in(&events, ScanPhase::Movies), 5);
}

#[tokio::test]
async fn provider_error_fails_only_its_phase() {
    let source = ScriptedSource::new("test")
        .script(
            ScanPhase::Live,
            None,
            vec![
                Ok(records(ScanPhase::Live, 0..2)),
                Err(FetchError::new(FetchErrorKind::Unauthorized, "expired")),
                Ok(records(ScanPhase::Live, 2..4)),
            ],
        )
        .script(ScanPhase::Movies, None, vec![Ok(records(ScanPhase::Movies, 0..3))]);
    let (ctx, receiver, _cancel) = context(
        SyncConfig::for_phases([ScanPhase::Live, ScanPhase::Movies]),
        256,
    );

    let outcomes = CatalogScanner::new(Arc::new(source))
        .scan(Arc::clone(&ctx))
        .await
        .expect("scan");
    let events: Vec<_> = receiver.try_iter().collect();

    let live = &outcomes[0];
    assert_eq!(live.status, PhaseStatus::Failed);
    assert_eq!(live.discovered, 2);
    assert_eq!(
        live.error.as_ref().map(|err| err.kind),
        Some(FetchErrorKind::Unauthorized)
    );
    assert_eq!(outcomes[1].status, PhaseStatus::Completed);
    assert_eq!(outcomes[1].discovered, 3);

    assert_eq!(discovered_in(&events, ScanPhase::Live), 2);
    assert!(events.iter().any(|event| matches!(
        event,
        CatalogEvent::Error { phase: ScanPhase::Live, message } if message.contains("expired")
    )));
    assert!(!events.iter().any(|event| matches!(
        event,
        CatalogEvent::PhaseComplete { phase: ScanPhase::Live, .. }
    )));
}

#[tokio::test]
async fn cancellation_stops_the_phase_without_a_completion_event() {
    let source = ScriptedSource::new("test")
        .script(ScanPhase::Series, None, vec![Ok(records(ScanPhase::Series, 0..3))])
        .hang_after(ScanPhase::Series);
    let (ctx, receiver, cancel) = context(SyncConfig::for_phases([ScanPhase::Series]), 256);

    let scanner = CatalogScanner::new(Arc::new(source));
    let scan_ctx = Arc::clone(&ctx);
    let scan = tokio::spawn(async move { scanner.scan(scan_ctx).await });

    for _ in 0..3 {
        let event = receiver.recv_async().await.expect("item event");
        assert!(matches!(event, CatalogEvent::ItemDiscovered { .. }));
    }
    cancel.cancel();

    let outcomes = scan.await.expect("join").expect("scan");
    assert_eq!(outcomes[0].status, PhaseStatus::Cancelled);
    assert_eq!(outcomes[0].discovered, 3);
    assert!(receiver.try_iter().next().is_none());
}

#[tokio::test]
async fn unmappable_records_are_skipped() {
    let mut batch = records(ScanPhase::Movies, 0..2);
    batch.insert(1, TestRecord::untitled(ContentCategory::Movie, "broken"));
    let source = ScriptedSource::new("test").script(ScanPhase::Movies, None, vec![Ok(batch)]);
    let (ctx, receiver, _cancel) = context(SyncConfig::for_phases([ScanPhase::Movies]), 64);

    let outcomes = CatalogScanner::new(Arc::new(source))
        .scan(Arc::clone(&ctx))
        .await
        .expect("scan");

    assert_eq!(outcomes[0].status, PhaseStatus::Completed);
    assert_eq!(outcomes[0].discovered, 2);
    assert_eq!(outcomes[0].mapping_failures, 1);
    let events: Vec<_> = receiver.try_iter().collect();
    assert_eq!(discovered_in(&events, ScanPhase::Movies), 2);
}

#[tokio::test]
async fn closed_sink_ends_phases_as_cancelled() {
    let source = ScriptedSource::new("test")
        .script(ScanPhase::Live, None, vec![Ok(records(ScanPhase::Live, 0..3))]);
    let (ctx, receiver, _cancel) = context(SyncConfig::for_phases([ScanPhase::Live]), 1);
    drop(receiver);

    let outcomes = CatalogScanner::new(Arc::new(source))
        .scan(ctx)
        .await
        .expect("scan");
    assert_eq!(outcomes[0].status, PhaseStatus::Cancelled);
    assert_eq!(outcomes[0].discovered, 0);
}

#[test]
fn unsupported_phases_are_dropped_in_scan_order() {
    let scanner = CatalogScanner::new(Arc::new(
        ScriptedSource::new("chat").with_phases(&[ScanPhase::Movies, ScanPhase::Episodes]),
    ));
    assert_eq!(
        scanner.phases_for(&[ScanPhase::Episodes, ScanPhase::Live, ScanPhase::Movies]),
        vec![ScanPhase::Movies, ScanPhase::Episodes]
    );
}
