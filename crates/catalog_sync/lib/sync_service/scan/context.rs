use std::sync::atomic::{AtomicU64, Ordering};

use catalog_core::ScanPhase;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::sync_service::events::{CatalogEvent, EventSink, PhaseCounts};
use crate::sync_service::types::{RequestHeaders, SyncConfig};

/// Items between two `ScanProgress` snapshots of one phase.
pub const PROGRESS_INTERVAL: u64 = 500;

/// Concurrent category fetches per phase when a category filter is set.
pub const MAX_CATEGORY_CONCURRENCY: usize = 4;

/// One counter per phase, shared by all phase tasks of a run.
#[derive(Debug, Default)]
pub struct PhaseCounters([AtomicU64; 4]);

impl PhaseCounters {
    /// Returns the counter value after the increment.
    pub fn increment(&self, phase: ScanPhase) -> u64 {
        self.0[phase.index()].fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get(&self, phase: ScanPhase) -> u64 {
        self.0[phase.index()].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> PhaseCounts {
        PhaseCounts::from_slots(std::array::from_fn(|slot| {
            self.0[slot].load(Ordering::Relaxed)
        }))
    }
}

/// Per-run state handed to every phase handler. Dropped at run end.
pub struct ScanContext {
    pub config: SyncConfig,
    pub source_key: String,
    pub sink: EventSink,
    pub counters: PhaseCounters,
    progress_lock: Mutex<()>,
    pub request_headers: RequestHeaders,
    pub cancel: CancellationToken,
}

impl ScanContext {
    pub fn new(
        config: SyncConfig,
        source_key: impl Into<String>,
        sink: EventSink,
        request_headers: RequestHeaders,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            source_key: source_key.into(),
            sink,
            counters: PhaseCounters::default(),
            progress_lock: Mutex::new(()),
            request_headers,
            cancel,
        }
    }

    /// Sends a combined counter snapshot.
    ///
    /// Snapshot and send happen under one lock so concurrently emitted snapshots reach the sink
    /// in non-decreasing order. Returns `false` once the sink is closed.
    pub(crate) async fn emit_progress(&self, current_phase: ScanPhase) -> bool {
        let _guard = self.progress_lock.lock().await;
        let counts = self.counters.snapshot();
        self.sink
            .send_async(CatalogEvent::ScanProgress {
                counts,
                current_phase,
            })
            .await
            .is_ok()
    }
}
