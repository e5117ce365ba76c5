pub mod consumer;
pub mod cursor;
mod error;
pub mod events;
pub mod retry;
pub mod scan;
pub mod sync_state;
pub mod types;
pub mod write_policy;
pub mod writer;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use catalog_core::ScanPhase;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use error::Error;
use consumer::{ConsumerReport, EventConsumer};
use events::{event_channel, PhaseCounts, DEFAULT_EVENT_CAPACITY};
use scan::{CatalogScanner, PhaseOutcome, PhaseStatus, ScanContext};
use types::{FailureReason, RequestHeaders, RunStatus, SyncConfig};
use write_policy::DeviceClassProvider;
use writer::{CatalogStore, CatalogWriter, IngestLedger, LedgerFailure, LedgerTotals};

use crate::sources::SourceAdapter;

#[cfg(test)]
mod sync_service_tests;
#[cfg(test)]
pub(crate) mod test_support;

/// Result of scanning and persisting one source.
#[derive(Debug, Clone)]
pub struct SourceRunReport {
    pub source_key: String,
    pub status: RunStatus,
    pub phases: Vec<PhaseOutcome>,
    pub discovered: PhaseCounts,
    /// Ledger totals per phase; `attempted` matches `discovered` for every phase.
    pub writes: BTreeMap<ScanPhase, LedgerTotals>,
    pub written: u64,
    pub failed_writes: u64,
    pub mapping_failures: u64,
    pub write_failures: Vec<LedgerFailure>,
    pub elapsed: Duration,
}

impl SourceRunReport {
    pub fn write_totals(&self, phase: ScanPhase) -> LedgerTotals {
        self.writes.get(&phase).copied().unwrap_or_default()
    }

    pub fn first_failure_reason(&self) -> Option<FailureReason> {
        self.phases
            .iter()
            .find_map(|phase| phase.error.as_ref())
            .map(FailureReason::from)
    }
}

/// Runs one source through scan → event channel → writer.
pub struct SyncService<St: CatalogStore + Clone + 'static> {
    store: St,
    device_class: Arc<dyn DeviceClassProvider>,
    run_id: String,
    event_capacity: usize,
    request_headers: RequestHeaders,
}

impl<St: CatalogStore + Clone + 'static> SyncService<St> {
    pub fn new(
        store: St,
        device_class: Arc<dyn DeviceClassProvider>,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            device_class,
            run_id: run_id.into(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            request_headers: RequestHeaders::new(),
        }
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn with_request_headers(mut self, headers: RequestHeaders) -> Self {
        self.request_headers = headers;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn store(&self) -> &St {
        &self.store
    }

    /// Scans every configured phase of `source` and persists what it finds.
    ///
    /// Provider errors end the affected phase only and show up in the status. The only error
    /// returned is the store becoming unavailable (or a panicked task).
    pub async fn run_source<S: SourceAdapter>(
        &self,
        source: Arc<S>,
        config: SyncConfig,
        cancel: CancellationToken,
    ) -> Result<SourceRunReport, Error> {
        config
            .validate()
            .and_then(|()| check_filters(source.as_ref(), &config))
            .map_err(|msg| Error::Orchestration(format!("invalid sync config: {msg}")))?;
        let started = Instant::now();
        let source_key = source.source_key().to_string();

        let (sink, receiver) = event_channel(self.event_capacity);
        let ledger = Arc::new(IngestLedger::default());
        let writer = CatalogWriter::new(
            self.store.clone(),
            Arc::clone(&self.device_class),
            Arc::clone(&ledger),
            self.run_id.clone(),
            source_key.clone(),
        );
        let consumer = tokio::spawn(EventConsumer::new(writer, receiver).run());

        let ctx = Arc::new(ScanContext::new(
            config,
            source_key.clone(),
            sink,
            self.request_headers.clone(),
            cancel,
        ));
        // The scanner drops the last sender when it returns, which ends the consumer.
        let scanned = CatalogScanner::new(source).scan(ctx).await;
        let consumed = consumer.await?;

        let report = consumed?;
        let phases = scanned?;
        let mapping_failures = phases.iter().map(|phase| phase.mapping_failures).sum();
        let totals = report.totals();
        let status = run_status(&phases, &report);

        let run = SourceRunReport {
            source_key,
            status,
            discovered: report.discovered,
            writes: ScanPhase::ALL
                .into_iter()
                .map(|phase| (phase, ledger.totals(phase)))
                .collect(),
            written: totals.succeeded,
            failed_writes: totals.failed,
            mapping_failures,
            write_failures: ledger.failures(),
            phases,
            elapsed: started.elapsed(),
        };
        log_run(&self.run_id, &run);
        Ok(run)
    }
}

fn check_filters<S: SourceAdapter>(source: &S, config: &SyncConfig) -> Result<(), String> {
    config
        .category_filters
        .iter()
        .filter(|(phase, _)| source.supported_phases().contains(*phase))
        .flat_map(|(phase, ids)| ids.iter().map(move |id| (*phase, id)))
        .try_for_each(|(phase, id)| source.check_category_filter(phase, id))
}

/// Succeeded only when every phase completed and every write landed; anything written next to
/// a failure is a partial success.
fn run_status(phases: &[PhaseOutcome], report: &ConsumerReport) -> RunStatus {
    let totals = report.totals();
    let all_completed = phases
        .iter()
        .all(|phase| phase.status == PhaseStatus::Completed);
    if all_completed && totals.failed == 0 {
        return RunStatus::Succeeded;
    }
    if totals.succeeded > 0 {
        return RunStatus::PartialSuccess;
    }
    let reason = phases
        .iter()
        .find_map(|phase| phase.error.as_ref())
        .map(FailureReason::from);
    match reason {
        Some(reason) => RunStatus::Failed(reason),
        // Nothing failed at the provider: completed-but-empty phases, or write rejections only.
        None if all_completed && totals.failed == 0 => RunStatus::Succeeded,
        None if phases.iter().any(|phase| phase.status == PhaseStatus::Completed) => {
            RunStatus::PartialSuccess
        }
        None => RunStatus::Failed(FailureReason::Unknown),
    }
}

fn log_run(run_id: &str, run: &SourceRunReport) {
    let failed_phases: Vec<&str> = run
        .phases
        .iter()
        .filter(|phase| phase.status != PhaseStatus::Completed)
        .map(|phase| phase.phase.as_str())
        .collect();
    if matches!(run.status, RunStatus::Succeeded) {
        info!(
            event = "source_run_complete",
            run_id,
            source = %run.source_key,
            status = run.status.as_db_str(),
            discovered = run.discovered.total(),
            written = run.written,
            failed_writes = run.failed_writes,
            mapping_failures = run.mapping_failures,
            elapsed_ms = run.elapsed.as_millis() as u64,
            "source run complete"
        );
    } else {
        warn!(
            event = "source_run_incomplete",
            run_id,
            source = %run.source_key,
            status = run.status.as_db_str(),
            failure_reason = run.status.failure_reason().map(FailureReason::as_str),
            failed_phases = ?failed_phases,
            discovered = run.discovered.total(),
            written = run.written,
            failed_writes = run.failed_writes,
            mapping_failures = run.mapping_failures,
            elapsed_ms = run.elapsed.as_millis() as u64,
            "source run finished with failures"
        );
    }
}
