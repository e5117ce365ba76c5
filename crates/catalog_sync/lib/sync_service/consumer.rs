use std::collections::BTreeMap;

use catalog_core::{CatalogItem, ScanPhase};
use tracing::{debug, info, warn};

use super::error::Error;
use super::events::{CatalogEvent, EventReceiver, PhaseCounts};
use super::writer::{CatalogStore, CatalogWriter, IngestSummary};

/// Buffered items per phase are flushed once they reach this many write chunks.
pub const CHUNKS_PER_FLUSH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteTotals {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl WriteTotals {
    fn add(&mut self, summary: &IngestSummary) {
        self.attempted += summary.attempted as u64;
        self.succeeded += summary.succeeded as u64;
        self.failed += summary.failed as u64;
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConsumerReport {
    /// `ItemDiscovered` events received per phase.
    pub discovered: PhaseCounts,
    pub writes: BTreeMap<ScanPhase, WriteTotals>,
    pub completed_phases: Vec<ScanPhase>,
    pub failed_phases: Vec<(ScanPhase, String)>,
    pub last_progress: Option<PhaseCounts>,
}

impl ConsumerReport {
    pub fn totals(&self) -> WriteTotals {
        self.writes
            .values()
            .fold(WriteTotals::default(), |mut acc, totals| {
                acc.attempted += totals.attempted;
                acc.succeeded += totals.succeeded;
                acc.failed += totals.failed;
                acc
            })
    }
}

/// Drains the event channel into the writer until every sender is gone.
///
/// Every discovered item is handed to the writer exactly once, including items still buffered
/// when the channel closes.
pub struct EventConsumer<St: CatalogStore> {
    writer: CatalogWriter<St>,
    receiver: EventReceiver,
}

impl<St: CatalogStore> EventConsumer<St> {
    pub fn new(writer: CatalogWriter<St>, receiver: EventReceiver) -> Self {
        Self { writer, receiver }
    }

    pub async fn run(self) -> Result<ConsumerReport, Error> {
        let mut report = ConsumerReport::default();
        let mut buffers: BTreeMap<ScanPhase, Vec<CatalogItem>> = BTreeMap::new();

        while let Ok(event) = self.receiver.recv_async().await {
            match event {
                CatalogEvent::ItemDiscovered { phase, item } => {
                    report.discovered.add(phase, 1);
                    let buffer = buffers.entry(phase).or_default();
                    buffer.push(item);
                    if buffer.len() >= self.writer.chunk_size(phase) * CHUNKS_PER_FLUSH {
                        self.flush(phase, &mut buffers, &mut report).await?;
                    }
                }
                CatalogEvent::ScanProgress {
                    counts,
                    current_phase,
                } => {
                    debug!(
                        event = "scan_progress",
                        phase = %current_phase,
                        live = counts.get(ScanPhase::Live),
                        movies = counts.get(ScanPhase::Movies),
                        series = counts.get(ScanPhase::Series),
                        episodes = counts.get(ScanPhase::Episodes),
                        "scan progress"
                    );
                    report.last_progress = Some(counts);
                }
                CatalogEvent::PhaseComplete {
                    phase,
                    count,
                    duration_ms,
                } => {
                    self.flush(phase, &mut buffers, &mut report).await?;
                    info!(
                        event = "phase_persisted",
                        phase = %phase,
                        discovered = count,
                        scan_duration_ms = duration_ms,
                        "phase scan finished and flushed"
                    );
                    report.completed_phases.push(phase);
                }
                CatalogEvent::Error { phase, message } => {
                    self.flush(phase, &mut buffers, &mut report).await?;
                    warn!(
                        event = "phase_scan_error",
                        phase = %phase,
                        error = %message,
                        "phase ended with a provider error; items discovered so far are kept"
                    );
                    report.failed_phases.push((phase, message));
                }
            }
        }

        for phase in ScanPhase::ALL {
            self.flush(phase, &mut buffers, &mut report).await?;
        }
        Ok(report)
    }

    async fn flush(
        &self,
        phase: ScanPhase,
        buffers: &mut BTreeMap<ScanPhase, Vec<CatalogItem>>,
        report: &mut ConsumerReport,
    ) -> Result<(), Error> {
        let Some(items) = buffers.remove(&phase).filter(|items| !items.is_empty()) else {
            return Ok(());
        };
        let summary = self.writer.ingest_batch(phase, &items).await?;
        report.writes.entry(phase).or_default().add(&summary);
        Ok(())
    }
}
