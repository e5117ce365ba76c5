//! Persistence writer: device-sized chunks, one upsert per item, per-item failures recorded and
//! skipped. Only a store-unavailable error stops a batch.

mod error_mapping;
mod ledger;
mod store;

use std::sync::Arc;
use std::time::{Duration, Instant};

use catalog_core::{CatalogItem, ScanPhase};
use tracing::{error, info, warn};

pub use error_mapping::map_diesel_error;
pub use ledger::{IngestLedger, LedgerFailure, LedgerTotals};
pub use store::{CatalogStore, FailureRecord, SqliteCatalogStore};

use super::error::Error;
use super::write_policy::{batch_size_for, next_chunk_len, DeviceClassProvider};
use crate::server::monitoring::{PhaseLabels, SYNC_METRICS};


/// A progress line is logged after every this many chunks.
pub const PROGRESS_LOG_EVERY_CHUNKS: usize = 5;

pub const FAILURE_CLASS_WRITE_REJECTED: &str = "write_rejected";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestSummary {
    pub phase: ScanPhase,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

impl IngestSummary {
    fn empty(phase: ScanPhase) -> Self {
        Self {
            phase,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            elapsed: Duration::ZERO,
        }
    }
}

pub struct CatalogWriter<St: CatalogStore> {
    store: St,
    device_class: Arc<dyn DeviceClassProvider>,
    ledger: Arc<IngestLedger>,
    run_id: String,
    source_key: String,
}

impl<St: CatalogStore> CatalogWriter<St> {
    pub fn new(
        store: St,
        device_class: Arc<dyn DeviceClassProvider>,
        ledger: Arc<IngestLedger>,
        run_id: impl Into<String>,
        source_key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            device_class,
            ledger,
            run_id: run_id.into(),
            source_key: source_key.into(),
        }
    }

    pub fn ledger(&self) -> &Arc<IngestLedger> {
        &self.ledger
    }

    /// Current chunk size for `phase`; asks the device-class provider every time.
    pub fn chunk_size(&self, phase: ScanPhase) -> usize {
        batch_size_for(self.device_class.current_device_class(), phase)
    }

    pub async fn ingest_batch(
        &self,
        phase: ScanPhase,
        items: &[CatalogItem],
    ) -> Result<IngestSummary, Error> {
        let started = Instant::now();
        let mut summary = IngestSummary::empty(phase);
        let mut offset = 0;
        let mut chunks = 0usize;

        while offset < items.len() {
            let len = next_chunk_len(items.len() - offset, self.chunk_size(phase));
            for item in &items[offset..offset + len] {
                self.write_one(phase, item, &mut summary).await?;
            }
            offset += len;
            chunks += 1;

            if chunks % PROGRESS_LOG_EVERY_CHUNKS == 0 {
                info!(
                    event = "catalog_write_progress",
                    run_id = %self.run_id,
                    source = %self.source_key,
                    phase = %phase,
                    chunks,
                    written = offset,
                    total = items.len(),
                    failed = summary.failed,
                    "catalog write in progress"
                );
            }
        }

        summary.elapsed = started.elapsed();
        info!(
            event = "catalog_write_batch_complete",
            run_id = %self.run_id,
            source = %self.source_key,
            phase = %phase,
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            chunks,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "catalog write batch complete"
        );
        Ok(summary)
    }

    async fn write_one(
        &self,
        phase: ScanPhase,
        item: &CatalogItem,
        summary: &mut IngestSummary,
    ) -> Result<(), Error> {
        summary.attempted += 1;
        let err = match self.store.upsert(item).await {
            Ok(()) => {
                summary.succeeded += 1;
                self.ledger.record_success(phase);
                if let Some(metrics) = SYNC_METRICS.get() {
                    metrics
                        .items_written_total
                        .get_or_create(&PhaseLabels::new(&self.source_key, phase))
                        .inc();
                }
                return Ok(());
            }
            Err(err) => err,
        };

        summary.failed += 1;
        self.ledger
            .record_failure(phase, &item.provider_id, &err.message);
        if let Some(metrics) = SYNC_METRICS.get() {
            metrics
                .items_failed_total
                .get_or_create(&PhaseLabels::new(&self.source_key, phase))
                .inc();
        }

        if err.is_fatal() {
            error!(
                event = "catalog_store_unavailable",
                run_id = %self.run_id,
                source = %self.source_key,
                phase = %phase,
                provider_id = %item.provider_id,
                error = %err,
                "catalog store unavailable; stopping writes"
            );
            return Err(err.into());
        }

        warn!(
            event = "catalog_item_write_failed",
            run_id = %self.run_id,
            source = %self.source_key,
            phase = %phase,
            provider_id = %item.provider_id,
            error = %err,
            "item write failed; continuing with the batch"
        );

        let record = FailureRecord {
            run_id: self.run_id.clone(),
            source_key: self.source_key.clone(),
            phase,
            provider_id: item.provider_id.clone(),
            failure_class: FAILURE_CLASS_WRITE_REJECTED.to_string(),
            message: err.message,
        };
        if let Err(record_err) = self.store.record_failure(&record).await {
            if record_err.is_fatal() {
                return Err(record_err.into());
            }
            warn!(
                event = "ingest_failure_record_failed",
                run_id = %self.run_id,
                provider_id = %record.provider_id,
                error = %record_err,
                "could not persist failure record"
            );
        }
        Ok(())
    }
}
