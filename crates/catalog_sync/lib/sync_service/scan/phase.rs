use std::sync::Arc;
use std::time::{Duration, Instant};

use catalog_core::{CatalogItem, IntoCatalogItem, ScanPhase};
use futures::future::join_all;
use futures::StreamExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::context::{ScanContext, MAX_CATEGORY_CONCURRENCY, PROGRESS_INTERVAL};
use crate::server::monitoring::{PhaseLabels, SYNC_METRICS};
use crate::sources::{ScanRequest, SourceAdapter};
use crate::sync_service::events::CatalogEvent;
use crate::sync_service::types::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseStatus {
    Completed,
    /// A provider error aborted the phase; an `Error` event was sent.
    Failed,
    /// Run cancelled or the sink went away; no further events were sent.
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct PhaseOutcome {
    pub phase: ScanPhase,
    pub status: PhaseStatus,
    pub discovered: u64,
    pub mapping_failures: u64,
    pub duration: Duration,
    pub error: Option<FetchError>,
}

enum ScanStop {
    Cancelled,
    SinkClosed,
    Fetch(FetchError),
}

/// Drives one source adapter for one phase.
pub struct PhaseHandler<S: SourceAdapter> {
    phase: ScanPhase,
    source: Arc<S>,
}

impl<S: SourceAdapter> PhaseHandler<S> {
    pub fn new(phase: ScanPhase, source: Arc<S>) -> Self {
        Self { phase, source }
    }

    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    pub async fn execute(&self, ctx: &ScanContext) -> PhaseOutcome {
        let started = Instant::now();
        // A fetch error in one category stops its siblings but not the other phases.
        let phase_cancel = ctx.cancel.child_token();
        let categories = ctx.config.categories_for(self.phase);

        let results = if categories.is_empty() {
            vec![self.scan_category(ctx, None, &phase_cancel).await]
        } else {
            let permits = Semaphore::new(MAX_CATEGORY_CONCURRENCY);
            let permits = &permits;
            let phase_cancel = &phase_cancel;
            join_all(categories.iter().map(|category| async move {
                let Ok(_permit) = permits.acquire().await else {
                    return Err(ScanStop::Cancelled);
                };
                let result = self
                    .scan_category(ctx, Some(category.as_str()), phase_cancel)
                    .await;
                if matches!(result, Err(ScanStop::Fetch(_))) {
                    phase_cancel.cancel();
                }
                result
            }))
            .await
        };

        let mut mapping_failures = 0u64;
        let mut fetch_error = None;
        let mut stopped = false;
        for result in results {
            match result {
                Ok(failures) => mapping_failures += failures,
                Err(ScanStop::Fetch(err)) => {
                    fetch_error.get_or_insert(err);
                }
                Err(ScanStop::Cancelled | ScanStop::SinkClosed) => stopped = true,
            }
        }
        // Items emitted before a stop are still counted by the shared counter.
        let discovered = ctx.counters.get(self.phase);
        let duration = started.elapsed();

        let status = if let Some(err) = &fetch_error {
            self.report_failure(ctx, err, discovered).await;
            PhaseStatus::Failed
        } else if stopped || ctx.cancel.is_cancelled() {
            info!(
                event = "scan_phase_cancelled",
                source = %ctx.source_key,
                phase = %self.phase,
                discovered,
                "scan phase stopped before completion"
            );
            PhaseStatus::Cancelled
        } else {
            let duration_ms = duration.as_millis() as u64;
            let _ = ctx
                .sink
                .send_async(CatalogEvent::PhaseComplete {
                    phase: self.phase,
                    count: discovered,
                    duration_ms,
                })
                .await;
            info!(
                event = "scan_phase_complete",
                source = %ctx.source_key,
                phase = %self.phase,
                discovered,
                mapping_failures,
                duration_ms,
                "scan phase complete"
            );
            PhaseStatus::Completed
        };

        PhaseOutcome {
            phase: self.phase,
            status,
            discovered,
            mapping_failures,
            duration,
            error: fetch_error,
        }
    }

    async fn report_failure(&self, ctx: &ScanContext, err: &FetchError, discovered: u64) {
        error!(
            event = "scan_phase_failed",
            source = %ctx.source_key,
            phase = %self.phase,
            error_kind = err.kind.as_str(),
            error = %err,
            discovered,
            "provider error aborted scan phase"
        );
        if let Some(metrics) = SYNC_METRICS.get() {
            metrics
                .phases_failed_total
                .get_or_create(&PhaseLabels::new(&ctx.source_key, self.phase))
                .inc();
        }
        let _ = ctx
            .sink
            .send_async(CatalogEvent::Error {
                phase: self.phase,
                message: err.to_string(),
            })
            .await;
    }

    async fn scan_category(
        &self,
        ctx: &ScanContext,
        category_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<u64, ScanStop> {
        let request = ScanRequest {
            phase: self.phase,
            batch_size: ctx.config.batch_size,
            category_id,
            modified_since: ctx.config.modified_since,
            max_items: ctx.config.max_items,
            headers: &ctx.request_headers,
            cancel,
        };
        let mut batches = self.source.stream_batches(request);
        let mut mapping_failures = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ScanStop::Cancelled),
                next = batches.next() => next,
            };
            let batch = match next {
                None => break,
                Some(Ok(batch)) => batch,
                Some(Err(err)) => return Err(ScanStop::Fetch(err)),
            };
            debug!(
                event = "scan_batch_received",
                source = %ctx.source_key,
                phase = %self.phase,
                category_id,
                batch_len = batch.len(),
                "received raw batch"
            );

            for raw in batch {
                if cancel.is_cancelled() {
                    return Err(ScanStop::Cancelled);
                }
                match raw.into_catalog_item(self.source.source_key()) {
                    Ok(item) => self.emit_item(ctx, item, cancel).await?,
                    Err(err) => {
                        mapping_failures += 1;
                        warn!(
                            event = "item_mapping_failed",
                            source = %ctx.source_key,
                            phase = %self.phase,
                            error = %err,
                            "skipping record that could not be mapped"
                        );
                        if let Some(metrics) = SYNC_METRICS.get() {
                            metrics
                                .mapping_failures_total
                                .get_or_create(&PhaseLabels::new(&ctx.source_key, self.phase))
                                .inc();
                        }
                    }
                }
            }
        }

        Ok(mapping_failures)
    }

    async fn emit_item(
        &self,
        ctx: &ScanContext,
        item: CatalogItem,
        cancel: &CancellationToken,
    ) -> Result<(), ScanStop> {
        let event = CatalogEvent::ItemDiscovered {
            phase: self.phase,
            item,
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ScanStop::Cancelled),
            sent = ctx.sink.send_async(event) => sent.map_err(|_| ScanStop::SinkClosed)?,
        }

        let count = ctx.counters.increment(self.phase);
        if let Some(metrics) = SYNC_METRICS.get() {
            metrics
                .items_discovered_total
                .get_or_create(&PhaseLabels::new(&ctx.source_key, self.phase))
                .inc();
        }
        if count % PROGRESS_INTERVAL == 0 && !ctx.emit_progress(self.phase).await {
            return Err(ScanStop::SinkClosed);
        }
        Ok(())
    }
}
