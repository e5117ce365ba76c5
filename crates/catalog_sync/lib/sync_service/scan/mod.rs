//! Phase handlers: drive a source adapter, map raw records, and stream events to the writer.
//!
//! Phases of one source run concurrently on a `JoinSet`. Events of one phase keep their order;
//! nothing orders events across phases.

mod context;
mod phase;

use std::sync::Arc;

use catalog_core::ScanPhase;
use tokio::task::JoinSet;
use tracing::{debug, info};

pub use context::{PhaseCounters, ScanContext, MAX_CATEGORY_CONCURRENCY, PROGRESS_INTERVAL};
pub use phase::{PhaseHandler, PhaseOutcome, PhaseStatus};

use super::error::Error;
use crate::sources::SourceAdapter;

#[cfg(test)]
mod scan_tests;

pub struct CatalogScanner<S: SourceAdapter> {
    source: Arc<S>,
}

impl<S: SourceAdapter> CatalogScanner<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self { source }
    }

    /// Phases of `requested` the source can serve, in scan order and without duplicates.
    pub fn phases_for(&self, requested: &[ScanPhase]) -> Vec<ScanPhase> {
        let supported = self.source.supported_phases();
        ScanPhase::ALL
            .into_iter()
            .filter(|phase| requested.contains(phase))
            .filter(|phase| {
                let served = supported.contains(phase);
                if !served {
                    debug!(
                        event = "scan_phase_unsupported",
                        source = self.source.source_key(),
                        phase = %phase,
                        "source does not serve this phase; skipping"
                    );
                }
                served
            })
            .collect()
    }

    /// Runs every configured phase to completion and returns the outcomes in phase order.
    pub async fn scan(&self, ctx: Arc<ScanContext>) -> Result<Vec<PhaseOutcome>, Error> {
        let phases = self.phases_for(&ctx.config.phases);
        info!(
            event = "catalog_scan_started",
            source = %ctx.source_key,
            phases = ?phases,
            batch_size = ctx.config.batch_size,
            modified_since = ?ctx.config.modified_since,
            account = ?ctx.config.account_label,
            "catalog scan started"
        );

        let mut tasks = JoinSet::new();
        for phase in phases {
            let handler = PhaseHandler::new(phase, Arc::clone(&self.source));
            let ctx = Arc::clone(&ctx);
            tasks.spawn(async move { handler.execute(&ctx).await });
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            outcomes.push(joined?);
        }
        outcomes.sort_by_key(|outcome| outcome.phase);
        Ok(outcomes)
    }
}
