//! Sync orchestration: turns "sync source X in mode Y" into a uniquely named chain of heavy steps,
//! keeps a second copy of a chain from being queued, and throttles steps around playback.

pub mod chain;
mod runner;
pub mod scheduler;
pub mod throttle;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub use chain::{chain_name, ChainStep, SyncChain, SyncMode};
pub use runner::{ServiceRunner, SourceRunner};
pub use scheduler::{
    ChainState, ChainWork, EnqueueOutcome, ExistingWorkPolicy, LocalScheduler, Scheduler,
    SchedulerError, WorkFactory, DEFAULT_MAX_CONCURRENT_CHAINS,
};
pub use throttle::{PlaybackActivity, PlaybackThrottle, DEFAULT_PLAYBACK_THROTTLE};

use crate::server::monitoring::{RunLabels, SYNC_METRICS};
use crate::sync_service::sync_state::{now_epoch_seconds, SyncStateStore};
use crate::sync_service::types::{FailureReason, RunStatus, SyncConfig};
use crate::sync_service::Error;


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRequestOutcome {
    Enqueued,
    /// A chain with the same name is already queued or running.
    AlreadyActive,
}

/// Result of a chain run, as written to `sync_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainReport {
    pub status: RunStatus,
    pub items_written: u64,
    pub steps_run: usize,
}

/// Everything a chain run needs; cloned into each scheduled work item.
#[derive(Clone)]
struct ChainRunner {
    runner: Arc<dyn SourceRunner>,
    state: Arc<dyn SyncStateStore>,
    throttle: PlaybackThrottle,
    base_config: SyncConfig,
}

pub struct SyncOrchestrator {
    scheduler: Arc<dyn Scheduler>,
    state: Arc<dyn SyncStateStore>,
    throttle: PlaybackThrottle,
    base_config: SyncConfig,
    sources: BTreeMap<String, Arc<dyn SourceRunner>>,
}

impl SyncOrchestrator {
    /// `base_config` supplies batch size, category filters, label and quota; phases and the
    /// timestamp floor are set per chain step.
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        state: Arc<dyn SyncStateStore>,
        throttle: PlaybackThrottle,
        base_config: SyncConfig,
    ) -> Self {
        Self {
            scheduler,
            state,
            throttle,
            base_config,
            sources: BTreeMap::new(),
        }
    }

    pub fn with_source(mut self, runner: Arc<dyn SourceRunner>) -> Self {
        self.sources.insert(runner.source_key().to_string(), runner);
        self
    }

    pub fn source_keys(&self) -> Vec<String> {
        self.sources.keys().cloned().collect()
    }

    pub fn has_source(&self, source_key: &str) -> bool {
        self.sources.contains_key(source_key)
    }

    /// Enqueues the chain for `source_key`/`mode` unless one with the same name is active.
    ///
    /// A scheduler that cannot answer the "already active?" query does not block the request.
    pub async fn request_sync(
        &self,
        source_key: &str,
        mode: SyncMode,
    ) -> Result<SyncRequestOutcome, Error> {
        let chain = SyncChain::new(source_key, mode);
        let name = chain.name();
        let work = self.chain_runner(source_key)?.into_work(chain);

        match self.scheduler.is_running_or_enqueued(&name).await {
            Ok(true) => {
                info!(
                    event = "chain_enqueue_skipped",
                    chain = %name,
                    "chain already queued or running; not enqueuing again"
                );
                if let Some(metrics) = SYNC_METRICS.get() {
                    metrics.chains_skipped_total.inc();
                }
                return Ok(SyncRequestOutcome::AlreadyActive);
            }
            Ok(false) => {}
            Err(err) => warn!(
                event = "chain_state_query_failed",
                chain = %name,
                error = %err,
                "could not query chain state; enqueuing anyway"
            ),
        }

        let outcome = self
            .scheduler
            .enqueue_unique(&name, ExistingWorkPolicy::Keep, work)
            .await?;
        if outcome == EnqueueOutcome::Kept {
            // Lost a race with another request between the query and the enqueue.
            if let Some(metrics) = SYNC_METRICS.get() {
                metrics.chains_skipped_total.inc();
            }
            return Ok(SyncRequestOutcome::AlreadyActive);
        }
        info!(event = "chain_enqueued", chain = %name, mode = %mode, "sync chain enqueued");
        if let Some(metrics) = SYNC_METRICS.get() {
            metrics.chains_enqueued_total.inc();
        }
        Ok(SyncRequestOutcome::Enqueued)
    }

    /// Registers a recurring chain per configured source.
    pub async fn schedule_periodic(&self, mode: SyncMode, interval: Duration) -> Result<(), Error> {
        for source_key in self.sources.keys() {
            let chain = SyncChain::new(source_key.clone(), mode);
            let name = chain.name();
            let runner = self.chain_runner(source_key)?;
            let factory: WorkFactory = Arc::new(move || runner.clone().into_work(chain.clone()));
            self.scheduler
                .schedule_periodic(&name, interval, factory)
                .await?;
        }
        Ok(())
    }

    /// Runs a chain in the caller's task, bypassing the scheduler.
    pub async fn run_now(
        &self,
        source_key: &str,
        mode: SyncMode,
        cancel: CancellationToken,
    ) -> Result<ChainReport, Error> {
        let runner = self.chain_runner(source_key)?;
        Ok(runner.run(SyncChain::new(source_key, mode), cancel).await)
    }

    fn chain_runner(&self, source_key: &str) -> Result<ChainRunner, Error> {
        let runner = self.sources.get(source_key).ok_or_else(|| {
            Error::Orchestration(format!("no source configured under `{source_key}`"))
        })?;
        Ok(ChainRunner {
            runner: Arc::clone(runner),
            state: Arc::clone(&self.state),
            throttle: self.throttle.clone(),
            base_config: self.base_config.clone(),
        })
    }
}

impl ChainRunner {
    fn into_work(self, chain: SyncChain) -> ChainWork {
        Box::new(move |cancel| {
            async move { self.run(chain, cancel).await.status }.boxed()
        })
    }

    async fn run(&self, chain: SyncChain, cancel: CancellationToken) -> ChainReport {
        let name = chain.name();
        let started_at = now_epoch_seconds();
        let run_id = format!("{name}-{started_at}");
        info!(event = "chain_started", chain = %name, run_id = %run_id, "sync chain started");

        let mut status: Option<RunStatus> = None;
        let mut items_written = 0u64;
        let mut steps_run = 0usize;
        for &step in chain.steps() {
            if cancel.is_cancelled() {
                break;
            }
            self.throttle.before_heavy_step(&name, step, &cancel).await;
            if cancel.is_cancelled() {
                break;
            }

            let config = self.step_config(&chain, step).await;
            steps_run += 1;
            let step_status = match self
                .runner
                .run(config, format!("{run_id}-{}", step.as_str()), cancel.child_token())
                .await
            {
                Ok(report) => {
                    items_written += report.written;
                    report.status
                }
                Err(err) => {
                    error!(
                        event = "chain_step_failed",
                        chain = %name,
                        step = %step,
                        error = %err,
                        "chain step aborted"
                    );
                    let failed = RunStatus::Failed(FailureReason::from(&err));
                    status = Some(status.map_or(failed, |prior| prior.combine(failed)));
                    break;
                }
            };
            status = Some(status.map_or(step_status, |prior| prior.combine(step_status)));
        }

        // Cancelled before anything ran: nothing to record.
        let Some(status) = status else {
            info!(
                event = "chain_cancelled",
                chain = %name,
                "sync chain cancelled before any step ran"
            );
            return ChainReport {
                status: RunStatus::Failed(FailureReason::Unknown),
                items_written: 0,
                steps_run: 0,
            };
        };
        let status = if cancel.is_cancelled() && steps_run < chain.steps().len() {
            status.combine(RunStatus::PartialSuccess)
        } else {
            status
        };

        if let Err(err) = self
            .state
            .record(&name, status, items_written, started_at)
            .await
        {
            warn!(
                event = "sync_state_record_failed",
                chain = %name,
                error = %err,
                "could not record chain outcome"
            );
        }
        if let Some(metrics) = SYNC_METRICS.get() {
            metrics
                .runs_total
                .get_or_create(&RunLabels::new(&name, status))
                .inc();
        }
        info!(
            event = "chain_finished",
            chain = %name,
            run_id = %run_id,
            status = status.as_db_str(),
            failure_reason = status.failure_reason().map(FailureReason::as_str),
            items_written,
            steps_run,
            "sync chain finished"
        );
        ChainReport {
            status,
            items_written,
            steps_run,
        }
    }

    async fn step_config(&self, chain: &SyncChain, step: ChainStep) -> SyncConfig {
        let phases = step.phases();
        let mut config = self.base_config.clone();
        config.phases = phases.to_vec();
        config
            .category_filters
            .retain(|phase, _| phases.contains(phase));
        config.modified_since = if step.uses_floor() {
            self.delta_floor(&chain.source_key).await
        } else {
            None
        };
        config
    }

    /// Latest successful full or delta sync of the source. Without one the delta scans everything.
    async fn delta_floor(&self, source_key: &str) -> Option<i64> {
        let mut floor = None;
        for mode in [SyncMode::Full, SyncMode::Delta] {
            let name = chain_name(source_key, mode);
            match self.state.load_last_success(&name).await {
                Ok(last) => floor = floor.max(last),
                Err(err) => warn!(
                    event = "sync_state_load_failed",
                    chain = %name,
                    error = %err,
                    "could not load last success; ignoring it for the delta floor"
                ),
            }
        }
        floor
    }
}
