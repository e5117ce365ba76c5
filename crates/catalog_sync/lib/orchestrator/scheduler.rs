//! In-process chain scheduler.
//!
//! Chains are keyed by a unique name. At most one chain per name is enqueued or running; a second
//! enqueue is either dropped (`Keep`) or replaces the first (`Replace`, which cancels it).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::sync_service::types::RunStatus;

pub const DEFAULT_MAX_CONCURRENT_CHAINS: usize = 2;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("scheduler is shut down")]
    ShutDown,

    #[error("scheduler query failed: {0}")]
    Query(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistingWorkPolicy {
    /// Cancel the active chain and enqueue the new one.
    Replace,
    /// Leave the active chain alone and drop the new one.
    Keep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Enqueued,
    Running,
    Succeeded,
    Failed,
}

impl ChainState {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Enqueued | Self::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enqueued => "enqueued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    Kept,
    Replaced,
}

/// Body of one chain run. Receives the chain's cancellation token.
pub type ChainWork = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, RunStatus> + Send>;

/// Produces a fresh [`ChainWork`] for every periodic firing.
pub type WorkFactory = Arc<dyn Fn() -> ChainWork + Send + Sync>;

pub trait Scheduler: Send + Sync {
    fn is_running_or_enqueued<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<bool, SchedulerError>>;

    fn enqueue_unique<'a>(
        &'a self,
        name: &'a str,
        policy: ExistingWorkPolicy,
        work: ChainWork,
    ) -> BoxFuture<'a, Result<EnqueueOutcome, SchedulerError>>;

    /// Fires immediately and then every `interval`, enqueuing with `Keep` semantics.
    fn schedule_periodic<'a>(
        &'a self,
        name: &'a str,
        interval: Duration,
        work: WorkFactory,
    ) -> BoxFuture<'a, Result<(), SchedulerError>>;
}

impl<T> Scheduler for Arc<T>
where
    T: Scheduler + ?Sized,
{
    fn is_running_or_enqueued<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<bool, SchedulerError>> {
        (**self).is_running_or_enqueued(name)
    }

    fn enqueue_unique<'a>(
        &'a self,
        name: &'a str,
        policy: ExistingWorkPolicy,
        work: ChainWork,
    ) -> BoxFuture<'a, Result<EnqueueOutcome, SchedulerError>> {
        (**self).enqueue_unique(name, policy, work)
    }

    fn schedule_periodic<'a>(
        &'a self,
        name: &'a str,
        interval: Duration,
        work: WorkFactory,
    ) -> BoxFuture<'a, Result<(), SchedulerError>> {
        (**self).schedule_periodic(name, interval, work)
    }
}

struct ChainEntry {
    state: ChainState,
    generation: u64,
    cancel: CancellationToken,
}

struct Inner {
    chains: Mutex<HashMap<String, ChainEntry>>,
    periodic: Mutex<HashMap<String, CancellationToken>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    permits: Arc<Semaphore>,
    generation: AtomicU64,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct LocalScheduler {
    inner: Arc<Inner>,
}

impl LocalScheduler {
    pub fn new(max_concurrent_chains: usize, shutdown: CancellationToken) -> Self {
        Self {
            inner: Arc::new(Inner {
                chains: Mutex::new(HashMap::new()),
                periodic: Mutex::new(HashMap::new()),
                handles: Mutex::new(Vec::new()),
                permits: Arc::new(Semaphore::new(max_concurrent_chains.max(1))),
                generation: AtomicU64::new(0),
                shutdown,
            }),
        }
    }

    pub fn state(&self, name: &str) -> Option<ChainState> {
        self.inner
            .chains
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|entry| entry.state)
    }

    /// Snapshot of every known chain, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, ChainState)> {
        let chains = self
            .inner
            .chains
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut states: Vec<_> = chains
            .iter()
            .map(|(name, entry)| (name.clone(), entry.state))
            .collect();
        states.sort_by(|left, right| left.0.cmp(&right.0));
        states
    }

    /// Cancels every chain and periodic timer and waits for their tasks to finish.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let handles = std::mem::take(
            &mut *self
                .inner
                .handles
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(
                    event = "scheduler_task_join_failed",
                    error = %err,
                    "scheduler task ended abnormally"
                );
            }
        }
        info!(event = "scheduler_stopped", "scheduler stopped");
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut handles = self
            .inner
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        handles.retain(|handle| !handle.is_finished());
        handles.push(handle);
    }

    fn enqueue_now(
        &self,
        name: &str,
        policy: ExistingWorkPolicy,
        work: ChainWork,
    ) -> Result<EnqueueOutcome, SchedulerError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(SchedulerError::ShutDown);
        }
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let cancel = self.inner.shutdown.child_token();

        let outcome = {
            let mut chains = self
                .inner
                .chains
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let outcome = match chains.get(name) {
                Some(existing) if existing.state.is_active() => match policy {
                    ExistingWorkPolicy::Keep => return Ok(EnqueueOutcome::Kept),
                    ExistingWorkPolicy::Replace => {
                        existing.cancel.cancel();
                        EnqueueOutcome::Replaced
                    }
                },
                _ => EnqueueOutcome::Enqueued,
            };
            chains.insert(
                name.to_string(),
                ChainEntry {
                    state: ChainState::Enqueued,
                    generation,
                    cancel: cancel.clone(),
                },
            );
            outcome
        };

        debug!(
            event = "chain_enqueued",
            chain = name,
            outcome = ?outcome,
            "chain enqueued"
        );
        let inner = Arc::clone(&self.inner);
        let name = name.to_string();
        self.track(tokio::spawn(run_chain_task(inner, name, generation, cancel, work)));
        Ok(outcome)
    }
}

async fn run_chain_task(
    inner: Arc<Inner>,
    name: String,
    generation: u64,
    cancel: CancellationToken,
    work: ChainWork,
) {
    let permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        permit = Arc::clone(&inner.permits).acquire_owned() => permit.ok(),
    };
    let Some(_permit) = permit else {
        set_state(&inner, &name, generation, ChainState::Failed);
        return;
    };

    set_state(&inner, &name, generation, ChainState::Running);
    let status = work(cancel).await;
    let state = match status {
        RunStatus::Failed(_) => ChainState::Failed,
        RunStatus::Succeeded | RunStatus::PartialSuccess => ChainState::Succeeded,
    };
    set_state(&inner, &name, generation, state);
}

/// Updates the entry only if it still belongs to this run; a replaced run leaves no trace.
fn set_state(inner: &Inner, name: &str, generation: u64, state: ChainState) {
    let mut chains = inner.chains.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(entry) = chains.get_mut(name) {
        if entry.generation == generation {
            entry.state = state;
        }
    }
}

impl Scheduler for LocalScheduler {
    fn is_running_or_enqueued<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<bool, SchedulerError>> {
        Box::pin(async move { Ok(self.state(name).is_some_and(ChainState::is_active)) })
    }

    fn enqueue_unique<'a>(
        &'a self,
        name: &'a str,
        policy: ExistingWorkPolicy,
        work: ChainWork,
    ) -> BoxFuture<'a, Result<EnqueueOutcome, SchedulerError>> {
        Box::pin(async move { self.enqueue_now(name, policy, work) })
    }

    fn schedule_periodic<'a>(
        &'a self,
        name: &'a str,
        interval: Duration,
        work: WorkFactory,
    ) -> BoxFuture<'a, Result<(), SchedulerError>> {
        Box::pin(async move {
            if self.inner.shutdown.is_cancelled() {
                return Err(SchedulerError::ShutDown);
            }
            let stop = self.inner.shutdown.child_token();
            if let Some(previous) = self
                .inner
                .periodic
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(name.to_string(), stop.clone())
            {
                previous.cancel();
            }

            info!(
                event = "chain_periodic_scheduled",
                chain = name,
                interval_secs = interval.as_secs(),
                "periodic chain scheduled"
            );
            let scheduler = self.clone();
            let name = name.to_string();
            self.track(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        biased;
                        _ = stop.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    match scheduler.enqueue_now(&name, ExistingWorkPolicy::Keep, work()) {
                        Ok(EnqueueOutcome::Kept) => debug!(
                            event = "chain_periodic_skipped",
                            chain = %name,
                            "previous run still active; skipping this tick"
                        ),
                        Ok(_) => {}
                        Err(SchedulerError::ShutDown) => break,
                        Err(err) => warn!(
                            event = "chain_periodic_enqueue_failed",
                            chain = %name,
                            error = %err,
                            "periodic enqueue failed"
                        ),
                    }
                }
            }));
            Ok(())
        })
    }
}
