use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::BoxFuture;

use super::types::{RunStatus, StoreError};

/// Per-chain outcome storage: the delta floor and the "last synced" display both read from here.
pub trait SyncStateStore: Send + Sync {
    /// Start time (unix seconds) of the last fully successful run of `chain_name`.
    fn load_last_success<'a>(
        &'a self,
        chain_name: &'a str,
    ) -> BoxFuture<'a, Result<Option<i64>, StoreError>>;

    /// Stores a finished run. Only `RunStatus::Succeeded` moves the floor, to `started_at`.
    fn record<'a>(
        &'a self,
        chain_name: &'a str,
        status: RunStatus,
        items_written: u64,
        started_at: i64,
    ) -> BoxFuture<'a, Result<(), StoreError>>;
}

impl<T> SyncStateStore for Arc<T>
where
    T: SyncStateStore + ?Sized,
{
    fn load_last_success<'a>(
        &'a self,
        chain_name: &'a str,
    ) -> BoxFuture<'a, Result<Option<i64>, StoreError>> {
        (**self).load_last_success(chain_name)
    }

    fn record<'a>(
        &'a self,
        chain_name: &'a str,
        status: RunStatus,
        items_written: u64,
        started_at: i64,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        (**self).record(chain_name, status, items_written, started_at)
    }
}

/// The floor a run of `status` leaves behind, if it may move one at all.
pub fn success_floor(status: RunStatus, started_at: i64) -> Option<i64> {
    (status == RunStatus::Succeeded).then_some(started_at)
}

pub fn now_epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
