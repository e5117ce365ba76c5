use std::sync::{Arc, Mutex};

use catalog_core::db::models::{
    CatalogItemRow, ChainOutcome, IngestFailureRow, NewIngestFailure, SyncStateRow,
};
use catalog_core::db::{open_catalog_db, OpenStoreError};
use catalog_core::{CatalogItem, ContentCategory, ScanPhase};
use diesel::sqlite::SqliteConnection;
use futures::future::BoxFuture;

use super::error_mapping::map_diesel_error;
use crate::sync_service::sync_state::{now_epoch_seconds, success_floor, SyncStateStore};
use crate::sync_service::types::{RunStatus, StoreError};

/// Persisted record of one rejected write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub run_id: String,
    pub source_key: String,
    pub phase: ScanPhase,
    pub provider_id: String,
    pub failure_class: String,
    pub message: String,
}

/// Write side of the catalog.
///
/// Abstracted so writer behaviour (per-item rejection, store loss) is testable without SQLite.
pub trait CatalogStore: Send + Sync {
    fn upsert<'a>(&'a self, item: &'a CatalogItem) -> BoxFuture<'a, Result<(), StoreError>>;

    fn record_failure<'a>(
        &'a self,
        record: &'a FailureRecord,
    ) -> BoxFuture<'a, Result<(), StoreError>>;
}

impl<T> CatalogStore for Arc<T>
where
    T: CatalogStore + ?Sized,
{
    fn upsert<'a>(&'a self, item: &'a CatalogItem) -> BoxFuture<'a, Result<(), StoreError>> {
        (**self).upsert(item)
    }

    fn record_failure<'a>(
        &'a self,
        record: &'a FailureRecord,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        (**self).record_failure(record)
    }
}

/// SQLite-backed store. One connection shared by all writers of the process; diesel calls run
/// on the blocking pool.
#[derive(Clone)]
pub struct SqliteCatalogStore {
    conn: Arc<Mutex<SqliteConnection>>,
}

impl SqliteCatalogStore {
    pub fn new(conn: SqliteConnection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub fn open(path: &str) -> Result<Self, OpenStoreError> {
        open_catalog_db(path).map(Self::new)
    }

    async fn run_db_op<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| StoreError::unavailable("catalog connection mutex poisoned"))?;
            op(&mut conn)
        })
        .await
        .map_err(|err| StoreError::unavailable(format!("store task failed: {err}")))?
    }

    pub async fn count_items(
        &self,
        source_key: &str,
        category: Option<ContentCategory>,
    ) -> Result<i64, StoreError> {
        let source_key = source_key.to_string();
        self.run_db_op(move |conn| {
            CatalogItemRow::count(conn, &source_key, category).map_err(map_diesel_error)
        })
        .await
    }

    pub async fn find_item(
        &self,
        source_key: &str,
        category: ContentCategory,
        provider_id: &str,
    ) -> Result<Option<CatalogItemRow>, StoreError> {
        let source_key = source_key.to_string();
        let provider_id = provider_id.to_string();
        self.run_db_op(move |conn| {
            CatalogItemRow::find(conn, &source_key, category, &provider_id)
                .map_err(map_diesel_error)
        })
        .await
    }

    pub async fn load_failures(&self, run_id: &str) -> Result<Vec<IngestFailureRow>, StoreError> {
        let run_id = run_id.to_string();
        self.run_db_op(move |conn| {
            IngestFailureRow::load_for_run(conn, &run_id).map_err(map_diesel_error)
        })
        .await
    }

    pub async fn load_sync_state(
        &self,
        chain_name: &str,
    ) -> Result<Option<SyncStateRow>, StoreError> {
        let chain_name = chain_name.to_string();
        self.run_db_op(move |conn| SyncStateRow::load(conn, &chain_name).map_err(map_diesel_error))
            .await
    }
}

impl CatalogStore for SqliteCatalogStore {
    fn upsert<'a>(&'a self, item: &'a CatalogItem) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let row = CatalogItemRow::from_item(item, now_epoch_seconds()).map_err(|err| {
                StoreError::rejected(format!(
                    "playback hint for {} is not serializable: {err}",
                    item.provider_id
                ))
            })?;
            self.run_db_op(move |conn| {
                CatalogItemRow::upsert(conn, &row)
                    .map(|_| ())
                    .map_err(map_diesel_error)
            })
            .await
        })
    }

    fn record_failure<'a>(
        &'a self,
        record: &'a FailureRecord,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        let row = NewIngestFailure {
            run_id: record.run_id.clone(),
            source_key: record.source_key.clone(),
            phase: record.phase.as_str().to_string(),
            provider_id: record.provider_id.clone(),
            failure_class: record.failure_class.clone(),
            last_error: Some(record.message.clone()),
            recorded_at: now_epoch_seconds(),
        };
        Box::pin(self.run_db_op(move |conn| {
            NewIngestFailure::insert(conn, &row)
                .map(|_| ())
                .map_err(map_diesel_error)
        }))
    }
}

impl SyncStateStore for SqliteCatalogStore {
    fn load_last_success<'a>(
        &'a self,
        chain_name: &'a str,
    ) -> BoxFuture<'a, Result<Option<i64>, StoreError>> {
        Box::pin(async move {
            Ok(self
                .load_sync_state(chain_name)
                .await?
                .and_then(|row| row.last_success_at))
        })
    }

    fn record<'a>(
        &'a self,
        chain_name: &'a str,
        status: RunStatus,
        items_written: u64,
        started_at: i64,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        let chain_name = chain_name.to_string();
        let items_written = i64::try_from(items_written).unwrap_or(i64::MAX);
        Box::pin(self.run_db_op(move |conn| {
            let outcome = ChainOutcome {
                chain_name: &chain_name,
                last_status: status.as_db_str(),
                last_failure_reason: status.failure_reason().map(|reason| reason.as_str()),
                items_written,
                success_floor: success_floor(status, started_at),
            };
            SyncStateRow::record(conn, &outcome, now_epoch_seconds())
                .map(|_| ())
                .map_err(map_diesel_error)
        }))
    }
}
