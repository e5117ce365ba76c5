use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use catalog_core::{
    CatalogItem, ContentCategory, IntoCatalogItem, MapError, PlaybackHint, ScanPhase,
};
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};

use super::sync_state::{success_floor, SyncStateStore};
use super::types::{FetchError, RunStatus, StoreError};
use super::writer::{CatalogStore, FailureRecord};
use crate::sources::{ScanRequest, SourceAdapter};

/// Minimal raw record: mapping fails when `title` is missing.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TestRecord {
    pub(crate) id: String,
    pub(crate) title: Option<String>,
    pub(crate) category: ContentCategory,
}

impl TestRecord {
    pub(crate) fn new(category: ContentCategory, id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            title: Some(format!("title-{id}")),
            id,
            category,
        }
    }

    pub(crate) fn untitled(category: ContentCategory, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            category,
        }
    }
}

impl IntoCatalogItem for TestRecord {
    fn into_catalog_item(self, source_key: &str) -> Result<CatalogItem, MapError> {
        let title = self.title.ok_or(MapError::MissingField {
            category: self.category,
            field: "title",
        })?;
        Ok(sample_item(source_key, self.category, &self.id, &title))
    }
}

pub(crate) fn sample_item(
    source_key: &str,
    category: ContentCategory,
    provider_id: &str,
    title: &str,
) -> CatalogItem {
    CatalogItem {
        source_key: source_key.to_string(),
        category,
        provider_id: provider_id.to_string(),
        title: title.to_string(),
        category_id: None,
        series_id: None,
        season: None,
        episode: None,
        image_url: None,
        plot: None,
        duration_secs: None,
        air_date: None,
        rating: None,
        added_at: None,
        playback: PlaybackHint::Xtream {
            stream_type: "movie".to_string(),
            container_extension: Some("mkv".to_string()),
            direct_source: None,
        },
    }
}

pub(crate) fn records(phase: ScanPhase, ids: std::ops::Range<u32>) -> Vec<TestRecord> {
    ids.map(|id| TestRecord::new(phase.category(), format!("{}-{id}", phase.as_str())))
        .collect()
}

type ScriptKey = (ScanPhase, Option<String>);

/// Source that replays scripted batches per `(phase, category)`.
///
/// Unscripted keys yield an empty stream. `hang_after` keeps the stream pending after its batches,
/// which is how tests hold a phase open until cancellation.
pub(crate) struct ScriptedSource {
    key: &'static str,
    phases: &'static [ScanPhase],
    scripts: Mutex<HashMap<ScriptKey, VecDeque<Result<Vec<TestRecord>, FetchError>>>>,
    hang_after: HashSet<ScanPhase>,
    requests: Mutex<Vec<ScriptKey>>,
}

impl ScriptedSource {
    pub(crate) fn new(key: &'static str) -> Self {
        Self {
            key,
            phases: &ScanPhase::ALL,
            scripts: Mutex::new(HashMap::new()),
            hang_after: HashSet::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_phases(mut self, phases: &'static [ScanPhase]) -> Self {
        self.phases = phases;
        self
    }

    pub(crate) fn script(
        self,
        phase: ScanPhase,
        category: Option<&str>,
        batches: Vec<Result<Vec<TestRecord>, FetchError>>,
    ) -> Self {
        self.scripts
            .lock()
            .expect("scripts mutex poisoned")
            .insert((phase, category.map(str::to_string)), batches.into());
        self
    }

    pub(crate) fn hang_after(mut self, phase: ScanPhase) -> Self {
        self.hang_after.insert(phase);
        self
    }

    pub(crate) fn requests(&self) -> Vec<ScriptKey> {
        self.requests.lock().expect("requests mutex poisoned").clone()
    }
}

impl SourceAdapter for ScriptedSource {
    type Raw = TestRecord;

    fn source_key(&self) -> &str {
        self.key
    }

    fn supported_phases(&self) -> &'static [ScanPhase] {
        self.phases
    }

    fn stream_batches<'a>(
        &'a self,
        request: ScanRequest<'a>,
    ) -> BoxStream<'a, Result<Vec<TestRecord>, FetchError>> {
        let key = (request.phase, request.category_id.map(str::to_string));
        self.requests
            .lock()
            .expect("requests mutex poisoned")
            .push(key.clone());
        let batches: Vec<_> = self
            .scripts
            .lock()
            .expect("scripts mutex poisoned")
            .remove(&key)
            .unwrap_or_default()
            .into_iter()
            .collect();

        let scripted = stream::iter(batches);
        if self.hang_after.contains(&request.phase) {
            scripted.chain(stream::pending()).boxed()
        } else {
            scripted.boxed()
        }
    }
}

type ItemKey = (String, ContentCategory, String);

/// In-memory store with per-item rejection and an "unavailable after N upserts" switch.
#[derive(Default)]
pub(crate) struct MemoryStore {
    items: Mutex<BTreeMap<ItemKey, CatalogItem>>,
    failures: Mutex<Vec<FailureRecord>>,
    rejected_ids: HashSet<String>,
    unavailable_after: Option<usize>,
    upsert_calls: AtomicUsize,
    sync_state: Mutex<HashMap<String, (RunStatus, Option<i64>, u64)>>,
    fail_state_load: bool,
}

impl MemoryStore {
    pub(crate) fn rejecting(ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            rejected_ids: ids.into_iter().collect(),
            ..Self::default()
        }
    }

    pub(crate) fn unavailable_after(upserts: usize) -> Self {
        Self {
            unavailable_after: Some(upserts),
            ..Self::default()
        }
    }

    pub(crate) fn with_failing_state_load(mut self) -> Self {
        self.fail_state_load = true;
        self
    }

    pub(crate) fn with_last_success(self, chain_name: &str, epoch: i64) -> Self {
        self.sync_state
            .lock()
            .expect("sync_state mutex poisoned")
            .insert(chain_name.to_string(), (RunStatus::Succeeded, Some(epoch), 0));
        self
    }

    pub(crate) fn item_count(&self) -> usize {
        self.items.lock().expect("items mutex poisoned").len()
    }

    pub(crate) fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn failures(&self) -> Vec<FailureRecord> {
        self.failures.lock().expect("failures mutex poisoned").clone()
    }

    pub(crate) fn recorded_status(
        &self,
        chain_name: &str,
    ) -> Option<(RunStatus, Option<i64>, u64)> {
        self.sync_state
            .lock()
            .expect("sync_state mutex poisoned")
            .get(chain_name)
            .copied()
    }
}

impl CatalogStore for MemoryStore {
    fn upsert<'a>(&'a self, item: &'a CatalogItem) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let calls = self.upsert_calls.fetch_add(1, Ordering::SeqCst);
            if self.unavailable_after.is_some_and(|limit| calls >= limit) {
                return Err(StoreError::unavailable("disk I/O error"));
            }
            if self.rejected_ids.contains(&item.provider_id) {
                return Err(StoreError::rejected(format!(
                    "constraint failed for {}",
                    item.provider_id
                )));
            }
            self.items.lock().expect("items mutex poisoned").insert(
                (
                    item.source_key.clone(),
                    item.category,
                    item.provider_id.clone(),
                ),
                item.clone(),
            );
            Ok(())
        })
    }

    fn record_failure<'a>(
        &'a self,
        record: &'a FailureRecord,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.failures
                .lock()
                .expect("failures mutex poisoned")
                .push(record.clone());
            Ok(())
        })
    }
}

impl SyncStateStore for MemoryStore {
    fn load_last_success<'a>(
        &'a self,
        chain_name: &'a str,
    ) -> BoxFuture<'a, Result<Option<i64>, StoreError>> {
        Box::pin(async move {
            if self.fail_state_load {
                return Err(StoreError::unavailable("sync_state unreadable"));
            }
            Ok(self
                .sync_state
                .lock()
                .expect("sync_state mutex poisoned")
                .get(chain_name)
                .and_then(|(_, last_success, _)| *last_success))
        })
    }

    fn record<'a>(
        &'a self,
        chain_name: &'a str,
        status: RunStatus,
        items_written: u64,
        started_at: i64,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut state = self.sync_state.lock().expect("sync_state mutex poisoned");
            let previous = state.get(chain_name).and_then(|(_, last, _)| *last);
            let last_success = success_floor(status, started_at).or(previous);
            state.insert(chain_name.to_string(), (status, last_success, items_written));
            Ok(())
        })
    }
}
