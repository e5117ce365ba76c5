use super::schema::{catalog_items, ingest_failures, sync_state};
use crate::{CatalogItem, ContentCategory};
use diesel::dsl::insert_into;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

/// Row shape of `catalog_items`.
///
/// `playback_json` holds the serialized `PlaybackHint`; the UI decodes it only when an item is
/// actually opened, so it is stored opaque rather than spread across columns.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = catalog_items)]
#[diesel(primary_key(source_key, category, provider_id))]
#[diesel(treat_none_as_null = true)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CatalogItemRow {
    pub source_key: String,
    pub category: String,
    pub provider_id: String,
    pub title: String,
    pub category_id: Option<String>,
    pub series_id: Option<String>,
    pub season: Option<i32>,
    pub episode: Option<i32>,
    pub image_url: Option<String>,
    pub plot: Option<String>,
    pub duration_secs: Option<i64>,
    pub air_date: Option<String>,
    pub rating: Option<f64>,
    pub added_at: Option<i64>,
    pub playback_json: String,
    pub updated_at: i64,
}

impl CatalogItemRow {
    pub fn from_item(item: &CatalogItem, updated_at: i64) -> Result<Self, serde_json::Error> {
        Ok(Self {
            source_key: item.source_key.clone(),
            category: item.category.as_db_str().to_string(),
            provider_id: item.provider_id.clone(),
            title: item.title.clone(),
            category_id: item.category_id.clone(),
            series_id: item.series_id.clone(),
            season: item.season,
            episode: item.episode,
            image_url: item.image_url.clone(),
            plot: item.plot.clone(),
            duration_secs: item.duration_secs,
            air_date: item.air_date.clone(),
            rating: item.rating,
            added_at: item.added_at,
            playback_json: serde_json::to_string(&item.playback)?,
            updated_at,
        })
    }

    /// Inserts the row or overwrites every non-key column of the existing one.
    ///
    /// Keyed on `(source_key, category, provider_id)`, so replaying a scan never duplicates.
    pub fn upsert(conn: &mut SqliteConnection, row: &CatalogItemRow) -> QueryResult<usize> {
        insert_into(catalog_items::table)
            .values(row)
            .on_conflict((
                catalog_items::source_key,
                catalog_items::category,
                catalog_items::provider_id,
            ))
            .do_update()
            .set(row)
            .execute(conn)
    }

    pub fn find(
        conn: &mut SqliteConnection,
        source_key: &str,
        category: ContentCategory,
        provider_id: &str,
    ) -> QueryResult<Option<CatalogItemRow>> {
        catalog_items::table
            .filter(catalog_items::source_key.eq(source_key))
            .filter(catalog_items::category.eq(category.as_db_str()))
            .filter(catalog_items::provider_id.eq(provider_id))
            .select(CatalogItemRow::as_select())
            .first(conn)
            .optional()
    }

    pub fn count(
        conn: &mut SqliteConnection,
        source_key: &str,
        category: Option<ContentCategory>,
    ) -> QueryResult<i64> {
        let mut query = catalog_items::table
            .filter(catalog_items::source_key.eq(source_key))
            .into_boxed();
        if let Some(category) = category {
            query = query.filter(catalog_items::category.eq(category.as_db_str()));
        }
        query.count().get_result(conn)
    }
}

/// Per-item write failure kept for triage; one row per failed write attempt.
#[derive(Debug, Clone, PartialEq, Eq, Insertable)]
#[diesel(table_name = ingest_failures)]
pub struct NewIngestFailure {
    pub run_id: String,
    pub source_key: String,
    pub phase: String,
    pub provider_id: String,
    pub failure_class: String,
    pub last_error: Option<String>,
    pub recorded_at: i64,
}

impl NewIngestFailure {
    pub fn insert(conn: &mut SqliteConnection, record: &NewIngestFailure) -> QueryResult<usize> {
        insert_into(ingest_failures::table)
            .values(record)
            .execute(conn)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable)]
#[diesel(table_name = ingest_failures)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct IngestFailureRow {
    pub id: i32,
    pub run_id: String,
    pub source_key: String,
    pub phase: String,
    pub provider_id: String,
    pub failure_class: String,
    pub last_error: Option<String>,
    pub recorded_at: i64,
}

impl IngestFailureRow {
    pub fn load_for_run(
        conn: &mut SqliteConnection,
        run_id: &str,
    ) -> QueryResult<Vec<IngestFailureRow>> {
        ingest_failures::table
            .filter(ingest_failures::run_id.eq(run_id))
            .order(ingest_failures::id.asc())
            .select(IngestFailureRow::as_select())
            .load(conn)
    }
}

/// One finished chain run, as handed to [`SyncStateRow::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainOutcome<'a> {
    pub chain_name: &'a str,
    pub last_status: &'a str,
    pub last_failure_reason: Option<&'a str>,
    pub items_written: i64,
    /// Start time of a fully successful run; `None` for partial and failed runs.
    pub success_floor: Option<i64>,
}

/// Last known outcome of one sync chain, read by the UI and by delta scans.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = sync_state)]
#[diesel(primary_key(chain_name))]
#[diesel(treat_none_as_null = true)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SyncStateRow {
    pub chain_name: String,
    pub last_success_at: Option<i64>,
    pub last_status: String,
    pub last_failure_reason: Option<String>,
    pub items_written: i64,
    pub updated_at: i64,
}

impl SyncStateRow {
    pub fn load(conn: &mut SqliteConnection, chain_name: &str) -> QueryResult<Option<Self>> {
        sync_state::table
            .find(chain_name)
            .select(SyncStateRow::as_select())
            .first(conn)
            .optional()
    }

    /// Records a finished chain run.
    ///
    /// `last_success_at` moves only when the outcome carries a `success_floor`; any other run
    /// keeps the previous floor so the next delta scan re-reads what this one may have missed.
    pub fn record(
        conn: &mut SqliteConnection,
        outcome: &ChainOutcome<'_>,
        now: i64,
    ) -> QueryResult<SyncStateRow> {
        conn.transaction(|conn| {
            let previous_success =
                Self::load(conn, outcome.chain_name)?.and_then(|row| row.last_success_at);
            let last_success_at = outcome.success_floor.or(previous_success);

            let row = SyncStateRow {
                chain_name: outcome.chain_name.to_string(),
                last_success_at,
                last_status: outcome.last_status.to_string(),
                last_failure_reason: outcome.last_failure_reason.map(str::to_string),
                items_written: outcome.items_written,
                updated_at: now,
            };

            insert_into(sync_state::table)
                .values(&row)
                .on_conflict(sync_state::chain_name)
                .do_update()
                .set(&row)
                .execute(conn)?;

            Ok(row)
        })
    }
}
