pub mod migrations;
pub mod models;
pub mod schema;

use diesel::connection::SimpleConnection;
use diesel::sqlite::SqliteConnection;
use diesel::{Connection, ConnectionError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OpenStoreError {
    #[error(transparent)]
    Connect(#[from] ConnectionError),
    #[error(transparent)]
    Query(#[from] diesel::result::Error),
    #[error("failed to run catalog migrations: {0}")]
    Migration(String),
}

/// Opens (creating if needed) the on-disk catalog database and brings its schema up to date.
///
/// WAL mode lets the UI keep reading while a sync writes; the busy timeout covers the short
/// windows where both sides want the write lock.
pub fn open_catalog_db(path: &str) -> Result<SqliteConnection, OpenStoreError> {
    let mut conn = SqliteConnection::establish(path)?;

    conn.batch_execute(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        "#,
    )?;

    migrations::run_migrations(&mut conn)
        .map_err(|err| OpenStoreError::Migration(err.to_string()))?;

    Ok(conn)
}
