use diesel::result::{DatabaseErrorKind, Error as DieselError};

use crate::sync_service::types::StoreError;

/// SQLite messages that mean the database file itself is gone or unusable.
const UNAVAILABLE_MARKERS: [&str; 6] = [
    "disk i/o",
    "readonly",
    "unable to open",
    "malformed",
    "no such table",
    "database or disk is full",
];

pub fn map_diesel_error(error: DieselError) -> StoreError {
    match error {
        DieselError::DatabaseError(kind, info) => match kind {
            DatabaseErrorKind::ClosedConnection | DatabaseErrorKind::UnableToSendCommand => {
                StoreError::unavailable(format!(
                    "database connection lost ({kind:?}): {}",
                    info.message()
                ))
            }
            DatabaseErrorKind::UniqueViolation
            | DatabaseErrorKind::ForeignKeyViolation
            | DatabaseErrorKind::NotNullViolation
            | DatabaseErrorKind::CheckViolation => StoreError::rejected(format!(
                "constraint violation ({kind:?}): {}",
                info.message()
            )),
            _ => classify_message(info.message()),
        },
        DieselError::BrokenTransactionManager => {
            StoreError::unavailable("transaction manager is in a broken state")
        }
        other => StoreError::rejected(format!("diesel error: {other}")),
    }
}

fn classify_message(message: &str) -> StoreError {
    let lowered = message.to_ascii_lowercase();
    if UNAVAILABLE_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        StoreError::unavailable(format!("database unavailable: {message}"))
    } else {
        // "database is locked" lands here: the item is skipped, the run goes on.
        StoreError::rejected(format!("database error: {message}"))
    }
}
