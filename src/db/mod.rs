pub mod sqlite;
pub mod repository;

pub use sqlite::*;
pub use repository::*;

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;

/// Fixed-width UTC format so lexical order matches chronological order.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid enum value for {field}: {value}")]
    InvalidEnum { field: String, value: String },

    #[error("Invalid timestamp in {field}: {value}")]
    InvalidTimestamp { field: String, value: String },

    #[error("Migration failed at version {version}: {reason}")]
    MigrationFailed { version: i64, reason: String },

    #[error("Constraint violated: {0}")]
    ConstraintViolation(String),
}

/// Render a timestamp the way every table stores it.
pub fn to_db_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored timestamp. `field` names the column for the error message.
pub fn from_db_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| DatabaseError::InvalidTimestamp {
            field: field.into(),
            value: value.into(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn timestamps_sort_lexically() {
        let early = Utc.with_ymd_and_hms(2024, 9, 1, 8, 0, 0).unwrap();
        let late = early + Duration::microseconds(1);
        assert!(to_db_timestamp(&early) < to_db_timestamp(&late));
    }

    #[test]
    fn timestamp_parses_back() {
        let ts = Utc.with_ymd_and_hms(2024, 9, 1, 8, 30, 15).unwrap() + Duration::microseconds(250);
        let stored = to_db_timestamp(&ts);
        assert_eq!(stored, "2024-09-01T08:30:15.000250Z");
        assert_eq!(from_db_timestamp("enqueued_at", &stored).unwrap(), ts);
    }

    #[test]
    fn malformed_timestamp_names_the_column() {
        let err = from_db_timestamp("expires_at", "yesterday").unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::InvalidTimestamp { ref field, .. } if field == "expires_at"
        ));
    }
}
