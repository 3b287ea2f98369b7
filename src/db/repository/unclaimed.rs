use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{from_db_timestamp, to_db_timestamp, DatabaseError};
use crate::models::enums::EventType;
use crate::models::*;

const ENTRY_COLUMNS: &str = "id, item_id, event_type, patient_case_id, jurisdiction, condition,
                             locked, expires_at, provider_id, enqueued_at";

/// Raw column values; converted after the statement finishes so enum and
/// timestamp errors surface as `DatabaseError` rather than rusqlite errors.
struct EntryRow {
    id: i64,
    item_id: i64,
    event_type: String,
    patient_case_id: i64,
    jurisdiction: String,
    condition: String,
    locked: bool,
    expires_at: Option<String>,
    provider_id: Option<i64>,
    enqueued_at: String,
}

impl EntryRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            item_id: row.get(1)?,
            event_type: row.get(2)?,
            patient_case_id: row.get(3)?,
            jurisdiction: row.get(4)?,
            condition: row.get(5)?,
            locked: row.get::<_, i32>(6)? != 0,
            expires_at: row.get(7)?,
            provider_id: row.get(8)?,
            enqueued_at: row.get(9)?,
        })
    }

    fn into_entry(self) -> Result<UnclaimedQueueEntry, DatabaseError> {
        let lock = match (self.locked, self.provider_id, self.expires_at) {
            (true, Some(provider_id), Some(expires_at)) => Some(ClaimLock {
                provider_id,
                expires_at: from_db_timestamp("expires_at", &expires_at)?,
            }),
            (true, _, _) => {
                return Err(DatabaseError::ConstraintViolation(format!(
                    "unclaimed entry {} is locked without claimant or expiry",
                    self.id
                )))
            }
            (false, _, _) => None,
        };

        Ok(UnclaimedQueueEntry {
            id: self.id,
            item_id: self.item_id,
            event_type: EventType::from_str(&self.event_type)?,
            patient_case_id: self.patient_case_id,
            care: CareJurisdiction {
                jurisdiction: self.jurisdiction,
                condition: self.condition,
            },
            lock,
            enqueued_at: from_db_timestamp("enqueued_at", &self.enqueued_at)?,
        })
    }
}

fn collect_entries(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<UnclaimedQueueEntry>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, EntryRow::read)?;

    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?.into_entry()?);
    }
    Ok(entries)
}

/// Insert an unlocked entry and return its row id.
pub fn insert_unclaimed_entry(
    conn: &Connection,
    item_id: i64,
    event_type: EventType,
    patient_case_id: i64,
    care: &CareJurisdiction,
    enqueued_at: &DateTime<Utc>,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO unclaimed_queue
         (item_id, event_type, patient_case_id, jurisdiction, condition, locked, enqueued_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
        params![
            item_id,
            event_type.as_str(),
            patient_case_id,
            care.jurisdiction,
            care.condition,
            to_db_timestamp(enqueued_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_unclaimed_entry(
    conn: &Connection,
    item_id: i64,
    event_type: EventType,
) -> Result<Option<UnclaimedQueueEntry>, DatabaseError> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {ENTRY_COLUMNS} FROM unclaimed_queue WHERE item_id = ?1 AND event_type = ?2"
            ),
            params![item_id, event_type.as_str()],
            EntryRow::read,
        )
        .optional()?;
    row.map(EntryRow::into_entry).transpose()
}

/// Lock an unlocked entry for `provider_id`. Conditional on `locked = 0`, so
/// of several concurrent callers only the first to take the write lock sees
/// a non-zero row count.
pub fn lock_unclaimed_entry(
    conn: &Connection,
    item_id: i64,
    event_type: EventType,
    provider_id: i64,
    expires_at: &DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    let updated = conn.execute(
        "UPDATE unclaimed_queue SET locked = 1, provider_id = ?1, expires_at = ?2
         WHERE item_id = ?3 AND event_type = ?4 AND locked = 0",
        params![provider_id, to_db_timestamp(expires_at), item_id, event_type.as_str()],
    )?;
    Ok(updated)
}

/// Move the expiry of a lock, only if `provider_id` still holds it.
pub fn extend_unclaimed_lock(
    conn: &Connection,
    item_id: i64,
    event_type: EventType,
    provider_id: i64,
    expires_at: &DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    let updated = conn.execute(
        "UPDATE unclaimed_queue SET expires_at = ?1
         WHERE item_id = ?2 AND event_type = ?3 AND provider_id = ?4 AND locked = 1",
        params![to_db_timestamp(expires_at), item_id, event_type.as_str(), provider_id],
    )?;
    Ok(updated)
}

/// Remove an entry locked by `provider_id`.
pub fn delete_claimed_entry(
    conn: &Connection,
    item_id: i64,
    event_type: EventType,
    provider_id: i64,
) -> Result<usize, DatabaseError> {
    let deleted = conn.execute(
        "DELETE FROM unclaimed_queue
         WHERE item_id = ?1 AND event_type = ?2 AND provider_id = ?3 AND locked = 1",
        params![item_id, event_type.as_str(), provider_id],
    )?;
    Ok(deleted)
}

/// Release a lock, but only the one that was observed: the claimant and
/// expiry must still match so a renewed claim is never released.
pub fn unlock_entry(conn: &Connection, id: i64, lock: &ClaimLock) -> Result<usize, DatabaseError> {
    let updated = conn.execute(
        "UPDATE unclaimed_queue SET locked = 0, provider_id = NULL, expires_at = NULL
         WHERE id = ?1 AND locked = 1 AND provider_id = ?2 AND expires_at = ?3",
        params![id, lock.provider_id, to_db_timestamp(&lock.expires_at)],
    )?;
    Ok(updated)
}

pub fn get_locked_entries(conn: &Connection) -> Result<Vec<UnclaimedQueueEntry>, DatabaseError> {
    collect_entries(
        conn,
        &format!("SELECT {ENTRY_COLUMNS} FROM unclaimed_queue WHERE locked = 1 ORDER BY enqueued_at, id"),
        params![],
    )
}

/// Locked entries whose expiry is at or before `now`.
pub fn get_expired_locks(
    conn: &Connection,
    now: &DateTime<Utc>,
) -> Result<Vec<UnclaimedQueueEntry>, DatabaseError> {
    collect_entries(
        conn,
        &format!(
            "SELECT {ENTRY_COLUMNS} FROM unclaimed_queue
             WHERE locked = 1 AND expires_at <= ?1 ORDER BY enqueued_at, id"
        ),
        params![to_db_timestamp(now)],
    )
}

/// Entries that are either free or already locked by `provider_id`, oldest first.
pub fn get_claimable_entries(
    conn: &Connection,
    provider_id: i64,
) -> Result<Vec<UnclaimedQueueEntry>, DatabaseError> {
    collect_entries(
        conn,
        &format!(
            "SELECT {ENTRY_COLUMNS} FROM unclaimed_queue
             WHERE locked = 0 OR (locked = 1 AND provider_id = ?1)
             ORDER BY enqueued_at, id"
        ),
        params![provider_id],
    )
}

/// Number of entries `provider_id` currently holds on any case of `patient_id`.
pub fn count_locks_for_patient(
    conn: &Connection,
    provider_id: i64,
    patient_id: i64,
) -> Result<i64, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM unclaimed_queue q
         JOIN patient_cases c ON c.id = q.patient_case_id
         WHERE q.locked = 1 AND q.provider_id = ?1 AND c.patient_id = ?2",
        params![provider_id, patient_id],
        |row| row.get::<_, i64>(0),
    )?;
    Ok(count)
}
