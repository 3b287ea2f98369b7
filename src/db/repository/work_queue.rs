use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{from_db_timestamp, to_db_timestamp, DatabaseError};
use crate::models::enums::{EventType, QueueStatus};
use crate::models::WorkQueueItem;

const ITEM_COLUMNS: &str =
    "id, provider_id, event_type, item_id, status, enqueue_date, completed_date";

/// Which slice of a queue to read, and in which order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkQueueView {
    /// PENDING and ONGOING, oldest first.
    Open,
    /// Everything else, most recent first.
    Closed,
}

struct ItemRow {
    id: i64,
    provider_id: i64,
    event_type: String,
    item_id: i64,
    status: String,
    enqueue_date: String,
    completed_date: Option<String>,
}

impl ItemRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            provider_id: row.get(1)?,
            event_type: row.get(2)?,
            item_id: row.get(3)?,
            status: row.get(4)?,
            enqueue_date: row.get(5)?,
            completed_date: row.get(6)?,
        })
    }

    fn into_item(self) -> Result<WorkQueueItem, DatabaseError> {
        Ok(WorkQueueItem {
            id: self.id,
            provider_id: self.provider_id,
            event_type: EventType::from_str(&self.event_type)?,
            item_id: self.item_id,
            status: QueueStatus::from_str(&self.status)?,
            enqueue_date: from_db_timestamp("enqueue_date", &self.enqueue_date)?,
            completed_date: self
                .completed_date
                .map(|d| from_db_timestamp("completed_date", &d))
                .transpose()?,
        })
    }
}

pub fn insert_work_item(
    conn: &Connection,
    provider_id: i64,
    event_type: EventType,
    item_id: i64,
    status: QueueStatus,
    enqueue_date: &DateTime<Utc>,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO work_queue (provider_id, event_type, item_id, status, enqueue_date)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            provider_id,
            event_type.as_str(),
            item_id,
            status.as_str(),
            to_db_timestamp(enqueue_date),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_work_item(
    conn: &Connection,
    provider_id: i64,
    event_type: EventType,
    item_id: i64,
    status: QueueStatus,
) -> Result<Option<WorkQueueItem>, DatabaseError> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {ITEM_COLUMNS} FROM work_queue
                 WHERE provider_id = ?1 AND event_type = ?2 AND item_id = ?3 AND status = ?4"
            ),
            params![provider_id, event_type.as_str(), item_id, status.as_str()],
            ItemRow::read,
        )
        .optional()?;
    row.map(ItemRow::into_item).transpose()
}

/// Change the status of one row in place. Identity and `enqueue_date` are
/// untouched, so the item keeps its position. Returns rows updated.
pub fn update_work_item_status(
    conn: &Connection,
    provider_id: i64,
    event_type: EventType,
    item_id: i64,
    from: QueueStatus,
    to: QueueStatus,
    completed_date: Option<&DateTime<Utc>>,
) -> Result<usize, DatabaseError> {
    let updated = conn.execute(
        "UPDATE work_queue SET status = ?1, completed_date = ?2
         WHERE provider_id = ?3 AND event_type = ?4 AND item_id = ?5 AND status = ?6",
        params![
            to.as_str(),
            completed_date.map(to_db_timestamp),
            provider_id,
            event_type.as_str(),
            item_id,
            from.as_str(),
        ],
    )?;
    Ok(updated)
}

pub fn delete_work_item(
    conn: &Connection,
    provider_id: i64,
    event_type: EventType,
    item_id: i64,
    status: QueueStatus,
) -> Result<usize, DatabaseError> {
    let deleted = conn.execute(
        "DELETE FROM work_queue
         WHERE provider_id = ?1 AND event_type = ?2 AND item_id = ?3 AND status = ?4",
        params![provider_id, event_type.as_str(), item_id, status.as_str()],
    )?;
    Ok(deleted)
}

/// Read one provider's queue, or every provider's when `provider_id` is `None`.
pub fn get_work_items(
    conn: &Connection,
    provider_id: Option<i64>,
    view: WorkQueueView,
) -> Result<Vec<WorkQueueItem>, DatabaseError> {
    let (membership, order) = match view {
        WorkQueueView::Open => ("IN", "ASC"),
        WorkQueueView::Closed => ("NOT IN", "DESC"),
    };
    let sql = format!(
        "SELECT {ITEM_COLUMNS} FROM work_queue
         WHERE (?1 IS NULL OR provider_id = ?1) AND status {membership} (?2, ?3)
         ORDER BY enqueue_date {order}, id {order}"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![
            provider_id,
            QueueStatus::Pending.as_str(),
            QueueStatus::Ongoing.as_str(),
        ],
        ItemRow::read,
    )?;

    let mut items = Vec::new();
    for row in rows {
        items.push(row?.into_item()?);
    }
    Ok(items)
}
