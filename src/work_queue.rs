//! Per-provider work queues.
//!
//! Once a case is assigned, every actionable event for it lands in the
//! assigned provider's queue as a PENDING item. Items move PENDING → ONGOING
//! → terminal (or straight from PENDING to terminal for events that are
//! resolved in one step). The pending list is served oldest first; only its
//! head is directly actionable in the feed.

use std::sync::Arc;

use rusqlite::Connection;
use thiserror::Error;

use crate::clock::Clock;
use crate::db::{self, DatabaseError, WorkQueueView};
use crate::models::enums::{EventType, QueueStatus};
use crate::models::WorkQueueItem;

#[derive(Error, Debug)]
pub enum WorkQueueError {
    #[error("No {status} {event_type} item {item_id} in queue of provider {provider_id}")]
    NotFound {
        provider_id: i64,
        event_type: EventType,
        item_id: i64,
        status: QueueStatus,
    },

    #[error("{event_type} items cannot move from {from} to {to}")]
    InvalidTransition {
        event_type: EventType,
        from: QueueStatus,
        to: QueueStatus,
    },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for WorkQueueError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(DatabaseError::Sqlite(e))
    }
}

pub struct WorkQueue {
    clock: Arc<dyn Clock>,
}

impl WorkQueue {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Add a PENDING item stamped with the current time.
    ///
    /// If the item is already open (PENDING or ONGOING) in this provider's
    /// queue the existing row is returned and nothing is written, so the
    /// item keeps its place.
    pub fn enqueue(
        &self,
        conn: &Connection,
        provider_id: i64,
        event_type: EventType,
        item_id: i64,
    ) -> Result<WorkQueueItem, WorkQueueError> {
        let tx = db::begin_write(conn)?;

        for status in QueueStatus::OPEN {
            let existing = db::get_work_item(&tx, provider_id, event_type, item_id, status)?;
            if let Some(existing) = existing {
                tracing::debug!(
                    provider_id,
                    item_id,
                    event_type = %event_type,
                    "Item already queued"
                );
                return Ok(existing);
            }
        }

        let now = self.clock.now();
        db::insert_work_item(&tx, provider_id, event_type, item_id, QueueStatus::Pending, &now)?;
        let item = fetch(&tx, provider_id, event_type, item_id, QueueStatus::Pending)?;
        tx.commit()?;

        tracing::info!(provider_id, item_id, event_type = %event_type, "Item added to work queue");
        Ok(item)
    }

    /// Move an item from `from` to `to` in place.
    ///
    /// The row keeps its id and enqueue date; a terminal `to` stamps the
    /// completion date. A finished row left by an earlier round of the same
    /// item with status `to` is replaced.
    pub fn transition_status(
        &self,
        conn: &Connection,
        provider_id: i64,
        item_id: i64,
        event_type: EventType,
        from: QueueStatus,
        to: QueueStatus,
    ) -> Result<WorkQueueItem, WorkQueueError> {
        if !event_type.allows_transition(from, to) {
            return Err(WorkQueueError::InvalidTransition { event_type, from, to });
        }

        let tx = db::begin_write(conn)?;
        // Rolled back with the transaction if the update below finds no row.
        let replaced = if to.is_terminal() {
            db::delete_work_item(&tx, provider_id, event_type, item_id, to)?
        } else {
            0
        };
        if replaced > 0 {
            tracing::debug!(
                provider_id,
                item_id,
                event_type = %event_type,
                status = %to,
                "Replaced earlier finished row"
            );
        }

        let completed = to.is_terminal().then(|| self.clock.now());
        let updated = db::update_work_item_status(
            &tx,
            provider_id,
            event_type,
            item_id,
            from,
            to,
            completed.as_ref(),
        )?;
        if updated == 0 {
            return Err(WorkQueueError::NotFound {
                provider_id,
                event_type,
                item_id,
                status: from,
            });
        }
        let item = fetch(&tx, provider_id, event_type, item_id, to)?;
        tx.commit()?;

        tracing::info!(
            provider_id,
            item_id,
            event_type = %event_type,
            from = %from,
            to = %to,
            "Work item status changed"
        );
        Ok(item)
    }

    /// Drop an item from a queue entirely.
    pub fn remove(
        &self,
        conn: &Connection,
        provider_id: i64,
        item_id: i64,
        event_type: EventType,
        status: QueueStatus,
    ) -> Result<(), WorkQueueError> {
        let tx = db::begin_write(conn)?;
        if db::delete_work_item(&tx, provider_id, event_type, item_id, status)? == 0 {
            return Err(WorkQueueError::NotFound {
                provider_id,
                event_type,
                item_id,
                status,
            });
        }
        tx.commit()?;

        tracing::info!(
            provider_id,
            item_id,
            event_type = %event_type,
            status = %status,
            "Work item removed"
        );
        Ok(())
    }

    /// Open items, oldest first. Index 0 is the head of the queue.
    pub fn get_pending(
        &self,
        conn: &Connection,
        provider_id: i64,
    ) -> Result<Vec<WorkQueueItem>, WorkQueueError> {
        Ok(db::get_work_items(conn, Some(provider_id), WorkQueueView::Open)?)
    }

    /// Finished items, most recent first.
    pub fn get_completed(
        &self,
        conn: &Connection,
        provider_id: i64,
    ) -> Result<Vec<WorkQueueItem>, WorkQueueError> {
        Ok(db::get_work_items(conn, Some(provider_id), WorkQueueView::Closed)?)
    }

    /// Open items across every provider, oldest first.
    pub fn get_pending_for_all(
        &self,
        conn: &Connection,
    ) -> Result<Vec<WorkQueueItem>, WorkQueueError> {
        Ok(db::get_work_items(conn, None, WorkQueueView::Open)?)
    }

    pub fn get_completed_for_all(
        &self,
        conn: &Connection,
    ) -> Result<Vec<WorkQueueItem>, WorkQueueError> {
        Ok(db::get_work_items(conn, None, WorkQueueView::Closed)?)
    }
}

/// Position of an item in an already ordered list.
pub fn position_in_queue(
    items: &[WorkQueueItem],
    event_type: EventType,
    item_id: i64,
) -> Option<usize> {
    items
        .iter()
        .position(|i| i.event_type == event_type && i.item_id == item_id)
}

fn fetch(
    conn: &Connection,
    provider_id: i64,
    event_type: EventType,
    item_id: i64,
    status: QueueStatus,
) -> Result<WorkQueueItem, WorkQueueError> {
    db::get_work_item(conn, provider_id, event_type, item_id, status)?.ok_or(
        WorkQueueError::NotFound {
            provider_id,
            event_type,
            item_id,
            status,
        },
    )
}
