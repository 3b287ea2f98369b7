use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::case::CareJurisdiction;
use super::enums::{EventType, QueueStatus};

/// Lock held on an unclaimed entry. Present only while the entry is locked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimLock {
    pub provider_id: i64,
    pub expires_at: DateTime<Utc>,
}

/// One row of the unclaimed item ledger, unique per (item_id, event_type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnclaimedQueueEntry {
    pub id: i64,
    pub item_id: i64,
    pub event_type: EventType,
    pub patient_case_id: i64,
    pub care: CareJurisdiction,
    pub lock: Option<ClaimLock>,
    pub enqueued_at: DateTime<Utc>,
}

impl UnclaimedQueueEntry {
    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    pub fn claimant(&self) -> Option<i64> {
        self.lock.as_ref().map(|l| l.provider_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkQueueItem {
    pub id: i64,
    pub provider_id: i64,
    pub event_type: EventType,
    pub item_id: i64,
    pub status: QueueStatus,
    pub enqueue_date: DateTime<Utc>,
    pub completed_date: Option<DateTime<Utc>>,
}
