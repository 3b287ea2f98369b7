//! Event wiring between upstream workflow events and the two queues.
//!
//! Each method is what a listener for one event does: move the case through
//! the claim protocol when it is still in the jump-ball queue, and keep the
//! provider's work queue in step.

use std::sync::Arc;

use rusqlite::Connection;
use thiserror::Error;

use crate::claim::{AssignmentOutcome, ClaimError, ClaimQueue};
use crate::db::{self, DatabaseError};
use crate::models::enums::{CaseStatus, EventType, QueueStatus};
use crate::models::{ClaimLock, PatientCase, UnclaimedQueueEntry, WorkQueueItem};
use crate::work_queue::{WorkQueue, WorkQueueError};

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error(transparent)]
    Claim(#[from] ClaimError),

    #[error(transparent)]
    WorkQueue(#[from] WorkQueueError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// What `visit_opened` did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisitOpened {
    pub claim: Option<ClaimLock>,
    pub work_item: Option<WorkQueueItem>,
}

/// What closing a visit (treatment plan or triage) did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisitClosed {
    pub assignment: Option<AssignmentOutcome>,
    pub work_item: Option<WorkQueueItem>,
}

pub struct Coordinator {
    claims: Arc<ClaimQueue>,
    work: WorkQueue,
}

impl Coordinator {
    pub fn new(claims: Arc<ClaimQueue>, work: WorkQueue) -> Self {
        Self { claims, work }
    }

    pub fn claims(&self) -> &ClaimQueue {
        &self.claims
    }

    pub fn work_queue(&self) -> &WorkQueue {
        &self.work
    }

    /// A patient submitted a visit on a case nobody is assigned to yet.
    pub fn visit_submitted(
        &self,
        conn: &Connection,
        case_id: i64,
        visit_id: i64,
    ) -> Result<UnclaimedQueueEntry, CoordinatorError> {
        Ok(self
            .claims
            .enqueue_unclaimed(conn, case_id, visit_id, EventType::Visit)?)
    }

    /// A visit was routed straight to a provider already caring for the patient.
    pub fn visit_routed_to_provider(
        &self,
        conn: &Connection,
        provider_id: i64,
        visit_id: i64,
    ) -> Result<WorkQueueItem, CoordinatorError> {
        Ok(self.work.enqueue(conn, provider_id, EventType::Visit, visit_id)?)
    }

    /// A provider opened a visit for review.
    ///
    /// Takes a temporary claim while the case is unclaimed, and marks the
    /// provider's queued item as in progress.
    pub fn visit_opened(
        &self,
        conn: &Connection,
        provider_id: i64,
        case_id: i64,
        visit_id: i64,
    ) -> Result<VisitOpened, CoordinatorError> {
        let case = find_case(conn, case_id)?;

        let claim = if case.status == CaseStatus::Unclaimed {
            Some(self.claims.temporarily_claim(
                conn,
                provider_id,
                case_id,
                case.patient_id,
                visit_id,
                EventType::Visit,
                self.claims.claim_duration(),
            )?)
        } else {
            None
        };

        let queued =
            db::get_work_item(conn, provider_id, EventType::Visit, visit_id, QueueStatus::Pending)?;
        let work_item = match queued {
            Some(_) => Some(self.work.transition_status(
                conn,
                provider_id,
                visit_id,
                EventType::Visit,
                QueueStatus::Pending,
                QueueStatus::Ongoing,
            )?),
            None => None,
        };

        Ok(VisitOpened { claim, work_item })
    }

    /// The provider is still working on the visit; keep the claim alive.
    pub fn visit_modified(
        &self,
        conn: &Connection,
        provider_id: i64,
        case_id: i64,
        visit_id: i64,
    ) -> Result<Option<ClaimLock>, CoordinatorError> {
        if find_case(conn, case_id)?.status != CaseStatus::TempClaimed {
            return Ok(None);
        }
        let lock = self.claims.extend_claim(
            conn,
            provider_id,
            visit_id,
            EventType::Visit,
            self.claims.claim_duration(),
        )?;
        Ok(Some(lock))
    }

    pub fn treatment_plan_submitted(
        &self,
        conn: &Connection,
        provider_id: i64,
        case_id: i64,
        visit_id: i64,
    ) -> Result<VisitClosed, CoordinatorError> {
        self.close_visit(conn, provider_id, case_id, visit_id, QueueStatus::Completed)
    }

    pub fn visit_triaged(
        &self,
        conn: &Connection,
        provider_id: i64,
        case_id: i64,
        visit_id: i64,
    ) -> Result<VisitClosed, CoordinatorError> {
        self.close_visit(conn, provider_id, case_id, visit_id, QueueStatus::Triaged)
    }

    pub fn refill_requested(
        &self,
        conn: &Connection,
        provider_id: i64,
        refill_request_id: i64,
    ) -> Result<WorkQueueItem, CoordinatorError> {
        Ok(self
            .work
            .enqueue(conn, provider_id, EventType::RefillRequest, refill_request_id)?)
    }

    pub fn refill_resolved(
        &self,
        conn: &Connection,
        provider_id: i64,
        refill_request_id: i64,
        approved: bool,
    ) -> Result<Option<WorkQueueItem>, CoordinatorError> {
        let to = if approved {
            QueueStatus::RefillApproved
        } else {
            QueueStatus::RefillDenied
        };
        self.finish_open_item(conn, provider_id, EventType::RefillRequest, refill_request_id, to)
    }

    pub fn transmission_error(
        &self,
        conn: &Connection,
        provider_id: i64,
        treatment_id: i64,
    ) -> Result<WorkQueueItem, CoordinatorError> {
        Ok(self
            .work
            .enqueue(conn, provider_id, EventType::TransmissionError, treatment_id)?)
    }

    pub fn transmission_error_resolved(
        &self,
        conn: &Connection,
        provider_id: i64,
        treatment_id: i64,
    ) -> Result<Option<WorkQueueItem>, CoordinatorError> {
        self.finish_open_item(
            conn,
            provider_id,
            EventType::TransmissionError,
            treatment_id,
            QueueStatus::Completed,
        )
    }

    fn close_visit(
        &self,
        conn: &Connection,
        provider_id: i64,
        case_id: i64,
        visit_id: i64,
        to: QueueStatus,
    ) -> Result<VisitClosed, CoordinatorError> {
        let case = find_case(conn, case_id)?;

        let assignment = if case.status == CaseStatus::TempClaimed {
            Some(self.claims.permanently_assign(
                conn,
                provider_id,
                case_id,
                case.patient_id,
                visit_id,
                EventType::Visit,
            )?)
        } else {
            None
        };

        let work_item = self.finish_open_item(conn, provider_id, EventType::Visit, visit_id, to)?;
        Ok(VisitClosed {
            assignment,
            work_item,
        })
    }

    /// Move whichever open row the item has to `to`. A missing row is logged
    /// and reported as `None`.
    fn finish_open_item(
        &self,
        conn: &Connection,
        provider_id: i64,
        event_type: EventType,
        item_id: i64,
        to: QueueStatus,
    ) -> Result<Option<WorkQueueItem>, CoordinatorError> {
        for from in [QueueStatus::Ongoing, QueueStatus::Pending] {
            if db::get_work_item(conn, provider_id, event_type, item_id, from)?.is_some() {
                let item = self
                    .work
                    .transition_status(conn, provider_id, item_id, event_type, from, to)?;
                return Ok(Some(item));
            }
        }
        tracing::warn!(
            provider_id,
            item_id,
            event_type = %event_type,
            "No open work item to close"
        );
        Ok(None)
    }
}

fn find_case(conn: &Connection, case_id: i64) -> Result<PatientCase, CoordinatorError> {
    db::get_patient_case(conn, case_id)?.ok_or_else(|| {
        CoordinatorError::Database(DatabaseError::NotFound {
            entity_type: "PatientCase".into(),
            id: case_id.to_string(),
        })
    })
}
