//! Jump-ball claim queue.
//!
//! Incoming cases sit in the unclaimed queue, visible to every provider in
//! their eligibility pool. The first provider to lock an entry holds a
//! temporary, expiring claim and gets TEMP assignments on the patient and
//! the case. The holder can extend the claim while working and finally
//! promote it to a permanent (ACTIVE) assignment. Claims that lapse are
//! released by the sweeper.
//!
//! Every operation runs in one IMMEDIATE transaction: the ownership check
//! and the write it guards are a single conditional UPDATE, and any failure
//! rolls back the whole operation.

pub mod eligibility;
pub mod sweeper;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use thiserror::Error;

use crate::clock::Clock;
use crate::config::QueueConfig;
use crate::db::{self, DatabaseError};
use crate::models::enums::{AssignmentStatus, CaseStatus, EventType};
use crate::models::{AssignmentScope, CareJurisdiction, ClaimLock, UnclaimedQueueEntry};

pub use eligibility::{EligibilityResolver, SqliteEligibility};
pub use sweeper::{start_claim_sweeper, start_configured_sweeper, SweeperHandle};

#[derive(Error, Debug)]
pub enum ClaimError {
    /// Ownership precondition failed. Not retryable without a fresh claim.
    #[error("Claim forbidden: {0}")]
    ClaimForbidden(String),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Provider {provider_id} is not eligible to serve {jurisdiction}/{condition}")]
    NotEligible {
        provider_id: i64,
        jurisdiction: String,
        condition: String,
    },

    #[error("Claim duration {0} puts the expiry out of range")]
    DurationOutOfRange(Duration),

    #[error("Database error: {0}")]
    Database(DatabaseError),
}

impl From<DatabaseError> for ClaimError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound { entity_type, id } => Self::NotFound { entity_type, id },
            other => Self::Database(other),
        }
    }
}

impl From<rusqlite::Error> for ClaimError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(DatabaseError::Sqlite(e))
    }
}

impl ClaimError {
    fn forbidden(reason: &str) -> Self {
        Self::ClaimForbidden(reason.to_string())
    }

    /// Storage failures leave no partial state, so the whole call can be
    /// retried. Constraint violations fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(DatabaseError::Sqlite(e)) => {
                e.sqlite_error_code() != Some(rusqlite::ErrorCode::ConstraintViolation)
            }
            _ => false,
        }
    }
}

/// Result of a permanent assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssignmentOutcome {
    /// False when no locked entry held by the provider was left to delete.
    pub queue_entry_removed: bool,
}

/// A lock the sweeper released.
#[derive(Debug, Clone)]
pub struct ReleasedClaim {
    pub entry: UnclaimedQueueEntry,
    pub lock: ClaimLock,
}

pub struct ClaimQueue {
    role_type_id: i64,
    claim_duration: Duration,
    clock: Arc<dyn Clock>,
    eligibility: Arc<dyn EligibilityResolver>,
}

impl ClaimQueue {
    pub fn new(
        config: &QueueConfig,
        clock: Arc<dyn Clock>,
        eligibility: Arc<dyn EligibilityResolver>,
    ) -> Self {
        Self {
            role_type_id: config.provider_role_type_id,
            claim_duration: config.claim_duration(),
            clock,
            eligibility,
        }
    }

    pub fn role_type_id(&self) -> i64 {
        self.role_type_id
    }

    /// Default claim length, used when callers have no reason to pick another.
    pub fn claim_duration(&self) -> Duration {
        self.claim_duration
    }

    /// Put an item for `case_id` into the unclaimed queue, scoped to the
    /// case's eligibility pool.
    pub fn enqueue_unclaimed(
        &self,
        conn: &Connection,
        case_id: i64,
        item_id: i64,
        event_type: EventType,
    ) -> Result<UnclaimedQueueEntry, ClaimError> {
        let tx = db::begin_write(conn)?;
        let case = db::get_patient_case(&tx, case_id)?.ok_or_else(|| ClaimError::NotFound {
            entity_type: "PatientCase".into(),
            id: case_id.to_string(),
        })?;

        let id = db::insert_unclaimed_entry(
            &tx,
            item_id,
            event_type,
            case_id,
            &case.care,
            &self.clock.now(),
        )?;
        let entry = db::get_unclaimed_entry(&tx, item_id, event_type)?.ok_or_else(|| {
            ClaimError::NotFound {
                entity_type: "UnclaimedQueueEntry".into(),
                id: id.to_string(),
            }
        })?;
        tx.commit()?;

        tracing::info!(
            item_id,
            event_type = %event_type,
            case_id,
            jurisdiction = %case.care.jurisdiction,
            condition = %case.care.condition,
            "Item entered unclaimed queue"
        );
        Ok(entry)
    }

    /// Reserve an unclaimed item for `provider_id` for `duration`.
    ///
    /// Marks the case TEMP_CLAIMED, locks the queue entry and creates TEMP
    /// assignments on the patient and the case. Fails with `ClaimForbidden`
    /// if the entry is already locked by anyone.
    #[allow(clippy::too_many_arguments)]
    pub fn temporarily_claim(
        &self,
        conn: &Connection,
        provider_id: i64,
        case_id: i64,
        patient_id: i64,
        item_id: i64,
        event_type: EventType,
        duration: Duration,
    ) -> Result<ClaimLock, ClaimError> {
        let tx = db::begin_write(conn)?;

        let entry = db::get_unclaimed_entry(&tx, item_id, event_type)?.ok_or_else(|| {
            ClaimError::NotFound {
                entity_type: "UnclaimedQueueEntry".into(),
                id: format!("{item_id}/{event_type}"),
            }
        })?;
        if entry.patient_case_id != case_id {
            return Err(ClaimError::forbidden("item does not belong to case"));
        }
        let case = db::get_patient_case(&tx, case_id)?.ok_or_else(|| ClaimError::NotFound {
            entity_type: "PatientCase".into(),
            id: case_id.to_string(),
        })?;
        if case.patient_id != patient_id {
            return Err(ClaimError::forbidden("case does not belong to patient"));
        }
        if !self
            .eligibility
            .is_eligible(&tx, provider_id, self.role_type_id, &entry.care)?
        {
            return Err(not_eligible(provider_id, &entry.care));
        }

        let expires_at = self.expiry_after(duration)?;
        db::set_case_status(&tx, case_id, CaseStatus::TempClaimed)?;

        if db::lock_unclaimed_entry(&tx, item_id, event_type, provider_id, &expires_at)? == 0 {
            return Err(ClaimError::forbidden("item already claimed"));
        }

        db::upsert_temp_assignment(
            &tx,
            AssignmentScope::Patient,
            provider_id,
            patient_id,
            self.role_type_id,
            &expires_at,
        )?;
        db::upsert_temp_assignment(
            &tx,
            AssignmentScope::Case,
            provider_id,
            case_id,
            self.role_type_id,
            &expires_at,
        )?;
        tx.commit()?;

        tracing::info!(
            provider_id,
            item_id,
            event_type = %event_type,
            case_id,
            expires_at = %expires_at,
            "Item temporarily claimed"
        );
        Ok(ClaimLock { provider_id, expires_at })
    }

    /// Push out the expiry of a claim `provider_id` still holds.
    ///
    /// The write is conditional on the caller being the current holder;
    /// zero rows affected means the claim is gone or someone else has it.
    pub fn extend_claim(
        &self,
        conn: &Connection,
        provider_id: i64,
        item_id: i64,
        event_type: EventType,
        duration: Duration,
    ) -> Result<ClaimLock, ClaimError> {
        let expires_at = self.expiry_after(duration)?;
        let tx = db::begin_write(conn)?;

        if db::extend_unclaimed_lock(&tx, item_id, event_type, provider_id, &expires_at)? == 0 {
            // Same transaction as the failed write, so this read explains it.
            let holder = db::get_unclaimed_entry(&tx, item_id, event_type)?
                .and_then(|e| e.claimant());
            return Err(match holder {
                None => ClaimError::forbidden("no longer claimed"),
                Some(_) => ClaimError::forbidden("not current holder"),
            });
        }

        let entry = db::get_unclaimed_entry(&tx, item_id, event_type)?.ok_or_else(|| {
            ClaimError::NotFound {
                entity_type: "UnclaimedQueueEntry".into(),
                id: format!("{item_id}/{event_type}"),
            }
        })?;
        let case = db::get_patient_case(&tx, entry.patient_case_id)?.ok_or_else(|| {
            ClaimError::NotFound {
                entity_type: "PatientCase".into(),
                id: entry.patient_case_id.to_string(),
            }
        })?;
        db::extend_temp_assignment(
            &tx,
            AssignmentScope::Case,
            provider_id,
            case.id,
            self.role_type_id,
            &expires_at,
        )?;
        db::extend_temp_assignment(
            &tx,
            AssignmentScope::Patient,
            provider_id,
            case.patient_id,
            self.role_type_id,
            &expires_at,
        )?;
        tx.commit()?;

        tracing::debug!(
            provider_id,
            item_id,
            event_type = %event_type,
            expires_at = %expires_at,
            "Claim extended"
        );
        Ok(ClaimLock { provider_id, expires_at })
    }

    /// Turn a temporary claim into a permanent assignment.
    ///
    /// Requires TEMP assignments on both the patient and the case (an
    /// existing ACTIVE patient assignment by the same provider also counts),
    /// removes the queue entry and promotes both rows to ACTIVE.
    pub fn permanently_assign(
        &self,
        conn: &Connection,
        provider_id: i64,
        case_id: i64,
        patient_id: i64,
        item_id: i64,
        event_type: EventType,
    ) -> Result<AssignmentOutcome, ClaimError> {
        let tx = db::begin_write(conn)?;
        let role = self.role_type_id;

        let on_patient =
            db::get_assignment(&tx, AssignmentScope::Patient, provider_id, patient_id, role)?;
        if on_patient.is_none() {
            return Err(ClaimError::forbidden("not temporarily assigned to patient"));
        }
        let on_case = db::get_assignment(&tx, AssignmentScope::Case, provider_id, case_id, role)?;
        if !matches!(on_case, Some(ref a) if a.status == AssignmentStatus::Temp) {
            return Err(ClaimError::forbidden("not temporarily assigned to case"));
        }

        for (scope, subject) in [
            (AssignmentScope::Patient, patient_id),
            (AssignmentScope::Case, case_id),
        ] {
            if let Some(active) = db::get_active_provider(&tx, scope, subject, role)? {
                if active != provider_id {
                    return Err(ClaimError::forbidden("already assigned to another provider"));
                }
            }
        }

        let removed = db::delete_claimed_entry(&tx, item_id, event_type, provider_id)?;
        if removed == 0 {
            tracing::warn!(
                provider_id,
                item_id,
                event_type = %event_type,
                "No locked queue entry held by provider during permanent assignment"
            );
        }

        db::promote_assignment(&tx, AssignmentScope::Patient, provider_id, patient_id, role)?;
        db::promote_assignment(&tx, AssignmentScope::Case, provider_id, case_id, role)?;
        db::set_case_status(&tx, case_id, CaseStatus::Claimed)?;
        tx.commit()?;

        tracing::info!(provider_id, case_id, patient_id, item_id, "Provider permanently assigned");
        Ok(AssignmentOutcome {
            queue_entry_removed: removed > 0,
        })
    }

    /// Release every lock whose expiry has passed.
    ///
    /// The entry becomes claimable again, the lapsed claimant's TEMP rows are
    /// removed and a TEMP_CLAIMED case goes back to UNCLAIMED.
    pub fn release_expired_claims(
        &self,
        conn: &Connection,
    ) -> Result<Vec<ReleasedClaim>, ClaimError> {
        let tx = db::begin_write(conn)?;
        let now = self.clock.now();
        let role = self.role_type_id;

        let mut released = Vec::new();
        for entry in db::get_expired_locks(&tx, &now)? {
            let Some(lock) = entry.lock.clone() else {
                continue;
            };
            if db::unlock_entry(&tx, entry.id, &lock)? == 0 {
                continue;
            }

            db::delete_temp_assignment(
                &tx,
                AssignmentScope::Case,
                lock.provider_id,
                entry.patient_case_id,
                role,
            )?;
            if let Some(case) = db::get_patient_case(&tx, entry.patient_case_id)? {
                if db::count_locks_for_patient(&tx, lock.provider_id, case.patient_id)? == 0 {
                    db::delete_temp_assignment(
                        &tx,
                        AssignmentScope::Patient,
                        lock.provider_id,
                        case.patient_id,
                        role,
                    )?;
                }
                if case.status == CaseStatus::TempClaimed {
                    db::set_case_status(&tx, case.id, CaseStatus::Unclaimed)?;
                }
            }

            tracing::info!(
                provider_id = lock.provider_id,
                item_id = entry.item_id,
                event_type = %entry.event_type,
                expired_at = %lock.expires_at,
                "Released expired claim"
            );
            released.push(ReleasedClaim { entry, lock });
        }
        tx.commit()?;

        Ok(released)
    }

    /// Entries `provider_id` may act on: unlocked entries in its pool plus
    /// the ones it already holds, oldest first.
    pub fn eligible_items(
        &self,
        conn: &Connection,
        provider_id: i64,
    ) -> Result<Vec<UnclaimedQueueEntry>, ClaimError> {
        let mut pools: HashMap<CareJurisdiction, bool> = HashMap::new();
        let mut items = Vec::new();
        for entry in db::get_claimable_entries(conn, provider_id)? {
            let eligible = match pools.get(&entry.care) {
                Some(&known) => known,
                None => {
                    let known = self.eligibility.is_eligible(
                        conn,
                        provider_id,
                        self.role_type_id,
                        &entry.care,
                    )?;
                    pools.insert(entry.care.clone(), known);
                    known
                }
            };
            if eligible {
                items.push(entry);
            }
        }
        Ok(items)
    }

    /// Every currently locked entry.
    pub fn claimed_items(&self, conn: &Connection) -> Result<Vec<UnclaimedQueueEntry>, ClaimError> {
        Ok(db::get_locked_entries(conn)?)
    }

    fn expiry_after(&self, duration: Duration) -> Result<DateTime<Utc>, ClaimError> {
        self.clock
            .now()
            .checked_add_signed(duration)
            .ok_or(ClaimError::DurationOutOfRange(duration))
    }

    pub fn entry(
        &self,
        conn: &Connection,
        item_id: i64,
        event_type: EventType,
    ) -> Result<Option<UnclaimedQueueEntry>, ClaimError> {
        Ok(db::get_unclaimed_entry(conn, item_id, event_type)?)
    }
}

fn not_eligible(provider_id: i64, care: &CareJurisdiction) -> ClaimError {
    ClaimError::NotEligible {
        provider_id,
        jurisdiction: care.jurisdiction.clone(),
        condition: care.condition.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::open_memory_database;
    use crate::models::PatientCase;
    use chrono::TimeZone;
    use std::sync::Barrier;
    use std::thread;

    const ROLE: i64 = 1;
    const X: i64 = 7;
    const Y: i64 = 8;
    const OUTSIDER: i64 = 9;
    const CASE: i64 = 10;
    const PATIENT: i64 = 100;
    const VISIT: i64 = 42;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 1, 9, 0, 0).unwrap()
    }

    fn ca_acne() -> CareJurisdiction {
        CareJurisdiction::new("CA", "acne")
    }

    fn queue(clock: Arc<FixedClock>) -> ClaimQueue {
        ClaimQueue::new(&QueueConfig::default(), clock, Arc::new(SqliteEligibility))
    }

    fn seed(conn: &Connection, queue: &ClaimQueue) {
        for provider in [X, Y] {
            db::register_provider_eligibility(conn, provider, ROLE, &ca_acne()).unwrap();
        }
        let ny = CareJurisdiction::new("NY", "acne");
        db::register_provider_eligibility(conn, OUTSIDER, ROLE, &ny).unwrap();
        insert_case(conn, CASE, PATIENT, ca_acne());
        queue
            .enqueue_unclaimed(conn, CASE, VISIT, EventType::Visit)
            .unwrap();
    }

    fn insert_case(conn: &Connection, id: i64, patient_id: i64, care: CareJurisdiction) {
        let case = PatientCase {
            id,
            patient_id,
            care,
            status: CaseStatus::Unclaimed,
            created_at: t0(),
        };
        db::insert_patient_case(conn, &case).unwrap();
    }

    fn setup() -> (Connection, Arc<FixedClock>, ClaimQueue) {
        let conn = open_memory_database().unwrap();
        let clock = Arc::new(FixedClock::new(t0()));
        let queue = queue(clock.clone());
        seed(&conn, &queue);
        (conn, clock, queue)
    }

    fn claim(
        conn: &Connection,
        queue: &ClaimQueue,
        provider: i64,
    ) -> Result<ClaimLock, ClaimError> {
        let five = Duration::minutes(5);
        queue.temporarily_claim(conn, provider, CASE, PATIENT, VISIT, EventType::Visit, five)
    }

    fn assign(
        conn: &Connection,
        queue: &ClaimQueue,
        provider: i64,
    ) -> Result<AssignmentOutcome, ClaimError> {
        queue.permanently_assign(conn, provider, CASE, PATIENT, VISIT, EventType::Visit)
    }

    fn assignment_status(
        conn: &Connection,
        scope: AssignmentScope,
        provider: i64,
        subject: i64,
    ) -> Option<AssignmentStatus> {
        db::get_assignment(conn, scope, provider, subject, ROLE)
            .unwrap()
            .map(|a| a.status)
    }

    fn assert_forbidden(result: Result<impl std::fmt::Debug, ClaimError>, reason: &str) {
        match result {
            Err(ClaimError::ClaimForbidden(msg)) => assert_eq!(msg, reason),
            other => panic!("expected ClaimForbidden({reason}), got {other:?}"),
        }
    }

    #[test]
    fn claim_extend_assign_scenario() {
        let (conn, _clock, queue) = setup();

        let lock = claim(&conn, &queue, X).unwrap();
        assert_eq!(lock.expires_at, t0() + Duration::minutes(5));
        assert_eq!(db::get_case_status(&conn, CASE).unwrap(), CaseStatus::TempClaimed);

        assert_forbidden(
            queue.extend_claim(&conn, Y, VISIT, EventType::Visit, Duration::minutes(5)),
            "not current holder",
        );

        let outcome = assign(&conn, &queue, X).unwrap();
        assert!(outcome.queue_entry_removed);
        assert_eq!(
            assignment_status(&conn, AssignmentScope::Case, X, CASE),
            Some(AssignmentStatus::Active)
        );
        assert_eq!(
            assignment_status(&conn, AssignmentScope::Patient, X, PATIENT),
            Some(AssignmentStatus::Active)
        );
        assert!(queue.entry(&conn, VISIT, EventType::Visit).unwrap().is_none());
        assert_eq!(db::get_case_status(&conn, CASE).unwrap(), CaseStatus::Claimed);
    }

    #[test]
    fn constraint_violations_are_not_retryable() {
        let (conn, _clock, queue) = setup();
        let err = queue
            .enqueue_unclaimed(&conn, CASE, VISIT, EventType::Visit)
            .unwrap_err();
        assert!(matches!(err, ClaimError::Database(_)), "got {err:?}");
        assert!(!err.is_retryable());
    }

    #[test]
    fn second_claim_on_locked_entry_fails() {
        let (conn, _clock, queue) = setup();
        claim(&conn, &queue, X).unwrap();

        assert_forbidden(claim(&conn, &queue, Y), "item already claimed");

        let entry = queue.entry(&conn, VISIT, EventType::Visit).unwrap().unwrap();
        assert_eq!(entry.claimant(), Some(X));
        assert!(assignment_status(&conn, AssignmentScope::Case, Y, CASE).is_none());
        assert!(assignment_status(&conn, AssignmentScope::Patient, Y, PATIENT).is_none());
    }

    #[test]
    fn provider_outside_pool_cannot_claim() {
        let (conn, _clock, queue) = setup();
        let err = claim(&conn, &queue, OUTSIDER).unwrap_err();
        assert!(matches!(err, ClaimError::NotEligible { provider_id: OUTSIDER, .. }));
        assert_eq!(db::get_case_status(&conn, CASE).unwrap(), CaseStatus::Unclaimed);
    }

    #[test]
    fn claim_on_unknown_item_is_not_found() {
        let (conn, _clock, queue) = setup();
        let five = Duration::minutes(5);
        let err = queue
            .temporarily_claim(&conn, X, CASE, PATIENT, 999, EventType::Visit, five)
            .unwrap_err();
        assert!(matches!(err, ClaimError::NotFound { .. }));
    }

    #[test]
    fn mismatched_patient_rolls_back() {
        let (conn, _clock, queue) = setup();
        let five = Duration::minutes(5);
        assert_forbidden(
            queue.temporarily_claim(&conn, X, CASE, 555, VISIT, EventType::Visit, five),
            "case does not belong to patient",
        );
        let entry = queue.entry(&conn, VISIT, EventType::Visit).unwrap().unwrap();
        assert!(!entry.is_locked());
        assert_eq!(db::get_case_status(&conn, CASE).unwrap(), CaseStatus::Unclaimed);
    }

    #[test]
    fn extension_by_non_holder_leaves_expiry() {
        let (conn, clock, queue) = setup();
        let lock = claim(&conn, &queue, X).unwrap();
        clock.advance(Duration::minutes(2));

        assert_forbidden(
            queue.extend_claim(&conn, Y, VISIT, EventType::Visit, Duration::minutes(10)),
            "not current holder",
        );
        let entry = queue.entry(&conn, VISIT, EventType::Visit).unwrap().unwrap();
        assert_eq!(entry.lock.unwrap().expires_at, lock.expires_at);
    }

    #[test]
    fn holder_extends_claim_and_temp_rows() {
        let (conn, clock, queue) = setup();
        claim(&conn, &queue, X).unwrap();
        clock.advance(Duration::minutes(4));

        let lock = queue
            .extend_claim(&conn, X, VISIT, EventType::Visit, Duration::minutes(15))
            .unwrap();
        assert_eq!(lock.expires_at, t0() + Duration::minutes(19));

        for (scope, subject) in [
            (AssignmentScope::Case, CASE),
            (AssignmentScope::Patient, PATIENT),
        ] {
            let row = db::get_assignment(&conn, scope, X, subject, ROLE)
                .unwrap()
                .unwrap();
            assert_eq!(row.expires_at, Some(lock.expires_at));
        }
    }

    #[test]
    fn extending_unclaimed_entry_fails() {
        let (conn, _clock, queue) = setup();
        assert_forbidden(
            queue.extend_claim(&conn, X, VISIT, EventType::Visit, Duration::minutes(5)),
            "no longer claimed",
        );
    }

    #[test]
    fn assignment_without_temp_rows_fails_untouched() {
        let (conn, _clock, queue) = setup();
        claim(&conn, &queue, X).unwrap();

        assert_forbidden(assign(&conn, &queue, Y), "not temporarily assigned to patient");

        let entry = queue.entry(&conn, VISIT, EventType::Visit).unwrap().unwrap();
        assert_eq!(entry.claimant(), Some(X));
        assert_eq!(
            assignment_status(&conn, AssignmentScope::Case, X, CASE),
            Some(AssignmentStatus::Temp)
        );
        assert_eq!(db::get_case_status(&conn, CASE).unwrap(), CaseStatus::TempClaimed);
    }

    #[test]
    fn assignment_needs_case_scoped_temp_row() {
        let (conn, clock, queue) = setup();
        // A patient-level TEMP row alone is not enough.
        let expires_at = clock.now() + Duration::minutes(5);
        db::upsert_temp_assignment(&conn, AssignmentScope::Patient, Y, PATIENT, ROLE, &expires_at)
            .unwrap();
        assert_forbidden(assign(&conn, &queue, Y), "not temporarily assigned to case");
        assert!(queue.entry(&conn, VISIT, EventType::Visit).unwrap().is_some());
    }

    #[test]
    fn assignment_blocked_by_other_active_provider() {
        let (conn, _clock, queue) = setup();
        // Y already cares for the patient permanently.
        db::upsert_temp_assignment(&conn, AssignmentScope::Patient, Y, PATIENT, ROLE, &t0())
            .unwrap();
        db::promote_assignment(&conn, AssignmentScope::Patient, Y, PATIENT, ROLE).unwrap();

        let lock = claim(&conn, &queue, X).unwrap();
        assert_forbidden(assign(&conn, &queue, X), "already assigned to another provider");

        let entry = queue.entry(&conn, VISIT, EventType::Visit).unwrap().unwrap();
        assert_eq!(entry.lock, Some(lock));
        assert_eq!(
            assignment_status(&conn, AssignmentScope::Patient, X, PATIENT),
            Some(AssignmentStatus::Temp)
        );
        assert_eq!(
            assignment_status(&conn, AssignmentScope::Case, X, CASE),
            Some(AssignmentStatus::Temp)
        );
        assert_eq!(
            assignment_status(&conn, AssignmentScope::Patient, Y, PATIENT),
            Some(AssignmentStatus::Active)
        );
        assert_eq!(db::get_case_status(&conn, CASE).unwrap(), CaseStatus::TempClaimed);
    }

    #[test]
    fn out_of_range_duration_is_rejected_untouched() {
        let (conn, _clock, queue) = setup();
        let huge = Duration::MAX;
        let err = queue
            .temporarily_claim(&conn, X, CASE, PATIENT, VISIT, EventType::Visit, huge)
            .unwrap_err();
        assert!(matches!(err, ClaimError::DurationOutOfRange(_)));
        assert!(!queue.entry(&conn, VISIT, EventType::Visit).unwrap().unwrap().is_locked());
        assert_eq!(db::get_case_status(&conn, CASE).unwrap(), CaseStatus::Unclaimed);

        let lock = claim(&conn, &queue, X).unwrap();
        let err = queue
            .extend_claim(&conn, X, VISIT, EventType::Visit, huge)
            .unwrap_err();
        assert!(matches!(err, ClaimError::DurationOutOfRange(_)));
        let entry = queue.entry(&conn, VISIT, EventType::Visit).unwrap().unwrap();
        assert_eq!(entry.lock, Some(lock));
    }

    #[test]
    fn missing_queue_entry_is_reported_not_fatal() {
        let (conn, _clock, queue) = setup();
        claim(&conn, &queue, X).unwrap();
        conn.execute("DELETE FROM unclaimed_queue", []).unwrap();

        let outcome = assign(&conn, &queue, X).unwrap();
        assert!(!outcome.queue_entry_removed);
        assert_eq!(
            assignment_status(&conn, AssignmentScope::Case, X, CASE),
            Some(AssignmentStatus::Active)
        );
    }

    #[test]
    fn returning_patient_keeps_active_patient_row() {
        let (conn, _clock, queue) = setup();
        db::upsert_temp_assignment(&conn, AssignmentScope::Patient, X, PATIENT, ROLE, &t0())
            .unwrap();
        db::promote_assignment(&conn, AssignmentScope::Patient, X, PATIENT, ROLE).unwrap();

        claim(&conn, &queue, X).unwrap();
        assert_eq!(
            assignment_status(&conn, AssignmentScope::Patient, X, PATIENT),
            Some(AssignmentStatus::Active)
        );
        assign(&conn, &queue, X).unwrap();
        assert_eq!(
            assignment_status(&conn, AssignmentScope::Case, X, CASE),
            Some(AssignmentStatus::Active)
        );
    }

    #[test]
    fn expired_claim_is_released_and_reclaimable() {
        let (conn, clock, queue) = setup();
        claim(&conn, &queue, X).unwrap();

        clock.advance(Duration::minutes(4));
        assert!(queue.release_expired_claims(&conn).unwrap().is_empty());

        clock.advance(Duration::minutes(1));
        let released = queue.release_expired_claims(&conn).unwrap();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].lock.provider_id, X);

        let entry = queue.entry(&conn, VISIT, EventType::Visit).unwrap().unwrap();
        assert!(!entry.is_locked());
        assert_eq!(db::get_case_status(&conn, CASE).unwrap(), CaseStatus::Unclaimed);
        assert!(assignment_status(&conn, AssignmentScope::Case, X, CASE).is_none());
        assert!(assignment_status(&conn, AssignmentScope::Patient, X, PATIENT).is_none());

        claim(&conn, &queue, Y).unwrap();
        assert_forbidden(assign(&conn, &queue, X), "not temporarily assigned to patient");
        assert!(assign(&conn, &queue, Y).unwrap().queue_entry_removed);
    }

    #[test]
    fn eligible_items_follow_pool_and_locks() {
        let (conn, _clock, queue) = setup();
        insert_case(&conn, 11, 101, CareJurisdiction::new("NY", "acne"));
        queue
            .enqueue_unclaimed(&conn, 11, 43, EventType::Visit)
            .unwrap();

        let item_ids = |provider| -> Vec<i64> {
            queue
                .eligible_items(&conn, provider)
                .unwrap()
                .iter()
                .map(|e| e.item_id)
                .collect()
        };
        assert_eq!(item_ids(X), vec![VISIT]);
        assert_eq!(item_ids(OUTSIDER), vec![43]);

        claim(&conn, &queue, X).unwrap();
        assert_eq!(queue.eligible_items(&conn, X).unwrap().len(), 1);
        assert!(queue.eligible_items(&conn, Y).unwrap().is_empty());
        assert_eq!(queue.claimed_items(&conn).unwrap().len(), 1);
    }

    #[test]
    fn concurrent_claims_have_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        let timeout = std::time::Duration::from_secs(10);

        let clock = Arc::new(FixedClock::new(t0()));
        let queue = Arc::new(queue(clock));
        let conn = db::open_database(&path, timeout).unwrap();
        seed(&conn, &queue);
        let contenders: Vec<i64> = (20..28).collect();
        for provider in &contenders {
            db::register_provider_eligibility(&conn, *provider, ROLE, &ca_acne()).unwrap();
        }
        drop(conn);

        let barrier = Arc::new(Barrier::new(contenders.len()));
        let handles: Vec<_> = contenders
            .iter()
            .map(|&provider| {
                let path = path.clone();
                let queue = queue.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    let conn = db::open_database(&path, timeout).unwrap();
                    barrier.wait();
                    claim(&conn, &queue, provider).map(|_| provider)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners: Vec<i64> = results
            .iter()
            .filter_map(|r| r.as_ref().ok().copied())
            .collect();
        assert_eq!(winners.len(), 1, "results: {results:?}");
        for result in &results {
            if let Err(e) = result {
                assert!(matches!(e, ClaimError::ClaimForbidden(_)), "unexpected error: {e}");
            }
        }

        let conn = db::open_database(&path, timeout).unwrap();
        let entry = queue.entry(&conn, VISIT, EventType::Visit).unwrap().unwrap();
        assert_eq!(entry.claimant(), Some(winners[0]));
        let temp_rows =
            db::get_assignments_for_subject(&conn, AssignmentScope::Case, CASE, ROLE).unwrap();
        assert_eq!(temp_rows.len(), 1);
    }

    #[test]
    fn storage_errors_are_retryable() {
        let err = ClaimError::from(rusqlite::Error::QueryReturnedNoRows);
        assert!(err.is_retryable());
        let busy = ClaimError::from(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(busy.is_retryable());
        assert!(!ClaimError::ClaimForbidden("x".into()).is_retryable());
        let not_found = ClaimError::from(DatabaseError::NotFound {
            entity_type: "PatientCase".into(),
            id: "1".into(),
        });
        assert!(matches!(not_found, ClaimError::NotFound { .. }));
    }
}
