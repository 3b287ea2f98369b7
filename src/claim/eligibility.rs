//! Provider pools for unclaimed cases.

use rusqlite::Connection;

use crate::db::{self, DatabaseError};
use crate::models::CareJurisdiction;

/// Resolves which providers may serve a case in a given jurisdiction for a
/// given condition.
pub trait EligibilityResolver: Send + Sync {
    fn eligible_providers(
        &self,
        conn: &Connection,
        role_type_id: i64,
        care: &CareJurisdiction,
    ) -> Result<Vec<i64>, DatabaseError>;

    fn is_eligible(
        &self,
        conn: &Connection,
        provider_id: i64,
        role_type_id: i64,
        care: &CareJurisdiction,
    ) -> Result<bool, DatabaseError> {
        Ok(self
            .eligible_providers(conn, role_type_id, care)?
            .contains(&provider_id))
    }
}

/// Resolver backed by the `provider_eligibility` table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteEligibility;

impl EligibilityResolver for SqliteEligibility {
    fn eligible_providers(
        &self,
        conn: &Connection,
        role_type_id: i64,
        care: &CareJurisdiction,
    ) -> Result<Vec<i64>, DatabaseError> {
        db::get_eligible_provider_ids(conn, role_type_id, care)
    }
}
