use rusqlite::{params, Connection};

use crate::db::DatabaseError;
use crate::models::CareJurisdiction;

/// Register a provider as allowed to serve `care`. Idempotent.
pub fn register_provider_eligibility(
    conn: &Connection,
    provider_id: i64,
    role_type_id: i64,
    care: &CareJurisdiction,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO provider_eligibility (provider_id, role_type_id, jurisdiction, condition)
         VALUES (?1, ?2, ?3, ?4)",
        params![provider_id, role_type_id, care.jurisdiction, care.condition],
    )?;
    Ok(())
}

pub fn get_eligible_provider_ids(
    conn: &Connection,
    role_type_id: i64,
    care: &CareJurisdiction,
) -> Result<Vec<i64>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT provider_id FROM provider_eligibility
         WHERE role_type_id = ?1 AND jurisdiction = ?2 AND condition = ?3
         ORDER BY provider_id",
    )?;
    let rows = stmt.query_map(
        params![role_type_id, care.jurisdiction, care.condition],
        |row| row.get::<_, i64>(0),
    )?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

pub fn get_provider_jurisdictions(
    conn: &Connection,
    provider_id: i64,
    role_type_id: i64,
) -> Result<Vec<CareJurisdiction>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT jurisdiction, condition FROM provider_eligibility
         WHERE provider_id = ?1 AND role_type_id = ?2
         ORDER BY jurisdiction, condition",
    )?;
    let rows = stmt.query_map(params![provider_id, role_type_id], |row| {
        Ok(CareJurisdiction {
            jurisdiction: row.get(0)?,
            condition: row.get(1)?,
        })
    })?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}
