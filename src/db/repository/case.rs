use std::str::FromStr;

use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{from_db_timestamp, to_db_timestamp, DatabaseError};
use crate::models::enums::CaseStatus;
use crate::models::*;

pub fn insert_patient_case(conn: &Connection, case: &PatientCase) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO patient_cases (id, patient_id, jurisdiction, condition, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            case.id,
            case.patient_id,
            case.care.jurisdiction,
            case.care.condition,
            case.status.as_str(),
            to_db_timestamp(&case.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_patient_case(conn: &Connection, id: i64) -> Result<Option<PatientCase>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, patient_id, jurisdiction, condition, status, created_at
             FROM patient_cases WHERE id = ?1",
            params![id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            },
        )
        .optional()?;

    match row {
        Some((id, patient_id, jurisdiction, condition, status, created_at)) => {
            Ok(Some(PatientCase {
                id,
                patient_id,
                care: CareJurisdiction { jurisdiction, condition },
                status: CaseStatus::from_str(&status)?,
                created_at: from_db_timestamp("created_at", &created_at)?,
            }))
        }
        None => Ok(None),
    }
}

/// Current status of a case; `NotFound` if the case does not exist.
pub fn get_case_status(conn: &Connection, id: i64) -> Result<CaseStatus, DatabaseError> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM patient_cases WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;

    match status {
        Some(s) => CaseStatus::from_str(&s),
        None => Err(DatabaseError::NotFound {
            entity_type: "PatientCase".into(),
            id: id.to_string(),
        }),
    }
}

/// Returns the number of rows updated (0 when the case does not exist).
pub fn set_case_status(
    conn: &Connection,
    id: i64,
    status: CaseStatus,
) -> Result<usize, DatabaseError> {
    let updated = conn.execute(
        "UPDATE patient_cases SET status = ?1 WHERE id = ?2",
        params![status.as_str(), id],
    )?;
    Ok(updated)
}
