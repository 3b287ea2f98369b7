use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{from_db_timestamp, to_db_timestamp, DatabaseError};
use crate::models::enums::AssignmentStatus;
use crate::models::*;

/// Create a TEMP assignment, or refresh the expiry of an existing TEMP one.
/// An ACTIVE row for the same key is left untouched.
pub fn upsert_temp_assignment(
    conn: &Connection,
    scope: AssignmentScope,
    provider_id: i64,
    subject_id: i64,
    role_type_id: i64,
    expires_at: &DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let sql = format!(
        "INSERT INTO {table} (provider_id, {subject}, role_type_id, status, expires_at)
         VALUES (?1, ?2, ?3, 'TEMP', ?4)
         ON CONFLICT (provider_id, {subject}, role_type_id)
         DO UPDATE SET expires_at = excluded.expires_at WHERE status = 'TEMP'",
        table = scope.table(),
        subject = scope.subject_column(),
    );
    conn.execute(
        &sql,
        params![provider_id, subject_id, role_type_id, to_db_timestamp(expires_at)],
    )?;
    Ok(())
}

pub fn get_assignment(
    conn: &Connection,
    scope: AssignmentScope,
    provider_id: i64,
    subject_id: i64,
    role_type_id: i64,
) -> Result<Option<CaseAssignment>, DatabaseError> {
    let sql = format!(
        "SELECT status, expires_at FROM {table}
         WHERE provider_id = ?1 AND {subject} = ?2 AND role_type_id = ?3",
        table = scope.table(),
        subject = scope.subject_column(),
    );
    let row = conn
        .query_row(&sql, params![provider_id, subject_id, role_type_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })
        .optional()?;

    match row {
        Some((status, expires_at)) => Ok(Some(CaseAssignment {
            scope,
            provider_id,
            subject_id,
            role_type_id,
            status: AssignmentStatus::from_str(&status)?,
            expires_at: expires_at
                .map(|e| from_db_timestamp("expires_at", &e))
                .transpose()?,
        })),
        None => Ok(None),
    }
}

/// All assignments on a subject (patient or case), ACTIVE first.
pub fn get_assignments_for_subject(
    conn: &Connection,
    scope: AssignmentScope,
    subject_id: i64,
    role_type_id: i64,
) -> Result<Vec<CaseAssignment>, DatabaseError> {
    let sql = format!(
        "SELECT provider_id, status, expires_at FROM {table}
         WHERE {subject} = ?1 AND role_type_id = ?2
         ORDER BY CASE status WHEN 'ACTIVE' THEN 0 ELSE 1 END, provider_id",
        table = scope.table(),
        subject = scope.subject_column(),
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![subject_id, role_type_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
        ))
    })?;

    let mut assignments = Vec::new();
    for row in rows {
        let (provider_id, status, expires_at) = row?;
        assignments.push(CaseAssignment {
            scope,
            provider_id,
            subject_id,
            role_type_id,
            status: AssignmentStatus::from_str(&status)?,
            expires_at: expires_at
                .map(|e| from_db_timestamp("expires_at", &e))
                .transpose()?,
        });
    }
    Ok(assignments)
}

/// Provider holding the ACTIVE assignment on a subject, if any.
pub fn get_active_provider(
    conn: &Connection,
    scope: AssignmentScope,
    subject_id: i64,
    role_type_id: i64,
) -> Result<Option<i64>, DatabaseError> {
    let sql = format!(
        "SELECT provider_id FROM {table}
         WHERE {subject} = ?1 AND role_type_id = ?2 AND status = 'ACTIVE'",
        table = scope.table(),
        subject = scope.subject_column(),
    );
    let provider = conn
        .query_row(&sql, params![subject_id, role_type_id], |row| row.get(0))
        .optional()?;
    Ok(provider)
}

/// TEMP -> ACTIVE, clearing the expiry. Returns rows updated.
pub fn promote_assignment(
    conn: &Connection,
    scope: AssignmentScope,
    provider_id: i64,
    subject_id: i64,
    role_type_id: i64,
) -> Result<usize, DatabaseError> {
    let sql = format!(
        "UPDATE {table} SET status = 'ACTIVE', expires_at = NULL
         WHERE provider_id = ?1 AND {subject} = ?2 AND role_type_id = ?3 AND status = 'TEMP'",
        table = scope.table(),
        subject = scope.subject_column(),
    );
    Ok(conn.execute(&sql, params![provider_id, subject_id, role_type_id])?)
}

pub fn extend_temp_assignment(
    conn: &Connection,
    scope: AssignmentScope,
    provider_id: i64,
    subject_id: i64,
    role_type_id: i64,
    expires_at: &DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    let sql = format!(
        "UPDATE {table} SET expires_at = ?1
         WHERE provider_id = ?2 AND {subject} = ?3 AND role_type_id = ?4 AND status = 'TEMP'",
        table = scope.table(),
        subject = scope.subject_column(),
    );
    Ok(conn.execute(
        &sql,
        params![to_db_timestamp(expires_at), provider_id, subject_id, role_type_id],
    )?)
}

pub fn delete_temp_assignment(
    conn: &Connection,
    scope: AssignmentScope,
    provider_id: i64,
    subject_id: i64,
    role_type_id: i64,
) -> Result<usize, DatabaseError> {
    let sql = format!(
        "DELETE FROM {table}
         WHERE provider_id = ?1 AND {subject} = ?2 AND role_type_id = ?3 AND status = 'TEMP'",
        table = scope.table(),
        subject = scope.subject_column(),
    );
    Ok(conn.execute(&sql, params![provider_id, subject_id, role_type_id])?)
}
