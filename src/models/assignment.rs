use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::AssignmentStatus;

/// Which relation an assignment row lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentScope {
    Patient,
    Case,
}

impl AssignmentScope {
    pub(crate) fn table(&self) -> &'static str {
        match self {
            Self::Patient => "patient_provider_assignments",
            Self::Case => "case_provider_assignments",
        }
    }

    pub(crate) fn subject_column(&self) -> &'static str {
        match self {
            Self::Patient => "patient_id",
            Self::Case => "patient_case_id",
        }
    }
}

/// Link between a provider and a patient or case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseAssignment {
    pub scope: AssignmentScope,
    pub provider_id: i64,
    pub subject_id: i64,
    pub role_type_id: i64,
    pub status: AssignmentStatus,
    pub expires_at: Option<DateTime<Utc>>,
}
