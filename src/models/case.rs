use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::CaseStatus;

/// Where a case is being served and for what; together these decide the
/// pool of providers allowed to claim it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CareJurisdiction {
    pub jurisdiction: String,
    pub condition: String,
}

impl CareJurisdiction {
    pub fn new(jurisdiction: impl Into<String>, condition: impl Into<String>) -> Self {
        Self {
            jurisdiction: jurisdiction.into(),
            condition: condition.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientCase {
    pub id: i64,
    pub patient_id: i64,
    pub care: CareJurisdiction,
    pub status: CaseStatus,
    pub created_at: DateTime<Utc>,
}
