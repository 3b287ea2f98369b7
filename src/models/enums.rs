use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(EventType {
    Visit => "VISIT",
    TreatmentPlan => "TREATMENT_PLAN",
    RefillRequest => "REFILL_REQUEST",
    TransmissionError => "TRANSMISSION_ERROR",
});

str_enum!(QueueStatus {
    Pending => "PENDING",
    Ongoing => "ONGOING",
    Completed => "COMPLETED",
    Triaged => "TRIAGED",
    PhotosRejected => "PHOTOS_REJECTED",
    RefillApproved => "REFILL_APPROVED",
    RefillDenied => "REFILL_DENIED",
});

str_enum!(AssignmentStatus {
    Temp => "TEMP",
    Active => "ACTIVE",
});

str_enum!(CaseStatus {
    Unclaimed => "UNCLAIMED",
    TempClaimed => "TEMP_CLAIMED",
    Claimed => "CLAIMED",
});

impl QueueStatus {
    /// Statuses that keep an item in the provider's pending list.
    pub const OPEN: [QueueStatus; 2] = [QueueStatus::Pending, QueueStatus::Ongoing];

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Ongoing)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }
}

impl EventType {
    /// Statuses a work item of this type can finish in.
    pub fn terminal_statuses(&self) -> &'static [QueueStatus] {
        match self {
            Self::Visit | Self::TreatmentPlan => &[
                QueueStatus::Completed,
                QueueStatus::Triaged,
                QueueStatus::PhotosRejected,
            ],
            Self::RefillRequest => &[QueueStatus::RefillApproved, QueueStatus::RefillDenied],
            Self::TransmissionError => &[QueueStatus::Completed],
        }
    }

    /// Whether a work item of this type may move from `from` to `to`.
    pub fn allows_transition(&self, from: QueueStatus, to: QueueStatus) -> bool {
        match from {
            QueueStatus::Pending => {
                to == QueueStatus::Ongoing || self.terminal_statuses().contains(&to)
            }
            QueueStatus::Ongoing => self.terminal_statuses().contains(&to),
            _ => false,
        }
    }
}
