//! Provider display feed.
//!
//! Turns work-queue rows into titled, display-ready cards. Rendering a single
//! item is pure: the same item, position and `now` always give the same card.
//! Only the head of the pending queue gets a button and an action URL; every
//! other open item is shown but inert until it becomes head.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::QueueConfig;
use crate::db::{self, DatabaseError, WorkQueueView};
use crate::models::enums::{EventType, QueueStatus};
use crate::models::WorkQueueItem;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("No patient found for {event_type} item {item_id}")]
    PatientNotFound { event_type: EventType, item_id: i64 },

    #[error("Patient lookup failed: {0}")]
    Lookup(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Who an item is about, as far as the feed needs to know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientSummary {
    pub patient_id: i64,
    pub first_name: String,
    pub last_name: String,
}

impl PatientSummary {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Resolves the patient behind a queued item (a visit, treatment plan,
/// refill request or prescription).
pub trait PatientDirectory: Send + Sync {
    fn patient_for_item(
        &self,
        event_type: EventType,
        item_id: i64,
    ) -> Result<Option<PatientSummary>, FeedError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisplayType {
    TitleSubtitleButton,
    TitleSubtitleActionable,
    TitleSubtitleNonactionable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub text: String,
    pub action_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    pub event_type: EventType,
    pub item_id: i64,
    pub status: QueueStatus,
    pub title: String,
    pub subtitle: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub display_type: DisplayType,
    pub action_url: Option<String>,
    pub button: Option<Button>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSection {
    pub title: String,
    pub items: Vec<FeedItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedTab {
    pub title: String,
    pub sections: Vec<FeedSection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayFeed {
    pub tabs: Vec<FeedTab>,
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

pub struct FeedRenderer {
    service_level: Duration,
    action_url_scheme: String,
    directory: Arc<dyn PatientDirectory>,
}

impl FeedRenderer {
    pub fn new(config: &QueueConfig, directory: Arc<dyn PatientDirectory>) -> Self {
        Self {
            service_level: config.service_level(),
            action_url_scheme: config.action_url_scheme.clone(),
            directory,
        }
    }

    /// Render one item whose patient is already known.
    pub fn render_item(
        &self,
        item: &WorkQueueItem,
        patient: &PatientSummary,
        position_in_queue: usize,
        now: DateTime<Utc>,
    ) -> FeedItem {
        let name = patient.full_name();
        let is_head = item.status.is_open() && position_in_queue == 0;

        let subtitle = if item.status.is_open() {
            has_countdown(item.event_type)
                .then(|| countdown(item.enqueue_date + self.service_level, now))
        } else {
            Some(format_completed(item.completed_date.unwrap_or(item.enqueue_date)))
        };

        let display_type = if is_head {
            DisplayType::TitleSubtitleButton
        } else if item.status.is_open() {
            DisplayType::TitleSubtitleActionable
        } else {
            DisplayType::TitleSubtitleNonactionable
        };

        let action_url = is_head.then(|| self.action_url(item, patient));
        let button = action_url.clone().map(|action_url| Button {
            text: button_text(item.status).to_string(),
            action_url,
        });

        FeedItem {
            event_type: item.event_type,
            item_id: item.item_id,
            status: item.status,
            title: title(item.event_type, item.status, &name),
            subtitle,
            timestamp: item.enqueue_date,
            display_type,
            action_url,
            button,
        }
    }

    /// Look up the patient and render one item.
    pub fn render_queue_item(
        &self,
        item: &WorkQueueItem,
        position_in_queue: usize,
        now: DateTime<Utc>,
    ) -> Result<FeedItem, FeedError> {
        let patient = self
            .directory
            .patient_for_item(item.event_type, item.item_id)?
            .ok_or(FeedError::PatientNotFound {
                event_type: item.event_type,
                item_id: item.item_id,
            })?;
        Ok(self.render_item(item, &patient, position_in_queue, now))
    }

    /// Build the provider's feed: a "Pending" tab split into the head item
    /// and the rest, and a "Completed" tab grouped per day, newest first.
    ///
    /// Items whose patient cannot be resolved are left out.
    pub fn render_feed(
        &self,
        conn: &Connection,
        provider_id: i64,
        now: DateTime<Utc>,
    ) -> Result<DisplayFeed, FeedError> {
        let pending = db::get_work_items(conn, Some(provider_id), WorkQueueView::Open)?;
        let completed = db::get_work_items(conn, Some(provider_id), WorkQueueView::Closed)?;

        let mut next_up = Vec::new();
        let mut up_next = Vec::new();
        for (position, item) in pending.iter().enumerate() {
            let Some(card) = self.render_or_skip(item, position, now)? else {
                continue;
            };
            if position == 0 {
                next_up.push(card);
            } else {
                up_next.push(card);
            }
        }

        let mut by_day: BTreeMap<NaiveDate, Vec<FeedItem>> = BTreeMap::new();
        for (position, item) in completed.iter().enumerate() {
            let Some(card) = self.render_or_skip(item, position, now)? else {
                continue;
            };
            let day = item.completed_date.unwrap_or(item.enqueue_date).date_naive();
            by_day.entry(day).or_default().push(card);
        }

        let pending_sections = [("Next up", next_up), ("Up next", up_next)]
            .into_iter()
            .filter(|(_, items)| !items.is_empty())
            .map(|(title, items)| FeedSection {
                title: title.to_string(),
                items,
            })
            .collect();
        let completed_sections = by_day
            .into_iter()
            .rev()
            .map(|(day, items)| FeedSection {
                title: day.format("%A, %B %-d").to_string(),
                items,
            })
            .collect();

        Ok(DisplayFeed {
            tabs: vec![
                FeedTab {
                    title: "Pending".into(),
                    sections: pending_sections,
                },
                FeedTab {
                    title: "Completed".into(),
                    sections: completed_sections,
                },
            ],
        })
    }

    fn render_or_skip(
        &self,
        item: &WorkQueueItem,
        position: usize,
        now: DateTime<Utc>,
    ) -> Result<Option<FeedItem>, FeedError> {
        match self.render_queue_item(item, position, now) {
            Ok(card) => Ok(Some(card)),
            Err(FeedError::PatientNotFound { event_type, item_id }) => {
                tracing::warn!(
                    item_id,
                    event_type = %event_type,
                    "Skipping feed item without patient"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn action_url(&self, item: &WorkQueueItem, patient: &PatientSummary) -> String {
        let (action, item_param) = match item.event_type {
            EventType::Visit => ("begin_patient_visit", "patient_visit_id"),
            EventType::TreatmentPlan => ("view_treatment_plan", "treatment_plan_id"),
            EventType::RefillRequest => ("view_refill_request", "refill_request_id"),
            EventType::TransmissionError => ("view_transmission_error", "treatment_id"),
        };
        format!(
            "{}:///action/{action}?patient_id={}&{item_param}={}",
            self.action_url_scheme, patient.patient_id, item.item_id
        )
    }
}

fn title(event_type: EventType, status: QueueStatus, name: &str) -> String {
    use EventType::*;
    use QueueStatus::*;

    match (event_type, status) {
        (Visit | TreatmentPlan, Pending) => format!("New visit with {name}"),
        (Visit | TreatmentPlan, Ongoing) => format!("Continue reviewing visit with {name}"),
        (Visit | TreatmentPlan, Completed) => format!("Treatment Plan completed for {name}"),
        (Visit | TreatmentPlan, Triaged) => format!("Completed and triaged visit for {name}"),
        (Visit | TreatmentPlan, PhotosRejected) => format!("Photos rejected for {name}"),
        (RefillRequest, Pending) => format!("Refill request for {name}"),
        (RefillRequest, Ongoing) => format!("Continue refill request for {name}"),
        (RefillRequest, RefillApproved) => format!("Refill request approved for {name}"),
        (RefillRequest, RefillDenied) => format!("Refill request denied for {name}"),
        (TransmissionError, Pending | Ongoing) => format!("Error sending prescription for {name}"),
        (TransmissionError, _) => format!("Error resolved for {name}"),
        (Visit | TreatmentPlan, RefillApproved | RefillDenied) | (RefillRequest, _) => {
            format!("Item updated for {name}")
        }
    }
}

fn has_countdown(event_type: EventType) -> bool {
    matches!(event_type, EventType::Visit | EventType::TreatmentPlan)
}

/// "{H}h {M}m left" until `deadline`, or "{H}h {M}m overdue" once past it.
fn countdown(deadline: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let remaining = deadline - now;
    let (span, suffix) = if remaining < Duration::zero() {
        (-remaining, "overdue")
    } else {
        (remaining, "left")
    };
    let hours = span.num_hours();
    let minutes = span.num_minutes() - hours * 60;
    format!("{hours}h {minutes}m {suffix}")
}

fn format_completed(at: DateTime<Utc>) -> String {
    at.format("%b %-d, %Y at %-I:%M %p").to_string()
}

fn button_text(status: QueueStatus) -> &'static str {
    match status {
        QueueStatus::Ongoing => "Continue",
        _ => "Begin",
    }
}
