use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::JourneyStatus;

/// A patient's live progress through one protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientJourney {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub protocol_id: Uuid,
    /// Checklist item id → when it was completed. An item appears at most
    /// once; the first recorded timestamp wins.
    pub completions: BTreeMap<Uuid, DateTime<Utc>>,
    pub first_contact_date: Option<NaiveDate>,
    /// Anchor event for before_event/post_op deadline rules.
    pub surgery_date: Option<NaiveDate>,
    pub status: JourneyStatus,
    pub ended_at: Option<DateTime<Utc>>,
}

impl PatientJourney {
    pub fn is_completed(&self, item_id: &Uuid) -> bool {
        self.completions.contains_key(item_id)
    }

    pub fn completion_timestamp(&self, item_id: &Uuid) -> Option<DateTime<Utc>> {
        self.completions.get(item_id).copied()
    }

    /// Most recent completion across all items.
    pub fn latest_completion(&self) -> Option<DateTime<Utc>> {
        self.completions.values().max().copied()
    }

    /// Reference date for after_previous-style rules: the latest completion,
    /// else the first contact date, else nothing. A journey with no history
    /// has no reference date; rules that need one report missing context
    /// rather than inventing "today".
    pub fn last_completed_date(&self) -> Option<NaiveDate> {
        self.latest_completion()
            .map(|ts| ts.date_naive())
            .or(self.first_contact_date)
    }

    pub fn is_ended(&self) -> bool {
        self.status == JourneyStatus::Ended
    }
}

/// Per-stage completion rollup for progress indicators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageProgress {
    pub stage_id: Uuid,
    pub completed: u32,
    pub total: u32,
}
