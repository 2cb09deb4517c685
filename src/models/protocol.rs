use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::DeadlineRule;

/// A named, ordered template of treatment/follow-up stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Protocol {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// Ordered by `order`, a contiguous 1..N permutation.
    pub stages: Vec<Stage>,
}

impl Protocol {
    /// The stage holding the given checklist item, if any.
    pub fn stage_of_item(&self, item_id: &Uuid) -> Option<&Stage> {
        self.stages
            .iter()
            .find(|s| s.checklist.iter().any(|i| i.id == *item_id))
    }
}

/// One step of a protocol: a deadline rule plus a checklist of task templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub id: Uuid,
    pub protocol_id: Uuid,
    pub name: String,
    /// Position within the protocol, 1-based.
    pub order: u32,
    pub deadline: DeadlineRule,
    /// Ordered by `position`, 1-based.
    pub checklist: Vec<ChecklistItem>,
}

/// A single task template within a stage. Per-patient completion state lives
/// on the journey, never here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub id: Uuid,
    pub stage_id: Uuid,
    pub position: u32,
    pub task: String,
    /// Opaque reference to an external action (e.g. a scheduling screen).
    pub action_link: Option<String>,
}

/// Payload for appending a stage; ids and order are assigned on insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStage {
    pub name: String,
    pub deadline: DeadlineRule,
    pub checklist: Vec<NewChecklistItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewChecklistItem {
    pub task: String,
    pub action_link: Option<String>,
}

/// Partial update for an existing stage. `None` keeps the current value;
/// order and protocol membership are never part of an update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagePatch {
    pub name: Option<String>,
    pub deadline: Option<DeadlineRule>,
    pub checklist: Option<Vec<ChecklistPatchItem>>,
}

/// Checklist entry in a stage update. Entries carrying an id keep it (and
/// with it any journey completions recorded against the item); entries
/// without get a fresh one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistPatchItem {
    pub id: Option<Uuid>,
    pub task: String,
    pub action_link: Option<String>,
}
