use serde::{Deserialize, Serialize};

/// Relative-date rule attached to a stage, dispatched on the stored `type`
/// tag. Due dates are computed against the patient journey's last completed
/// date and anchor event (surgery date); the rule itself carries only the
/// offsets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeadlineRule {
    /// Due `days` after the journey's last completed date.
    AfterPrevious { days: u32 },
    /// Due `days` before the anchor event.
    BeforeEvent { days: u32 },
    /// Due per the fixed post-operative visit cadence. `return_number`
    /// selects the visit (1..=6); `days` is carried by stored protocols but
    /// the cadence does not read it.
    PostOp { days: u32, return_number: u8 },
}
