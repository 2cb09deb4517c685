//! Due-date computation for stage deadline rules.
//!
//! Pure calendar-day arithmetic: rules are evaluated against a context
//! snapshot (last completed date, anchor event date) and either produce a
//! date or report exactly what is missing. No fallback to "today" anywhere.

use chrono::{Datelike, Duration, NaiveDate};

use crate::error::EngineError;
use crate::models::DeadlineRule;

// ═══════════════════════════════════════════════════════════
// Post-op cadence
// ═══════════════════════════════════════════════════════════

/// Days between the 1st/2nd and 2nd/3rd post-op returns.
const WEEKLY_RETURN_DAYS: i64 = 7;

/// Days before the 4th post-op return.
const BIWEEKLY_RETURN_DAYS: i64 = 14;

/// Days before the 5th post-op return.
const MONTHLY_RETURN_DAYS: i64 = 30;

/// The final post-op review happens six months after surgery.
const FINAL_RETURN_DAYS: i64 = 180;

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// Date snapshot a rule is evaluated against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DueContext {
    /// Latest completion in the journey, falling back to first contact.
    pub last_completed: Option<NaiveDate>,
    /// The anchor event (surgery date).
    pub anchor_event: Option<NaiveDate>,
}

// ═══════════════════════════════════════════════════════════
// Computation
// ═══════════════════════════════════════════════════════════

/// Compute the due date for a deadline rule.
///
/// `after_previous` counts forward from the last completed date,
/// `before_event` counts back from the anchor, and `post_op` follows the
/// fixed return cadence keyed by `return_number`.
pub fn compute_due_date(rule: &DeadlineRule, ctx: &DueContext) -> Result<NaiveDate, EngineError> {
    match rule {
        DeadlineRule::AfterPrevious { days } => {
            let last = require_last_completed(ctx)?;
            Ok(last + Duration::days(i64::from(*days)))
        }
        DeadlineRule::BeforeEvent { days } => {
            let anchor = require_anchor(ctx)?;
            Ok(anchor - Duration::days(i64::from(*days)))
        }
        DeadlineRule::PostOp { return_number, .. } => post_op_due_date(*return_number, ctx),
    }
}

fn post_op_due_date(return_number: u8, ctx: &DueContext) -> Result<NaiveDate, EngineError> {
    match return_number {
        1 => Ok(first_return_date(require_anchor(ctx)?)),
        2 | 3 => Ok(require_last_completed(ctx)? + Duration::days(WEEKLY_RETURN_DAYS)),
        4 => Ok(require_last_completed(ctx)? + Duration::days(BIWEEKLY_RETURN_DAYS)),
        5 => Ok(require_last_completed(ctx)? + Duration::days(MONTHLY_RETURN_DAYS)),
        6 => Ok(require_anchor(ctx)? + Duration::days(FINAL_RETURN_DAYS)),
        n => Err(EngineError::InvalidRule(format!(
            "post-op return number {n} outside 1..=6"
        ))),
    }
}

/// First post-op return: surgery early in the week (Mon..Wed) is checked the
/// Friday of that same week; later surgeries wait until the following Monday.
fn first_return_date(surgery: NaiveDate) -> NaiveDate {
    let weekday = i64::from(surgery.weekday().number_from_monday()); // Mon=1 .. Sun=7
    if weekday <= 3 {
        surgery + Duration::days(5 - weekday)
    } else {
        surgery + Duration::days(8 - weekday)
    }
}

fn require_last_completed(ctx: &DueContext) -> Result<NaiveDate, EngineError> {
    ctx.last_completed
        .ok_or(EngineError::MissingContext("last completed date"))
}

fn require_anchor(ctx: &DueContext) -> Result<NaiveDate, EngineError> {
    ctx.anchor_event
        .ok_or(EngineError::MissingContext("anchor event date"))
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
