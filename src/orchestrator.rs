//! Journey orchestrator: the façade the embedding layer talks to.
//!
//! Combines catalog, tracker and the deadline engine behind one store-owning
//! struct: "what is due next for this patient", "mark this task done",
//! "move this stage up". Reads compute; writes go through the port's atomic
//! operations.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog;
use crate::deadline::{compute_due_date, DueContext};
use crate::error::EngineError;
use crate::models::enums::MoveDirection;
use crate::models::*;
use crate::store::Store;
use crate::tracker;

/// The next actionable task for a journey, with its computed due date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DueTask {
    pub stage: Stage,
    pub item: ChecklistItem,
    pub due_date: NaiveDate,
}

/// Completion map + per-stage rollup, for journey detail screens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JourneyProgress {
    pub items: BTreeMap<Uuid, Option<DateTime<Utc>>>,
    pub stages: Vec<StageProgress>,
}

pub struct JourneyOrchestrator<S: Store> {
    store: S,
}

impl<S: Store> JourneyOrchestrator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    // ─── Protocol administration ──────────────────────────────────────────

    pub fn create_protocol(
        &self,
        name: &str,
        stages: Vec<NewStage>,
    ) -> Result<Protocol, EngineError> {
        catalog::create_protocol(&self.store, name, stages)
    }

    pub fn get_protocol(&self, protocol_id: &Uuid) -> Result<Protocol, EngineError> {
        catalog::get_protocol(&self.store, protocol_id)
    }

    pub fn list_protocols(&self) -> Result<Vec<Protocol>, EngineError> {
        catalog::list_protocols(&self.store)
    }

    pub fn rename_protocol(
        &self,
        protocol_id: &Uuid,
        name: &str,
    ) -> Result<Protocol, EngineError> {
        catalog::rename_protocol(&self.store, protocol_id, name)
    }

    pub fn delete_protocol(&self, protocol_id: &Uuid) -> Result<(), EngineError> {
        catalog::delete_protocol(&self.store, protocol_id)
    }

    pub fn add_stage(&self, protocol_id: &Uuid, stage: NewStage) -> Result<Stage, EngineError> {
        catalog::add_stage(&self.store, protocol_id, stage)
    }

    pub fn update_stage(&self, stage_id: &Uuid, patch: StagePatch) -> Result<Stage, EngineError> {
        catalog::update_stage(&self.store, stage_id, patch)
    }

    pub fn delete_stage(&self, stage_id: &Uuid) -> Result<(), EngineError> {
        catalog::delete_stage(&self.store, stage_id)
    }

    pub fn move_stage(
        &self,
        stage_id: &Uuid,
        direction: MoveDirection,
    ) -> Result<Vec<Stage>, EngineError> {
        catalog::move_stage(&self.store, stage_id, direction)
    }

    pub fn list_stages(&self, protocol_id: &Uuid) -> Result<Vec<Stage>, EngineError> {
        catalog::list_stages(&self.store, protocol_id)
    }

    // ─── Journeys ─────────────────────────────────────────────────────────

    pub fn enroll(
        &self,
        patient_id: &Uuid,
        protocol_id: &Uuid,
        first_contact_date: Option<NaiveDate>,
        surgery_date: Option<NaiveDate>,
    ) -> Result<PatientJourney, EngineError> {
        tracker::enroll(&self.store, patient_id, protocol_id, first_contact_date, surgery_date)
    }

    pub fn get_journey(
        &self,
        patient_id: &Uuid,
        protocol_id: &Uuid,
    ) -> Result<PatientJourney, EngineError> {
        tracker::get_journey(&self.store, patient_id, protocol_id)
    }

    pub fn set_first_contact_date(
        &self,
        patient_id: &Uuid,
        protocol_id: &Uuid,
        date: Option<NaiveDate>,
    ) -> Result<PatientJourney, EngineError> {
        let journey = tracker::get_journey(&self.store, patient_id, protocol_id)?;
        tracker::set_first_contact_date(&self.store, &journey, date)
    }

    pub fn set_surgery_date(
        &self,
        patient_id: &Uuid,
        protocol_id: &Uuid,
        date: Option<NaiveDate>,
    ) -> Result<PatientJourney, EngineError> {
        let journey = tracker::get_journey(&self.store, patient_id, protocol_id)?;
        tracker::set_surgery_date(&self.store, &journey, date)
    }

    pub fn end_journey(
        &self,
        patient_id: &Uuid,
        protocol_id: &Uuid,
    ) -> Result<PatientJourney, EngineError> {
        self.end_journey_at(patient_id, protocol_id, Utc::now())
    }

    pub fn end_journey_at(
        &self,
        patient_id: &Uuid,
        protocol_id: &Uuid,
        at: DateTime<Utc>,
    ) -> Result<PatientJourney, EngineError> {
        let journey = tracker::get_journey(&self.store, patient_id, protocol_id)?;
        tracker::end_journey(&self.store, &journey, at)
    }

    /// Mark a task done now. The timestamp is captured once, here, so the
    /// whole operation sees a single instant.
    pub fn mark_task_done(
        &self,
        patient_id: &Uuid,
        protocol_id: &Uuid,
        item_id: &Uuid,
    ) -> Result<PatientJourney, EngineError> {
        self.mark_task_done_at(patient_id, protocol_id, item_id, Utc::now())
    }

    /// Explicit-timestamp variant for tests and backfills.
    pub fn mark_task_done_at(
        &self,
        patient_id: &Uuid,
        protocol_id: &Uuid,
        item_id: &Uuid,
        at: DateTime<Utc>,
    ) -> Result<PatientJourney, EngineError> {
        let journey = tracker::get_journey(&self.store, patient_id, protocol_id)?;
        tracker::complete_item(&self.store, &journey, item_id, at)
    }

    /// First incomplete item in stage order then checklist position order,
    /// with its due date. `None` when the journey is finished or ended.
    ///
    /// The traversal itself guarantees that everything before the returned
    /// item is complete, so `after_previous`-style rules can lean on the
    /// journey's latest completion.
    pub fn next_due_task(
        &self,
        patient_id: &Uuid,
        protocol_id: &Uuid,
    ) -> Result<Option<DueTask>, EngineError> {
        let journey = tracker::get_journey(&self.store, patient_id, protocol_id)?;
        if journey.is_ended() {
            return Ok(None);
        }

        let protocol = self.store.load_protocol(protocol_id)?;
        let ctx = DueContext {
            last_completed: journey.last_completed_date(),
            anchor_event: journey.surgery_date,
        };

        for stage in &protocol.stages {
            for item in &stage.checklist {
                if !journey.is_completed(&item.id) {
                    let due_date = compute_due_date(&stage.deadline, &ctx)?;
                    return Ok(Some(DueTask {
                        stage: stage.clone(),
                        item: item.clone(),
                        due_date,
                    }));
                }
            }
        }
        Ok(None)
    }

    pub fn journey_progress(
        &self,
        patient_id: &Uuid,
        protocol_id: &Uuid,
    ) -> Result<JourneyProgress, EngineError> {
        let journey = tracker::get_journey(&self.store, patient_id, protocol_id)?;
        let protocol = self.store.load_protocol(protocol_id)?;
        Ok(JourneyProgress {
            items: tracker::completion_status(&journey, &protocol),
            stages: tracker::stage_progress(&journey, &protocol),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDateTime;

    use super::*;
    use crate::store::SqliteStore;

    fn orchestrator() -> JourneyOrchestrator<SqliteStore> {
        JourneyOrchestrator::new(SqliteStore::open_in_memory().unwrap())
    }

    fn ts(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn item(task: &str) -> NewChecklistItem {
        NewChecklistItem { task: task.into(), action_link: None }
    }

    fn seed_protocol(orch: &JourneyOrchestrator<SqliteStore>) -> Protocol {
        orch.create_protocol(
            "Knee replacement",
            vec![
                NewStage {
                    name: "Work-up".into(),
                    deadline: DeadlineRule::AfterPrevious { days: 5 },
                    checklist: vec![item("Bloodwork"), item("Imaging")],
                },
                NewStage {
                    name: "Pre-op call".into(),
                    deadline: DeadlineRule::BeforeEvent { days: 2 },
                    checklist: vec![item("Confirm fasting")],
                },
            ],
        )
        .unwrap()
    }

    #[test]
    fn fresh_journey_first_task_due_from_first_contact() {
        let orch = orchestrator();
        let protocol = seed_protocol(&orch);
        let patient = Uuid::new_v4();
        orch.enroll(&patient, &protocol.id, Some(date("2025-01-01")), Some(date("2025-03-10")))
            .unwrap();

        let due = orch.next_due_task(&patient, &protocol.id).unwrap().unwrap();
        assert_eq!(due.item.task, "Bloodwork");
        assert_eq!(due.stage.name, "Work-up");
        assert_eq!(due.due_date, date("2025-01-06"));
    }

    #[test]
    fn due_date_follows_latest_completion() {
        let orch = orchestrator();
        let protocol = seed_protocol(&orch);
        let patient = Uuid::new_v4();
        orch.enroll(&patient, &protocol.id, Some(date("2025-01-01")), Some(date("2025-03-10")))
            .unwrap();

        let bloodwork = protocol.stages[0].checklist[0].id;
        orch.mark_task_done_at(&patient, &protocol.id, &bloodwork, ts("2025-01-04 09:30:00"))
            .unwrap();

        let due = orch.next_due_task(&patient, &protocol.id).unwrap().unwrap();
        assert_eq!(due.item.task, "Imaging");
        assert_eq!(due.due_date, date("2025-01-09"));
    }

    #[test]
    fn traversal_crosses_stages_in_order() {
        let orch = orchestrator();
        let protocol = seed_protocol(&orch);
        let patient = Uuid::new_v4();
        orch.enroll(&patient, &protocol.id, Some(date("2025-01-01")), Some(date("2025-03-10")))
            .unwrap();

        for it in &protocol.stages[0].checklist {
            orch.mark_task_done_at(&patient, &protocol.id, &it.id, ts("2025-01-08 11:00:00"))
                .unwrap();
        }

        let due = orch.next_due_task(&patient, &protocol.id).unwrap().unwrap();
        assert_eq!(due.stage.name, "Pre-op call");
        // before_event counts back from the anchor, not from completions
        assert_eq!(due.due_date, date("2025-03-08"));
    }

    #[test]
    fn finished_journey_has_nothing_due() {
        let orch = orchestrator();
        let protocol = seed_protocol(&orch);
        let patient = Uuid::new_v4();
        orch.enroll(&patient, &protocol.id, Some(date("2025-01-01")), Some(date("2025-03-10")))
            .unwrap();

        for stage in &protocol.stages {
            for it in &stage.checklist {
                orch.mark_task_done_at(&patient, &protocol.id, &it.id, ts("2025-03-01 08:00:00"))
                    .unwrap();
            }
        }
        assert!(orch.next_due_task(&patient, &protocol.id).unwrap().is_none());
    }

    #[test]
    fn ended_journey_has_nothing_due() {
        let orch = orchestrator();
        let protocol = seed_protocol(&orch);
        let patient = Uuid::new_v4();
        orch.enroll(&patient, &protocol.id, Some(date("2025-01-01")), None).unwrap();
        orch.end_journey_at(&patient, &protocol.id, ts("2025-02-01 12:00:00")).unwrap();

        assert!(orch.next_due_task(&patient, &protocol.id).unwrap().is_none());
    }

    #[test]
    fn context_free_journey_reports_missing_context() {
        let orch = orchestrator();
        let protocol = seed_protocol(&orch);
        let patient = Uuid::new_v4();
        orch.enroll(&patient, &protocol.id, None, None).unwrap();

        let err = orch.next_due_task(&patient, &protocol.id).unwrap_err();
        assert!(matches!(err, EngineError::MissingContext(_)));
    }

    #[test]
    fn marking_done_twice_keeps_first_timestamp() {
        let orch = orchestrator();
        let protocol = seed_protocol(&orch);
        let patient = Uuid::new_v4();
        orch.enroll(&patient, &protocol.id, Some(date("2025-01-01")), None).unwrap();

        let item_id = protocol.stages[0].checklist[0].id;
        orch.mark_task_done_at(&patient, &protocol.id, &item_id, ts("2025-01-03 10:00:00"))
            .unwrap();
        let journey = orch
            .mark_task_done_at(&patient, &protocol.id, &item_id, ts("2025-01-07 10:00:00"))
            .unwrap();

        assert_eq!(journey.completion_timestamp(&item_id), Some(ts("2025-01-03 10:00:00")));
    }

    #[test]
    fn unknown_task_is_not_found() {
        let orch = orchestrator();
        let protocol = seed_protocol(&orch);
        let patient = Uuid::new_v4();
        orch.enroll(&patient, &protocol.id, None, None).unwrap();

        let err = orch
            .mark_task_done(&patient, &protocol.id, &Uuid::new_v4())
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[test]
    fn first_post_op_return_lands_friday_or_monday() {
        let orch = orchestrator();
        let protocol = orch
            .create_protocol(
                "Post-op follow-up",
                vec![NewStage {
                    name: "First return".into(),
                    deadline: DeadlineRule::PostOp { days: 0, return_number: 1 },
                    checklist: vec![item("Wound check")],
                }],
            )
            .unwrap();

        // 2025-06-03 is a Tuesday: seen that week's Friday
        let early = Uuid::new_v4();
        orch.enroll(&early, &protocol.id, None, Some(date("2025-06-03"))).unwrap();
        let due = orch.next_due_task(&early, &protocol.id).unwrap().unwrap();
        assert_eq!(due.due_date, date("2025-06-06"));

        // 2025-06-07 is a Saturday: seen the following Monday
        let late = Uuid::new_v4();
        orch.enroll(&late, &protocol.id, None, Some(date("2025-06-07"))).unwrap();
        let due = orch.next_due_task(&late, &protocol.id).unwrap().unwrap();
        assert_eq!(due.due_date, date("2025-06-09"));
    }

    #[test]
    fn journey_progress_combines_items_and_stages() {
        let orch = orchestrator();
        let protocol = seed_protocol(&orch);
        let patient = Uuid::new_v4();
        orch.enroll(&patient, &protocol.id, Some(date("2025-01-01")), None).unwrap();
        orch.mark_task_done_at(
            &patient,
            &protocol.id,
            &protocol.stages[0].checklist[0].id,
            ts("2025-01-04 09:00:00"),
        )
        .unwrap();

        let progress = orch.journey_progress(&patient, &protocol.id).unwrap();
        assert_eq!(progress.items.len(), 3);
        assert_eq!(
            (progress.stages[0].completed, progress.stages[0].total),
            (1, 2)
        );
        assert_eq!(
            (progress.stages[1].completed, progress.stages[1].total),
            (0, 1)
        );
    }

    #[test]
    fn stage_admin_flows_through_the_facade() {
        let orch = orchestrator();
        let protocol = seed_protocol(&orch);

        let added = orch
            .add_stage(
                &protocol.id,
                NewStage {
                    name: "Final review".into(),
                    deadline: DeadlineRule::PostOp { days: 0, return_number: 6 },
                    checklist: vec![item("Discharge letter")],
                },
            )
            .unwrap();
        assert_eq!(added.order, 3);

        let stages = orch.move_stage(&added.id, MoveDirection::Up).unwrap();
        assert_eq!(stages[1].name, "Final review");
        assert_eq!(
            stages.iter().map(|s| s.order).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );

        orch.delete_stage(&added.id).unwrap();
        let stages = orch.list_stages(&protocol.id).unwrap();
        assert_eq!(stages.len(), 2);
        assert_eq!(
            stages.iter().map(|s| s.order).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }
}
