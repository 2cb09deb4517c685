//! Patient journey tracking: enrollment, task completion, reference dates.
//!
//! Completion state lives on the journey, never on the checklist templates.
//! Completing an item is idempotent: the first recorded timestamp wins, so
//! retries and double-taps cannot rewrite history.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::enums::JourneyStatus;
use crate::models::*;
use crate::store::Store;

/// Enroll a patient in a protocol. Enrollment is explicit; reading a journey
/// that was never created is an error, not a silent insert.
pub fn enroll(
    store: &dyn Store,
    patient_id: &Uuid,
    protocol_id: &Uuid,
    first_contact_date: Option<NaiveDate>,
    surgery_date: Option<NaiveDate>,
) -> Result<PatientJourney, EngineError> {
    let protocol = store.load_protocol(protocol_id)?;

    let journey = PatientJourney {
        id: Uuid::new_v4(),
        patient_id: *patient_id,
        protocol_id: *protocol_id,
        completions: BTreeMap::new(),
        first_contact_date,
        surgery_date,
        status: JourneyStatus::Active,
        ended_at: None,
    };
    store.create_journey(&journey)?;

    tracing::info!(
        patient_id = %patient_id,
        protocol = %protocol.name,
        "Enrolled patient"
    );
    Ok(journey)
}

pub fn get_journey(
    store: &dyn Store,
    patient_id: &Uuid,
    protocol_id: &Uuid,
) -> Result<PatientJourney, EngineError> {
    store
        .load_journey(patient_id, protocol_id)?
        .ok_or_else(|| EngineError::NotFound {
            entity_type: "PatientJourney".into(),
            id: format!("{patient_id}/{protocol_id}"),
        })
}

/// Record a checklist item as completed at the given instant.
///
/// Idempotent: an already-completed item keeps its original timestamp and
/// the journey is returned unchanged. The item must belong to the journey's
/// protocol, and an ended journey accepts no further completions.
pub fn complete_item(
    store: &dyn Store,
    journey: &PatientJourney,
    item_id: &Uuid,
    at: DateTime<Utc>,
) -> Result<PatientJourney, EngineError> {
    if journey.is_ended() {
        return Err(EngineError::ConstraintViolation(format!(
            "journey {} has ended; its completion history is frozen",
            journey.id
        )));
    }

    let protocol = store.load_protocol(&journey.protocol_id)?;
    if protocol.stage_of_item(item_id).is_none() {
        return Err(EngineError::NotFound {
            entity_type: "ChecklistItem".into(),
            id: item_id.to_string(),
        });
    }

    if journey.is_completed(item_id) {
        tracing::debug!(journey_id = %journey.id, item_id = %item_id, "Item already completed");
        return Ok(journey.clone());
    }

    store.save_completion(&journey.id, item_id, at)?;
    let mut updated = journey.clone();
    updated.completions.insert(*item_id, at);

    tracing::info!(journey_id = %journey.id, item_id = %item_id, "Completed task");
    Ok(updated)
}

pub fn set_first_contact_date(
    store: &dyn Store,
    journey: &PatientJourney,
    date: Option<NaiveDate>,
) -> Result<PatientJourney, EngineError> {
    let mut updated = journey.clone();
    updated.first_contact_date = date;
    store.save_journey_dates(&updated.id, updated.first_contact_date, updated.surgery_date)?;
    Ok(updated)
}

/// Set or clear the journey's anchor event. Surgery is usually scheduled
/// well after enrollment, so this arrives as a later update.
pub fn set_surgery_date(
    store: &dyn Store,
    journey: &PatientJourney,
    date: Option<NaiveDate>,
) -> Result<PatientJourney, EngineError> {
    let mut updated = journey.clone();
    updated.surgery_date = date;
    store.save_journey_dates(&updated.id, updated.first_contact_date, updated.surgery_date)?;
    tracing::info!(journey_id = %journey.id, "Updated anchor event date");
    Ok(updated)
}

/// Close a journey. Idempotent: ending an already-ended journey keeps the
/// original ended_at.
pub fn end_journey(
    store: &dyn Store,
    journey: &PatientJourney,
    at: DateTime<Utc>,
) -> Result<PatientJourney, EngineError> {
    if journey.is_ended() {
        return Ok(journey.clone());
    }
    store.end_journey(&journey.id, at)?;

    let mut updated = journey.clone();
    updated.status = JourneyStatus::Ended;
    updated.ended_at = Some(at);

    tracing::info!(journey_id = %journey.id, "Journey ended");
    Ok(updated)
}

/// Completion timestamp (or None) for every checklist item template of the
/// protocol, keyed by item id. Drives UI checkmarks.
pub fn completion_status(
    journey: &PatientJourney,
    protocol: &Protocol,
) -> BTreeMap<Uuid, Option<DateTime<Utc>>> {
    protocol
        .stages
        .iter()
        .flat_map(|stage| &stage.checklist)
        .map(|item| (item.id, journey.completion_timestamp(&item.id)))
        .collect()
}

/// Per-stage completed/total rollup, in stage order.
pub fn stage_progress(journey: &PatientJourney, protocol: &Protocol) -> Vec<StageProgress> {
    protocol
        .stages
        .iter()
        .map(|stage| StageProgress {
            stage_id: stage.id,
            completed: stage
                .checklist
                .iter()
                .filter(|item| journey.is_completed(&item.id))
                .count() as u32,
            total: stage.checklist.len() as u32,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDateTime;

    use super::*;
    use crate::catalog;
    use crate::store::SqliteStore;

    fn mem_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn ts(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn seed_protocol(store: &dyn Store) -> Protocol {
        catalog::create_protocol(
            store,
            "Cataract surgery",
            vec![
                NewStage {
                    name: "Work-up".into(),
                    deadline: DeadlineRule::AfterPrevious { days: 5 },
                    checklist: vec![
                        NewChecklistItem { task: "Biometry".into(), action_link: None },
                        NewChecklistItem { task: "Consent signed".into(), action_link: None },
                    ],
                },
                NewStage {
                    name: "Pre-op call".into(),
                    deadline: DeadlineRule::BeforeEvent { days: 2 },
                    checklist: vec![NewChecklistItem {
                        task: "Confirm fasting instructions".into(),
                        action_link: Some("scheduler://preop".into()),
                    }],
                },
            ],
        )
        .unwrap()
    }

    #[test]
    fn enroll_then_get() {
        let store = mem_store();
        let protocol = seed_protocol(&store);
        let patient = Uuid::new_v4();

        let journey = enroll(&store, &patient, &protocol.id, Some(date("2025-01-10")), None).unwrap();
        assert_eq!(journey.status, JourneyStatus::Active);

        let loaded = get_journey(&store, &patient, &protocol.id).unwrap();
        assert_eq!(loaded.id, journey.id);
        assert_eq!(loaded.first_contact_date, Some(date("2025-01-10")));
    }

    #[test]
    fn get_before_enroll_is_not_found() {
        let store = mem_store();
        let protocol = seed_protocol(&store);
        let err = get_journey(&store, &Uuid::new_v4(), &protocol.id).unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[test]
    fn enroll_in_unknown_protocol_is_not_found() {
        let store = mem_store();
        let err = enroll(&store, &Uuid::new_v4(), &Uuid::new_v4(), None, None).unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[test]
    fn duplicate_enroll_rejected() {
        let store = mem_store();
        let protocol = seed_protocol(&store);
        let patient = Uuid::new_v4();

        enroll(&store, &patient, &protocol.id, None, None).unwrap();
        let err = enroll(&store, &patient, &protocol.id, None, None).unwrap_err();
        assert!(matches!(err, EngineError::ConstraintViolation(_)));
    }

    #[test]
    fn completion_is_idempotent() {
        let store = mem_store();
        let protocol = seed_protocol(&store);
        let journey = enroll(&store, &Uuid::new_v4(), &protocol.id, None, None).unwrap();
        let item_id = protocol.stages[0].checklist[0].id;

        let first = complete_item(&store, &journey, &item_id, ts("2025-02-01 10:00:00")).unwrap();
        let second = complete_item(&store, &first, &item_id, ts("2025-02-05 18:00:00")).unwrap();

        assert_eq!(second.completion_timestamp(&item_id), Some(ts("2025-02-01 10:00:00")));

        let reloaded = get_journey(&store, &journey.patient_id, &protocol.id).unwrap();
        assert_eq!(reloaded.completion_timestamp(&item_id), Some(ts("2025-02-01 10:00:00")));
    }

    #[test]
    fn completing_foreign_item_is_not_found() {
        let store = mem_store();
        let protocol = seed_protocol(&store);
        let journey = enroll(&store, &Uuid::new_v4(), &protocol.id, None, None).unwrap();

        let err = complete_item(&store, &journey, &Uuid::new_v4(), ts("2025-02-01 10:00:00"))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::NotFound { ref entity_type, .. } if entity_type == "ChecklistItem"
        ));
    }

    #[test]
    fn ended_journey_refuses_completions() {
        let store = mem_store();
        let protocol = seed_protocol(&store);
        let journey = enroll(&store, &Uuid::new_v4(), &protocol.id, None, None).unwrap();
        let ended = end_journey(&store, &journey, ts("2025-03-01 12:00:00")).unwrap();

        let item_id = protocol.stages[0].checklist[0].id;
        let err = complete_item(&store, &ended, &item_id, ts("2025-03-02 12:00:00")).unwrap_err();
        assert!(matches!(err, EngineError::ConstraintViolation(_)));
    }

    #[test]
    fn end_journey_is_idempotent() {
        let store = mem_store();
        let protocol = seed_protocol(&store);
        let journey = enroll(&store, &Uuid::new_v4(), &protocol.id, None, None).unwrap();

        let ended = end_journey(&store, &journey, ts("2025-03-01 12:00:00")).unwrap();
        let again = end_journey(&store, &ended, ts("2025-04-01 12:00:00")).unwrap();
        assert_eq!(again.ended_at, Some(ts("2025-03-01 12:00:00")));

        let reloaded = get_journey(&store, &journey.patient_id, &protocol.id).unwrap();
        assert_eq!(reloaded.ended_at, Some(ts("2025-03-01 12:00:00")));
        assert_eq!(reloaded.status, JourneyStatus::Ended);
    }

    #[test]
    fn surgery_date_persists() {
        let store = mem_store();
        let protocol = seed_protocol(&store);
        let journey = enroll(&store, &Uuid::new_v4(), &protocol.id, Some(date("2025-01-10")), None)
            .unwrap();

        let updated = set_surgery_date(&store, &journey, Some(date("2025-03-10"))).unwrap();
        assert_eq!(updated.surgery_date, Some(date("2025-03-10")));

        let reloaded = get_journey(&store, &journey.patient_id, &protocol.id).unwrap();
        assert_eq!(reloaded.surgery_date, Some(date("2025-03-10")));
        assert_eq!(reloaded.first_contact_date, Some(date("2025-01-10")));
    }

    #[test]
    fn completion_status_covers_every_item() {
        let store = mem_store();
        let protocol = seed_protocol(&store);
        let journey = enroll(&store, &Uuid::new_v4(), &protocol.id, None, None).unwrap();
        let done_item = protocol.stages[0].checklist[1].id;
        let journey = complete_item(&store, &journey, &done_item, ts("2025-02-01 10:00:00")).unwrap();

        let status = completion_status(&journey, &protocol);
        assert_eq!(status.len(), 3);
        assert_eq!(status[&done_item], Some(ts("2025-02-01 10:00:00")));
        assert_eq!(status[&protocol.stages[0].checklist[0].id], None);
        assert_eq!(status[&protocol.stages[1].checklist[0].id], None);
    }

    #[test]
    fn stage_progress_rolls_up_per_stage() {
        let store = mem_store();
        let protocol = seed_protocol(&store);
        let journey = enroll(&store, &Uuid::new_v4(), &protocol.id, None, None).unwrap();
        let journey = complete_item(
            &store,
            &journey,
            &protocol.stages[0].checklist[0].id,
            ts("2025-02-01 10:00:00"),
        )
        .unwrap();

        let progress = stage_progress(&journey, &protocol);
        assert_eq!(progress.len(), 2);
        assert_eq!((progress[0].completed, progress[0].total), (1, 2));
        assert_eq!((progress[1].completed, progress[1].total), (0, 1));
    }
}
