use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::{is_constraint_failure, DatabaseError};
use crate::models::enums::*;
use crate::models::*;

use super::protocol::{parse_timestamp, parse_uuid};

pub fn insert_journey(conn: &Connection, journey: &PatientJourney) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO journeys (id, patient_id, protocol_id, first_contact_date,
         surgery_date, status, ended_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            journey.id.to_string(),
            journey.patient_id.to_string(),
            journey.protocol_id.to_string(),
            journey.first_contact_date.map(|d| d.to_string()),
            journey.surgery_date.map(|d| d.to_string()),
            journey.status.as_str(),
            journey
                .ended_at
                .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string()),
        ],
    )
    .map_err(|e| {
        if is_constraint_failure(&e) {
            DatabaseError::ConstraintViolation(format!(
                "journey already exists for patient {} in protocol {}",
                journey.patient_id, journey.protocol_id
            ))
        } else {
            DatabaseError::from(e)
        }
    })?;
    Ok(())
}

pub fn get_journey(
    conn: &Connection,
    patient_id: &Uuid,
    protocol_id: &Uuid,
) -> Result<Option<PatientJourney>, DatabaseError> {
    let row = conn.query_row(
        "SELECT id, patient_id, protocol_id, first_contact_date, surgery_date, status, ended_at
         FROM journeys WHERE patient_id = ?1 AND protocol_id = ?2",
        params![patient_id.to_string(), protocol_id.to_string()],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        },
    );

    match row {
        Ok((id_str, patient_str, protocol_str, first_contact, surgery, status, ended_at)) => {
            let id = parse_uuid(&id_str)?;
            Ok(Some(PatientJourney {
                id,
                patient_id: parse_uuid(&patient_str)?,
                protocol_id: parse_uuid(&protocol_str)?,
                completions: get_completions(conn, &id)?,
                first_contact_date: first_contact
                    .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
                surgery_date: surgery
                    .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
                status: JourneyStatus::from_str(&status)?,
                ended_at: ended_at.map(|ts| parse_timestamp(&ts)),
            }))
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn get_completions(
    conn: &Connection,
    journey_id: &Uuid,
) -> Result<BTreeMap<Uuid, DateTime<Utc>>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT item_id, completed_at FROM journey_completions WHERE journey_id = ?1",
    )?;

    let rows = stmt.query_map(params![journey_id.to_string()], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut completions = BTreeMap::new();
    for row in rows {
        let (item_str, completed_at) = row?;
        completions.insert(parse_uuid(&item_str)?, parse_timestamp(&completed_at));
    }
    Ok(completions)
}

/// Record a completion. INSERT OR IGNORE keeps the first timestamp when the
/// item was already completed, which makes retries and double-taps harmless.
pub fn insert_completion(
    conn: &Connection,
    journey_id: &Uuid,
    item_id: &Uuid,
    at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO journey_completions (journey_id, item_id, completed_at)
         VALUES (?1, ?2, ?3)",
        params![
            journey_id.to_string(),
            item_id.to_string(),
            at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ],
    )?;
    Ok(())
}

pub fn update_journey_dates(
    conn: &Connection,
    journey_id: &Uuid,
    first_contact: Option<NaiveDate>,
    surgery: Option<NaiveDate>,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE journeys SET first_contact_date = ?2, surgery_date = ?3 WHERE id = ?1",
        params![
            journey_id.to_string(),
            first_contact.map(|d| d.to_string()),
            surgery.map(|d| d.to_string()),
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "PatientJourney".into(),
            id: journey_id.to_string(),
        });
    }
    Ok(())
}

/// Mark a journey ended. COALESCE keeps the first ended_at if the journey
/// was already closed.
pub fn mark_journey_ended(
    conn: &Connection,
    journey_id: &Uuid,
    at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE journeys SET status = ?2, ended_at = COALESCE(ended_at, ?3) WHERE id = ?1",
        params![
            journey_id.to_string(),
            JourneyStatus::Ended.as_str(),
            at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "PatientJourney".into(),
            id: journey_id.to_string(),
        });
    }
    Ok(())
}

pub fn count_journeys_for_protocol(
    conn: &Connection,
    protocol_id: &Uuid,
) -> Result<u64, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM journeys WHERE protocol_id = ?1",
        params![protocol_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}
