use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::*;

/// Insert a protocol together with its stages and checklist templates.
/// One transaction: readers never see a protocol with half its stages.
pub fn insert_protocol(conn: &Connection, protocol: &Protocol) -> Result<(), DatabaseError> {
    let tx = conn.unchecked_transaction()?;

    tx.execute(
        "INSERT INTO protocols (id, name, created_at) VALUES (?1, ?2, ?3)",
        params![
            protocol.id.to_string(),
            protocol.name,
            protocol.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ],
    )?;
    insert_stage_rows(&tx, &protocol.stages)?;

    tx.commit()?;
    Ok(())
}

pub fn get_protocol(conn: &Connection, id: &Uuid) -> Result<Option<Protocol>, DatabaseError> {
    let row = conn.query_row(
        "SELECT id, name, created_at FROM protocols WHERE id = ?1",
        params![id.to_string()],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        },
    );

    match row {
        Ok((id_str, name, created_at)) => {
            let id = parse_uuid(&id_str)?;
            let stages = get_stages(conn, &id)?;
            Ok(Some(Protocol {
                id,
                name,
                created_at: parse_timestamp(&created_at),
                stages,
            }))
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn list_protocols(conn: &Connection) -> Result<Vec<Protocol>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, created_at FROM protocols ORDER BY created_at, name",
    )?;

    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut protocols = Vec::new();
    for row in rows {
        let (id_str, name, created_at) = row?;
        let id = parse_uuid(&id_str)?;
        let stages = get_stages(conn, &id)?;
        protocols.push(Protocol {
            id,
            name,
            created_at: parse_timestamp(&created_at),
            stages,
        });
    }
    Ok(protocols)
}

pub fn update_protocol_name(
    conn: &Connection,
    id: &Uuid,
    name: &str,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE protocols SET name = ?2 WHERE id = ?1",
        params![id.to_string(), name],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "Protocol".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

pub fn delete_protocol(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let deleted = conn.execute(
        "DELETE FROM protocols WHERE id = ?1",
        params![id.to_string()],
    )?;
    if deleted == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "Protocol".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Replace a protocol's whole stage list (stages + checklist templates) in
/// one transaction. Stage deletion cascades to checklist_items, so the
/// delete + reinsert leaves no orphans; on any failure nothing commits and
/// readers keep the previous ordering.
pub fn replace_stages(
    conn: &Connection,
    protocol_id: &Uuid,
    stages: &[Stage],
) -> Result<(), DatabaseError> {
    let tx = conn.unchecked_transaction()?;

    tx.execute(
        "DELETE FROM stages WHERE protocol_id = ?1",
        params![protocol_id.to_string()],
    )?;
    insert_stage_rows(&tx, stages)?;

    tx.commit()?;
    tracing::debug!(protocol_id = %protocol_id, stages = stages.len(), "Replaced stage list");
    Ok(())
}

/// The protocol a stage belongs to, if the stage exists.
pub fn get_stage_protocol_id(
    conn: &Connection,
    stage_id: &Uuid,
) -> Result<Option<Uuid>, DatabaseError> {
    let row = conn.query_row(
        "SELECT protocol_id FROM stages WHERE id = ?1",
        params![stage_id.to_string()],
        |row| row.get::<_, String>(0),
    );

    match row {
        Ok(id_str) => Ok(Some(parse_uuid(&id_str)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn insert_stage_rows(conn: &Connection, stages: &[Stage]) -> Result<(), DatabaseError> {
    for stage in stages {
        let deadline_json = serde_json::to_string(&stage.deadline)
            .map_err(|e| DatabaseError::ConstraintViolation(format!("JSON serialization: {e}")))?;

        conn.execute(
            "INSERT INTO stages (id, protocol_id, name, stage_order, deadline)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                stage.id.to_string(),
                stage.protocol_id.to_string(),
                stage.name,
                stage.order,
                deadline_json,
            ],
        )?;

        for item in &stage.checklist {
            conn.execute(
                "INSERT INTO checklist_items (id, stage_id, position, task, action_link)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    item.id.to_string(),
                    item.stage_id.to_string(),
                    item.position,
                    item.task,
                    item.action_link,
                ],
            )?;
        }
    }
    Ok(())
}

fn get_stages(conn: &Connection, protocol_id: &Uuid) -> Result<Vec<Stage>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, protocol_id, name, stage_order, deadline
         FROM stages WHERE protocol_id = ?1 ORDER BY stage_order",
    )?;

    let rows = stmt.query_map(params![protocol_id.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, u32>(3)?,
            row.get::<_, String>(4)?,
        ))
    })?;

    let mut stages = Vec::new();
    for row in rows {
        let (id_str, protocol_str, name, order, deadline_json) = row?;
        let id = parse_uuid(&id_str)?;
        let deadline: DeadlineRule = serde_json::from_str(&deadline_json)
            .map_err(|e| DatabaseError::ConstraintViolation(format!("stored deadline rule: {e}")))?;
        stages.push(Stage {
            id,
            protocol_id: parse_uuid(&protocol_str)?,
            name,
            order,
            deadline,
            checklist: get_checklist_items(conn, &id)?,
        });
    }
    Ok(stages)
}

fn get_checklist_items(
    conn: &Connection,
    stage_id: &Uuid,
) -> Result<Vec<ChecklistItem>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, stage_id, position, task, action_link
         FROM checklist_items WHERE stage_id = ?1 ORDER BY position",
    )?;

    let rows = stmt.query_map(params![stage_id.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, u32>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, Option<String>>(4)?,
        ))
    })?;

    let mut items = Vec::new();
    for row in rows {
        let (id_str, stage_str, position, task, action_link) = row?;
        items.push(ChecklistItem {
            id: parse_uuid(&id_str)?,
            stage_id: parse_uuid(&stage_str)?,
            position,
            task,
            action_link,
        });
    }
    Ok(items)
}

pub(super) fn parse_uuid(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))
}

pub(super) fn parse_timestamp(s: &str) -> chrono::DateTime<chrono::Utc> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .unwrap_or_default()
        .and_utc()
}
