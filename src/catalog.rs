//! Protocol catalog: stage lists and their ordering.
//!
//! Every mutation loads the protocol, computes the next stage list in
//! memory, and persists it through one atomic `save_stages`. The catalog
//! keeps no cache, so a failed save leaves readers on the previous ordering
//! and the operation can simply be retried.

use chrono::Utc;
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::enums::MoveDirection;
use crate::models::*;
use crate::store::Store;

/// Create a protocol with an initial (possibly empty) stage list.
/// Stage orders are assigned 1..N in the given sequence.
pub fn create_protocol(
    store: &dyn Store,
    name: &str,
    stages: Vec<NewStage>,
) -> Result<Protocol, EngineError> {
    validate_name(name)?;

    let protocol_id = Uuid::new_v4();
    let stages = stages
        .into_iter()
        .enumerate()
        .map(|(i, new)| build_stage(protocol_id, (i + 1) as u32, new))
        .collect::<Vec<_>>();

    let protocol = Protocol {
        id: protocol_id,
        name: name.to_string(),
        created_at: Utc::now(),
        stages,
    };
    store.create_protocol(&protocol)?;

    tracing::info!(
        protocol_id = %protocol.id,
        name = %protocol.name,
        stages = protocol.stages.len(),
        "Created protocol"
    );
    Ok(protocol)
}

pub fn get_protocol(store: &dyn Store, protocol_id: &Uuid) -> Result<Protocol, EngineError> {
    store.load_protocol(protocol_id)
}

pub fn list_protocols(store: &dyn Store) -> Result<Vec<Protocol>, EngineError> {
    store.list_protocols()
}

pub fn rename_protocol(
    store: &dyn Store,
    protocol_id: &Uuid,
    name: &str,
) -> Result<Protocol, EngineError> {
    validate_name(name)?;
    store.rename_protocol(protocol_id, name)?;
    tracing::info!(protocol_id = %protocol_id, name = %name, "Renamed protocol");
    store.load_protocol(protocol_id)
}

/// Delete a protocol. Refused while any journey references it: journeys are
/// never silently invalidated.
pub fn delete_protocol(store: &dyn Store, protocol_id: &Uuid) -> Result<(), EngineError> {
    let journeys = store.journey_count(protocol_id)?;
    if journeys > 0 {
        return Err(EngineError::ConstraintViolation(format!(
            "protocol {protocol_id} has {journeys} patient journeys"
        )));
    }
    store.delete_protocol(protocol_id)?;
    tracing::info!(protocol_id = %protocol_id, "Deleted protocol");
    Ok(())
}

/// Append a stage at the end of the protocol (order = N + 1).
pub fn add_stage(
    store: &dyn Store,
    protocol_id: &Uuid,
    new: NewStage,
) -> Result<Stage, EngineError> {
    let mut protocol = store.load_protocol(protocol_id)?;
    let stage = build_stage(protocol.id, protocol.stages.len() as u32 + 1, new);
    protocol.stages.push(stage.clone());
    store.save_stages(&protocol.id, &protocol.stages)?;

    tracing::info!(
        protocol_id = %protocol.id,
        stage_id = %stage.id,
        order = stage.order,
        "Added stage"
    );
    Ok(stage)
}

/// Update a stage's name, deadline rule and/or checklist templates. Stage
/// order and protocol membership never change here.
pub fn update_stage(
    store: &dyn Store,
    stage_id: &Uuid,
    patch: StagePatch,
) -> Result<Stage, EngineError> {
    let mut protocol = store.find_protocol_by_stage(stage_id)?;
    let stage = protocol
        .stages
        .iter_mut()
        .find(|s| s.id == *stage_id)
        .ok_or_else(|| EngineError::NotFound {
            entity_type: "Stage".into(),
            id: stage_id.to_string(),
        })?;

    if let Some(name) = patch.name {
        stage.name = name;
    }
    if let Some(deadline) = patch.deadline {
        stage.deadline = deadline;
    }
    if let Some(entries) = patch.checklist {
        // Entries carrying an id keep it, preserving journey completions
        // recorded against the item; fresh entries get new ids.
        let stage_id = stage.id;
        stage.checklist = entries
            .into_iter()
            .enumerate()
            .map(|(i, entry)| ChecklistItem {
                id: entry.id.unwrap_or_else(Uuid::new_v4),
                stage_id,
                position: (i + 1) as u32,
                task: entry.task,
                action_link: entry.action_link,
            })
            .collect();
    }

    let updated = stage.clone();
    store.save_stages(&protocol.id, &protocol.stages)?;

    tracing::info!(protocol_id = %protocol.id, stage_id = %updated.id, "Updated stage");
    Ok(updated)
}

/// Remove a stage and renumber the survivors to a contiguous 1..N, keeping
/// their relative order.
pub fn delete_stage(store: &dyn Store, stage_id: &Uuid) -> Result<(), EngineError> {
    let mut protocol = store.find_protocol_by_stage(stage_id)?;
    protocol.stages.retain(|s| s.id != *stage_id);
    renumber(&mut protocol.stages);
    store.save_stages(&protocol.id, &protocol.stages)?;

    tracing::info!(
        protocol_id = %protocol.id,
        stage_id = %stage_id,
        remaining = protocol.stages.len(),
        "Deleted stage"
    );
    Ok(())
}

/// Swap a stage with its neighbor. Moving the first stage up or the last
/// stage down is a no-op returning the unchanged list.
pub fn move_stage(
    store: &dyn Store,
    stage_id: &Uuid,
    direction: MoveDirection,
) -> Result<Vec<Stage>, EngineError> {
    let mut protocol = store.find_protocol_by_stage(stage_id)?;
    let idx = protocol
        .stages
        .iter()
        .position(|s| s.id == *stage_id)
        .ok_or_else(|| EngineError::NotFound {
            entity_type: "Stage".into(),
            id: stage_id.to_string(),
        })?;

    let neighbor = match direction {
        MoveDirection::Up if idx == 0 => return Ok(protocol.stages),
        MoveDirection::Down if idx == protocol.stages.len() - 1 => return Ok(protocol.stages),
        MoveDirection::Up => idx - 1,
        MoveDirection::Down => idx + 1,
    };

    protocol.stages.swap(idx, neighbor);
    renumber(&mut protocol.stages);

    if let Err(e) = store.save_stages(&protocol.id, &protocol.stages) {
        tracing::warn!(
            stage_id = %stage_id,
            error = %e,
            "Stage move not persisted; previous order still in effect"
        );
        return Err(e);
    }

    tracing::info!(protocol_id = %protocol.id, stage_id = %stage_id, "Moved stage");
    Ok(protocol.stages)
}

/// Read-only ordered stage list.
pub fn list_stages(store: &dyn Store, protocol_id: &Uuid) -> Result<Vec<Stage>, EngineError> {
    Ok(store.load_protocol(protocol_id)?.stages)
}

fn build_stage(protocol_id: Uuid, order: u32, new: NewStage) -> Stage {
    let stage_id = Uuid::new_v4();
    let checklist = new
        .checklist
        .into_iter()
        .enumerate()
        .map(|(i, item)| ChecklistItem {
            id: Uuid::new_v4(),
            stage_id,
            position: (i + 1) as u32,
            task: item.task,
            action_link: item.action_link,
        })
        .collect();

    Stage {
        id: stage_id,
        protocol_id,
        name: new.name,
        order,
        deadline: new.deadline,
        checklist,
    }
}

fn renumber(stages: &mut [Stage]) {
    for (i, stage) in stages.iter_mut().enumerate() {
        stage.order = (i + 1) as u32;
    }
}

fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::ConstraintViolation(
            "protocol name must not be empty".into(),
        ));
    }
    Ok(())
}
