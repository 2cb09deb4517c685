//! Persistence port for the protocol and journey engine.
//!
//! Catalog, tracker and orchestrator talk to storage only through `Store`,
//! so the engine stays persistence-agnostic and tests can substitute
//! in-memory or failing doubles. `SqliteStore` is the bundled
//! implementation over the repository layer.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use crate::db::{self, repository};
use crate::error::EngineError;
use crate::models::*;

pub trait Store: Send + Sync {
    /// Load a protocol with its ordered stages and checklist templates.
    fn load_protocol(&self, id: &Uuid) -> Result<Protocol, EngineError>;

    /// All protocols, stages included.
    fn list_protocols(&self) -> Result<Vec<Protocol>, EngineError>;

    /// Persist a new protocol tree in one atomic write.
    fn create_protocol(&self, protocol: &Protocol) -> Result<(), EngineError>;

    fn rename_protocol(&self, id: &Uuid, name: &str) -> Result<(), EngineError>;

    /// Delete a protocol. Storage-level constraints keep a protocol with
    /// journeys alive even if the caller skipped the journey-count check.
    fn delete_protocol(&self, id: &Uuid) -> Result<(), EngineError>;

    /// Replace a protocol's whole stage list atomically. Either every row of
    /// the new ordering commits or none does.
    fn save_stages(&self, protocol_id: &Uuid, stages: &[Stage]) -> Result<(), EngineError>;

    /// The protocol owning the given stage.
    fn find_protocol_by_stage(&self, stage_id: &Uuid) -> Result<Protocol, EngineError>;

    /// Number of journeys referencing a protocol.
    fn journey_count(&self, protocol_id: &Uuid) -> Result<u64, EngineError>;

    fn create_journey(&self, journey: &PatientJourney) -> Result<(), EngineError>;

    /// A patient's journey in a protocol, None when never enrolled.
    fn load_journey(
        &self,
        patient_id: &Uuid,
        protocol_id: &Uuid,
    ) -> Result<Option<PatientJourney>, EngineError>;

    /// Record a completion timestamp. Idempotent: an existing completion for
    /// the item keeps its original timestamp.
    fn save_completion(
        &self,
        journey_id: &Uuid,
        item_id: &Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), EngineError>;

    fn save_journey_dates(
        &self,
        journey_id: &Uuid,
        first_contact: Option<NaiveDate>,
        surgery: Option<NaiveDate>,
    ) -> Result<(), EngineError>;

    /// Close a journey. Idempotent: the first ended_at is kept.
    fn end_journey(&self, journey_id: &Uuid, at: DateTime<Utc>) -> Result<(), EngineError>;
}

/// SQLite-backed store. The connection sits behind a mutex so the store can
/// be shared across threads (rusqlite connections are Send but not Sync).
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (and migrate) the database at the given path.
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        let conn = db::open_database(path)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// In-memory store, primarily for tests.
    pub fn open_in_memory() -> Result<Self, EngineError> {
        let conn = db::open_memory_database()?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Wrap an already-opened (and migrated) connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn: Mutex::new(conn) }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, EngineError> {
        self.conn
            .lock()
            .map_err(|_| EngineError::Persistence("database lock poisoned".into()))
    }
}

impl Store for SqliteStore {
    fn load_protocol(&self, id: &Uuid) -> Result<Protocol, EngineError> {
        let conn = self.conn()?;
        repository::get_protocol(&conn, id)?.ok_or_else(|| EngineError::NotFound {
            entity_type: "Protocol".into(),
            id: id.to_string(),
        })
    }

    fn list_protocols(&self) -> Result<Vec<Protocol>, EngineError> {
        let conn = self.conn()?;
        Ok(repository::list_protocols(&conn)?)
    }

    fn create_protocol(&self, protocol: &Protocol) -> Result<(), EngineError> {
        let conn = self.conn()?;
        repository::insert_protocol(&conn, protocol)?;
        Ok(())
    }

    fn rename_protocol(&self, id: &Uuid, name: &str) -> Result<(), EngineError> {
        let conn = self.conn()?;
        repository::update_protocol_name(&conn, id, name)?;
        Ok(())
    }

    fn delete_protocol(&self, id: &Uuid) -> Result<(), EngineError> {
        let conn = self.conn()?;
        repository::delete_protocol(&conn, id)?;
        Ok(())
    }

    fn save_stages(&self, protocol_id: &Uuid, stages: &[Stage]) -> Result<(), EngineError> {
        let conn = self.conn()?;
        repository::replace_stages(&conn, protocol_id, stages)?;
        Ok(())
    }

    fn find_protocol_by_stage(&self, stage_id: &Uuid) -> Result<Protocol, EngineError> {
        let conn = self.conn()?;
        let protocol_id = repository::get_stage_protocol_id(&conn, stage_id)?.ok_or_else(|| {
            EngineError::NotFound {
                entity_type: "Stage".into(),
                id: stage_id.to_string(),
            }
        })?;
        repository::get_protocol(&conn, &protocol_id)?.ok_or_else(|| EngineError::NotFound {
            entity_type: "Protocol".into(),
            id: protocol_id.to_string(),
        })
    }

    fn journey_count(&self, protocol_id: &Uuid) -> Result<u64, EngineError> {
        let conn = self.conn()?;
        Ok(repository::count_journeys_for_protocol(&conn, protocol_id)?)
    }

    fn create_journey(&self, journey: &PatientJourney) -> Result<(), EngineError> {
        let conn = self.conn()?;
        repository::insert_journey(&conn, journey)?;
        Ok(())
    }

    fn load_journey(
        &self,
        patient_id: &Uuid,
        protocol_id: &Uuid,
    ) -> Result<Option<PatientJourney>, EngineError> {
        let conn = self.conn()?;
        Ok(repository::get_journey(&conn, patient_id, protocol_id)?)
    }

    fn save_completion(
        &self,
        journey_id: &Uuid,
        item_id: &Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let conn = self.conn()?;
        repository::insert_completion(&conn, journey_id, item_id, at)?;
        Ok(())
    }

    fn save_journey_dates(
        &self,
        journey_id: &Uuid,
        first_contact: Option<NaiveDate>,
        surgery: Option<NaiveDate>,
    ) -> Result<(), EngineError> {
        let conn = self.conn()?;
        repository::update_journey_dates(&conn, journey_id, first_contact, surgery)?;
        Ok(())
    }

    fn end_journey(&self, journey_id: &Uuid, at: DateTime<Utc>) -> Result<(), EngineError> {
        let conn = self.conn()?;
        repository::mark_journey_ended(&conn, journey_id, at)?;
        Ok(())
    }
}
