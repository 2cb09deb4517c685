//! Engine-facing error types.
//!
//! Separate from DatabaseError so alternative Store implementations never
//! depend on the SQLite layer.

use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid deadline rule: {0}")]
    InvalidRule(String),

    #[error("Missing context for deadline computation: {0}")]
    MissingContext(&'static str),

    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Constraint violated: {0}")]
    ConstraintViolation(String),
}

impl From<DatabaseError> for EngineError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound { entity_type, id } => {
                EngineError::NotFound { entity_type, id }
            }
            DatabaseError::ConstraintViolation(msg) => EngineError::ConstraintViolation(msg),
            other => EngineError::Persistence(other.to_string()),
        }
    }
}
