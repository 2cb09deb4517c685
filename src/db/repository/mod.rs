//! Repository layer — entity-scoped database operations.
//!
//! Free functions over a borrowed connection; the Store port in
//! `crate::store` composes these into the engine-facing interface.

mod journey;
mod protocol;

// Re-export all public items from sub-modules
pub use journey::*;
pub use protocol::*;
