pub mod catalog;
pub mod config;
pub mod db;
pub mod deadline;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod store;
pub mod tracker;

pub use error::EngineError;
pub use orchestrator::{DueTask, JourneyOrchestrator, JourneyProgress};
pub use store::{SqliteStore, Store};

use tracing_subscriber::EnvFilter;

/// Initialize tracing for binaries embedding the engine. `RUST_LOG`
/// overrides the default filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("Carepath starting v{}", config::APP_VERSION);
}
