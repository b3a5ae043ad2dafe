//! Core logic for the Lullaby infant sleep and event log.
//!
//! Two concerns live here: the sleep-cycle state machine that turns caregiver
//! taps into event records, and the integrity engine that keeps the embedded
//! and indexed event representations in agreement.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::IntegrityConfig;
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::child::{Child, ChildId, Parent, ParentId};
pub use model::event::{
    EmotionalState, EventId, EventKey, EventPatch, EventRecord, EventType, EventValidationError,
};
pub use model::sleep::{ButtonConfig, SleepAction, SleepProfile, SleepStatus};
pub use repo::child_repo::{ChildDirectory, SqliteChildDirectory};
pub use repo::document_repo::{ChildDocumentStore, SqliteChildDocumentStore};
pub use repo::event_repo::{
    EventRecordStore, IndexListing, IndexedEntry, RepoError, RepoResult, SqliteEventStore,
};
pub use service::cascade_service::{CascadeDelete, CascadeDeletions, CascadeOutcome};
pub use service::consistency_service::{
    ConsistencyAnalyzer, IntegrityError, SyncReport, SystemSyncReport,
};
pub use service::contamination_service::{
    CleanMode, CleanOutcome, ContaminationReport, ContaminationScanner,
};
pub use service::health_service::{HealthCheck, HealthReport, HealthStatus};
pub use service::repair_service::{RepairEngine, RepairOutcome, RepairStrategy, SystemRepairSummary};
pub use service::sleep_controller::{SleepCycleController, SleepCycleError, SleepSession};
pub use service::sleep_resolver::{resolve, Resolution};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
