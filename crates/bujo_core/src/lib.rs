//! Core engine for the bullet journal.
//! Owns entry migration, future-log promotion and month-end archival.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, CoreConfig, MigrationSettings};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::calendar::YearMonth;
pub use model::collection::{Collection, CollectionId, CollectionType};
pub use model::entry::{
    Entry, EntryId, EntryKind, EntryValidationError, Priority, SpecialEntry, SpecialEntryType,
    TaskStatus,
};
pub use model::transition::{Transition, FORWARD_MARKER};
pub use repo::checkpoint_repo::{CheckpointStore, SqliteCheckpointStore};
pub use repo::collection_repo::{CollectionRepository, SqliteCollectionRepository};
pub use repo::entry_repo::{
    EntryBatch, EntryQuery, EntryRepository, EntryScan, SqliteEntryRepository,
};
pub use repo::{RepoError, RepoResult};
pub use service::archive_service::{ArchivalOutcome, ArchivalReport, ArchiveService};
pub use service::collection_registry::CollectionRegistry;
pub use service::migration_service::{
    DailyMigrationReport, DailyOutcome, MigrationError, MigrationResult, MigrationService,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
