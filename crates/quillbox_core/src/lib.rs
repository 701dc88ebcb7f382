//! Core of the quillbox backup engine.
//! Owns the canonical writing-workspace store, its snapshot format and the
//! backup/restore/migration lifecycle against a remote object store.

pub mod config;
pub mod db;
pub mod legacy;
pub mod logging;
pub mod model;
pub mod remote;
pub mod snapshot;
pub mod store;
pub mod sync;

pub use config::{BackupConfig, ConfigError};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use legacy::{LegacyError, LegacyStore, MigrationReport};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::collection::Collection;
pub use model::snapshot::{Row, Snapshot};
pub use remote::{
    DriveApi, DriveTransport, HttpDriveApi, RemoteError, RemoteObjectHandle, RemoteTransport,
    StaticToken,
};
pub use snapshot::{BackupMetadata, ValidationError};
pub use store::{restore_snapshot, RestoreReport, SqliteSnapshotStore, StoreError};
pub use sync::{
    BackupError, BackupOrchestrator, BackupOutcome, BackupState, BackupStatus, BackupTrigger,
    SessionPhase, SharedConnection, SkipReason, StartupDecision,
};

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
