//! Backup/restore orchestration against a remote store.
//!
//! # Responsibility
//! - Decide at session start whether to back up, migrate, offer a restore or
//!   start fresh.
//! - Coalesce mutation notifications into debounced backups and run a
//!   periodic safety-net backup.
//! - Expose restore as an explicit, caller-initiated operation.
//!
//! # Invariants
//! - Backup and restore never run concurrently.
//! - A failed backup leaves `latest-backup.json` and metadata consistent with
//!   each other (metadata is written last).
//!
//! # See also
//! - `remote` for the transport seam.
//! - `store` for export and the replace-all importer.

use crate::legacy::LegacyError;
use crate::remote::RemoteError;
use crate::snapshot::codec::ValidationError;
use crate::store::StoreError;
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex};

pub mod orchestrator;
pub mod scheduler;
pub mod startup;
pub mod state;

pub use orchestrator::BackupOrchestrator;
pub use scheduler::CoalescingScheduler;
pub use startup::StartupDecision;
pub use state::{
    BackupOutcome, BackupState, BackupStatus, BackupTrigger, SessionPhase, SkipReason,
};

/// Canonical store connection shared with the embedding application.
pub type SharedConnection = Arc<Mutex<Connection>>;

pub type BackupResult<T> = Result<T, BackupError>;

#[derive(Debug)]
pub enum BackupError {
    Remote(RemoteError),
    /// No `latest-backup.json` exists remotely.
    NoBackup,
    Validation(ValidationError),
    Store(StoreError),
    Legacy(LegacyError),
    /// Snapshot or metadata could not be serialized.
    Encode(String),
    /// Another backup or restore holds the engine.
    Busy(BackupState),
    /// A blocking store task did not complete.
    Worker(String),
}

impl BackupError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Remote(err) if err.is_connectivity())
    }

    /// Stable machine-readable code for log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Remote(err) => err.code(),
            Self::NoBackup => "backup_missing",
            Self::Validation(_) => "snapshot_invalid",
            Self::Store(_) => "store_error",
            Self::Legacy(_) => "legacy_error",
            Self::Encode(_) => "encode_error",
            Self::Busy(_) => "busy",
            Self::Worker(_) => "worker_error",
        }
    }
}

impl Display for BackupError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote(err) => write!(f, "{err}"),
            Self::NoBackup => write!(f, "no remote backup found"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::Legacy(err) => write!(f, "{err}"),
            Self::Encode(message) => write!(f, "failed to encode backup: {message}"),
            Self::Busy(state) => write!(f, "backup engine is busy ({state})"),
            Self::Worker(message) => write!(f, "store worker failed: {message}"),
        }
    }
}

impl Error for BackupError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Remote(err) => Some(err),
            Self::Validation(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Legacy(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RemoteError> for BackupError {
    fn from(value: RemoteError) -> Self {
        Self::Remote(value)
    }
}

impl From<ValidationError> for BackupError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<StoreError> for BackupError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<LegacyError> for BackupError {
    fn from(value: LegacyError) -> Self {
        Self::Legacy(value)
    }
}
