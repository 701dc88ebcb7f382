//! Remote object store used for backups.
//!
//! # Responsibility
//! - Define the transport seam the backup orchestrator talks to.
//! - Name the objects kept inside the backup folder.
//! - Classify remote failures into connectivity, not-found and transport
//!   errors.
//!
//! # Invariants
//! - `latest-backup.json` and `backup-meta.json` are overwritten in place.
//! - Historical snapshots are never overwritten; rotation deletes them.
//! - `list_backups` only returns historical snapshots, newest first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod drive;
pub mod http;
pub mod rotation;

pub use drive::{DriveApi, DriveTransport, TransferLimits, UploadTarget};
pub use http::{CredentialProvider, HttpDriveApi, StaticToken};
pub use rotation::{RotationPlan, RotationPolicy, MAX_BACKUPS};

/// Canonical current snapshot.
pub const LATEST_BACKUP_NAME: &str = "latest-backup.json";
/// Metadata describing `LATEST_BACKUP_NAME`.
pub const METADATA_NAME: &str = "backup-meta.json";

static HISTORICAL_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^backup-\d{4}-\d{2}-\d{2}T\d{2}-\d{2}-\d{2}(-\d{1,9})?Z\.json$")
        .expect("valid historical backup regex")
});

/// Result type for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Remote failure taxonomy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Remote unreachable or credential rejected.
    Connectivity(String),
    /// Requested object does not exist.
    NotFound(String),
    /// Object already exists (folder creation races).
    AlreadyExists(String),
    /// Non-success response from a remote call.
    Transport {
        operation: &'static str,
        status: Option<u16>,
        message: String,
    },
    /// Success response whose body could not be understood.
    InvalidResponse(String),
}

impl RemoteError {
    pub fn transport(
        operation: &'static str,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        Self::Transport {
            operation,
            status,
            message: message.into(),
        }
    }

    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Stable machine-readable code for log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connectivity(_) => "remote_unreachable",
            Self::NotFound(_) => "remote_not_found",
            Self::AlreadyExists(_) => "remote_already_exists",
            Self::Transport { .. } => "remote_transport",
            Self::InvalidResponse(_) => "remote_invalid_response",
        }
    }
}

impl Display for RemoteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connectivity(message) => write!(f, "remote storage unreachable: {message}"),
            Self::NotFound(name) => write!(f, "remote object not found: {name}"),
            Self::AlreadyExists(name) => write!(f, "remote object already exists: {name}"),
            Self::Transport {
                operation,
                status: Some(status),
                message,
            } => write!(f, "remote {operation} failed with status {status}: {message}"),
            Self::Transport {
                operation,
                status: None,
                message,
            } => write!(f, "remote {operation} failed: {message}"),
            Self::InvalidResponse(message) => write!(f, "invalid remote response: {message}"),
        }
    }
}

impl Error for RemoteError {}

/// One object inside the backup folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObjectHandle {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Transport seam between the orchestrator and a remote object store.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Verifies the remote answers and accepts the current credential.
    async fn check_connectivity(&self) -> RemoteResult<()>;
    /// Creates the backup folder when missing; returns its id.
    async fn ensure_folder(&self) -> RemoteResult<String>;
    /// Writes `data` under `name`, replacing an existing object of that name.
    async fn upload(&self, name: &str, data: &[u8]) -> RemoteResult<RemoteObjectHandle>;
    /// Reads one object. Missing objects surface as `RemoteError::NotFound`.
    async fn download(&self, name: &str) -> RemoteResult<Vec<u8>>;
    /// Historical snapshots, newest first.
    async fn list_backups(&self) -> RemoteResult<Vec<RemoteObjectHandle>>;
    /// Removes one object.
    async fn delete(&self, handle: &RemoteObjectHandle) -> RemoteResult<()>;
}

/// Name of the historical copy written at `at`.
///
/// `:` and `.` of the ISO-8601 instant are replaced with `-` so the name is
/// safe on every remote.
pub fn historical_name(at: DateTime<Utc>) -> String {
    let iso = at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
    format!("backup-{}.json", iso.replace([':', '.'], "-"))
}

/// Whether `name` is a rotatable historical snapshot.
pub fn is_historical_name(name: &str) -> bool {
    HISTORICAL_NAME_RE.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::{historical_name, is_historical_name, LATEST_BACKUP_NAME, METADATA_NAME};
    use chrono::{TimeZone, Utc};

    #[test]
    fn historical_name_replaces_colons_and_dots() {
        let at = Utc
            .with_ymd_and_hms(2026, 10, 19, 8, 5, 9)
            .unwrap()
            .checked_add_signed(chrono::Duration::milliseconds(42))
            .unwrap();
        assert_eq!(historical_name(at), "backup-2026-10-19T08-05-09-042Z.json");
        assert!(is_historical_name(&historical_name(at)));
    }

    #[test]
    fn fixed_objects_are_not_historical() {
        assert!(!is_historical_name(LATEST_BACKUP_NAME));
        assert!(!is_historical_name(METADATA_NAME));
        assert!(!is_historical_name("backup-notes.json"));
    }
}
