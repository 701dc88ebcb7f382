//! Summary document written next to every successful backup.

use crate::model::snapshot::Snapshot;
use crate::snapshot::codec::{ValidationError, SNAPSHOT_FORMAT_VERSION};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Describes the canonical remote snapshot.
///
/// Written only after both snapshot uploads succeeded, so a present metadata
/// object always points at a complete `latest-backup.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    pub timestamp: DateTime<Utc>,
    pub version: u32,
    pub book_count: u64,
    pub total_records: u64,
    #[serde(default)]
    pub owner_identity: String,
}

impl BackupMetadata {
    /// Summarizes one snapshot taken at `timestamp`.
    pub fn describe(
        snapshot: &Snapshot,
        timestamp: DateTime<Utc>,
        owner_identity: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            version: SNAPSHOT_FORMAT_VERSION,
            book_count: snapshot.book_count() as u64,
            total_records: snapshot.total_records() as u64,
            owner_identity: owner_identity.into(),
        }
    }

    /// Whether the described snapshot is worth offering for restore.
    pub fn has_books(&self) -> bool {
        self.book_count > 0
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ValidationError> {
        serde_json::from_slice(bytes).map_err(|err| ValidationError::Malformed(err.to_string()))
    }
}
