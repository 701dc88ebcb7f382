//! Snapshot document codec and backup metadata.
//!
//! # Responsibility
//! - Convert between in-memory snapshots and the JSON documents stored
//!   remotely.
//! - Describe each backup with a small metadata document.
//!
//! # See also
//! - `model::collection` for the field mapping table.

pub mod codec;
pub mod metadata;

pub use codec::{decode, decode_bytes, encode, to_bytes, ValidationError, SNAPSHOT_FORMAT_VERSION};
pub use metadata::BackupMetadata;
