//! One-shot migration out of the superseded local-only database.
//!
//! # Responsibility
//! - Detect the legacy object-store database left by the previous client.
//! - Extract its object stores into a raw snapshot document.
//! - Push that document through the codec and the importer, then delete the
//!   legacy files.
//!
//! # Invariants
//! - Migration only runs against an empty canonical store.
//! - The legacy database had no foreign keys. Rows whose required parent is
//!   gone are dropped and dangling optional links are cleared before import;
//!   the importer itself keeps integrity checks on.
//! - The legacy database is opened read-only and deleted only after the
//!   restore transaction committed.
//! - Once the import committed the migration counts as done, even if the
//!   legacy files cannot be removed. The canonical store is non-empty from
//!   then on, so migration never re-runs.

use crate::db::DbError;
use crate::model::collection::Collection;
use crate::model::snapshot::Snapshot;
use crate::snapshot::codec::{self, ValidationError};
use crate::store::{restore_snapshot, RestoreReport, SqliteSnapshotStore, StoreError};
use log::{debug, info, warn};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OpenFlags};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// Table holding every legacy object store row.
const OBJECT_TABLE: &str = "object_data";

/// Legacy object-store names and the collection each one feeds.
const LEGACY_STORES: &[(&str, Collection)] = &[
    ("books", Collection::Books),
    ("characters", Collection::Characters),
    ("chapters", Collection::Chapters),
    ("storyboard", Collection::Ideas),
    ("timeline", Collection::TimelineEvents),
    ("wishlist", Collection::WishlistItems),
    ("images", Collection::Images),
    ("storyboardConnections", Collection::Connections),
    ("chapterIllustrations", Collection::ChapterIllustrations),
];

/// File suffixes SQLite may leave next to the main database file.
const SIDECAR_SUFFIXES: &[&str] = &["-wal", "-shm", "-journal"];

pub type LegacyResult<T> = Result<T, LegacyError>;

#[derive(Debug)]
pub enum LegacyError {
    /// Reading the legacy database failed.
    Legacy(rusqlite::Error),
    /// A legacy row does not hold a JSON value.
    InvalidRecord { store: String, key: String },
    /// Extracted data failed snapshot validation.
    Validation(ValidationError),
    /// Canonical store access failed.
    Store(StoreError),
    /// Canonical store already has data for this account.
    CanonicalStoreNotEmpty,
    /// Legacy files could not be removed.
    Cleanup { path: PathBuf, message: String },
}

impl Display for LegacyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Legacy(err) => write!(f, "legacy database error: {err}"),
            Self::InvalidRecord { store, key } => {
                write!(f, "legacy record `{key}` in `{store}` is not valid JSON")
            }
            Self::Validation(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::CanonicalStoreNotEmpty => {
                write!(f, "canonical store already has data; refusing to migrate")
            }
            Self::Cleanup { path, message } => {
                write!(f, "failed to delete legacy file `{}`: {message}", path.display())
            }
        }
    }
}

impl Error for LegacyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Legacy(err) => Some(err),
            Self::Validation(err) => Some(err),
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for LegacyError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<StoreError> for LegacyError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<DbError> for LegacyError {
    fn from(value: DbError) -> Self {
        Self::Store(StoreError::Db(value))
    }
}

/// Outcome of a completed migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub books: usize,
    pub restored: RestoreReport,
    /// Legacy rows left out because their parent no longer exists.
    pub orphans_dropped: usize,
    /// False when the import committed but the legacy files stayed behind.
    pub legacy_removed: bool,
}

/// Handle on the legacy database file.
#[derive(Debug, Clone)]
pub struct LegacyStore {
    path: PathBuf,
}

impl LegacyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a legacy database with an object table exists here.
    pub fn has_legacy_data(&self) -> bool {
        if !self.path.is_file() {
            return false;
        }
        match self.open_read_only().and_then(|conn| object_table_exists(&conn)) {
            Ok(exists) => exists,
            Err(err) => {
                warn!(
                    "event=legacy_detect module=legacy status=error path={} error={err}",
                    self.path.display()
                );
                false
            }
        }
    }

    /// Reads every object store into a raw snapshot document.
    ///
    /// Returns `None` when the legacy `books` store is empty.
    pub fn extract(&self) -> LegacyResult<Option<Value>> {
        let conn = self.open_read_only().map_err(LegacyError::Legacy)?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT store_name, record_key, value FROM {OBJECT_TABLE} ORDER BY store_name, rowid;"
            ))
            .map_err(LegacyError::Legacy)?;
        let mut rows = stmt.query([]).map_err(LegacyError::Legacy)?;

        let mut lists: BTreeMap<Collection, Vec<Value>> = Collection::ALL
            .into_iter()
            .map(|collection| (collection, Vec::new()))
            .collect();
        while let Some(row) = rows.next().map_err(LegacyError::Legacy)? {
            let store: String = row.get(0).map_err(LegacyError::Legacy)?;
            let key: String = row.get(1).map_err(LegacyError::Legacy)?;
            let raw: String = row.get(2).map_err(LegacyError::Legacy)?;

            let Some(collection) = collection_for_store(&store) else {
                debug!("event=legacy_extract module=legacy status=skip store={store}");
                continue;
            };
            let record = legacy_record(&store, &key, &raw)?;
            lists.entry(collection).or_default().push(record);
        }

        if lists.get(&Collection::Books).map_or(true, Vec::is_empty) {
            info!("event=legacy_extract module=legacy status=skip reason=no_books");
            return Ok(None);
        }

        let document = lists
            .into_iter()
            .map(|(collection, records)| (collection.key().to_string(), Value::Array(records)))
            .collect::<Map<_, _>>();
        Ok(Some(Value::Object(document)))
    }

    /// Irreversibly removes the legacy database and its sidecar files.
    pub fn delete(&self) -> LegacyResult<()> {
        let mut targets = vec![self.path.clone()];
        for suffix in SIDECAR_SUFFIXES {
            let mut sidecar = self.path.clone().into_os_string();
            sidecar.push(suffix);
            targets.push(PathBuf::from(sidecar));
        }

        for target in targets {
            match std::fs::remove_file(&target) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(LegacyError::Cleanup {
                        path: target,
                        message: err.to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    fn open_read_only(&self) -> rusqlite::Result<Connection> {
        Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
    }
}

/// Moves legacy data into an empty canonical store.
///
/// Returns `Ok(None)` when there is nothing worth migrating; the legacy file
/// is left untouched in that case.
pub fn migrate(legacy: &LegacyStore, conn: &Connection) -> LegacyResult<Option<MigrationReport>> {
    if SqliteSnapshotStore::try_new(conn)?.has_data()? {
        return Err(LegacyError::CanonicalStoreNotEmpty);
    }

    let Some(document) = legacy.extract()? else {
        return Ok(None);
    };
    let mut snapshot = codec::decode(&document)?;
    let orphans_dropped = prune_orphans(&mut snapshot);
    let restored = restore_snapshot(conn, &snapshot)?;

    let legacy_removed = match legacy.delete() {
        Ok(()) => true,
        Err(err) => {
            warn!("event=legacy_cleanup module=legacy status=error error={err}");
            false
        }
    };

    info!(
        "event=legacy_migrate module=legacy status=ok books={} total_records={} orphans_dropped={orphans_dropped} legacy_removed={legacy_removed}",
        snapshot.book_count(),
        restored.total()
    );
    Ok(Some(MigrationReport {
        books: snapshot.book_count(),
        restored,
        orphans_dropped,
        legacy_removed,
    }))
}

/// Makes legacy rows satisfy the canonical foreign keys.
///
/// Walks collections parent-first. A row whose required reference points at
/// a missing parent is dropped, which in turn orphans its own children. An
/// optional reference to a missing row is cleared. Returns the number of
/// dropped rows.
fn prune_orphans(snapshot: &mut Snapshot) -> usize {
    let mut known: BTreeMap<Collection, HashSet<String>> = BTreeMap::new();
    let mut dropped = 0;

    for &collection in Collection::insert_order() {
        let schema = collection.schema();
        let mut kept = Vec::with_capacity(snapshot.count(collection));

        'rows: for row in snapshot.rows(collection) {
            let mut row = row.clone();
            for reference in schema.references {
                let target = match row.get(collection, reference.field) {
                    Some(SqlValue::Text(target)) => target.clone(),
                    _ => continue,
                };
                let present = known
                    .get(&reference.parent)
                    .is_some_and(|ids| ids.contains(&target));
                if present {
                    continue;
                }

                let required = schema
                    .field(reference.field)
                    .is_some_and(|field| field.required);
                if required {
                    warn!(
                        "event=legacy_extract module=legacy status=skip reason=orphan collection={collection} id={} missing_{}={target}",
                        row.id().unwrap_or_default(),
                        reference.parent
                    );
                    dropped += 1;
                    continue 'rows;
                }
                debug!(
                    "event=legacy_extract module=legacy status=skip reason=dangling_link collection={collection} field={}",
                    reference.field
                );
                row.set(collection, reference.field, SqlValue::Null);
            }
            kept.push(row);
        }

        let ids = kept
            .iter()
            .filter_map(|row| row.id().map(str::to_string))
            .collect();
        known.insert(collection, ids);
        snapshot.set_rows(collection, kept);
    }
    dropped
}

fn collection_for_store(store: &str) -> Option<Collection> {
    LEGACY_STORES
        .iter()
        .find(|(name, _)| *name == store)
        .map(|(_, collection)| *collection)
}

/// Parses one legacy value, filling `id` from the object-store key when the
/// value itself does not carry one.
fn legacy_record(store: &str, key: &str, raw: &str) -> LegacyResult<Value> {
    let invalid = || LegacyError::InvalidRecord {
        store: store.to_string(),
        key: key.to_string(),
    };
    let mut value: Value = serde_json::from_str(raw).map_err(|_| invalid())?;
    let Value::Object(record) = &mut value else {
        return Err(invalid());
    };
    if !record.contains_key("id") {
        record.insert("id".to_string(), Value::String(key.to_string()));
    }
    Ok(value)
}

fn object_table_exists(conn: &Connection) -> rusqlite::Result<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [OBJECT_TABLE],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

#[cfg(test)]
mod tests {
    use super::{collection_for_store, legacy_record, LegacyError};
    use crate::model::collection::Collection;
use crate::model::snapshot::Snapshot;

    #[test]
    fn store_names_map_to_collections() {
        assert_eq!(collection_for_store("storyboard"), Some(Collection::Ideas));
        assert_eq!(collection_for_store("timeline"), Some(Collection::TimelineEvents));
        assert_eq!(collection_for_store("settings"), None);
    }

    #[test]
    fn record_key_fills_missing_id() {
        let record = legacy_record("books", "42", r#"{"title":"Dune"}"#).unwrap();
        assert_eq!(record["id"], "42");
        let kept = legacy_record("books", "42", r#"{"id":7,"title":"Dune"}"#).unwrap();
        assert_eq!(kept["id"], 7);
    }

    #[test]
    fn non_object_values_are_rejected() {
        let err = legacy_record("books", "1", "[1,2]").unwrap_err();
        assert!(matches!(err, LegacyError::InvalidRecord { .. }));
    }
}
