//! Canonical store access for snapshot export and restore.
//!
//! # Responsibility
//! - Read every collection in full for backups.
//! - Verify the connection matches the declared collection schema.
//! - Replace the whole dataset atomically on restore.
//!
//! # Invariants
//! - Handles are only created for migrated connections whose tables, columns
//!   and foreign keys match `model::collection`.
//! - Export reads rows in primary-key order so snapshots are deterministic.

use crate::db::migrations::{current_user_version, latest_version};
use crate::db::DbError;
use crate::model::collection::Collection;
use crate::model::snapshot::{Row, Snapshot};
use log::info;
use rusqlite::types::Value;
use rusqlite::Connection;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

mod restore;

pub use restore::{restore_snapshot, RestoreReport};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from canonical store access.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Declared collection table is missing.
    MissingRequiredTable(&'static str),
    /// Declared field column is missing.
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    /// Declared parent has no matching foreign key in SQLite.
    UndeclaredForeignKey {
        table: &'static str,
        parent: &'static str,
    },
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "snapshot store requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "snapshot store requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "snapshot store requires column `{column}` in table `{table}`"
            ),
            Self::UndeclaredForeignKey { table, parent } => write!(
                f,
                "table `{table}` declares parent `{parent}` but has no foreign key to it"
            ),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Read side of the canonical store used by backups and startup checks.
pub struct SqliteSnapshotStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteSnapshotStore<'conn> {
    /// Creates a handle after checking the connection against the schema table.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_snapshot_connection_ready(conn)?;
        Ok(Self { conn })
    }

    /// Reads every collection in full.
    pub fn export(&self) -> StoreResult<Snapshot> {
        let started_at = Instant::now();
        let mut snapshot = Snapshot::new();
        for collection in Collection::ALL {
            snapshot.set_rows(collection, read_all(self.conn, collection)?);
        }
        info!(
            "event=snapshot_export module=store status=ok books={} total_records={} duration_ms={}",
            snapshot.book_count(),
            snapshot.total_records(),
            started_at.elapsed().as_millis()
        );
        Ok(snapshot)
    }

    /// Row count of one collection.
    pub fn count(&self, collection: Collection) -> StoreResult<u64> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {};", collection.table()),
            [],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    /// Whether any collection holds at least one row.
    pub fn has_data(&self) -> StoreResult<bool> {
        for collection in Collection::ALL {
            if self.count(collection)? > 0 {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn read_all(conn: &Connection, collection: Collection) -> StoreResult<Vec<Row>> {
    let schema = collection.schema();
    let width = schema.fields.len();
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM {} ORDER BY id ASC;",
        schema.column_list(),
        schema.table
    ))?;
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let values = (0..width)
            .map(|index| row.get::<_, Value>(index))
            .collect::<Result<Vec<_>, _>>()?;
        out.push(Row::new(values));
    }
    Ok(out)
}

pub(crate) fn ensure_snapshot_connection_ready(conn: &Connection) -> StoreResult<()> {
    let expected_version = latest_version();
    let actual_version = current_user_version(conn)?;
    if actual_version != expected_version {
        return Err(StoreError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for collection in Collection::ALL {
        let schema = collection.schema();
        let columns = table_columns(conn, schema.table)?;
        if columns.is_empty() {
            return Err(StoreError::MissingRequiredTable(schema.table));
        }
        for field in schema.fields {
            if !columns.contains(field.column) {
                return Err(StoreError::MissingRequiredColumn {
                    table: schema.table,
                    column: field.column,
                });
            }
        }

        let referenced = referenced_tables(conn, schema.table)?;
        for parent in schema.parents {
            if !referenced.contains(parent.table()) {
                return Err(StoreError::UndeclaredForeignKey {
                    table: schema.table,
                    parent: parent.table(),
                });
            }
        }
    }

    Ok(())
}

fn table_columns(conn: &Connection, table: &str) -> StoreResult<BTreeSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    let mut columns = BTreeSet::new();
    while let Some(row) = rows.next()? {
        columns.insert(row.get::<_, String>(1)?);
    }
    Ok(columns)
}

fn referenced_tables(conn: &Connection, table: &str) -> StoreResult<BTreeSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA foreign_key_list({table});"))?;
    let mut rows = stmt.query([])?;
    let mut parents = BTreeSet::new();
    while let Some(row) = rows.next()? {
        parents.insert(row.get::<_, String>(2)?);
    }
    Ok(parents)
}
