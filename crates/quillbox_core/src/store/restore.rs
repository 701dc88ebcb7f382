//! Replace-all restore of a decoded snapshot.
//!
//! # Invariants
//! - The whole wipe-and-reinsert runs inside one immediate transaction.
//! - Foreign keys stay enforced; children are deleted before parents and
//!   inserted after them, following `Collection::delete_order/insert_order`.
//! - Any failure rolls back, leaving the store exactly as before the call.

use super::{ensure_snapshot_connection_ready, StoreResult};
use crate::model::collection::Collection;
use crate::model::snapshot::Snapshot;
use log::{error, info};
use rusqlite::{params_from_iter, Connection, Transaction, TransactionBehavior};
use std::time::Instant;

/// Row counts written by one restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub inserted: Vec<(Collection, usize)>,
}

impl RestoreReport {
    pub fn total(&self) -> usize {
        self.inserted.iter().map(|(_, count)| count).sum()
    }

    pub fn count(&self, collection: Collection) -> usize {
        self.inserted
            .iter()
            .find(|(current, _)| *current == collection)
            .map_or(0, |(_, count)| *count)
    }
}

/// Replaces every managed collection with the snapshot contents.
pub fn restore_snapshot(conn: &Connection, snapshot: &Snapshot) -> StoreResult<RestoreReport> {
    let started_at = Instant::now();
    ensure_snapshot_connection_ready(conn)?;
    info!(
        "event=snapshot_restore module=store status=start books={} total_records={}",
        snapshot.book_count(),
        snapshot.total_records()
    );

    match replace_all(conn, snapshot) {
        Ok(report) => {
            info!(
                "event=snapshot_restore module=store status=ok total_records={} duration_ms={}",
                report.total(),
                started_at.elapsed().as_millis()
            );
            Ok(report)
        }
        Err(err) => {
            error!(
                "event=snapshot_restore module=store status=error duration_ms={} error={err}",
                started_at.elapsed().as_millis()
            );
            Err(err)
        }
    }
}

fn replace_all(conn: &Connection, snapshot: &Snapshot) -> StoreResult<RestoreReport> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    for collection in Collection::delete_order() {
        tx.execute(&format!("DELETE FROM {};", collection.table()), [])?;
    }

    let mut inserted = Vec::with_capacity(Collection::ALL.len());
    for collection in Collection::insert_order().iter().copied() {
        let schema = collection.schema();
        let placeholders = (1..=schema.fields.len())
            .map(|index| format!("?{index}"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO {} ({}) VALUES ({placeholders});",
            schema.table,
            schema.column_list()
        ))?;
        let rows = snapshot.rows(collection);
        for row in rows {
            stmt.execute(params_from_iter(row.values()))?;
        }
        inserted.push((collection, rows.len()));
    }

    tx.commit()?;
    Ok(RestoreReport { inserted })
}
