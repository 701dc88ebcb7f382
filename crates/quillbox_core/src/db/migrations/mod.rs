//! Schema steps for the collection tables.
//!
//! Step 1 lays down the seven collections every snapshot must carry. Step 2
//! adds the storyboard links (`connections`) and chapter illustrations that
//! older snapshots may lack. The schema number lives in
//! `PRAGMA user_version`; pending steps run together in one transaction, so
//! a store is never left between two schema numbers.

use crate::db::{DbError, DbResult};
use log::{debug, info};
use rusqlite::Connection;

struct SchemaStep {
    version: u32,
    label: &'static str,
    sql: &'static str,
}

const STEPS: &[SchemaStep] = &[
    SchemaStep {
        version: 1,
        label: "writing_workspace",
        sql: include_str!("0001_writing_workspace.sql"),
    },
    SchemaStep {
        version: 2,
        label: "storyboard_links",
        sql: include_str!("0002_storyboard_links.sql"),
    },
];

/// Schema number of a fully migrated store.
pub fn latest_version() -> u32 {
    STEPS.last().map_or(0, |step| step.version)
}

/// Brings the store up to [`latest_version`].
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let found = current_user_version(conn)?;
    let target = latest_version();
    if found > target {
        return Err(DbError::SchemaTooNew {
            found,
            supported: target,
        });
    }
    if found == target {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for step in STEPS.iter().filter(|step| step.version > found) {
        debug!(
            "event=db_migrate module=db status=start version={} label={}",
            step.version, step.label
        );
        tx.execute_batch(step.sql)?;
        tx.pragma_update(None, "user_version", step.version)?;
    }
    tx.commit()?;

    info!("event=db_migrate module=db status=ok from_version={found} to_version={target}");
    Ok(())
}

pub fn current_user_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

#[cfg(test)]
mod tests {
    use super::{latest_version, STEPS};

    #[test]
    fn steps_are_numbered_one_by_one() {
        for (index, step) in STEPS.iter().enumerate() {
            assert_eq!(step.version as usize, index + 1, "{}", step.label);
        }
        assert_eq!(latest_version(), STEPS.len() as u32);
    }
}
