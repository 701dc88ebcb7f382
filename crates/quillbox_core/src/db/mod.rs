//! Canonical writing store on SQLite.
//!
//! Every connection handed to the snapshot store, the importer or the legacy
//! migrator comes from [`open_db`] or [`open_db_in_memory`]. Those enforce
//! foreign keys (the replace-all restore relies on them to reject orphaned
//! rows) and bring the collection tables up to the schema this build
//! declares in [`crate::model::collection`].
//!
//! A store written by a newer build is refused instead of being downgraded.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// The store file carries a schema from a newer quillbox build.
    SchemaTooNew { found: u32, supported: u32 },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "canonical store: {err}"),
            Self::SchemaTooNew { found, supported } => write!(
                f,
                "canonical store uses schema {found}; this build only knows schemas up to {supported}"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::SchemaTooNew { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
