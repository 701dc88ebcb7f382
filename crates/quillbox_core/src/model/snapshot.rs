//! In-memory snapshot of the whole writing workspace.
//!
//! A `Snapshot` is built fresh for every backup attempt and never mutated
//! after it has been handed to the codec or the importer.

use crate::model::collection::Collection;
use rusqlite::types::Value;
use std::collections::BTreeMap;

/// One record, with values in `CollectionSchema::fields` order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Looks up a value by canonical field name.
    pub fn get(&self, collection: Collection, name: &str) -> Option<&Value> {
        let index = collection.schema().index_of(name)?;
        self.values.get(index)
    }

    /// Convenience accessor for text fields.
    pub fn text(&self, collection: Collection, name: &str) -> Option<&str> {
        match self.get(collection, name)? {
            Value::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Overwrites a value by canonical field name. Returns false for unknown
    /// fields.
    pub fn set(&mut self, collection: Collection, name: &str, value: Value) -> bool {
        let Some(slot) = collection
            .schema()
            .index_of(name)
            .and_then(|index| self.values.get_mut(index))
        else {
            return false;
        };
        *slot = value;
        true
    }

    pub fn id(&self) -> Option<&str> {
        match self.values.first()? {
            Value::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }
}

/// Full-dataset capture: every collection, each an ordered list of rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    tables: BTreeMap<Collection, Vec<Row>>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl Snapshot {
    /// Creates a snapshot with every collection present and empty.
    pub fn new() -> Self {
        Self {
            tables: Collection::ALL
                .into_iter()
                .map(|collection| (collection, Vec::new()))
                .collect(),
        }
    }

    pub fn rows(&self, collection: Collection) -> &[Row] {
        self.tables
            .get(&collection)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn set_rows(&mut self, collection: Collection, rows: Vec<Row>) {
        self.tables.insert(collection, rows);
    }

    pub fn push(&mut self, collection: Collection, row: Row) {
        self.tables.entry(collection).or_default().push(row);
    }

    pub fn count(&self, collection: Collection) -> usize {
        self.rows(collection).len()
    }

    pub fn book_count(&self) -> usize {
        self.count(Collection::Books)
    }

    pub fn total_records(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_records() == 0
    }

    /// Per-collection record counts, in declaration order.
    pub fn counts(&self) -> Vec<(Collection, usize)> {
        Collection::ALL
            .into_iter()
            .map(|collection| (collection, self.count(collection)))
            .collect()
    }
}
