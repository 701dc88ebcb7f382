//! Data model shared by the snapshot codec, the store and the importer.
//!
//! # Responsibility
//! - Declare the collections of the writing workspace and their fields.
//! - Hold the column-aligned row type that flows between store and codec.
//!
//! # Invariants
//! - Row values are aligned with `CollectionSchema::fields`.

pub mod collection;
pub mod snapshot;
