//! Snapshot document encoding and validated decoding.
//!
//! # Responsibility
//! - Render a `Snapshot` as the canonical JSON document.
//! - Validate raw documents and normalize every record into column-aligned
//!   rows, whichever naming convention produced them.
//!
//! # Invariants
//! - Decoding is side-effect free; a rejected document never reaches a store.
//! - Every required collection key must be present and a list.
//! - Optional collections default to empty lists.
//! - Json fields are stored as compact text and re-expanded on encode.

use crate::model::collection::{Collection, FieldDefault, FieldKind, FieldSpec};
use crate::model::snapshot::{Row, Snapshot};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use serde_json::{Map, Number, Value as JsonValue};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Version written into every encoded document.
///
/// Version 1 documents predate `connections` and `chapterIllustrations`.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 2;

const VERSION_KEY: &str = "version";
const EXPORTED_AT_KEY: &str = "exportedAt";

/// Reason a raw document was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Payload is not parseable JSON.
    Malformed(String),
    /// Top-level value is not a JSON object.
    NotAnObject,
    /// A required collection key is absent.
    MissingCollection(&'static str),
    /// A collection key is present but not a list.
    NotAList(&'static str),
    /// A collection entry is not a JSON object.
    RecordNotAnObject {
        collection: &'static str,
        index: usize,
    },
    /// A required field is absent or `null`.
    MissingField {
        collection: &'static str,
        index: usize,
        field: &'static str,
    },
    /// A field value cannot be coerced to its declared kind.
    InvalidField {
        collection: &'static str,
        index: usize,
        field: &'static str,
        expected: &'static str,
    },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(message) => write!(f, "snapshot is not valid JSON: {message}"),
            Self::NotAnObject => write!(f, "snapshot document must be a JSON object"),
            Self::MissingCollection(key) => write!(f, "snapshot is missing collection `{key}`"),
            Self::NotAList(key) => write!(f, "snapshot collection `{key}` must be a list"),
            Self::RecordNotAnObject { collection, index } => {
                write!(f, "record {index} in `{collection}` must be an object")
            }
            Self::MissingField {
                collection,
                index,
                field,
            } => write!(
                f,
                "record {index} in `{collection}` is missing required field `{field}`"
            ),
            Self::InvalidField {
                collection,
                index,
                field,
                expected,
            } => write!(
                f,
                "record {index} in `{collection}` has invalid `{field}`; expected {expected}"
            ),
        }
    }
}

impl Error for ValidationError {}

/// Renders a snapshot as the canonical document.
pub fn encode(snapshot: &Snapshot, exported_at: DateTime<Utc>) -> JsonValue {
    let mut document = Map::new();
    document.insert(VERSION_KEY.to_string(), JsonValue::from(SNAPSHOT_FORMAT_VERSION));
    document.insert(
        EXPORTED_AT_KEY.to_string(),
        JsonValue::String(exported_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );

    for collection in Collection::ALL {
        let fields = collection.schema().fields;
        let records = snapshot
            .rows(collection)
            .iter()
            .map(|row| {
                let record = fields
                    .iter()
                    .zip(row.values())
                    .map(|(field, value)| (field.name.to_string(), encode_value(field.kind, value)))
                    .collect::<Map<_, _>>();
                JsonValue::Object(record)
            })
            .collect();
        document.insert(collection.key().to_string(), JsonValue::Array(records));
    }

    JsonValue::Object(document)
}

/// Encodes a snapshot straight to upload bytes.
pub fn to_bytes(
    snapshot: &Snapshot,
    exported_at: DateTime<Utc>,
) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&encode(snapshot, exported_at))
}

/// Parses and validates raw upload bytes.
pub fn decode_bytes(bytes: &[u8]) -> Result<Snapshot, ValidationError> {
    let document: JsonValue = serde_json::from_slice(bytes)
        .map_err(|err| ValidationError::Malformed(err.to_string()))?;
    decode(&document)
}

/// Validates a raw document and normalizes it into a `Snapshot`.
///
/// Collection-level checks run for every key before any record is read, so a
/// missing `books` list is reported even when other lists are malformed.
pub fn decode(document: &JsonValue) -> Result<Snapshot, ValidationError> {
    let object = document.as_object().ok_or(ValidationError::NotAnObject)?;

    let mut lists: Vec<(Collection, &[JsonValue])> = Vec::with_capacity(Collection::ALL.len());
    for collection in Collection::ALL {
        match object.get(collection.key()) {
            Some(JsonValue::Array(items)) => lists.push((collection, items.as_slice())),
            Some(JsonValue::Null) | None if !collection.is_required() => {
                lists.push((collection, &[]))
            }
            Some(_) => return Err(ValidationError::NotAList(collection.key())),
            None => return Err(ValidationError::MissingCollection(collection.key())),
        }
    }

    let mut snapshot = Snapshot::new();
    for (collection, items) in lists {
        let rows = items
            .iter()
            .enumerate()
            .map(|(index, item)| decode_record(collection, index, item))
            .collect::<Result<Vec<_>, _>>()?;
        snapshot.set_rows(collection, rows);
    }
    Ok(snapshot)
}

fn decode_record(
    collection: Collection,
    index: usize,
    item: &JsonValue,
) -> Result<Row, ValidationError> {
    let record = item
        .as_object()
        .ok_or(ValidationError::RecordNotAnObject {
            collection: collection.key(),
            index,
        })?;

    let fields = collection.schema().fields;
    let mut values = Vec::with_capacity(fields.len());
    for field in fields {
        let raw = field
            .accepted_keys()
            .find_map(|key| record.get(key).filter(|value| !value.is_null()));
        let value = match raw {
            Some(raw) => coerce(field, raw).ok_or(ValidationError::InvalidField {
                collection: collection.key(),
                index,
                field: field.name,
                expected: kind_name(field.kind),
            })?,
            None if field.required => {
                return Err(ValidationError::MissingField {
                    collection: collection.key(),
                    index,
                    field: field.name,
                })
            }
            None => default_value(field.default),
        };
        values.push(value);
    }
    Ok(Row::new(values))
}

fn coerce(field: &FieldSpec, raw: &JsonValue) -> Option<SqlValue> {
    match field.kind {
        FieldKind::Text => Some(SqlValue::Text(match raw {
            JsonValue::String(value) => value.clone(),
            other => other.to_string(),
        })),
        FieldKind::Integer => integer_of(raw).map(SqlValue::Integer),
        FieldKind::Boolean => boolean_of(raw).map(|flag| SqlValue::Integer(i64::from(flag))),
        FieldKind::Timestamp => timestamp_of(raw).map(SqlValue::Integer),
        FieldKind::Json => match raw {
            JsonValue::Array(_) | JsonValue::Object(_) => Some(SqlValue::Text(raw.to_string())),
            JsonValue::String(text) => match serde_json::from_str::<JsonValue>(text) {
                Ok(JsonValue::Array(_)) | Ok(JsonValue::Object(_)) => {
                    Some(SqlValue::Text(text.clone()))
                }
                _ => None,
            },
            _ => None,
        },
    }
}

fn integer_of(raw: &JsonValue) -> Option<i64> {
    match raw {
        JsonValue::Number(number) => number_to_i64(number),
        JsonValue::String(text) => {
            let trimmed = text.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().and_then(float_to_i64))
        }
        JsonValue::Bool(flag) => Some(i64::from(*flag)),
        _ => None,
    }
}

fn boolean_of(raw: &JsonValue) -> Option<bool> {
    match raw {
        JsonValue::Bool(flag) => Some(*flag),
        JsonValue::Number(number) => match number.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        JsonValue::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn timestamp_of(raw: &JsonValue) -> Option<i64> {
    match raw {
        JsonValue::Number(number) => number_to_i64(number),
        JsonValue::String(text) => {
            let trimmed = text.trim();
            trimmed.parse::<i64>().ok().or_else(|| {
                DateTime::parse_from_rfc3339(trimmed)
                    .ok()
                    .map(|instant| instant.timestamp_millis())
            })
        }
        _ => None,
    }
}

fn number_to_i64(number: &Number) -> Option<i64> {
    number
        .as_i64()
        .or_else(|| number.as_f64().and_then(float_to_i64))
}

fn float_to_i64(value: f64) -> Option<i64> {
    if value.is_finite() {
        Some(value.round() as i64)
    } else {
        None
    }
}

fn default_value(default: FieldDefault) -> SqlValue {
    match default {
        FieldDefault::Null => SqlValue::Null,
        FieldDefault::EmptyText => SqlValue::Text(String::new()),
        FieldDefault::EmptyList => SqlValue::Text("[]".to_string()),
        FieldDefault::EmptyObject => SqlValue::Text("{}".to_string()),
        FieldDefault::False | FieldDefault::Zero => SqlValue::Integer(0),
    }
}

fn encode_value(kind: FieldKind, value: &SqlValue) -> JsonValue {
    match (kind, value) {
        (_, SqlValue::Null) => JsonValue::Null,
        (FieldKind::Json, SqlValue::Text(text)) => {
            serde_json::from_str(text).unwrap_or_else(|_| JsonValue::String(text.clone()))
        }
        (FieldKind::Boolean, SqlValue::Integer(flag)) => JsonValue::Bool(*flag != 0),
        (_, SqlValue::Integer(number)) => JsonValue::from(*number),
        (_, SqlValue::Real(number)) => Number::from_f64(*number)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        (_, SqlValue::Text(text)) => JsonValue::String(text.clone()),
        (_, SqlValue::Blob(bytes)) => JsonValue::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}

fn kind_name(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Text => "text",
        FieldKind::Integer => "integer",
        FieldKind::Boolean => "boolean",
        FieldKind::Timestamp => "epoch milliseconds or RFC 3339 timestamp",
        FieldKind::Json => "list or object",
    }
}
