//! Record identity and row payloads.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ModelError, ModelResult};

/// A row payload: an ordered map of field name to JSON value.
///
/// The engine is schemaless above the storage layer; business tables differ
/// only in which fields their payloads carry. The one field the engine itself
/// interprets is `updated_at` (RFC 3339), used for version-conflict
/// detection.
pub type FieldMap = serde_json::Map<String, Value>;

/// Unique identifier for a business record.
///
/// Record IDs are UUID v4 values generated on the terminal that first creates
/// the record, so inserts made offline never collide with records created
/// concurrently on the remote side. They are carried as strings because that
/// is how they travel on the wire and live in row payloads.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Generates a new random record ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parses a record ID, validating UUID shape.
    pub fn parse(value: impl Into<String>) -> ModelResult<Self> {
        let value = value.into();
        match Uuid::parse_str(&value) {
            Ok(_) => Ok(Self(value)),
            Err(_) => Err(ModelError::InvalidRecordId { value }),
        }
    }

    /// Wraps an already-validated id without checking shape.
    ///
    /// Used when reading ids back from stores that only ever persist
    /// validated values.
    #[must_use]
    pub fn from_trusted(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<RecordId> for String {
    fn from(id: RecordId) -> Self {
        id.0
    }
}

/// Returns true when every field of `subset` is present in `row` with an
/// equal value.
///
/// Replay uses this to recognize a mutation whose effect is already visible
/// remotely (a crash after apply but before the status update), which must be
/// treated as already settled rather than as a duplicate.
#[must_use]
pub fn field_subset_of(subset: &FieldMap, row: &FieldMap) -> bool {
    subset
        .iter()
        .all(|(key, value)| row.get(key) == Some(value))
}

/// Extracts and parses the `updated_at` field of a row, if present and valid.
///
/// Missing or unparseable timestamps yield `None`; callers treat that as
/// "not newer" so a sloppy remote row never produces a spurious conflict.
#[must_use]
pub fn row_updated_at(row: &FieldMap) -> Option<DateTime<Utc>> {
    let raw = row.get("updated_at")?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Extracts the `id` field of a row as a [`RecordId`].
///
/// Rows handed out by the stores always carry their id; this reads it back
/// without re-validating UUID shape.
#[must_use]
pub fn row_record_id(row: &FieldMap) -> Option<RecordId> {
    row.get("id")?.as_str().map(RecordId::from_trusted)
}
