//! Mutation descriptions.

use serde::{Deserialize, Serialize};

use crate::record::{FieldMap, RecordId};

/// The kind of a row mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// Create a new row.
    Insert,
    /// Change fields of an existing row.
    Update,
    /// Remove a row.
    Delete,
}

impl MutationKind {
    /// Stable wire code for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Parses a wire code.
    #[must_use]
    pub fn from_str_opt(value: &str) -> Option<Self> {
        match value {
            "insert" => Some(Self::Insert),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// A single mutation against one table.
///
/// Inserts may omit the id (the engine generates one); updates and deletes
/// must carry it. Deletes carry no caller payload; the engine snapshots the
/// row being removed when it journals the operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    /// The mutation kind.
    pub kind: MutationKind,
    /// The business table.
    pub table: String,
    /// The record id; generated for inserts when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    /// Field values for insert/update.
    #[serde(default, skip_serializing_if = "FieldMap::is_empty")]
    pub payload: FieldMap,
}

impl Mutation {
    /// Builds an insert.
    #[must_use]
    pub fn insert(table: impl Into<String>, payload: FieldMap) -> Self {
        Self {
            kind: MutationKind::Insert,
            table: table.into(),
            id: None,
            payload,
        }
    }

    /// Builds an insert with a caller-chosen id.
    #[must_use]
    pub fn insert_with_id(table: impl Into<String>, id: RecordId, payload: FieldMap) -> Self {
        Self {
            kind: MutationKind::Insert,
            table: table.into(),
            id: Some(id),
            payload,
        }
    }

    /// Builds an update of an existing row.
    #[must_use]
    pub fn update(table: impl Into<String>, id: RecordId, payload: FieldMap) -> Self {
        Self {
            kind: MutationKind::Update,
            table: table.into(),
            id: Some(id),
            payload,
        }
    }

    /// Builds a delete of an existing row.
    #[must_use]
    pub fn delete(table: impl Into<String>, id: RecordId) -> Self {
        Self {
            kind: MutationKind::Delete,
            table: table.into(),
            id: Some(id),
            payload: FieldMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_codes_round_trip() {
        for kind in [
            MutationKind::Insert,
            MutationKind::Update,
            MutationKind::Delete,
        ] {
            assert_eq!(MutationKind::from_str_opt(kind.as_str()), Some(kind));
        }
        assert_eq!(MutationKind::from_str_opt("upsert"), None);
    }

    #[test]
    fn insert_without_id_serializes_without_id_key() {
        let mut payload = FieldMap::new();
        payload.insert("status".into(), json!("pending"));
        let m = Mutation::insert("orders", payload);
        let text = serde_json::to_string(&m).unwrap();
        assert!(!text.contains("\"id\""));
        assert!(text.contains("\"insert\""));
    }

    #[test]
    fn delete_has_empty_payload() {
        let m = Mutation::delete("orders", RecordId::generate());
        assert!(m.payload.is_empty());
        assert_eq!(m.kind, MutationKind::Delete);
        assert!(m.id.is_some());
    }
}
