//! Field-level merge rules for automatic `Merged` resolution.
//!
//! Merge behavior is configured per business table, field by field, and
//! tables without configuration refuse to merge. That keeps merging a
//! deliberate, reviewed decision instead of a generic object-spread that
//! silently combines rows it does not understand.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use tillsync_model::FieldMap;

use crate::error::{ProtocolError, ProtocolResult};

/// How to combine one field's local and remote values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum MergeRule {
    /// Numeric counters: take the greater value.
    TakeMax,
    /// Array fields: remote order first, then local elements not yet present.
    Union,
    /// Linear workflow states: take whichever value is further along the
    /// listed order. Values outside the list fall back to remote.
    StatusOrder {
        /// The workflow states from earliest to latest.
        order: Vec<String>,
    },
}

/// Per-table, per-field merge configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergePolicy {
    tables: BTreeMap<String, BTreeMap<String, MergeRule>>,
}

impl MergePolicy {
    /// Creates an empty policy (no table merges).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds rules for one table, rejecting duplicates.
    pub fn with_table(
        mut self,
        table: impl Into<String>,
        rules: impl IntoIterator<Item = (String, MergeRule)>,
    ) -> ProtocolResult<Self> {
        let table = table.into();
        if self.tables.contains_key(&table) {
            return Err(ProtocolError::DuplicateMergeTable { table });
        }
        self.tables.insert(table, rules.into_iter().collect());
        Ok(self)
    }

    /// Returns whether a table has merge rules configured.
    #[must_use]
    pub fn covers(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// Merges a local and remote row per the table's rules.
    ///
    /// The remote row is the base: fields without a rule keep their remote
    /// value, and rule fields present on only one side keep that side's
    /// value. Rule fields whose values do not fit the rule's shape are
    /// errors, not silent fallbacks.
    pub fn merge(
        &self,
        table: &str,
        local: &FieldMap,
        remote: &FieldMap,
    ) -> ProtocolResult<FieldMap> {
        let rules = self
            .tables
            .get(table)
            .ok_or_else(|| ProtocolError::UnconfiguredMergeTable {
                table: table.to_string(),
            })?;

        let mut merged = remote.clone();
        for (field, rule) in rules {
            let combined = match (local.get(field), remote.get(field)) {
                (None, None) => continue,
                (Some(only), None) | (None, Some(only)) => only.clone(),
                (Some(local_value), Some(remote_value)) => {
                    apply_rule(table, field, rule, local_value, remote_value)?
                }
            };
            merged.insert(field.clone(), combined);
        }
        Ok(merged)
    }
}

fn apply_rule(
    table: &str,
    field: &str,
    rule: &MergeRule,
    local: &Value,
    remote: &Value,
) -> ProtocolResult<Value> {
    match rule {
        MergeRule::TakeMax => {
            let (a, b) = match (local.as_f64(), remote.as_f64()) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(ProtocolError::MergeFieldKind {
                        table: table.to_string(),
                        field: field.to_string(),
                        expected: "numbers",
                    })
                }
            };
            Ok(if a > b { local.clone() } else { remote.clone() })
        }
        MergeRule::Union => {
            let (local_items, remote_items) = match (local.as_array(), remote.as_array()) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(ProtocolError::MergeFieldKind {
                        table: table.to_string(),
                        field: field.to_string(),
                        expected: "arrays",
                    })
                }
            };
            let mut union = remote_items.clone();
            for item in local_items {
                if !union.contains(item) {
                    union.push(item.clone());
                }
            }
            Ok(Value::Array(union))
        }
        MergeRule::StatusOrder { order } => {
            let (local_state, remote_state) = match (local.as_str(), remote.as_str()) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(ProtocolError::MergeFieldKind {
                        table: table.to_string(),
                        field: field.to_string(),
                        expected: "strings",
                    })
                }
            };
            let local_rank = order.iter().position(|s| s == local_state);
            let remote_rank = order.iter().position(|s| s == remote_state);
            Ok(match (local_rank, remote_rank) {
                (Some(l), Some(r)) if l > r => local.clone(),
                _ => remote.clone(),
            })
        }
    }
}
