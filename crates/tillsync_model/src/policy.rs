//! Table write policy and feature flags.
//!
//! The write policy is static engine configuration: it classifies every
//! business table the engine may touch. The legal classifications are encoded
//! as an enum, so a table can never be both remote-only and offline-capable.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// How a table may be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "access", rename_all = "snake_case")]
pub enum TableAccess {
    /// Read-replicated to the local cache, never locally writable.
    RemoteOnly,
    /// Locally writable while offline; mutations are journaled for replay.
    OfflineCapable,
    /// Offline-capable only while the named feature flag is enabled.
    Gated {
        /// The feature flag that must be enabled for offline writes.
        feature: String,
    },
}

impl TableAccess {
    /// True when offline writes are ever possible for this access class.
    #[must_use]
    pub fn may_write_offline(&self) -> bool {
        !matches!(self, Self::RemoteOnly)
    }
}

/// The static table → access classification supplied at engine startup.
///
/// Lookups of tables the policy does not cover are errors, never defaults:
/// an unlisted table is a configuration bug and must fail loudly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WritePolicy {
    tables: BTreeMap<String, TableAccess>,
}

impl WritePolicy {
    /// Creates an empty policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table classification, rejecting duplicates.
    pub fn with_table(
        mut self,
        table: impl Into<String>,
        access: TableAccess,
    ) -> ModelResult<Self> {
        let table = table.into();
        if self.tables.contains_key(&table) {
            return Err(ModelError::DuplicatePolicyTable { table });
        }
        self.tables.insert(table, access);
        Ok(self)
    }

    /// Looks up a table's access classification.
    pub fn access(&self, table: &str) -> ModelResult<&TableAccess> {
        self.tables.get(table).ok_or_else(|| ModelError::UnknownTable {
            table: table.to_string(),
        })
    }

    /// Iterates over all classified tables.
    pub fn tables(&self) -> impl Iterator<Item = (&str, &TableAccess)> {
        self.tables.iter().map(|(t, a)| (t.as_str(), a))
    }

    /// Number of classified tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// True when no tables are classified.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Named on/off switches gating sensitive offline behavior.
///
/// A flag that was never registered reads as disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    enabled: BTreeSet<String>,
}

impl FeatureFlags {
    /// Creates an empty flag set (everything disabled).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables a flag.
    #[must_use]
    pub fn enable(mut self, feature: impl Into<String>) -> Self {
        self.enabled.insert(feature.into());
        self
    }

    /// Returns whether a flag is enabled.
    #[must_use]
    pub fn is_enabled(&self, feature: &str) -> bool {
        self.enabled.contains(feature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_policy() -> WritePolicy {
        WritePolicy::new()
            .with_table("products", TableAccess::RemoteOnly)
            .unwrap()
            .with_table("orders", TableAccess::OfflineCapable)
            .unwrap()
            .with_table(
                "refunds",
                TableAccess::Gated {
                    feature: "offline_refunds".into(),
                },
            )
            .unwrap()
    }

    #[test]
    fn duplicate_table_is_rejected() {
        let err = sample_policy()
            .with_table("orders", TableAccess::RemoteOnly)
            .unwrap_err();
        assert!(matches!(
            err,
            ModelError::DuplicatePolicyTable { table } if table == "orders"
        ));
    }

    #[test]
    fn unknown_table_is_an_error() {
        let policy = sample_policy();
        let err = policy.access("giftcards").unwrap_err();
        assert!(matches!(err, ModelError::UnknownTable { .. }));
    }

    #[test]
    fn access_classes_answer_offline_writability() {
        let policy = sample_policy();
        assert!(!policy.access("products").unwrap().may_write_offline());
        assert!(policy.access("orders").unwrap().may_write_offline());
        assert!(policy.access("refunds").unwrap().may_write_offline());
    }

    #[test]
    fn unregistered_flag_reads_disabled() {
        let flags = FeatureFlags::new().enable("offline_refunds");
        assert!(flags.is_enabled("offline_refunds"));
        assert!(!flags.is_enabled("offline_giftcards"));
    }
}
