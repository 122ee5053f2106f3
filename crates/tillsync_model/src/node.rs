//! Edge node (terminal) identity.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an edge node (a point-of-sale terminal).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Generates a new random node ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps an existing id value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Operational status of an edge node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Normal operation.
    Active,
    /// Finishing outstanding journal entries before retirement.
    Draining,
    /// Decommissioned; must not produce new journal entries.
    Retired,
}

impl NodeStatus {
    /// Stable wire code for this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Draining => "draining",
            Self::Retired => "retired",
        }
    }

    /// Parses a wire code.
    #[must_use]
    pub fn from_str_opt(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "draining" => Some(Self::Draining),
            "retired" => Some(Self::Retired),
            _ => None,
        }
    }
}

/// A terminal's identity and sync bookkeeping.
///
/// Not business data: this exists so journal entries can attribute their
/// origin and so operators can see when a terminal last settled with the
/// authoritative store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeNode {
    /// The node id, generated at first startup and persisted.
    pub id: NodeId,
    /// The store (tenant) this terminal belongs to.
    pub store_id: String,
    /// When the last successful sync cycle completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Count of completed sync cycles, monotonically increasing.
    pub sync_version: u64,
    /// Operational status.
    pub status: NodeStatus,
}

impl EdgeNode {
    /// Creates a fresh active node for a store.
    #[must_use]
    pub fn new(store_id: impl Into<String>) -> Self {
        Self {
            id: NodeId::generate(),
            store_id: store_id.into(),
            last_sync_at: None,
            sync_version: 0,
            status: NodeStatus::Active,
        }
    }

    /// Records a completed sync cycle.
    pub fn record_sync(&mut self, at: DateTime<Utc>) {
        self.last_sync_at = Some(at);
        self.sync_version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_node_has_no_sync_history() {
        let node = EdgeNode::new("store-7");
        assert_eq!(node.sync_version, 0);
        assert!(node.last_sync_at.is_none());
        assert_eq!(node.status, NodeStatus::Active);
    }

    #[test]
    fn record_sync_advances_version() {
        let mut node = EdgeNode::new("store-7");
        let at = Utc::now();
        node.record_sync(at);
        node.record_sync(at);
        assert_eq!(node.sync_version, 2);
        assert_eq!(node.last_sync_at, Some(at));
    }

    #[test]
    fn status_codes_round_trip() {
        for status in [NodeStatus::Active, NodeStatus::Draining, NodeStatus::Retired] {
            assert_eq!(NodeStatus::from_str_opt(status.as_str()), Some(status));
        }
        assert_eq!(NodeStatus::from_str_opt("sleeping"), None);
    }
}
