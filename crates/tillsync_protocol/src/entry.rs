//! Journal entries and their status state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tillsync_model::{FieldMap, MutationKind, NodeId, RecordId};

use crate::checksum::payload_checksum;
use crate::error::{ProtocolError, ProtocolResult};

/// Lifecycle status of a journal entry.
///
/// Transitions only move forward; `conflict` and `failed` re-enter `pending`
/// via explicit retry, and `syncing` re-enters `pending` only through the
/// startup reset of entries interrupted mid-cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Waiting to be replayed.
    Pending,
    /// A replay cycle has picked the entry up.
    Syncing,
    /// Applied to the remote store; the entry is settled.
    Synced,
    /// Replay detected divergence; a conflict record exists.
    Conflict,
    /// Replay failed (transport error or corruption); needs retry or triage.
    Failed,
}

impl EntryStatus {
    /// Stable storage code for this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Conflict => "conflict",
            Self::Failed => "failed",
        }
    }

    /// Parses a storage code.
    #[must_use]
    pub fn from_str_opt(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "syncing" => Some(Self::Syncing),
            "synced" => Some(Self::Synced),
            "conflict" => Some(Self::Conflict),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns whether the state machine permits `self -> next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Syncing)
                | (Self::Syncing, Self::Synced)
                | (Self::Syncing, Self::Conflict)
                | (Self::Syncing, Self::Failed)
                | (Self::Syncing, Self::Pending)
                | (Self::Conflict, Self::Pending)
                | (Self::Conflict, Self::Synced)
                | (Self::Failed, Self::Pending)
        )
    }

    /// Validates a transition, returning it or a typed error.
    pub fn transition_to(self, next: Self) -> ProtocolResult<Self> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ProtocolError::TransitionDenied {
                from: self,
                to: next,
            })
        }
    }

    /// True once the entry needs no further replay work.
    #[must_use]
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Synced)
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One durably recorded mutation awaiting replay against the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Entry id (UUID v4).
    pub id: String,
    /// Per-terminal sequence number; replay order is `seq` ascending.
    pub seq: u64,
    /// The journaled operation.
    pub operation: MutationKind,
    /// The business table.
    pub table: String,
    /// The record the operation targets.
    pub record_id: RecordId,
    /// Field values; for deletes, the pre-delete row snapshot.
    pub payload: FieldMap,
    /// When the local write committed.
    pub created_at: DateTime<Utc>,
    /// The terminal that produced the entry.
    pub origin_node_id: NodeId,
    /// Lifecycle status.
    pub status: EntryStatus,
    /// SHA-256 hex digest of the canonical payload, computed at enqueue.
    pub checksum: String,
    /// Number of replay attempts so far.
    pub attempts: u32,
    /// When the last replay attempt ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// The last replay error, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JournalEntry {
    /// Creates a pending entry for a freshly committed offline mutation.
    ///
    /// The checksum is computed here, over the payload as enqueued.
    #[must_use]
    pub fn new(
        seq: u64,
        operation: MutationKind,
        table: impl Into<String>,
        record_id: RecordId,
        payload: FieldMap,
        origin_node_id: NodeId,
    ) -> Self {
        let checksum = payload_checksum(&payload);
        Self {
            id: Uuid::new_v4().to_string(),
            seq,
            operation,
            table: table.into(),
            record_id,
            payload,
            created_at: Utc::now(),
            origin_node_id,
            status: EntryStatus::Pending,
            checksum,
            attempts: 0,
            last_attempt_at: None,
            error: None,
        }
    }

    /// Recomputes the payload checksum and compares against the stored one.
    #[must_use]
    pub fn verify_checksum(&self) -> bool {
        payload_checksum(&self.payload) == self.checksum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry() -> JournalEntry {
        let mut payload = FieldMap::new();
        payload.insert("status".into(), json!("pending"));
        payload.insert("total_cents".into(), json!(1000));
        JournalEntry::new(
            1,
            MutationKind::Insert,
            "orders",
            RecordId::generate(),
            payload,
            NodeId::new("till-1"),
        )
    }

    #[test]
    fn new_entry_is_pending_with_valid_checksum() {
        let e = entry();
        assert_eq!(e.status, EntryStatus::Pending);
        assert_eq!(e.attempts, 0);
        assert!(e.verify_checksum());
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let mut e = entry();
        e.payload.insert("total_cents".into(), json!(9999));
        assert!(!e.verify_checksum());
    }

    #[test]
    fn forward_transitions_are_legal() {
        use EntryStatus::*;
        assert!(Pending.can_transition_to(Syncing));
        assert!(Syncing.can_transition_to(Synced));
        assert!(Syncing.can_transition_to(Conflict));
        assert!(Syncing.can_transition_to(Failed));
    }

    #[test]
    fn retry_and_startup_reset_are_legal() {
        use EntryStatus::*;
        assert!(Conflict.can_transition_to(Pending));
        assert!(Failed.can_transition_to(Pending));
        assert!(Syncing.can_transition_to(Pending));
        assert!(Conflict.can_transition_to(Synced));
    }

    #[test]
    fn backward_and_skipping_transitions_are_denied() {
        use EntryStatus::*;
        assert!(!Pending.can_transition_to(Synced));
        assert!(!Synced.can_transition_to(Pending));
        assert!(!Synced.can_transition_to(Syncing));
        assert!(!Failed.can_transition_to(Synced));
        let err = Synced.transition_to(Pending).unwrap_err();
        assert!(matches!(err, ProtocolError::TransitionDenied { .. }));
    }

    #[test]
    fn status_codes_round_trip() {
        use EntryStatus::*;
        for status in [Pending, Syncing, Synced, Conflict, Failed] {
            assert_eq!(EntryStatus::from_str_opt(status.as_str()), Some(status));
        }
        assert_eq!(EntryStatus::from_str_opt("done"), None);
    }

    #[test]
    fn entry_serializes_compact_options() {
        let text = serde_json::to_string(&entry()).unwrap();
        assert!(!text.contains("last_attempt_at"));
        assert!(!text.contains("\"error\""));
    }
}
