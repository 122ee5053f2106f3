//! Conflict records, classification and resolution policies.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tillsync_model::{field_subset_of, row_updated_at, FieldMap, MutationKind, RecordId};

/// The kind of divergence replay detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// The remote row changed after the local write was captured.
    Version,
    /// The remote row is gone (or never existed) while local still mutated it.
    Delete,
    /// An id collision or remote integrity rejection.
    Constraint,
}

impl ConflictKind {
    /// Stable storage code for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Version => "version",
            Self::Delete => "delete",
            Self::Constraint => "constraint",
        }
    }

    /// Parses a storage code.
    #[must_use]
    pub fn from_str_opt(value: &str) -> Option<Self> {
        match value {
            "version" => Some(Self::Version),
            "delete" => Some(Self::Delete),
            "constraint" => Some(Self::Constraint),
            _ => None,
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chosen outcome for a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Force-apply the local payload to the remote store.
    LocalWins,
    /// Discard the local payload and adopt the remote snapshot.
    RemoteWins,
    /// Apply a supplied merged payload to both sides.
    Merged,
}

impl Resolution {
    /// Stable storage code for this resolution.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LocalWins => "local_wins",
            Self::RemoteWins => "remote_wins",
            Self::Merged => "merged",
        }
    }

    /// Parses a storage code.
    #[must_use]
    pub fn from_str_opt(value: &str) -> Option<Self> {
        match value {
            "local_wins" => Some(Self::LocalWins),
            "remote_wins" => Some(Self::RemoteWins),
            "merged" => Some(Self::Merged),
            _ => None,
        }
    }
}

/// Policy for resolving conflicts as replay detects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPolicy {
    /// Local payload wins automatically.
    LocalWins,
    /// Remote snapshot wins automatically.
    RemoteWins,
    /// Merge automatically using the configured per-table rules.
    Merged,
    /// Leave conflicts queryable for an operator.
    #[default]
    Manual,
}

impl ResolutionPolicy {
    /// Returns true if this policy resolves conflicts without an operator.
    #[must_use]
    pub fn auto_resolves(self) -> bool {
        !matches!(self, Self::Manual)
    }

    /// The resolution this policy applies, if it applies one.
    #[must_use]
    pub fn resolution(self) -> Option<Resolution> {
        match self {
            Self::LocalWins => Some(Resolution::LocalWins),
            Self::RemoteWins => Some(Resolution::RemoteWins),
            Self::Merged => Some(Resolution::Merged),
            Self::Manual => None,
        }
    }
}

/// A detected divergence between a journal entry and the remote store.
///
/// Terminal once `resolution` is set; never deleted automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict id (UUID v4).
    pub id: String,
    /// The journal entry whose replay detected the divergence.
    pub journal_entry_id: String,
    /// The conflict classification.
    pub kind: ConflictKind,
    /// The business table.
    pub table: String,
    /// The record in conflict.
    pub record_id: RecordId,
    /// The local side: the entry's payload at enqueue time.
    pub local_snapshot: FieldMap,
    /// The remote row at detection time; `None` when the row was absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_snapshot: Option<FieldMap>,
    /// When replay detected the divergence.
    pub detected_at: DateTime<Utc>,
    /// The chosen outcome, once resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    /// The payload applied by a `Merged` resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_payload: Option<FieldMap>,
    /// Who resolved the conflict (operator id or policy name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    /// When the conflict was resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl SyncConflict {
    /// Creates an unresolved conflict from the replay context.
    #[must_use]
    pub fn new(
        journal_entry_id: impl Into<String>,
        kind: ConflictKind,
        table: impl Into<String>,
        record_id: RecordId,
        local_snapshot: FieldMap,
        remote_snapshot: Option<FieldMap>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            journal_entry_id: journal_entry_id.into(),
            kind,
            table: table.into(),
            record_id,
            local_snapshot,
            remote_snapshot,
            detected_at: Utc::now(),
            resolution: None,
            resolved_payload: None,
            resolved_by: None,
            resolved_at: None,
        }
    }

    /// Returns true once a resolution has been recorded.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// Records the chosen outcome.
    pub fn mark_resolved(
        &mut self,
        resolution: Resolution,
        resolved_payload: Option<FieldMap>,
        resolved_by: impl Into<String>,
    ) {
        self.resolution = Some(resolution);
        self.resolved_payload = resolved_payload;
        self.resolved_by = Some(resolved_by.into());
        self.resolved_at = Some(Utc::now());
    }
}

/// What replay should do with one journal entry, given the remote state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayDecision {
    /// No divergence; apply the operation to the remote store.
    Apply,
    /// The operation's effect is already visible remotely; settle the entry
    /// without writing (crash-recovery idempotence).
    AlreadyApplied,
    /// Divergence; record a conflict of the given kind.
    Conflict(ConflictKind),
}

/// Classifies one journal entry against the current remote row.
///
/// The decision table:
/// - no remote row + insert → apply
/// - no remote row + update/delete → delete conflict
/// - remote row + insert → already-applied when the entry payload is
///   contained in the remote row, otherwise constraint conflict
/// - remote row + update/delete → version conflict when the remote row is
///   newer than the entry's capture time (an update whose payload is already
///   contained in the remote row settles instead); apply when not newer
///
/// "Newer" compares the remote row's `updated_at` against the entry's
/// `created_at`; a missing or unparseable remote timestamp counts as not
/// newer.
#[must_use]
pub fn classify_replay(
    operation: MutationKind,
    entry_payload: &FieldMap,
    entry_created_at: DateTime<Utc>,
    remote: Option<&FieldMap>,
) -> ReplayDecision {
    match (remote, operation) {
        (None, MutationKind::Insert) => ReplayDecision::Apply,
        (None, MutationKind::Update | MutationKind::Delete) => {
            ReplayDecision::Conflict(ConflictKind::Delete)
        }
        (Some(row), MutationKind::Insert) => {
            if field_subset_of(entry_payload, row) {
                ReplayDecision::AlreadyApplied
            } else {
                ReplayDecision::Conflict(ConflictKind::Constraint)
            }
        }
        (Some(row), MutationKind::Update | MutationKind::Delete) => {
            let remote_is_newer =
                row_updated_at(row).is_some_and(|remote_at| remote_at > entry_created_at);
            if !remote_is_newer {
                ReplayDecision::Apply
            } else if operation == MutationKind::Update && field_subset_of(entry_payload, row) {
                ReplayDecision::AlreadyApplied
            } else {
                ReplayDecision::Conflict(ConflictKind::Version)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn map(pairs: &[(&str, serde_json::Value)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn missing_remote_insert_applies() {
        let d = classify_replay(
            MutationKind::Insert,
            &map(&[("status", json!("pending"))]),
            Utc::now(),
            None,
        );
        assert_eq!(d, ReplayDecision::Apply);
    }

    #[test]
    fn missing_remote_update_and_delete_are_delete_conflicts() {
        for op in [MutationKind::Update, MutationKind::Delete] {
            let d = classify_replay(op, &FieldMap::new(), Utc::now(), None);
            assert_eq!(d, ReplayDecision::Conflict(ConflictKind::Delete));
        }
    }

    #[test]
    fn id_collision_is_constraint_conflict() {
        let local = map(&[("total_cents", json!(1000))]);
        let remote = map(&[("total_cents", json!(2000))]);
        let d = classify_replay(MutationKind::Insert, &local, Utc::now(), Some(&remote));
        assert_eq!(d, ReplayDecision::Conflict(ConflictKind::Constraint));
    }

    #[test]
    fn reinserting_identical_row_is_already_applied() {
        let local = map(&[("total_cents", json!(1000))]);
        let remote = map(&[
            ("total_cents", json!(1000)),
            ("updated_at", json!("2030-01-01T00:00:00Z")),
        ]);
        let d = classify_replay(MutationKind::Insert, &local, Utc::now(), Some(&remote));
        assert_eq!(d, ReplayDecision::AlreadyApplied);
    }

    #[test]
    fn newer_remote_update_is_version_conflict() {
        let captured = Utc::now();
        let remote = map(&[
            ("total_cents", json!(1500)),
            (
                "updated_at",
                json!((captured + Duration::seconds(30)).to_rfc3339()),
            ),
        ]);
        let local = map(&[("total_cents", json!(1200))]);
        let d = classify_replay(MutationKind::Update, &local, captured, Some(&remote));
        assert_eq!(d, ReplayDecision::Conflict(ConflictKind::Version));
    }

    #[test]
    fn newer_remote_delete_is_version_conflict() {
        let captured = Utc::now();
        let remote = map(&[(
            "updated_at",
            json!((captured + Duration::seconds(5)).to_rfc3339()),
        )]);
        let d = classify_replay(MutationKind::Delete, &FieldMap::new(), captured, Some(&remote));
        assert_eq!(d, ReplayDecision::Conflict(ConflictKind::Version));
    }

    #[test]
    fn stale_remote_update_applies() {
        let captured = Utc::now();
        let remote = map(&[
            ("total_cents", json!(900)),
            (
                "updated_at",
                json!((captured - Duration::seconds(60)).to_rfc3339()),
            ),
        ]);
        let local = map(&[("total_cents", json!(1200))]);
        let d = classify_replay(MutationKind::Update, &local, captured, Some(&remote));
        assert_eq!(d, ReplayDecision::Apply);
    }

    #[test]
    fn remote_without_timestamp_counts_as_not_newer() {
        let remote = map(&[("total_cents", json!(900))]);
        let local = map(&[("total_cents", json!(1200))]);
        let d = classify_replay(MutationKind::Update, &local, Utc::now(), Some(&remote));
        assert_eq!(d, ReplayDecision::Apply);
    }

    #[test]
    fn update_already_reflected_remotely_settles() {
        let captured = Utc::now();
        let remote = map(&[
            ("total_cents", json!(1200)),
            (
                "updated_at",
                json!((captured + Duration::seconds(30)).to_rfc3339()),
            ),
        ]);
        let local = map(&[("total_cents", json!(1200))]);
        let d = classify_replay(MutationKind::Update, &local, captured, Some(&remote));
        assert_eq!(d, ReplayDecision::AlreadyApplied);
    }

    #[test]
    fn conflict_records_both_snapshots() {
        let local = map(&[("total_cents", json!(1200))]);
        let remote = map(&[("total_cents", json!(1500))]);
        let mut conflict = SyncConflict::new(
            "entry-1",
            ConflictKind::Version,
            "orders",
            RecordId::generate(),
            local.clone(),
            Some(remote.clone()),
        );
        assert!(!conflict.is_resolved());
        assert_eq!(conflict.local_snapshot, local);
        assert_eq!(conflict.remote_snapshot, Some(remote));

        conflict.mark_resolved(Resolution::RemoteWins, None, "operator:jo");
        assert!(conflict.is_resolved());
        assert!(conflict.resolved_at.is_some());
        assert_eq!(conflict.resolved_by.as_deref(), Some("operator:jo"));
    }

    #[test]
    fn manual_policy_never_auto_resolves() {
        assert!(!ResolutionPolicy::Manual.auto_resolves());
        assert_eq!(ResolutionPolicy::Manual.resolution(), None);
        assert!(ResolutionPolicy::RemoteWins.auto_resolves());
        assert_eq!(
            ResolutionPolicy::RemoteWins.resolution(),
            Some(Resolution::RemoteWins)
        );
    }

    #[test]
    fn kind_and_resolution_codes_round_trip() {
        for kind in [
            ConflictKind::Version,
            ConflictKind::Delete,
            ConflictKind::Constraint,
        ] {
            assert_eq!(ConflictKind::from_str_opt(kind.as_str()), Some(kind));
        }
        for resolution in [
            Resolution::LocalWins,
            Resolution::RemoteWins,
            Resolution::Merged,
        ] {
            assert_eq!(
                Resolution::from_str_opt(resolution.as_str()),
                Some(resolution)
            );
        }
        assert_eq!(ConflictKind::from_str_opt("merge"), None);
        assert_eq!(Resolution::from_str_opt("skip"), None);
    }
}
