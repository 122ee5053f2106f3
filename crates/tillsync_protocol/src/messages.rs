//! Wire messages for the remote store and the batch-apply procedure.
//!
//! The remote speaks JSON over HTTP. Every request carries the tenant
//! (`store_id`) so the authoritative side can scope integrity checks to the
//! right store population.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tillsync_model::{FieldMap, Mutation, MutationKind, NodeId, Query, RecordId};

use crate::conflict::ConflictKind;
use crate::entry::JournalEntry;

/// A read against the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectRequest {
    /// The tenant the query is scoped to.
    pub store_id: String,
    /// The business table.
    pub table: String,
    /// The predicate query.
    pub query: Query,
}

/// Rows returned by a select.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowsResponse {
    /// Matching rows.
    pub rows: Vec<FieldMap>,
}

/// A single mutation against the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutateRequest {
    /// The tenant the mutation is scoped to.
    pub store_id: String,
    /// The mutation to apply.
    pub mutation: Mutation,
}

/// The row resulting from a mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordResponse {
    /// The row after the mutation (the pre-delete row for deletes).
    pub record: FieldMap,
}

/// An invocation of a named server-side atomic procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureRequest {
    /// The tenant the procedure runs for.
    pub store_id: String,
    /// The procedure name.
    pub name: String,
    /// Procedure arguments.
    pub args: Value,
}

/// The result of an atomic procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureResponse {
    /// Procedure-specific result value.
    pub result: Value,
}

/// One journal entry as shipped to the batch-apply procedure.
///
/// Local bookkeeping (status, attempts, errors) stays home; the server needs
/// only what it takes to validate and apply the mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    /// The journal entry id, echoed back in the outcome.
    pub entry_id: String,
    /// Per-terminal sequence number, for per-record ordering server-side.
    pub seq: u64,
    /// The journaled operation.
    pub operation: MutationKind,
    /// The business table.
    pub table: String,
    /// The record the operation targets.
    pub record_id: RecordId,
    /// Field values; for deletes, the pre-delete snapshot.
    pub payload: FieldMap,
    /// When the local write committed.
    pub created_at: DateTime<Utc>,
    /// Canonical payload checksum, re-verified server-side.
    pub checksum: String,
}

impl BatchEntry {
    /// Extracts the wire shape from a stored journal entry.
    #[must_use]
    pub fn from_entry(entry: &JournalEntry) -> Self {
        Self {
            entry_id: entry.id.clone(),
            seq: entry.seq,
            operation: entry.operation,
            table: entry.table.clone(),
            record_id: entry.record_id.clone(),
            payload: entry.payload.clone(),
            created_at: entry.created_at,
            checksum: entry.checksum.clone(),
        }
    }
}

/// A batch of journal entries for server-side atomic validation and commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchApplyRequest {
    /// The tenant the batch belongs to.
    pub store_id: String,
    /// The terminal that produced the entries.
    pub origin_node_id: NodeId,
    /// The entries, in `seq` order.
    pub entries: Vec<BatchEntry>,
}

/// Per-entry outcome status from the batch-apply procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The entry applied (or was already applied).
    Synced,
    /// The entry failed server-side validation.
    Failed,
    /// The entry diverged from the authoritative row.
    Conflict,
}

/// The server's verdict on one batch entry.
///
/// Batch apply is the one procedure with partial success: unrelated records
/// in a batch progress independently, so outcomes are heterogeneous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryOutcome {
    /// The entry this outcome refers to.
    pub entry_id: String,
    /// The verdict.
    pub status: OutcomeStatus,
    /// Failure detail, when `status` is `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Conflict classification, when `status` is `conflict`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ConflictKind>,
    /// The authoritative row at verdict time, for conflict records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_snapshot: Option<FieldMap>,
}

/// The batch-apply procedure's full response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchApplyResponse {
    /// One outcome per submitted entry, in submission order.
    pub outcomes: Vec<EntryOutcome>,
}

/// The body of a non-2xx remote response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g. `constraint_violation`).
    pub code: String,
    /// Human-readable detail.
    pub message: String,
}

impl ErrorResponse {
    /// Code the remote uses for integrity rejections.
    pub const CONSTRAINT_VIOLATION: &'static str = "constraint_violation";

    /// Code the remote uses for rows that do not exist.
    pub const NOT_FOUND: &'static str = "not_found";

    /// Code the remote uses for unknown procedure names.
    pub const UNKNOWN_PROCEDURE: &'static str = "unknown_procedure";
}
