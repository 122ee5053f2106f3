//! Remote store abstraction.

use tillsync_model::{FieldMap, Query, RecordId};
use tillsync_protocol::{
    BatchApplyRequest, BatchApplyResponse, ProcedureRequest, ProcedureResponse,
};

use crate::error::EngineResult;

/// The authoritative store behind the network edge.
///
/// This trait abstracts the transport, allowing different implementations
/// (HTTP for production, an in-process fake for tests). Implementations
/// report connectivity problems as [`crate::EngineError::Transport`]; the
/// engine reacts to those by flipping offline and routing around them.
pub trait RemoteStore: Send + Sync {
    /// Reads rows matching a query.
    fn select(&self, table: &str, query: &Query) -> EngineResult<Vec<FieldMap>>;

    /// Reads one row by record id, `None` when absent.
    fn select_one(&self, table: &str, id: &RecordId) -> EngineResult<Option<FieldMap>>;

    /// Inserts a row and returns the stored snapshot.
    fn insert(&self, table: &str, payload: &FieldMap) -> EngineResult<FieldMap>;

    /// Patches an existing row and returns the stored snapshot.
    fn update(&self, table: &str, id: &RecordId, patch: &FieldMap) -> EngineResult<FieldMap>;

    /// Deletes a row, returning its last snapshot when it existed.
    fn delete(&self, table: &str, id: &RecordId) -> EngineResult<Option<FieldMap>>;

    /// Runs a named server-side procedure in one transaction.
    fn run_procedure(&self, request: &ProcedureRequest) -> EngineResult<ProcedureResponse>;

    /// Applies a batch of journal entries, returning per-entry outcomes.
    fn apply_batch(&self, request: &BatchApplyRequest) -> EngineResult<BatchApplyResponse>;
}
