//! # tillsync Protocol
//!
//! The durable sync vocabulary shared by the local store, the engine and the
//! remote wire:
//! - Journal entries and their status state machine
//! - Canonical payload checksums (corruption detection)
//! - Conflict records, classification and resolution policies
//! - Field-level merge rules per business table
//! - Wire messages for the remote store and the batch-apply procedure
//!
//! ## Key Invariants
//!
//! - Entry status only moves forward (`pending → syncing → synced | conflict
//!   | failed`); re-entry to `pending` happens only via explicit retry or the
//!   startup reset of interrupted `syncing` entries
//! - Checksums are computed over a canonical serialization, so verification
//!   does not depend on map iteration order
//! - A checksum mismatch is corruption, never classified as a conflict

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checksum;
mod conflict;
mod entry;
mod error;
mod merge;
mod messages;

pub use checksum::{canonical_json, payload_checksum};
pub use conflict::{
    classify_replay, ConflictKind, ReplayDecision, Resolution, ResolutionPolicy, SyncConflict,
};
pub use entry::{EntryStatus, JournalEntry};
pub use error::{ProtocolError, ProtocolResult};
pub use merge::{MergePolicy, MergeRule};
pub use messages::{
    BatchApplyRequest, BatchApplyResponse, BatchEntry, EntryOutcome, ErrorResponse, MutateRequest,
    OutcomeStatus, ProcedureRequest, ProcedureResponse, RecordResponse, RowsResponse,
    SelectRequest,
};
