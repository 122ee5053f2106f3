//! Error types for the protocol crate.

use thiserror::Error;

use crate::entry::EntryStatus;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur in protocol-level operations.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A journal entry status transition that the state machine forbids.
    #[error("illegal status transition: {from} -> {to}")]
    TransitionDenied {
        /// Current status.
        from: EntryStatus,
        /// Requested status.
        to: EntryStatus,
    },

    /// A persisted code could not be mapped back to its enum.
    #[error("unknown {kind} code: {value}")]
    UnknownCode {
        /// Which enum the code belongs to.
        kind: &'static str,
        /// The rejected value.
        value: String,
    },

    /// A merge was requested for a table the merge policy does not cover.
    #[error("no merge rules configured for table: {table}")]
    UnconfiguredMergeTable {
        /// The table that was looked up.
        table: String,
    },

    /// A merge policy listed the same table twice.
    #[error("duplicate table in merge policy: {table}")]
    DuplicateMergeTable {
        /// The table that appeared more than once.
        table: String,
    },

    /// A merge rule met field values of the wrong shape.
    #[error("merge rule for {table}.{field} expects {expected}")]
    MergeFieldKind {
        /// The table being merged.
        table: String,
        /// The field whose values did not fit the rule.
        field: String,
        /// What the rule requires.
        expected: &'static str,
    },
}
