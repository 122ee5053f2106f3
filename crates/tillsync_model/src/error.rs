//! Error types for the model crate.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors that can occur while building or consulting model values.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A write policy listed the same table twice.
    #[error("duplicate table in write policy: {table}")]
    DuplicatePolicyTable {
        /// The table that appeared more than once.
        table: String,
    },

    /// A table was looked up that the write policy does not cover.
    #[error("table not covered by write policy: {table}")]
    UnknownTable {
        /// The table that was looked up.
        table: String,
    },

    /// A record id string was not a valid UUID.
    #[error("invalid record id: {value}")]
    InvalidRecordId {
        /// The rejected value.
        value: String,
    },
}
