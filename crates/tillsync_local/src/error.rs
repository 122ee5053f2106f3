//! Error types for the local store.

use thiserror::Error;

use tillsync_protocol::ProtocolError;

/// Result type for local store operations.
pub type LocalResult<T> = Result<T, LocalError>;

/// Errors that can occur in local store operations.
#[derive(Debug, Error)]
pub enum LocalError {
    /// Underlying SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON encode/decode error for stored payloads.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol-level error (e.g. an illegal journal status transition).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A table or field name failed identifier validation.
    #[error("invalid identifier: {name}")]
    InvalidIdentifier {
        /// The rejected name.
        name: String,
    },

    /// A filter carried a value the query compiler cannot bind.
    #[error("filter value for {field} must be a scalar")]
    FilterValue {
        /// The field whose filter was rejected.
        field: String,
    },

    /// A row lookup required a row that does not exist.
    #[error("row not found: {table}/{record_id}")]
    RowNotFound {
        /// The business table.
        table: String,
        /// The missing record id.
        record_id: String,
    },

    /// An insert collided with an existing row.
    #[error("row already exists: {table}/{record_id}")]
    RowExists {
        /// The business table.
        table: String,
        /// The colliding record id.
        record_id: String,
    },

    /// A journal entry lookup required an entry that does not exist.
    #[error("journal entry not found: {id}")]
    EntryNotFound {
        /// The missing entry id.
        id: String,
    },

    /// A stored value could not be decoded.
    #[error("decode error: {message}")]
    Decode {
        /// What failed to decode.
        message: String,
    },

    /// The database file carries a schema version this build does not know.
    #[error("unsupported schema version: {found}")]
    SchemaVersion {
        /// The version found in `PRAGMA user_version`.
        found: i64,
    },
}

impl LocalError {
    /// Shorthand for a decode failure.
    pub(crate) fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }
}
