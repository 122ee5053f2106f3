//! Error types for the engine.

use thiserror::Error;

use tillsync_local::LocalError;
use tillsync_model::ModelError;
use tillsync_protocol::ProtocolError;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by routing, replay, and conflict resolution.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A write hit a remote-only table while offline.
    #[error("table {table} is read-only while offline")]
    ReadOnlyOffline {
        /// Table the write targeted.
        table: String,
    },

    /// A gated table was written offline without its feature enabled.
    #[error("offline writes to {table} require the {feature} feature")]
    FeatureDisabledOffline {
        /// Table the write targeted.
        table: String,
        /// Feature that would allow the write.
        feature: String,
    },

    /// An update or delete arrived without a record id.
    #[error("mutation on {table} requires a record id")]
    MissingRecordId {
        /// Table the mutation targeted.
        table: String,
    },

    /// Network or transport failure talking to the remote store.
    #[error("transport error: {message}")]
    Transport {
        /// Error detail.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Authentication with the remote store failed.
    #[error("authentication failed: {0}")]
    Unauthorized(String),

    /// The remote store rejected a write as an integrity violation.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// The remote store has no row for the requested record.
    #[error("record {record_id} not found in {table}")]
    NotFound {
        /// Table the operation targeted.
        table: String,
        /// The missing record.
        record_id: String,
    },

    /// The remote store does not know the requested procedure.
    #[error("unknown procedure {name}")]
    UnknownProcedure {
        /// The requested procedure name.
        name: String,
    },

    /// An atomic procedure was invoked while offline.
    #[error("procedure {name} requires connectivity")]
    ProcedureUnavailableOffline {
        /// The requested procedure name.
        name: String,
    },

    /// A settlement payment overshot the order total beyond tolerance.
    #[error("payment exceeds order total by {excess_cents} cents (tolerance {tolerance_cents})")]
    OverpaymentRejected {
        /// How far the payment overshot, in cents.
        excess_cents: i64,
        /// The configured tolerance, in cents.
        tolerance_cents: i64,
    },

    /// A replay cycle is already running.
    #[error("a sync cycle is already in progress")]
    ReplayInProgress,

    /// No conflict exists under the given id.
    #[error("conflict {conflict_id} not found")]
    ConflictNotFound {
        /// The requested conflict id.
        conflict_id: String,
    },

    /// The conflict was already resolved.
    #[error("conflict {conflict_id} is already resolved")]
    AlreadyResolved {
        /// The requested conflict id.
        conflict_id: String,
    },

    /// A merged resolution was requested without a payload to apply.
    #[error("merged resolution for conflict {conflict_id} requires a merged payload")]
    MergedPayloadRequired {
        /// The conflict being resolved.
        conflict_id: String,
    },

    /// The remote response could not be encoded or decoded.
    #[error("remote protocol error: {0}")]
    RemoteProtocol(String),

    /// Local store error.
    #[error(transparent)]
    Local(#[from] LocalError),

    /// Protocol-level error.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Model-level error.
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl EngineError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true for transport failures, the errors that flip the engine
    /// offline and trigger local fallback.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Returns true if retrying the same operation could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { retryable, .. } => *retryable,
            Self::ReplayInProgress => true,
            _ => false,
        }
    }

    /// Rewrites a context-free not-found error with the operation's target.
    #[must_use]
    pub(crate) fn with_target(self, table: &str, record_id: &str) -> Self {
        match self {
            Self::NotFound { .. } => Self::NotFound {
                table: table.to_string(),
                record_id: record_id.to_string(),
            },
            other => other,
        }
    }
}
