//! Error types for the engine and its host ports.

use ac_core::DocumentUuid;
use ac_rules::RuleError;
use uuid::Uuid;

/// Errors returned by the host's document and peer ports.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    /// The document no longer exists.
    #[error("document not found: {0}")]
    MissingDocument(DocumentUuid),

    /// The local client may not write the document.
    #[error("not permitted to write {0}")]
    PermissionDenied(DocumentUuid),

    /// A counter change would take the counter out of its bounds.
    #[error("{path} on {document} is {available}; cannot change it by {delta}")]
    ResourceExhausted {
        /// Document holding the counter.
        document: DocumentUuid,
        /// Field path of the counter.
        path: String,
        /// Live value of the counter.
        available: i64,
        /// Change that was refused.
        delta: i64,
    },

    /// The call could not be delivered or answered.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Convenience result type for host port calls.
pub type HostResult<T> = Result<T, HostError>;

/// Errors that can occur in the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A privileged write was needed but no authoritative peer is present.
    #[error("no authoritative peer available for {0}")]
    AuthorityUnavailable(DocumentUuid),

    /// A host port call failed.
    #[error(transparent)]
    Host(#[from] HostError),

    /// State could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Building the evaluation context failed.
    #[error(transparent)]
    Rule(#[from] RuleError),

    /// The session was already committed or discarded.
    #[error("roll session {0} is already finalized")]
    SessionFinalized(Uuid),

    /// The mutation queue worker has stopped.
    #[error("mutation queue is closed")]
    QueueClosed,
}

/// Convenience result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
