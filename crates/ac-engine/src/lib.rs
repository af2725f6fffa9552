//! Roll sessions, evaluation cache and mutation dispatch.
//!
//! [`Engine`] is the surface the host roll lifecycle calls: it builds the
//! context, resolves and aggregates rules through `ac-rules`, caches
//! resolutions across dialog re-evaluations and, once a roll is final,
//! hands staged uses to the [`queue`] worker. Writes go through the
//! [`DocumentStore`] port; privileged ones are forwarded to an
//! [`AuthorityPeer`].

/// Evaluation cache and re-evaluation policy.
pub mod cache;
/// Persisted cadence state.
pub mod cadence_store;
/// Engine configuration.
pub mod config;
/// The engine facade.
pub mod engine;
/// Error types.
pub mod error;
/// Host document and peer ports.
pub mod host;
/// Mutation dispatch queue.
pub mod queue;
/// Roll session lifecycle.
pub mod session;

pub use cache::{EvaluationCache, Reevaluation, Signature};
pub use cadence_store::{CadenceRequest, CadenceStore, CadenceWriter};
pub use config::EngineConfig;
pub use engine::{CommitSummary, Engine};
pub use error::{EngineError, EngineResult, HostError, HostResult};
pub use host::{
    AuthorityPeer, DocumentStore, MemoryAuthority, MemoryStore, Mutation, NoAuthority,
};
pub use queue::{CommitBatch, CommitReport, QueueHandle};
pub use session::{RollSession, SessionState};
