//! Mutation dispatch queue.
//!
//! One worker per client applies committed batches strictly in submission
//! order. A batch is applied to completion before the next one is taken
//! off the channel, so two commits never interleave. Cadence records are
//! part of the batch and go first.
//!
//! # Routing
//!
//! - documents the local client may write are updated or deleted directly
//! - anything else goes to the authoritative peer over [`COMMIT_CHANNEL`]
//! - with no peer present the mutation is dropped and logged
//!
//! Missing documents and counters that ran out since staging are a benign
//! no-op.

use std::collections::BTreeSet;
use std::sync::Arc;

use ac_core::DocumentUuid;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::cadence_store::{CadenceRequest, CadenceStore};
use crate::error::{EngineError, EngineResult, HostError};
use crate::host::{AuthorityPeer, COMMIT_CHANNEL, DocumentStore, Mutation};

const CHANNEL_CAPACITY: usize = 64;

/// Everything one roll commits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitBatch {
    /// Cadence writes, one per combat.
    pub cadence: Vec<CadenceRequest>,
    /// Document mutations in the order they were staged.
    pub mutations: Vec<Mutation>,
}

impl From<Vec<Mutation>> for CommitBatch {
    fn from(mutations: Vec<Mutation>) -> Self {
        Self {
            cadence: Vec::new(),
            mutations,
        }
    }
}

impl CommitBatch {
    /// Returns true if there is nothing to write.
    pub fn is_empty(&self) -> bool {
        self.cadence.is_empty() && self.mutations.is_empty()
    }
}

/// Commands accepted by the queue worker.
#[derive(Debug)]
pub enum Command {
    /// Apply a batch.
    Commit {
        /// The batch.
        batch: CommitBatch,
        /// Receives the outcome once the whole batch is done.
        reply: oneshot::Sender<CommitReport>,
    },

    /// Stop the worker after the batches already queued.
    Shutdown,
}

/// What happened to each write of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitReport {
    /// Applied locally.
    pub applied: usize,
    /// Forwarded to the authoritative peer.
    pub delegated: usize,
    /// Not applied (no authority, permission or transport failure).
    pub dropped: usize,
    /// Target document no longer existed.
    pub missing: usize,
    /// Counter changes refused because the live counter ran out.
    pub exhausted: usize,
    /// Duplicate deletes removed before dispatch.
    pub deduplicated: usize,
    /// Cadence uses recorded (a reset counts as one).
    pub cadence_recorded: usize,
    /// Cadence uses that could not be recorded.
    pub cadence_dropped: usize,
}

impl CommitReport {
    /// Total document mutations accounted for.
    pub fn total(&self) -> usize {
        self.applied
            + self.delegated
            + self.dropped
            + self.missing
            + self.exhausted
            + self.deduplicated
    }
}

/// Cheap handle for submitting batches to the worker.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    command_tx: mpsc::Sender<Command>,
}

impl QueueHandle {
    /// Submit a batch and wait for it to be applied.
    pub async fn commit(&self, batch: impl Into<CommitBatch>) -> EngineResult<CommitReport> {
        let batch = batch.into();
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(Command::Commit { batch, reply })
            .await
            .map_err(|_| EngineError::QueueClosed)?;
        rx.await.map_err(|_| EngineError::QueueClosed)
    }

    /// Ask the worker to stop.
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.command_tx
            .send(Command::Shutdown)
            .await
            .map_err(|_| EngineError::QueueClosed)
    }
}

/// Background worker draining the command channel.
pub struct QueueWorker {
    store: Arc<dyn DocumentStore>,
    peer: Arc<dyn AuthorityPeer>,
    cadence: CadenceStore,
    command_rx: mpsc::Receiver<Command>,
}

impl QueueWorker {
    /// Create a worker and the handle that feeds it.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        peer: Arc<dyn AuthorityPeer>,
        cadence: CadenceStore,
    ) -> (Self, QueueHandle) {
        let (command_tx, command_rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            Self {
                store,
                peer,
                cadence,
                command_rx,
            },
            QueueHandle { command_tx },
        )
    }

    /// Main worker loop.
    pub async fn run(mut self) {
        debug!("mutation queue started");
        while let Some(command) = self.command_rx.recv().await {
            match command {
                Command::Commit { batch, reply } => {
                    let report = self.apply_batch(batch).await;
                    if reply.send(report).is_err() {
                        debug!("commit caller went away before the report");
                    }
                }
                Command::Shutdown => break,
            }
        }
        debug!("mutation queue stopped");
    }

    async fn apply_batch(&self, batch: CommitBatch) -> CommitReport {
        let mut report = CommitReport::default();
        for request in batch.cadence {
            let combat = request.combat.clone();
            let count = request.uses.len() + usize::from(request.reset);
            match self.cadence.submit(request).await {
                Ok(()) => report.cadence_recorded += count,
                Err(err) => {
                    warn!(combat = %combat, error = %err, "cadence uses dropped");
                    report.cadence_dropped += count;
                }
            }
        }

        let mut deleted: BTreeSet<DocumentUuid> = BTreeSet::new();
        for mutation in batch.mutations {
            if let Mutation::Delete { document } = &mutation
                && !deleted.insert(document.clone())
            {
                report.deduplicated += 1;
                continue;
            }
            self.apply_one(&mutation, &mut report).await;
        }
        info!(
            applied = report.applied,
            delegated = report.delegated,
            dropped = report.dropped,
            missing = report.missing,
            exhausted = report.exhausted,
            cadence = report.cadence_recorded,
            "commit batch done"
        );
        report
    }

    async fn apply_one(&self, mutation: &Mutation, report: &mut CommitReport) {
        let document = mutation.document();
        if self.store.can_write(document) {
            match self.store.apply(mutation).await {
                Ok(()) => report.applied += 1,
                Err(HostError::MissingDocument(_)) => {
                    debug!(document = %document, "mutation target is gone; skipped");
                    report.missing += 1;
                }
                Err(err @ HostError::ResourceExhausted { .. }) => {
                    info!(document = %document, error = %err, "use dropped at commit");
                    report.exhausted += 1;
                }
                Err(err) => {
                    warn!(document = %document, error = %err, "mutation failed");
                    report.dropped += 1;
                }
            }
            return;
        }

        if !self.peer.is_available() {
            warn!(
                document = %document,
                error = %EngineError::AuthorityUnavailable(document.clone()),
                "mutation dropped"
            );
            report.dropped += 1;
            return;
        }

        let payload = match serde_json::to_value(mutation) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(document = %document, error = %err, "mutation not serializable");
                report.dropped += 1;
                return;
            }
        };
        match self.peer.query(COMMIT_CHANNEL, payload).await {
            Ok(_) => report.delegated += 1,
            Err(HostError::MissingDocument(_)) => report.missing += 1,
            Err(err @ HostError::ResourceExhausted { .. }) => {
                info!(document = %document, error = %err, "delegated use dropped at commit");
                report.exhausted += 1;
            }
            Err(err) => {
                warn!(document = %document, error = %err, "delegated mutation failed");
                report.dropped += 1;
            }
        }
    }
}

/// Spawn a queue worker on the current tokio runtime.
pub fn spawn(
    store: Arc<dyn DocumentStore>,
    peer: Arc<dyn AuthorityPeer>,
    cadence: CadenceStore,
) -> QueueHandle {
    let (worker, handle) = QueueWorker::new(store, peer, cadence);
    tokio::spawn(worker.run());
    handle
}
