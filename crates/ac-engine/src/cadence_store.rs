//! Persisted cadence state.
//!
//! Cadence state lives on the combat document. Only the authoritative peer
//! writes it: a non-authoritative client forwards its cadence uses instead
//! of updating its own copy.

use std::sync::Arc;

use ac_core::{DocumentUuid, TurnMarker};
use ac_rules::{CadenceState, PendingUse, PendingUseKind};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::host::{AuthorityPeer, CADENCE_CHANNEL, DocumentStore};

/// A cadence write, as sent to the authoritative peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CadenceRequest {
    /// Combat holding the state.
    pub combat: DocumentUuid,
    /// Current turn, to clear stale per-turn records.
    #[serde(default)]
    pub marker: Option<TurnMarker>,
    /// Uses to record.
    #[serde(default)]
    pub uses: Vec<PendingUse>,
    /// Forget every record first.
    #[serde(default)]
    pub reset: bool,
}

async fn load_from(
    store: &dyn DocumentStore,
    path: &str,
    combat: &DocumentUuid,
) -> EngineResult<CadenceState> {
    match store.read_field(combat, path).await? {
        Some(json) => Ok(serde_json::from_value(json)?),
        None => Ok(CadenceState::new()),
    }
}

/// Applies cadence requests to the store. Authoritative side only.
///
/// Each request is a read-modify-write of the whole state; the lock keeps
/// two of them from interleaving.
pub struct CadenceWriter {
    store: Arc<dyn DocumentStore>,
    path: String,
    lock: Mutex<()>,
}

impl CadenceWriter {
    /// Writer keeping cadence state at `path` on combat documents.
    pub fn new(store: Arc<dyn DocumentStore>, path: impl Into<String>) -> Self {
        Self {
            store,
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Field path of the state.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Current state of a combat; empty if nothing was recorded yet.
    pub async fn load(&self, combat: &DocumentUuid) -> EngineResult<CadenceState> {
        load_from(self.store.as_ref(), &self.path, combat).await
    }

    /// Apply a request and return the state as written.
    pub async fn write(&self, request: &CadenceRequest) -> EngineResult<CadenceState> {
        let _guard = self.lock.lock().await;
        let now = chrono::Utc::now().timestamp_millis();
        let mut state = self.load(&request.combat).await?;
        if request.reset {
            state.reset(now);
        }
        if let Some(marker) = &request.marker {
            state.sync(marker);
        }
        for use_ in &request.uses {
            state.apply(use_, now);
        }
        state.updated_at = now;
        self.store
            .update_document(&request.combat, &self.path, serde_json::to_value(&state)?)
            .await?;
        debug!(combat = %request.combat, uses = request.uses.len(), "cadence state written");
        Ok(state)
    }
}

/// Reads cadence state and routes writes to whoever may make them.
///
/// Writes are submitted by the mutation queue worker, which orders them
/// with the rest of each commit batch.
#[derive(Clone)]
pub struct CadenceStore {
    writer: Arc<CadenceWriter>,
    peer: Arc<dyn AuthorityPeer>,
    is_authority: bool,
}

impl CadenceStore {
    /// Cadence store at `path` on combat documents.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        peer: Arc<dyn AuthorityPeer>,
        path: impl Into<String>,
        is_authority: bool,
    ) -> Self {
        Self {
            writer: Arc::new(CadenceWriter::new(store, path)),
            peer,
            is_authority,
        }
    }

    /// Current state of a combat; empty if nothing was recorded yet.
    pub async fn load(&self, combat: &DocumentUuid) -> EngineResult<CadenceState> {
        self.writer.load(combat).await
    }

    /// Write locally when authoritative, otherwise forward to the peer.
    pub async fn submit(&self, request: CadenceRequest) -> EngineResult<()> {
        if self.is_authority {
            self.writer.write(&request).await?;
            return Ok(());
        }
        if !self.peer.is_available() {
            warn!(combat = %request.combat, "cadence uses dropped: no authoritative peer");
            return Err(EngineError::AuthorityUnavailable(request.combat));
        }
        self.peer
            .query(CADENCE_CHANNEL, serde_json::to_value(&request)?)
            .await?;
        Ok(())
    }
}

impl CadenceRequest {
    /// Record the cadence uses among `uses`. `None` if there are none.
    pub fn record(
        combat: &DocumentUuid,
        marker: Option<&TurnMarker>,
        uses: &[PendingUse],
    ) -> Option<Self> {
        let uses: Vec<PendingUse> = uses
            .iter()
            .filter(|u| matches!(&u.kind, PendingUseKind::RecordCadence { combat: c, .. } if c == combat))
            .cloned()
            .collect();
        (!uses.is_empty()).then(|| Self {
            combat: combat.clone(),
            marker: marker.cloned(),
            uses,
            reset: false,
        })
    }

    /// Forget every record of a combat (a GM action).
    pub fn reset(combat: &DocumentUuid) -> Self {
        Self {
            combat: combat.clone(),
            marker: None,
            uses: Vec::new(),
            reset: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HostResult;
    use crate::host::{MemoryAuthority, MemoryStore, NoAuthority};
    use ac_rules::{Cadence, CadenceRecord};
    use async_trait::async_trait;
    use serde_json::{Value as Json, json};

    const PATH: &str = "flags.automated-conditions-5e.cadence";

    fn cadence_use(rule: &str, round: u32, turn: usize) -> PendingUse {
        PendingUse {
            rule_id: rule.to_string(),
            kind: PendingUseKind::RecordCadence {
                combat: DocumentUuid::new("Combat.1"),
                cadence: Cadence::OncePerRound,
                record: CadenceRecord {
                    used_round: round,
                    used_turn: turn,
                    anchor_turn: 0,
                },
            },
        }
    }

    fn combat() -> DocumentUuid {
        DocumentUuid::new("Combat.1")
    }

    fn record(uses: &[PendingUse]) -> CadenceRequest {
        CadenceRequest::record(&combat(), None, uses).unwrap()
    }

    fn store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.insert("Combat.1", json!({}));
        store
    }

    /// Yields to the scheduler on every read, between a load and its write.
    struct YieldingStore(Arc<MemoryStore>);

    #[async_trait]
    impl DocumentStore for YieldingStore {
        fn can_write(&self, document: &DocumentUuid) -> bool {
            self.0.can_write(document)
        }

        async fn read_field(&self, document: &DocumentUuid, path: &str) -> HostResult<Option<Json>> {
            let value = self.0.read_field(document, path).await;
            tokio::task::yield_now().await;
            value
        }

        async fn update_document(
            &self,
            document: &DocumentUuid,
            path: &str,
            value: Json,
        ) -> HostResult<()> {
            self.0.update_document(document, path, value).await
        }

        async fn delete_document(&self, document: &DocumentUuid) -> HostResult<()> {
            self.0.delete_document(document).await
        }
    }

    #[tokio::test]
    async fn authority_writes_directly() {
        let store = store();
        let cadence = CadenceStore::new(store.clone(), Arc::new(NoAuthority), PATH, true);
        assert!(cadence.load(&combat()).await.unwrap().is_empty());

        cadence.submit(record(&[cadence_use("r1", 2, 0)])).await.unwrap();
        let state = cadence.load(&combat()).await.unwrap();
        assert!(state.record(Cadence::OncePerRound, "r1").is_some());
        assert!(state.updated_at > 0);

        cadence.submit(CadenceRequest::reset(&combat())).await.unwrap();
        assert!(cadence.load(&combat()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_writes_keep_every_record() {
        let inner = store();
        let writer = CadenceWriter::new(Arc::new(YieldingStore(inner.clone())), PATH);
        let first = record(&[cadence_use("r1", 1, 0)]);
        let second = record(&[cadence_use("r2", 1, 0)]);
        let (a, b) = tokio::join!(writer.write(&first), writer.write(&second));
        a.unwrap();
        b.unwrap();

        let state = CadenceWriter::new(inner, PATH).load(&combat()).await.unwrap();
        assert!(state.record(Cadence::OncePerRound, "r1").is_some());
        assert!(state.record(Cadence::OncePerRound, "r2").is_some());
    }

    #[tokio::test]
    async fn non_authority_forwards_to_peer() {
        let store = store();
        let peer = Arc::new(MemoryAuthority::new(store.clone(), PATH));
        let cadence = CadenceStore::new(store.clone(), peer.clone(), PATH, false);
        cadence.submit(record(&[cadence_use("r1", 1, 1)])).await.unwrap();
        assert_eq!(peer.queries(), 1);
        assert!(
            cadence
                .load(&combat())
                .await
                .unwrap()
                .record(Cadence::OncePerRound, "r1")
                .is_some()
        );
    }

    #[tokio::test]
    async fn non_authority_without_peer_fails() {
        let cadence = CadenceStore::new(store(), Arc::new(NoAuthority), PATH, false);
        let result = cadence.submit(record(&[cadence_use("r1", 1, 0)])).await;
        assert!(matches!(result, Err(EngineError::AuthorityUnavailable(_))));
    }

    #[test]
    fn record_requests_keep_only_this_combats_cadence_uses() {
        let mut other = cadence_use("r2", 1, 0);
        if let PendingUseKind::RecordCadence { combat, .. } = &mut other.kind {
            *combat = DocumentUuid::new("Combat.2");
        }
        let uses = [cadence_use("r1", 1, 0), other];
        assert_eq!(record(&uses).uses.len(), 1);
        assert!(CadenceRequest::record(&combat(), None, &[]).is_none());
        assert!(CadenceRequest::reset(&combat()).reset);
    }
}
