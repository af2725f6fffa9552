//! Host ports: document mutation and the authoritative peer.
//!
//! The engine never touches host documents directly. Writes go through a
//! [`DocumentStore`]; writes the local client may not make are forwarded
//! to an [`AuthorityPeer`]. In-memory implementations back the CLI and
//! the tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ac_core::{Battlefield, DocumentUuid};
use ac_rules::{PendingUse, PendingUseKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json, json};
use tracing::debug;

use crate::cadence_store::{CadenceRequest, CadenceWriter};
use crate::error::{EngineError, HostError, HostResult};

/// Peer channel for forwarded document mutations.
pub const COMMIT_CHANNEL: &str = "ac5e.commit";
/// Peer channel for cadence recording.
pub const CADENCE_CHANNEL: &str = "ac5e.cadence";

/// A single document write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Mutation {
    /// Set one field.
    Update {
        /// Target document.
        document: DocumentUuid,
        /// Dotted field path.
        path: String,
        /// New value.
        value: Json,
    },
    /// Change a numeric field by `delta`, checked against its live value.
    Adjust {
        /// Target document.
        document: DocumentUuid,
        /// Dotted field path.
        path: String,
        /// Signed change.
        delta: i64,
        /// Value assumed when the field is unset.
        fallback: i64,
        /// Upper bound of the field.
        #[serde(default)]
        max: Option<i64>,
        /// Delete the document once the field reaches zero.
        #[serde(default)]
        delete_when_empty: bool,
    },
    /// Delete the document.
    Delete {
        /// Target document.
        document: DocumentUuid,
    },
}

impl Mutation {
    /// Target document.
    pub fn document(&self) -> &DocumentUuid {
        match self {
            Self::Update { document, .. }
            | Self::Adjust { document, .. }
            | Self::Delete { document } => document,
        }
    }

    /// The document write for a staged use. Cadence records are not
    /// document writes and yield `None`.
    pub fn from_pending(use_: &PendingUse) -> Option<Self> {
        match &use_.kind {
            PendingUseKind::ConsumeCounter {
                document,
                path,
                seen,
                delta,
                max,
                delete_when_empty,
            } => Some(Self::Adjust {
                document: document.clone(),
                path: path.clone(),
                delta: *delta,
                fallback: *seen,
                max: *max,
                delete_when_empty: *delete_when_empty,
            }),
            PendingUseKind::DeleteEffect { effect } => Some(Self::Delete {
                document: effect.clone(),
            }),
            PendingUseKind::DisableEffect { effect } => Some(Self::Update {
                document: effect.clone(),
                path: "disabled".to_string(),
                value: Json::Bool(true),
            }),
            PendingUseKind::RecordCadence { .. } => None,
        }
    }
}

/// Document reads and writes on the host.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Whether the local client may write the document.
    fn can_write(&self, document: &DocumentUuid) -> bool;

    /// Read one field; `Ok(None)` if the field is unset.
    async fn read_field(&self, document: &DocumentUuid, path: &str) -> HostResult<Option<Json>>;

    /// Set one field.
    async fn update_document(&self, document: &DocumentUuid, path: &str, value: Json)
    -> HostResult<()>;

    /// Delete the document.
    async fn delete_document(&self, document: &DocumentUuid) -> HostResult<()>;

    /// Add `delta` to a numeric field, reading `fallback` when it is unset,
    /// and return the new value. Nothing is written if the result would
    /// leave `0..=max`.
    async fn adjust_counter(
        &self,
        document: &DocumentUuid,
        path: &str,
        delta: i64,
        fallback: i64,
        max: Option<i64>,
    ) -> HostResult<i64> {
        let available = self
            .read_field(document, path)
            .await?
            .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
            .unwrap_or(fallback);
        let next = available + delta;
        if next < 0 || max.is_some_and(|max| next > max) {
            return Err(HostError::ResourceExhausted {
                document: document.clone(),
                path: path.to_string(),
                available,
                delta,
            });
        }
        self.update_document(document, path, json!(next)).await?;
        Ok(next)
    }

    /// Apply a mutation.
    async fn apply(&self, mutation: &Mutation) -> HostResult<()> {
        match mutation {
            Mutation::Update {
                document,
                path,
                value,
            } => self.update_document(document, path, value.clone()).await,
            Mutation::Adjust {
                document,
                path,
                delta,
                fallback,
                max,
                delete_when_empty,
            } => {
                let next = self
                    .adjust_counter(document, path, *delta, *fallback, *max)
                    .await?;
                if *delete_when_empty && next == 0 {
                    debug!(document = %document, "counter empty; deleting");
                    self.delete_document(document).await?;
                }
                Ok(())
            }
            Mutation::Delete { document } => self.delete_document(document).await,
        }
    }
}

/// The single peer allowed to make privileged writes (the active GM).
#[async_trait]
pub trait AuthorityPeer: Send + Sync {
    /// Whether a peer is present.
    fn is_available(&self) -> bool;

    /// Send a request on a channel and wait for the answer.
    async fn query(&self, channel: &str, payload: Json) -> HostResult<Json>;
}

fn field<'a>(doc: &'a Json, path: &str) -> Option<&'a Json> {
    path.split('.').try_fold(doc, |node, key| node.get(key))
}

fn set_field(doc: &mut Json, path: &str, value: Json) {
    let mut node = doc;
    let mut keys = path.split('.').peekable();
    while let Some(key) = keys.next() {
        if !node.is_object() {
            *node = Json::Object(Map::new());
        }
        let Json::Object(map) = node else { return };
        if keys.peek().is_none() {
            map.insert(key.to_string(), value);
            return;
        }
        node = map
            .entry(key.to_string())
            .or_insert_with(|| Json::Object(Map::new()));
    }
}

/// Documents held in memory as JSON.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<BTreeMap<DocumentUuid, Json>>,
    /// Documents the local client may write; `None` means all.
    writable: Option<BTreeSet<DocumentUuid>>,
}

impl MemoryStore {
    /// Empty store where every document is writable.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with every actor, effect, item and combat on the
    /// battlefield.
    pub fn from_battlefield(battlefield: &Battlefield) -> Self {
        let mut documents = BTreeMap::new();
        for actor in &battlefield.actors {
            for effect in &actor.effects {
                documents.insert(
                    effect.uuid.clone(),
                    serde_json::to_value(effect).unwrap_or(Json::Null),
                );
            }
            for item in &actor.items {
                documents.insert(
                    item.uuid.clone(),
                    serde_json::to_value(item).unwrap_or(Json::Null),
                );
            }
            documents.insert(
                DocumentUuid::new(actor.id.as_str()),
                json!({ "name": actor.name }),
            );
        }
        if let Some(combat) = &battlefield.combat {
            documents.insert(combat.id.clone(), json!({}));
        }
        Self {
            documents: Mutex::new(documents),
            writable: None,
        }
    }

    /// Restrict local writes to the given documents.
    pub fn with_writable(mut self, documents: impl IntoIterator<Item = DocumentUuid>) -> Self {
        self.writable = Some(documents.into_iter().collect());
        self
    }

    /// Add or replace a document.
    pub fn insert(&self, document: impl Into<DocumentUuid>, value: Json) {
        if let Ok(mut docs) = self.documents.lock() {
            docs.insert(document.into(), value);
        }
    }

    /// A copy of a document.
    pub fn get(&self, document: &DocumentUuid) -> Option<Json> {
        self.documents.lock().ok()?.get(document).cloned()
    }

    /// Returns true if the document exists.
    pub fn contains(&self, document: &DocumentUuid) -> bool {
        self.get(document).is_some()
    }

    fn with_docs<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<DocumentUuid, Json>) -> HostResult<T>,
    ) -> HostResult<T> {
        let mut docs = self
            .documents
            .lock()
            .map_err(|_| HostError::Transport("document store lock poisoned".to_string()))?;
        f(&mut docs)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn can_write(&self, document: &DocumentUuid) -> bool {
        self.writable
            .as_ref()
            .is_none_or(|writable| writable.contains(document))
    }

    async fn read_field(&self, document: &DocumentUuid, path: &str) -> HostResult<Option<Json>> {
        self.with_docs(|docs| {
            let doc = docs
                .get(document)
                .ok_or_else(|| HostError::MissingDocument(document.clone()))?;
            Ok(field(doc, path).cloned())
        })
    }

    async fn update_document(
        &self,
        document: &DocumentUuid,
        path: &str,
        value: Json,
    ) -> HostResult<()> {
        self.with_docs(|docs| {
            let doc = docs
                .get_mut(document)
                .ok_or_else(|| HostError::MissingDocument(document.clone()))?;
            set_field(doc, path, value);
            Ok(())
        })
    }

    async fn delete_document(&self, document: &DocumentUuid) -> HostResult<()> {
        self.with_docs(|docs| {
            docs.remove(document)
                .map(|_| ())
                .ok_or_else(|| HostError::MissingDocument(document.clone()))
        })
    }
}

/// No authoritative peer is connected.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuthority;

#[async_trait]
impl AuthorityPeer for NoAuthority {
    fn is_available(&self) -> bool {
        false
    }

    async fn query(&self, channel: &str, _payload: Json) -> HostResult<Json> {
        Err(HostError::Transport(format!(
            "no authoritative peer to answer {channel}"
        )))
    }
}

/// An authoritative peer that writes straight into a local store.
///
/// Forwarded requests are handled one at a time, so concurrent clients
/// cannot interleave their read-modify-write cycles.
pub struct MemoryAuthority {
    store: Arc<dyn DocumentStore>,
    cadence: CadenceWriter,
    writes: tokio::sync::Mutex<()>,
    queries: AtomicUsize,
}

impl MemoryAuthority {
    /// Peer writing into `store`, keeping cadence state at `cadence_path`.
    pub fn new(store: Arc<dyn DocumentStore>, cadence_path: impl Into<String>) -> Self {
        Self {
            cadence: CadenceWriter::new(store.clone(), cadence_path),
            store,
            writes: tokio::sync::Mutex::new(()),
            queries: AtomicUsize::new(0),
        }
    }

    /// Number of queries answered.
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthorityPeer for MemoryAuthority {
    fn is_available(&self) -> bool {
        true
    }

    async fn query(&self, channel: &str, payload: Json) -> HostResult<Json> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let malformed = |e: serde_json::Error| HostError::Transport(format!("bad payload: {e}"));
        match channel {
            COMMIT_CHANNEL => {
                let mutation: Mutation = serde_json::from_value(payload).map_err(malformed)?;
                let _guard = self.writes.lock().await;
                debug!(document = %mutation.document(), "applying forwarded mutation");
                self.store.apply(&mutation).await?;
                Ok(json!({ "ok": true }))
            }
            CADENCE_CHANNEL => {
                let request: CadenceRequest = serde_json::from_value(payload).map_err(malformed)?;
                let state = self.cadence.write(&request).await.map_err(|e| match e {
                    EngineError::Host(host) => host,
                    other => HostError::Transport(other.to_string()),
                })?;
                serde_json::to_value(state).map_err(malformed)
            }
            other => Err(HostError::Transport(format!("unknown channel {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ac_rules::Cadence;

    #[tokio::test]
    async fn memory_store_updates_nested_fields() {
        let store = MemoryStore::new();
        store.insert("Item.1", json!({ "name": "Wand" }));
        let id = DocumentUuid::new("Item.1");
        store
            .update_document(&id, "system.uses.value", json!(2))
            .await
            .unwrap();
        assert_eq!(
            store.read_field(&id, "system.uses.value").await.unwrap(),
            Some(json!(2))
        );
        assert_eq!(store.read_field(&id, "system.quantity").await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_documents_are_reported() {
        let store = MemoryStore::new();
        let id = DocumentUuid::new("Effect.gone");
        assert_eq!(
            store.delete_document(&id).await,
            Err(HostError::MissingDocument(id.clone()))
        );
        assert!(matches!(
            store.update_document(&id, "disabled", json!(true)).await,
            Err(HostError::MissingDocument(_))
        ));
    }

    #[tokio::test]
    async fn counters_change_against_the_live_value() {
        let store = MemoryStore::new();
        store.insert("Item.wand", json!({ "name": "Wand" }));
        let id = DocumentUuid::new("Item.wand");
        let spend = Mutation::Adjust {
            document: id.clone(),
            path: "system.uses.value".to_string(),
            delta: -1,
            fallback: 2,
            max: Some(2),
            delete_when_empty: false,
        };
        store.apply(&spend).await.unwrap();
        store.apply(&spend).await.unwrap();
        assert_eq!(
            store.read_field(&id, "system.uses.value").await.unwrap(),
            Some(json!(0))
        );
        assert_eq!(
            store.apply(&spend).await,
            Err(HostError::ResourceExhausted {
                document: id.clone(),
                path: "system.uses.value".to_string(),
                available: 0,
                delta: -1,
            })
        );
        assert_eq!(
            store.read_field(&id, "system.uses.value").await.unwrap(),
            Some(json!(0))
        );
    }

    #[tokio::test]
    async fn emptied_effect_counters_delete_the_effect() {
        let store = MemoryStore::new();
        store.insert("Effect.1", json!({ "usesRemaining": 1 }));
        store
            .apply(&Mutation::Adjust {
                document: DocumentUuid::new("Effect.1"),
                path: "usesRemaining".to_string(),
                delta: -1,
                fallback: 1,
                max: Some(3),
                delete_when_empty: true,
            })
            .await
            .unwrap();
        assert!(!store.contains(&DocumentUuid::new("Effect.1")));
    }

    #[test]
    fn writable_restriction() {
        let store = MemoryStore::new().with_writable([DocumentUuid::new("Actor.mine")]);
        assert!(store.can_write(&DocumentUuid::new("Actor.mine")));
        assert!(!store.can_write(&DocumentUuid::new("Actor.theirs")));
    }

    #[test]
    fn pending_uses_map_to_mutations() {
        let update = PendingUse {
            rule_id: "r".to_string(),
            kind: PendingUseKind::ConsumeCounter {
                document: DocumentUuid::new("Item.1"),
                path: "system.uses.value".to_string(),
                seen: 3,
                delta: -1,
                max: Some(3),
                delete_when_empty: false,
            },
        };
        assert_eq!(
            Mutation::from_pending(&update),
            Some(Mutation::Adjust {
                document: DocumentUuid::new("Item.1"),
                path: "system.uses.value".to_string(),
                delta: -1,
                fallback: 3,
                max: Some(3),
                delete_when_empty: false,
            })
        );
        let cadence = PendingUse {
            rule_id: "r".to_string(),
            kind: PendingUseKind::RecordCadence {
                combat: DocumentUuid::new("Combat.1"),
                cadence: Cadence::OncePerTurn,
                record: Default::default(),
            },
        };
        assert_eq!(Mutation::from_pending(&cadence), None);
    }

    #[tokio::test]
    async fn memory_authority_applies_forwarded_mutations() {
        let store = Arc::new(MemoryStore::new());
        store.insert("Effect.1", json!({}));
        let peer = MemoryAuthority::new(store.clone(), "flags.ac5e.cadence");
        let mutation = Mutation::Delete {
            document: DocumentUuid::new("Effect.1"),
        };
        peer.query(COMMIT_CHANNEL, serde_json::to_value(&mutation).unwrap())
            .await
            .unwrap();
        assert!(!store.contains(&DocumentUuid::new("Effect.1")));
        assert_eq!(peer.queries(), 1);
        assert!(peer.query("elsewhere", json!({})).await.is_err());
        assert!(!NoAuthority.is_available());
    }
}
