use serde::{Deserialize, Serialize};

use crate::id::{ActorId, DocumentUuid};

/// One `key`/`value` change record on an active effect.
///
/// Rule strings live here as plain text: the key selects hook and mode,
/// the value carries flags, named fields and the condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectChange {
    /// Change key, e.g. `flags.ac5e.attack.advantage`.
    pub key: String,
    /// Change value, e.g. `"bonus=1d4; rollingActor.hp.pct < 50"`.
    #[serde(default)]
    pub value: String,
}

impl EffectChange {
    /// Create a change record.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// An active effect attached to an actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Effect {
    /// Document UUID of the effect.
    pub uuid: DocumentUuid,
    /// Display name; used as the label of every rule it carries.
    pub name: String,
    /// Actor the effect is attached to. Filled in by the battlefield loader
    /// when absent from the source data.
    #[serde(default)]
    pub owner: Option<ActorId>,
    /// UUID of the document that created the effect.
    #[serde(default)]
    pub origin: Option<String>,
    /// Whether the effect is transferred from an owned item.
    #[serde(default)]
    pub transfer: bool,
    /// Disabled effects contribute nothing.
    #[serde(default)]
    pub disabled: bool,
    /// Suppressed effects (e.g. unequipped item) contribute nothing.
    #[serde(default)]
    pub suppressed: bool,
    /// Change records.
    #[serde(default)]
    pub changes: Vec<EffectChange>,
    /// Remaining uses of an effect-local `usesCount` counter, once started.
    #[serde(rename = "usesRemaining", default)]
    pub uses_remaining: Option<i64>,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
}

impl Effect {
    /// Create an enabled effect with no changes.
    pub fn new(uuid: impl Into<DocumentUuid>, name: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            owner: None,
            origin: None,
            transfer: false,
            disabled: false,
            suppressed: false,
            changes: Vec::new(),
            uses_remaining: None,
            description: String::new(),
        }
    }

    /// Append a change record (builder style).
    pub fn with_change(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.changes.push(EffectChange::new(key, value));
        self
    }

    /// Returns true if the effect currently applies.
    pub fn is_active(&self) -> bool {
        !self.disabled && !self.suppressed
    }
}
