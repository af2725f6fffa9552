use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::effect::Effect;
use crate::id::{ActorId, DocumentUuid};
use crate::value::Value;

/// Hit points of an actor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HitPoints {
    /// Current hit points.
    pub value: i64,
    /// Maximum hit points.
    pub max: i64,
    /// Temporary hit points.
    #[serde(default)]
    pub temp: i64,
}

impl HitPoints {
    /// Current hit points as a percentage of the maximum (0-100).
    pub fn percent(&self) -> f64 {
        if self.max <= 0 {
            return 0.0;
        }
        (self.value as f64 / self.max as f64 * 100.0).clamp(0.0, 100.0)
    }
}

/// A consumable counter: item uses, a class resource, an effect's remaining charges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    /// Current value.
    pub value: i64,
    /// Upper bound, if the counter has one.
    #[serde(default)]
    pub max: Option<i64>,
}

impl Counter {
    /// Create a counter starting at `value` with an optional maximum.
    pub fn new(value: i64, max: Option<i64>) -> Self {
        Self { value, max }
    }

    /// The value after spending `cost`, or `None` if that would go below
    /// zero or above the maximum (negative costs restore).
    pub fn after_spending(&self, cost: i64) -> Option<i64> {
        let next = self.value.checked_sub(cost)?;
        if next < 0 {
            return None;
        }
        if let Some(max) = self.max
            && next > max
        {
            return None;
        }
        Some(next)
    }
}

/// An item owned by an actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemSnapshot {
    /// Document UUID of the item.
    pub uuid: DocumentUuid,
    /// Display name.
    pub name: String,
    /// Item type (weapon, spell, feat, consumable...).
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Whether the item is equipped.
    #[serde(default)]
    pub equipped: bool,
    /// Limited uses, if the item has them.
    #[serde(default)]
    pub uses: Option<Counter>,
    /// Stack quantity, if the item is stackable.
    #[serde(default)]
    pub quantity: Option<i64>,
    /// Item properties (finesse, magical, two-handed...).
    #[serde(default)]
    pub properties: BTreeSet<String>,
}

/// Read-only projection of an actor, as handed over by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorSnapshot {
    /// Actor identifier.
    pub id: ActorId,
    /// Display name.
    pub name: String,
    /// Actor type ("character", "npc", ...).
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Hit points.
    #[serde(default)]
    pub hp: HitPoints,
    /// Character level or challenge rating.
    #[serde(default)]
    pub level: i64,
    /// Proficiency bonus.
    #[serde(default)]
    pub proficiency: i64,
    /// Ability modifiers keyed by ability abbreviation (`str`, `dex`, ...).
    #[serde(default)]
    pub abilities: BTreeMap<String, i64>,
    /// Active status conditions (`prone`, `blinded`, ...).
    #[serde(default)]
    pub statuses: BTreeSet<String>,
    /// Creature types (`humanoid`, `undead`, ...).
    #[serde(default)]
    pub creature_types: Vec<String>,
    /// Size category.
    #[serde(default)]
    pub size: Option<String>,
    /// Movement speeds keyed by mode.
    #[serde(default)]
    pub movement: BTreeMap<String, f64>,
    /// Owned items.
    #[serde(default)]
    pub items: Vec<ItemSnapshot>,
    /// Effects applied to this actor.
    #[serde(default)]
    pub effects: Vec<Effect>,
    /// Named resource counters (`primary`, `ki`, `superiority`...).
    #[serde(default)]
    pub resources: BTreeMap<String, Counter>,
    /// Any further host-specific fields, passed through to the context.
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl ActorSnapshot {
    /// Create a minimal actor with the given id and name.
    pub fn new(id: impl Into<ActorId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: "character".to_string(),
            hp: HitPoints::default(),
            level: 1,
            proficiency: 2,
            abilities: BTreeMap::new(),
            statuses: BTreeSet::new(),
            creature_types: Vec::new(),
            size: None,
            movement: BTreeMap::new(),
            items: Vec::new(),
            effects: Vec::new(),
            resources: BTreeMap::new(),
            properties: BTreeMap::new(),
        }
    }

    /// Returns true if the actor currently has the status.
    pub fn has_status(&self, status: &str) -> bool {
        self.statuses.contains(status)
    }

    /// Effects that currently contribute rules (enabled and not suppressed).
    pub fn active_effects(&self) -> impl Iterator<Item = &Effect> {
        self.effects.iter().filter(|e| e.is_active())
    }

    /// Find an effect by UUID.
    pub fn effect(&self, uuid: &DocumentUuid) -> Option<&Effect> {
        self.effects.iter().find(|e| &e.uuid == uuid)
    }

    /// Find an item by UUID or, failing that, by case-insensitive name.
    pub fn find_item(&self, key: &str) -> Option<&ItemSnapshot> {
        self.items
            .iter()
            .find(|i| i.uuid.as_str() == key)
            .or_else(|| self.items.iter().find(|i| i.name.eq_ignore_ascii_case(key)))
    }

    /// Flat projection of the actor's stats: the `getActorContext` view.
    ///
    /// Keys are relative (`hp.value`, `abilities.str`, `statuses`); the
    /// context builder prefixes them with `rollingActor.` / `opponentActor.`.
    pub fn projection(&self) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        out.insert("id".to_string(), Value::from(self.id.as_str()));
        out.insert("name".to_string(), Value::from(self.name.as_str()));
        out.insert("type".to_string(), Value::from(self.kind.as_str()));
        out.insert("level".to_string(), Value::from(self.level));
        out.insert("prof".to_string(), Value::from(self.proficiency));
        out.insert("hp.value".to_string(), Value::from(self.hp.value));
        out.insert("hp.max".to_string(), Value::from(self.hp.max));
        out.insert("hp.temp".to_string(), Value::from(self.hp.temp));
        out.insert("hp.pct".to_string(), Value::from(self.hp.percent()));
        out.insert(
            "hp.bloodied".to_string(),
            Value::from(self.hp.max > 0 && self.hp.percent() <= 50.0),
        );
        for (ability, modifier) in &self.abilities {
            out.insert(format!("abilities.{ability}"), Value::from(*modifier));
        }
        out.insert(
            "statuses".to_string(),
            Value::from(self.statuses.iter().cloned().collect::<Vec<String>>()),
        );
        for status in &self.statuses {
            out.insert(format!("statuses.{status}"), Value::Bool(true));
        }
        out.insert(
            "creatureType".to_string(),
            Value::from(self.creature_types.clone()),
        );
        for creature_type in &self.creature_types {
            out.insert(format!("creatureType.{creature_type}"), Value::Bool(true));
        }
        if let Some(size) = &self.size {
            out.insert("size".to_string(), Value::from(size.as_str()));
        }
        for (mode, speed) in &self.movement {
            out.insert(format!("movement.{mode}"), Value::from(*speed));
        }
        let equipped: Vec<String> = self
            .items
            .iter()
            .filter(|i| i.equipped)
            .map(|i| i.name.clone())
            .collect();
        out.insert("equipped".to_string(), Value::from(equipped));
        out.insert(
            "items".to_string(),
            Value::from(self.items.iter().map(|i| i.name.clone()).collect::<Vec<_>>()),
        );
        for (name, counter) in &self.resources {
            out.insert(format!("resources.{name}"), Value::from(counter.value));
        }
        out.insert(
            "effects".to_string(),
            Value::from(
                self.active_effects()
                    .map(|e| e.name.clone())
                    .collect::<Vec<_>>(),
            ),
        );
        for (key, value) in &self.properties {
            out.insert(key.clone(), value.clone());
        }
        out
    }
}
