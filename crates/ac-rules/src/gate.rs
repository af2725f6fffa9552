//! Cadence and resource gate.
//!
//! Decides whether a gated rule may fire and stages the document changes
//! that firing implies. Nothing here writes anything: staged
//! [`PendingUse`]s are committed by the engine once the roll is final.

use std::collections::BTreeMap;

use ac_core::{
    ActorSnapshot, Battlefield, CombatState, Counter, DocumentUuid, TurnMarker,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entry::{Cadence, ConsumptionTarget, RuleEntry, UsesLimit};
use crate::error::{GateError, GateResult};

/// Persisted schema version of [`CadenceState`].
pub const CADENCE_SCHEMA: u32 = 1;

/// Field path of an item's remaining uses.
pub const ITEM_USES_PATH: &str = "system.uses.value";
/// Field path of an item's stack quantity.
pub const ITEM_QUANTITY_PATH: &str = "system.quantity";
/// Field path of an effect's own use counter.
pub const EFFECT_USES_PATH: &str = "usesRemaining";

/// When a cadence-limited rule was last used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CadenceRecord {
    /// Round of the use.
    pub used_round: u32,
    /// Turn index of the use.
    pub used_turn: usize,
    /// Turn index of the rule owner in the turn order.
    pub anchor_turn: usize,
}

impl CadenceRecord {
    /// The `(round, turn)` from which a `oncePerRound` rule is usable again.
    ///
    /// A use before the owner's turn refreshes on that turn in the same
    /// round; a use on or after it refreshes on the owner's next turn.
    pub fn round_refresh(&self) -> (u32, usize) {
        if self.used_turn < self.anchor_turn {
            (self.used_round, self.anchor_turn)
        } else {
            (self.used_round + 1, self.anchor_turn)
        }
    }
}

/// The three cadence buckets, keyed by rule id.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CadenceUsage {
    /// Cleared whenever the turn changes.
    #[serde(default)]
    pub once_per_turn: BTreeMap<String, CadenceRecord>,
    /// Unlocked on the owner's next turn.
    #[serde(default)]
    pub once_per_round: BTreeMap<String, CadenceRecord>,
    /// Cleared only by an explicit reset.
    #[serde(default)]
    pub once_per_combat: BTreeMap<String, CadenceRecord>,
}

/// Per-combat usage state for cadence-limited rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CadenceState {
    /// Schema version.
    pub schema: u32,
    /// The turn the state was last synchronized to.
    #[serde(default)]
    pub last: TurnMarker,
    /// Usage records.
    #[serde(default)]
    pub used: CadenceUsage,
    /// Last write, epoch milliseconds.
    #[serde(default)]
    pub updated_at: i64,
}

impl Default for CadenceState {
    fn default() -> Self {
        Self {
            schema: CADENCE_SCHEMA,
            last: TurnMarker::default(),
            used: CadenceUsage::default(),
            updated_at: 0,
        }
    }
}

impl CadenceState {
    /// Empty state.
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket(&self, cadence: Cadence) -> &BTreeMap<String, CadenceRecord> {
        match cadence {
            Cadence::OncePerTurn => &self.used.once_per_turn,
            Cadence::OncePerRound => &self.used.once_per_round,
            Cadence::OncePerCombat => &self.used.once_per_combat,
        }
    }

    fn bucket_mut(&mut self, cadence: Cadence) -> &mut BTreeMap<String, CadenceRecord> {
        match cadence {
            Cadence::OncePerTurn => &mut self.used.once_per_turn,
            Cadence::OncePerRound => &mut self.used.once_per_round,
            Cadence::OncePerCombat => &mut self.used.once_per_combat,
        }
    }

    /// Move to `marker`, clearing the per-turn bucket if the turn changed.
    /// Returns true if anything changed.
    pub fn sync(&mut self, marker: &TurnMarker) -> bool {
        if &self.last == marker {
            return false;
        }
        self.last = marker.clone();
        self.used.once_per_turn.clear();
        true
    }

    /// The usage record of a rule, if any.
    pub fn record(&self, cadence: Cadence, rule: &str) -> Option<&CadenceRecord> {
        self.bucket(cadence).get(rule)
    }

    /// Returns true if the rule already fired in the window containing `marker`.
    pub fn is_blocked(&self, cadence: Cadence, rule: &str, marker: &TurnMarker) -> bool {
        let Some(record) = self.record(cadence, rule) else {
            return false;
        };
        match cadence {
            Cadence::OncePerTurn => {
                record.used_round == marker.round && record.used_turn == marker.turn
            }
            Cadence::OncePerRound => (marker.round, marker.turn) < record.round_refresh(),
            Cadence::OncePerCombat => true,
        }
    }

    /// Store a usage record.
    pub fn mark_used(&mut self, cadence: Cadence, rule: impl Into<String>, record: CadenceRecord, now_ms: i64) {
        self.bucket_mut(cadence).insert(rule.into(), record);
        self.updated_at = now_ms;
    }

    /// Apply a staged cadence record. Returns false for other use kinds.
    pub fn apply(&mut self, use_: &PendingUse, now_ms: i64) -> bool {
        match &use_.kind {
            PendingUseKind::RecordCadence {
                cadence, record, ..
            } => {
                self.mark_used(*cadence, use_.rule_id.clone(), *record, now_ms);
                true
            }
            _ => false,
        }
    }

    /// Forget every usage record.
    pub fn reset(&mut self, now_ms: i64) {
        self.used = CadenceUsage::default();
        self.updated_at = now_ms;
    }

    /// Returns true if no rule has been recorded.
    pub fn is_empty(&self) -> bool {
        self.used.once_per_turn.is_empty()
            && self.used.once_per_round.is_empty()
            && self.used.once_per_combat.is_empty()
    }
}

/// What a staged use does when committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum PendingUseKind {
    /// Change a counter field on a document by `delta`.
    ///
    /// Applied against the live value at commit time, so two rolls staged
    /// from the same snapshot both count.
    ConsumeCounter {
        /// Document holding the counter.
        document: DocumentUuid,
        /// Field path of the counter.
        path: String,
        /// Value seen when staging; stands in for an unset field.
        seen: i64,
        /// Signed change, negative when spending.
        delta: i64,
        /// Upper bound of the counter.
        #[serde(default)]
        max: Option<i64>,
        /// Delete the document once the counter reaches zero.
        #[serde(default)]
        delete_when_empty: bool,
    },
    /// Delete an effect.
    DeleteEffect {
        /// The effect.
        effect: DocumentUuid,
    },
    /// Disable an effect.
    DisableEffect {
        /// The effect.
        effect: DocumentUuid,
    },
    /// Record a cadence use on the combat.
    RecordCadence {
        /// Combat holding the cadence state.
        combat: DocumentUuid,
        /// Window.
        cadence: Cadence,
        /// Usage record.
        record: CadenceRecord,
    },
}

/// A staged, uncommitted consequence of a rule firing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingUse {
    /// Rule that caused it.
    pub rule_id: String,
    /// The change.
    pub kind: PendingUseKind,
}

impl PendingUse {
    /// Document the change targets.
    pub fn document(&self) -> &DocumentUuid {
        match &self.kind {
            PendingUseKind::ConsumeCounter { document, .. } => document,
            PendingUseKind::DeleteEffect { effect } | PendingUseKind::DisableEffect { effect } => {
                effect
            }
            PendingUseKind::RecordCadence { combat, .. } => combat,
        }
    }
}

/// Admission checks against persisted cadence state and current counters.
#[derive(Debug, Clone, Default)]
pub struct Gate {
    state: CadenceState,
    combat: Option<CombatState>,
}

impl Gate {
    /// Gate over `state`, synchronized to the combat's current turn.
    pub fn new(mut state: CadenceState, combat: Option<&CombatState>) -> Self {
        let combat = combat.filter(|c| c.is_started()).cloned();
        if let Some(combat) = &combat {
            state.sync(&combat.marker());
        }
        Self { state, combat }
    }

    /// The (synchronized) cadence state.
    pub fn state(&self) -> &CadenceState {
        &self.state
    }

    /// Check a rule and stage what firing it would change.
    ///
    /// `pending` holds uses already staged in this pass: a rule that is
    /// already in it is admitted again without staging anything, and
    /// counters continue from the staged values.
    pub fn admit(
        &self,
        entry: &RuleEntry,
        battlefield: &Battlefield,
        pending: &[PendingUse],
    ) -> GateResult<Vec<PendingUse>> {
        if pending.iter().any(|p| p.rule_id == entry.id) {
            return Ok(Vec::new());
        }
        let mut staged = Vec::new();

        if let Some(cadence) = entry.cadence {
            match &self.combat {
                Some(combat) => {
                    let marker = combat.marker();
                    if self.state.is_blocked(cadence, &entry.id, &marker) {
                        return Err(GateError::CadenceBlocked {
                            rule: entry.id.clone(),
                            cadence,
                        });
                    }
                    let anchor_turn = combat
                        .turn_index_of(&entry.source_actor)
                        .unwrap_or(combat.turn);
                    staged.push(PendingUse {
                        rule_id: entry.id.clone(),
                        kind: PendingUseKind::RecordCadence {
                            combat: combat.id.clone(),
                            cadence,
                            record: CadenceRecord {
                                used_round: marker.round,
                                used_turn: marker.turn,
                                anchor_turn,
                            },
                        },
                    });
                }
                None => debug!(rule = %entry.id, "no active combat; cadence not tracked"),
            }
        }

        if let Some(uses) = &entry.uses {
            staged.extend(consume(entry, uses, battlefield, pending)?);
        }

        if entry.once {
            let kind = if entry.effect_transfer {
                PendingUseKind::DisableEffect {
                    effect: entry.effect.clone(),
                }
            } else {
                PendingUseKind::DeleteEffect {
                    effect: entry.effect.clone(),
                }
            };
            staged.push(PendingUse {
                rule_id: entry.id.clone(),
                kind,
            });
        }

        Ok(staged)
    }
}

fn exhausted(entry: &RuleEntry, available: i64, cost: i64) -> GateError {
    GateError::ResourceExhausted {
        rule: entry.id.clone(),
        available,
        cost,
    }
}

/// Locate the counter a uses limit draws from: `(document, path, counter)`.
fn locate(
    entry: &RuleEntry,
    target: &ConsumptionTarget,
    actor: &ActorSnapshot,
) -> Option<(DocumentUuid, String, Counter)> {
    match target {
        ConsumptionTarget::Effect(max) => {
            let current = actor
                .effect(&entry.effect)
                .and_then(|e| e.uses_remaining)
                .unwrap_or(*max);
            Some((
                entry.effect.clone(),
                EFFECT_USES_PATH.to_string(),
                Counter::new(current, Some(*max)),
            ))
        }
        ConsumptionTarget::Item(key) => {
            let item = actor.find_item(key)?;
            Some((item.uuid.clone(), ITEM_USES_PATH.to_string(), item.uses?))
        }
        ConsumptionTarget::Quantity(key) => {
            let item = actor.find_item(key)?;
            Some((
                item.uuid.clone(),
                ITEM_QUANTITY_PATH.to_string(),
                Counter::new(item.quantity?, None),
            ))
        }
        ConsumptionTarget::Resource(key) => {
            let counter = actor.resources.get(key)?;
            Some((
                DocumentUuid::new(actor.id.as_str()),
                format!("system.resources.{key}.value"),
                *counter,
            ))
        }
    }
}

fn consume(
    entry: &RuleEntry,
    uses: &UsesLimit,
    battlefield: &Battlefield,
    pending: &[PendingUse],
) -> GateResult<Vec<PendingUse>> {
    let actor = battlefield
        .actor(&entry.source_actor)
        .map_err(|_| exhausted(entry, 0, uses.cost))?;
    let (document, path, counter) =
        locate(entry, &uses.target, actor).ok_or_else(|| exhausted(entry, 0, uses.cost))?;

    // Continue from what this pass already staged against the counter.
    let staged_delta: i64 = pending
        .iter()
        .filter_map(|p| match &p.kind {
            PendingUseKind::ConsumeCounter {
                document: d,
                path: p,
                delta,
                ..
            } if d == &document && p == &path => Some(*delta),
            _ => None,
        })
        .sum();
    let current = counter.value + staged_delta;
    let next = Counter::new(current, counter.max)
        .after_spending(uses.cost)
        .ok_or_else(|| exhausted(entry, current, uses.cost))?;

    Ok(vec![PendingUse {
        rule_id: entry.id.clone(),
        kind: PendingUseKind::ConsumeCounter {
            document,
            path,
            seen: counter.value,
            delta: next - current,
            max: counter.max,
            delete_when_empty: matches!(uses.target, ConsumptionTarget::Effect(_)),
        },
    }])
}
