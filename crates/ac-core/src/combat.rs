//! Combat encounter and turn order.
//!
//! Mirrors the host's combat document: an ordered list of combatants,
//! a current round (1-based) and a turn index into that list.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::id::{ActorId, DocumentUuid, TokenId};

/// One entry in the turn order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Combatant {
    /// Combatant identifier.
    pub id: String,
    /// Actor taking this turn.
    pub actor: ActorId,
    /// Token of the actor, if placed.
    #[serde(default)]
    pub token: Option<TokenId>,
    /// Initiative score (higher goes first).
    #[serde(default)]
    pub initiative: f64,
}

/// Identifies one turn of one round; cadence windows are measured in these.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnMarker {
    /// Round number.
    pub round: u32,
    /// Turn index within the round.
    pub turn: usize,
    /// Combatant whose turn it is.
    pub combatant_id: Option<String>,
}

/// The state of an ongoing combat encounter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombatState {
    /// Document UUID of the combat; cadence state is persisted on it.
    pub id: DocumentUuid,
    /// Current round number (1-based, 0 = not started).
    #[serde(default)]
    pub round: u32,
    /// Index into `turns` for the active combatant.
    #[serde(default)]
    pub turn: usize,
    /// Combatants in turn order.
    #[serde(default)]
    pub turns: Vec<Combatant>,
}

impl CombatState {
    /// Create a combat encounter that has not started.
    pub fn new(id: impl Into<DocumentUuid>) -> Self {
        Self {
            id: id.into(),
            round: 0,
            turn: 0,
            turns: Vec::new(),
        }
    }

    /// Add a combatant.
    pub fn add_combatant(
        &mut self,
        id: impl Into<String>,
        actor: impl Into<ActorId>,
        token: Option<TokenId>,
        initiative: f64,
    ) {
        self.turns.push(Combatant {
            id: id.into(),
            actor: actor.into(),
            token,
            initiative,
        });
    }

    /// Start the combat: sort by initiative and begin round 1.
    pub fn start(&mut self) {
        self.turns
            .sort_by(|a, b| b.initiative.total_cmp(&a.initiative));
        self.round = 1;
        self.turn = 0;
    }

    /// Returns true if the combat is running.
    pub fn is_started(&self) -> bool {
        self.round > 0 && !self.turns.is_empty()
    }

    /// The active combatant.
    pub fn current(&self) -> CoreResult<&Combatant> {
        self.turns
            .get(self.turn)
            .ok_or_else(|| CoreError::Validation(format!("no combatant at turn {}", self.turn)))
    }

    /// The current round/turn/combatant triple.
    pub fn marker(&self) -> TurnMarker {
        TurnMarker {
            round: self.round,
            turn: self.turn,
            combatant_id: self.turns.get(self.turn).map(|c| c.id.clone()),
        }
    }

    /// Turn index of the actor's first combatant entry.
    pub fn turn_index_of(&self, actor: &ActorId) -> Option<usize> {
        self.turns.iter().position(|c| &c.actor == actor)
    }

    /// Returns true if it is currently the actor's turn.
    pub fn is_turn_of(&self, actor: &ActorId) -> bool {
        self.is_started() && self.turns.get(self.turn).is_some_and(|c| &c.actor == actor)
    }

    /// Advance to the next turn. Returns true if a new round started.
    pub fn advance(&mut self) -> bool {
        if self.turns.is_empty() {
            return false;
        }
        self.turn += 1;
        if self.turn >= self.turns.len() {
            self.turn = 0;
            self.round += 1;
            true
        } else {
            false
        }
    }

    /// Jump to an explicit round and turn.
    pub fn set_turn(&mut self, round: u32, turn: usize) {
        self.round = round;
        self.turn = turn;
    }
}
