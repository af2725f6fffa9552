//! The set of actors and tokens a roll can see, plus the geometry port.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::actor::ActorSnapshot;
use crate::combat::CombatState;
use crate::error::{CoreError, CoreResult};
use crate::id::{ActorId, TokenId};
use crate::token::TokenSnapshot;

/// Distance and line-of-sight between tokens, computed by the host.
pub trait Geometry {
    /// Distance between two tokens in scene units.
    fn distance(&self, a: &TokenSnapshot, b: &TokenSnapshot) -> f64;

    /// Whether `a` can see `b`.
    fn can_see(&self, a: &TokenSnapshot, b: &TokenSnapshot) -> bool;
}

/// Straight-line geometry over token positions, with explicit sight blockers.
#[derive(Debug, Clone, Default)]
pub struct GridGeometry {
    blocked: BTreeSet<(TokenId, TokenId)>,
}

impl GridGeometry {
    /// Geometry where every token sees every other token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block line of sight between two tokens (both directions).
    pub fn with_blocked_sight(mut self, a: impl Into<TokenId>, b: impl Into<TokenId>) -> Self {
        let (a, b) = (a.into(), b.into());
        self.blocked.insert((b.clone(), a.clone()));
        self.blocked.insert((a, b));
        self
    }
}

impl Geometry for GridGeometry {
    fn distance(&self, a: &TokenSnapshot, b: &TokenSnapshot) -> f64 {
        let dx = a.x - b.x;
        let dy = a.y - b.y;
        let dz = a.elevation - b.elevation;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    fn can_see(&self, a: &TokenSnapshot, b: &TokenSnapshot) -> bool {
        !self.blocked.contains(&(a.id.clone(), b.id.clone()))
    }
}

/// Everything on the scene: actors (with their effects), tokens and the
/// running combat, if any.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Battlefield {
    /// All actors with a presence in the scene.
    #[serde(default)]
    pub actors: Vec<ActorSnapshot>,
    /// All placed tokens.
    #[serde(default)]
    pub tokens: Vec<TokenSnapshot>,
    /// The active combat encounter.
    #[serde(default)]
    pub combat: Option<CombatState>,
}

impl Battlefield {
    /// Create an empty battlefield.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill in derived fields after deserialization: effect owners and
    /// token names.
    pub fn normalize(&mut self) {
        for actor in &mut self.actors {
            for effect in &mut actor.effects {
                if effect.owner.is_none() {
                    effect.owner = Some(actor.id.clone());
                }
            }
        }
        for token in &mut self.tokens {
            if token.name.is_empty()
                && let Some(actor) = self.actors.iter().find(|a| a.id == token.actor)
            {
                token.name = actor.name.clone();
            }
        }
    }

    /// Add an actor, taking ownership of its effects.
    pub fn add_actor(&mut self, mut actor: ActorSnapshot) {
        for effect in &mut actor.effects {
            effect.owner = Some(actor.id.clone());
        }
        self.actors.push(actor);
    }

    /// Add a token.
    pub fn add_token(&mut self, token: TokenSnapshot) {
        self.tokens.push(token);
    }

    /// Look up an actor.
    pub fn actor(&self, id: &ActorId) -> CoreResult<&ActorSnapshot> {
        self.actors
            .iter()
            .find(|a| &a.id == id)
            .ok_or_else(|| CoreError::ActorNotFound(id.clone()))
    }

    /// Look up a token.
    pub fn token(&self, id: &TokenId) -> CoreResult<&TokenSnapshot> {
        self.tokens
            .iter()
            .find(|t| &t.id == id)
            .ok_or_else(|| CoreError::TokenNotFound(id.clone()))
    }

    /// First token representing the actor.
    pub fn token_of(&self, actor: &ActorId) -> Option<&TokenSnapshot> {
        self.tokens.iter().find(|t| &t.actor == actor)
    }

    /// Resolve a token by id, token name or actor name (case-insensitive).
    pub fn find_token(&self, key: &str) -> CoreResult<&TokenSnapshot> {
        self.tokens
            .iter()
            .find(|t| t.id.as_str() == key)
            .or_else(|| self.tokens.iter().find(|t| t.name.eq_ignore_ascii_case(key)))
            .or_else(|| {
                self.actors
                    .iter()
                    .find(|a| a.name.eq_ignore_ascii_case(key) || a.id.as_str() == key)
                    .and_then(|a| self.token_of(&a.id))
            })
            .ok_or_else(|| CoreError::UnknownParticipant(key.to_string()))
    }

    /// Tokens paired with their actors; tokens without an actor are skipped.
    pub fn placed_actors(&self) -> impl Iterator<Item = (&TokenSnapshot, &ActorSnapshot)> {
        self.tokens.iter().filter_map(|t| {
            self.actors
                .iter()
                .find(|a| a.id == t.actor)
                .map(|a| (t, a))
        })
    }
}
