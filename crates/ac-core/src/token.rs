use serde::{Deserialize, Serialize};

use crate::id::{ActorId, TokenId};

/// How a token relates to the players.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    /// Hidden from players entirely.
    Secret,
    /// Hostile to the players.
    Hostile,
    /// Neither side.
    #[default]
    Neutral,
    /// Friendly to the players.
    Friendly,
}

impl Disposition {
    /// Tokens of the same disposition are allies.
    pub fn is_ally_of(self, other: Disposition) -> bool {
        self == other
    }

    /// Tokens of different dispositions are enemies.
    pub fn is_enemy_of(self, other: Disposition) -> bool {
        self != other
    }
}

/// A token placed on the scene.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSnapshot {
    /// Token identifier.
    pub id: TokenId,
    /// Actor represented by the token.
    pub actor: ActorId,
    /// Display name (defaults to the actor's name on load).
    #[serde(default)]
    pub name: String,
    /// Disposition towards the players.
    #[serde(default)]
    pub disposition: Disposition,
    /// Horizontal position in scene units (feet).
    #[serde(default)]
    pub x: f64,
    /// Vertical position in scene units (feet).
    #[serde(default)]
    pub y: f64,
    /// Elevation in scene units (feet).
    #[serde(default)]
    pub elevation: f64,
}

impl TokenSnapshot {
    /// Create a token at the given position.
    pub fn new(
        id: impl Into<TokenId>,
        actor: impl Into<ActorId>,
        disposition: Disposition,
        x: f64,
        y: f64,
    ) -> Self {
        Self {
            id: id.into(),
            actor: actor.into(),
            name: String::new(),
            disposition,
            x,
            y,
            elevation: 0.0,
        }
    }
}
