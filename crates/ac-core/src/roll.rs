use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::DocumentUuid;

/// Damage types the rule grammar recognizes as bare keywords.
pub const DAMAGE_TYPES: &[&str] = &[
    "acid",
    "bludgeoning",
    "cold",
    "fire",
    "force",
    "lightning",
    "necrotic",
    "piercing",
    "poison",
    "psychic",
    "radiant",
    "slashing",
    "thunder",
    "healing",
    "temphp",
];

/// Returns true if `name` is a recognized damage type.
pub fn is_damage_type(name: &str) -> bool {
    DAMAGE_TYPES.iter().any(|t| t.eq_ignore_ascii_case(name))
}

/// The kind of pending roll a rule can hook into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookType {
    /// Attack roll.
    Attack,
    /// Damage roll.
    Damage,
    /// Saving throw.
    Save,
    /// Ability, skill or tool check.
    Check,
    /// Activity use (no d20).
    Use,
    /// Initiative roll.
    Init,
}

impl HookType {
    /// All hook types, in declaration order.
    pub const ALL: [HookType; 6] = [
        Self::Attack,
        Self::Damage,
        Self::Save,
        Self::Check,
        Self::Use,
        Self::Init,
    ];

    /// Parse a hook name (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "attack" => Some(Self::Attack),
            "damage" => Some(Self::Damage),
            "save" => Some(Self::Save),
            "check" => Some(Self::Check),
            "use" => Some(Self::Use),
            "init" | "initiative" => Some(Self::Init),
            _ => None,
        }
    }

    /// Returns true if the roll uses a d20.
    pub fn is_d20(self) -> bool {
        !matches!(self, Self::Damage | Self::Use)
    }
}

impl fmt::Display for HookType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Attack => "attack",
            Self::Damage => "damage",
            Self::Save => "save",
            Self::Check => "check",
            Self::Use => "use",
            Self::Init => "init",
        };
        f.write_str(s)
    }
}

/// Facts about the pending roll that rules can condition on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollProfile {
    /// Ability used (`str`, `dex`, ...).
    #[serde(default)]
    pub ability: Option<String>,
    /// Skill used, for checks.
    #[serde(default)]
    pub skill: Option<String>,
    /// Tool used, for checks.
    #[serde(default)]
    pub tool: Option<String>,
    /// Attack mode (`oneHanded`, `twoHanded`, `thrown`, `offhand`...).
    #[serde(default)]
    pub attack_mode: Option<String>,
    /// Action type (`mwak`, `rwak`, `msak`, `rsak`, `save`, `heal`...).
    #[serde(default)]
    pub action_type: Option<String>,
    /// Damage types of the roll.
    #[serde(default)]
    pub damage_types: Vec<String>,
    /// Spell level, when the item is a spell (0 = cantrip).
    #[serde(default)]
    pub spell_level: Option<u32>,
    /// Level the spell is being cast at.
    #[serde(default)]
    pub casting_level: Option<u32>,
    /// Concentration saving throw.
    #[serde(default)]
    pub concentration: bool,
    /// Death saving throw.
    #[serde(default)]
    pub death_save: bool,
    /// Item being used.
    #[serde(default)]
    pub item: Option<DocumentUuid>,
    /// Activity being used (name or id).
    #[serde(default)]
    pub activity: Option<String>,
}

impl RollProfile {
    /// Returns true if the roll comes from a spell.
    pub fn is_spell(&self) -> bool {
        self.spell_level.is_some()
            || matches!(self.action_type.as_deref(), Some("msak" | "rsak"))
    }

    /// Returns true if any of the given damage types is part of this roll.
    pub fn has_any_damage_type(&self, types: &[String]) -> bool {
        types
            .iter()
            .any(|t| self.damage_types.iter().any(|d| d.eq_ignore_ascii_case(t)))
    }
}

/// The d20 outcome of a previous roll in the same workflow, available when
/// evaluating damage after an attack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorD20 {
    /// Total of the roll.
    pub total: i64,
    /// Natural d20 result.
    pub natural: u32,
    /// Whether the roll was a critical.
    #[serde(default)]
    pub is_critical: bool,
    /// Whether the roll was a fumble.
    #[serde(default)]
    pub is_fumble: bool,
}
