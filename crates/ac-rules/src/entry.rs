//! The parsed form of one rule string.

use std::fmt;

use ac_core::{ActorId, DocumentUuid, HookType, RollProfile};
use ac_expr::{Bindings, CompiledExpr};
use serde::{Deserialize, Serialize};

/// Where a rule applies relative to the actor that carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Scope {
    /// The carrier's own rolls.
    Source,
    /// Rolls made against the carrier.
    Grants,
    /// Rolls made by tokens within the carrier's radius.
    Aura,
    /// Rolls made against tokens within the carrier's radius.
    AuraGrants,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Source => "source",
            Self::Grants => "grants",
            Self::Aura => "aura",
            Self::AuraGrants => "aura.grants",
        })
    }
}

/// The hook segment of a rule key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HookFilter {
    /// One hook type.
    Hook(HookType),
    /// Every hook.
    All,
    /// Skill checks.
    Skill,
    /// Tool checks.
    Tool,
    /// Concentration saves.
    Concentration,
    /// Death saves.
    DeathSave,
}

impl HookFilter {
    /// Parse a hook segment (case-insensitive).
    pub fn parse(segment: &str) -> Option<Self> {
        if let Some(hook) = HookType::parse(segment) {
            return Some(Self::Hook(hook));
        }
        match segment.to_ascii_lowercase().as_str() {
            "all" => Some(Self::All),
            "skill" | "skills" => Some(Self::Skill),
            "tool" | "tools" => Some(Self::Tool),
            "conc" | "concentration" => Some(Self::Concentration),
            "death" | "deathsave" => Some(Self::DeathSave),
            _ => None,
        }
    }

    /// Returns true if a rule with this filter applies to the roll.
    pub fn matches(self, hook: HookType, profile: &RollProfile) -> bool {
        match self {
            Self::Hook(h) => h == hook,
            Self::All => true,
            Self::Skill => hook == HookType::Check && profile.skill.is_some(),
            Self::Tool => hook == HookType::Check && profile.tool.is_some(),
            Self::Concentration => hook == HookType::Save && profile.concentration,
            Self::DeathSave => hook == HookType::Save && profile.death_save,
        }
    }
}

impl fmt::Display for HookFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hook(h) => write!(f, "{h}"),
            Self::All => f.write_str("all"),
            Self::Skill => f.write_str("skill"),
            Self::Tool => f.write_str("tool"),
            Self::Concentration => f.write_str("conc"),
            Self::DeathSave => f.write_str("death"),
        }
    }
}

/// What a rule does when it fires; one outcome bucket per mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Mode {
    /// Roll with advantage.
    Advantage,
    /// Roll with disadvantage.
    Disadvantage,
    /// Ignore advantage sources.
    NoAdvantage,
    /// Ignore disadvantage sources.
    NoDisadvantage,
    /// Advantage that overrides every other advantage source.
    ForceAdvantage,
    /// Disadvantage that overrides every other advantage source.
    ForceDisadvantage,
    /// Force a critical.
    Critical,
    /// Prevent a critical.
    NoCritical,
    /// Force a fumble.
    Fumble,
    /// Force failure.
    Fail,
    /// Force success.
    Success,
    /// Add a formula part.
    Bonus,
    /// Add a d20 modifier (`min10`, `r1`...).
    Modifier,
    /// Change the target's armor class.
    ModifyAc,
    /// Change the save or check DC.
    ModifyDc,
    /// Change the critical threshold.
    CriticalThreshold,
    /// Change the fumble threshold.
    FumbleThreshold,
    /// Add dice to every damage term.
    ExtraDice,
    /// Step damage dice up.
    DiceUpgrade,
    /// Step damage dice down.
    DiceDowngrade,
    /// Change weapon range and range penalties.
    Range,
}

impl Mode {
    /// Every mode, in bucket order.
    pub const ALL: [Mode; 21] = [
        Self::Advantage,
        Self::Disadvantage,
        Self::NoAdvantage,
        Self::NoDisadvantage,
        Self::ForceAdvantage,
        Self::ForceDisadvantage,
        Self::Critical,
        Self::NoCritical,
        Self::Fumble,
        Self::Fail,
        Self::Success,
        Self::Bonus,
        Self::Modifier,
        Self::ModifyAc,
        Self::ModifyDc,
        Self::CriticalThreshold,
        Self::FumbleThreshold,
        Self::ExtraDice,
        Self::DiceUpgrade,
        Self::DiceDowngrade,
        Self::Range,
    ];

    /// Parse a mode segment (case-insensitive, with aliases).
    pub fn parse(segment: &str) -> Option<Self> {
        let mode = match segment.to_ascii_lowercase().as_str() {
            "advantage" => Self::Advantage,
            "disadvantage" => Self::Disadvantage,
            "noadvantage" => Self::NoAdvantage,
            "nodisadvantage" => Self::NoDisadvantage,
            "forceadvantage" | "forcedadvantage" => Self::ForceAdvantage,
            "forcedisadvantage" | "forceddisadvantage" => Self::ForceDisadvantage,
            "critical" => Self::Critical,
            "nocritical" => Self::NoCritical,
            "fumble" => Self::Fumble,
            "fail" => Self::Fail,
            "success" => Self::Success,
            "bonus" => Self::Bonus,
            "modifier" | "modifiers" => Self::Modifier,
            "modifyac" | "targetadc" => Self::ModifyAc,
            "modifydc" => Self::ModifyDc,
            "criticalthreshold" | "critthreshold" => Self::CriticalThreshold,
            "fumblethreshold" => Self::FumbleThreshold,
            "extradice" => Self::ExtraDice,
            "diceupgrade" => Self::DiceUpgrade,
            "dicedowngrade" => Self::DiceDowngrade,
            "range" => Self::Range,
            _ => return None,
        };
        Some(mode)
    }

    /// Canonical camelCase name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Advantage => "advantage",
            Self::Disadvantage => "disadvantage",
            Self::NoAdvantage => "noAdvantage",
            Self::NoDisadvantage => "noDisadvantage",
            Self::ForceAdvantage => "forceAdvantage",
            Self::ForceDisadvantage => "forceDisadvantage",
            Self::Critical => "critical",
            Self::NoCritical => "noCritical",
            Self::Fumble => "fumble",
            Self::Fail => "fail",
            Self::Success => "success",
            Self::Bonus => "bonus",
            Self::Modifier => "modifier",
            Self::ModifyAc => "modifyAC",
            Self::ModifyDc => "modifyDC",
            Self::CriticalThreshold => "criticalThreshold",
            Self::FumbleThreshold => "fumbleThreshold",
            Self::ExtraDice => "extraDice",
            Self::DiceUpgrade => "diceUpgrade",
            Self::DiceDowngrade => "diceDowngrade",
            Self::Range => "range",
        }
    }

    /// Target-value modes stay visible to granted rules on every hook.
    pub fn is_target_modifier(self) -> bool {
        matches!(self, Self::ModifyAc | Self::ModifyDc)
    }

    /// Modes whose rule contributes nothing without a value expression.
    pub fn needs_value(self) -> bool {
        matches!(
            self,
            Self::Bonus
                | Self::ModifyAc
                | Self::ModifyDc
                | Self::CriticalThreshold
                | Self::FumbleThreshold
                | Self::ExtraDice
        )
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A once-per-window limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Cadence {
    /// Once per combat turn (anyone's).
    OncePerTurn,
    /// Once per round, refreshed at the owner's turn.
    OncePerRound,
    /// Once per combat encounter.
    OncePerCombat,
}

impl Cadence {
    /// Parse a cadence name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "onceperturn" | "turn" => Some(Self::OncePerTurn),
            "onceperround" | "round" => Some(Self::OncePerRound),
            "oncepercombat" | "combat" => Some(Self::OncePerCombat),
            _ => None,
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OncePerTurn => "oncePerTurn",
            Self::OncePerRound => "oncePerRound",
            Self::OncePerCombat => "oncePerCombat",
        })
    }
}

/// The counter a `usesCount` rule draws from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "key")]
pub enum ConsumptionTarget {
    /// A counter on the effect itself, starting full at `max`.
    Effect(i64),
    /// An item's limited uses, by item UUID or name.
    Item(String),
    /// An item's stack quantity, by item UUID or name.
    Quantity(String),
    /// A named actor resource.
    Resource(String),
}

/// A `usesCount` descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsesLimit {
    /// Counter to draw from.
    pub target: ConsumptionTarget,
    /// Amount spent per firing.
    pub cost: i64,
}

/// Which parts of a damage roll a bonus joins.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AddTo {
    /// Every damage part.
    #[default]
    All,
    /// Only the base damage part.
    Base,
    /// Only parts of the named damage types.
    Types(Vec<String>),
}

/// One condition fragment. A rule's fragments are OR'd.
#[derive(Debug, Clone)]
pub struct ConditionFragment {
    /// The compiled expression.
    pub expr: CompiledExpr,
    /// Whether the fragment was written with a leading `!`.
    pub negated: bool,
}

impl ConditionFragment {
    /// Evaluate the fragment, failing closed to `false`.
    pub fn holds(&self, bindings: &Bindings) -> bool {
        // A broken expression contributes nothing even when negated.
        match self.expr.try_condition(bindings) {
            Ok(value) => value != self.negated,
            Err(_) => self.expr.condition(bindings),
        }
    }
}

/// A parsed rule.
#[derive(Debug, Clone)]
pub struct RuleEntry {
    /// Stable id: `{effect}:{change index}:{hook}:{scope}`.
    pub id: String,
    /// Display label: the `name=` field or the effect name.
    pub label: String,
    /// Optional description for tooltips.
    pub description: Option<String>,
    /// Actor carrying the effect.
    pub source_actor: ActorId,
    /// Effect carrying the change.
    pub effect: DocumentUuid,
    /// Whether that effect transfers from an item.
    pub effect_transfer: bool,
    /// Origin of the effect (usually an item UUID).
    pub origin: Option<String>,
    /// Index of the change record on the effect.
    pub change_index: usize,
    /// Hook the rule listens on.
    pub hook: HookFilter,
    /// Where the rule applies.
    pub scope: Scope,
    /// What it does.
    pub mode: Mode,
    /// OR'd condition fragments; empty means always.
    pub conditions: Vec<ConditionFragment>,
    /// `bonus=` value.
    pub bonus: Option<CompiledExpr>,
    /// `set=` value.
    pub set: Option<CompiledExpr>,
    /// `modifier=` d20 modifiers, validated.
    pub modifiers: Vec<String>,
    /// `threshold=` value.
    pub threshold: Option<CompiledExpr>,
    /// `chance=` percentage.
    pub chance: Option<CompiledExpr>,
    /// `radius=` for auras.
    pub radius: Option<CompiledExpr>,
    /// `short=` range delta.
    pub short: Option<CompiledExpr>,
    /// `long=` range delta.
    pub long: Option<CompiledExpr>,
    /// Ordering among rules; higher first.
    pub priority: i32,
    /// Requires explicit selection.
    pub opt_in: bool,
    /// Single shot: disables or deletes the effect once it fires.
    pub once: bool,
    /// Only applies to rolls made with the effect's origin item.
    pub item_limited: bool,
    /// Aura also applies to its own source token.
    pub include_self: bool,
    /// Aura needs line of sight.
    pub walls_block: bool,
    /// Only the strongest aura with this label applies.
    pub single_aura: bool,
    /// Aura applies to allies of its source only.
    pub allies: bool,
    /// Aura applies to enemies of its source only.
    pub enemies: bool,
    /// Range rule removes long-range disadvantage.
    pub no_long_disadvantage: bool,
    /// Range rule removes nearby-foe disadvantage.
    pub no_nearby_foe_disadvantage: bool,
    /// Once-per-window limit.
    pub cadence: Option<Cadence>,
    /// Limited uses.
    pub uses: Option<UsesLimit>,
    /// Damage types the roll must include.
    pub required_damage_types: Vec<String>,
    /// Damage part routing for bonuses.
    pub add_to: AddTo,
    /// Authoring problems found while parsing.
    pub warnings: Vec<String>,
}

impl RuleEntry {
    /// Build the stable rule id.
    pub fn make_id(effect: &DocumentUuid, change_index: usize, hook: HookFilter, scope: Scope) -> String {
        format!("{effect}:{change_index}:{hook}:{scope}")
    }

    /// Returns true if any condition fragment holds (or there are none).
    pub fn condition_holds(&self, bindings: &Bindings) -> bool {
        self.conditions.is_empty() || self.conditions.iter().any(|c| c.holds(bindings))
    }

    /// Returns true if the rule needs the gate before it may fire.
    pub fn is_gated(&self) -> bool {
        self.once || self.cadence.is_some() || self.uses.is_some()
    }
}
