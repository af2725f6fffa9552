//! Context sandbox builder.
//!
//! Collects every situational fact a rule condition may read into one
//! immutable [`EvaluationContext`]: both actors' projections, the roll
//! profile, combat state, distance and sight, and the prior d20 result.

use std::collections::BTreeSet;

use ac_core::{
    ActorSnapshot, Battlefield, CombatState, Geometry, HookType, PriorD20, RollProfile,
    TokenId, TokenSnapshot, Value,
};
use ac_expr::Bindings;
use ac_expr::context::ROLLING_ACTOR;
use serde::{Deserialize, Serialize};

use crate::error::RuleResult;

/// Prefix of the opponent actor's projection.
pub const OPPONENT_ACTOR: &str = "opponentActor";
/// Prefix of an aura source's projection while its rules are evaluated.
pub const AURA_ACTOR: &str = "auraActor";

/// Bare words that name context bindings and may be written as a whole
/// condition fragment without a warning.
pub const CONTEXT_KEYWORDS: &[&str] = &[
    "isSpell",
    "isCantrip",
    "mwak",
    "rwak",
    "msak",
    "rsak",
    "save",
    "heal",
    "inCombat",
    "isTurn",
    "isOpponentTurn",
    "canSee",
    "canBeSeen",
    "singleTarget",
    "hasOpponent",
    "isCritical",
    "isFumble",
    "isConcentration",
    "isDeathSave",
    "isAttack",
    "isDamage",
    "isSave",
    "isCheck",
    "isUse",
    "isInit",
    "oneHanded",
    "twoHanded",
    "offhand",
    "thrown",
];

/// A pending roll as handed over by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollRequest {
    /// Kind of roll.
    pub hook: HookType,
    /// Token of the rolling actor.
    pub subject: TokenId,
    /// Token on the other side of the roll.
    #[serde(default)]
    pub opponent: Option<TokenId>,
    /// All targeted tokens; defaults to the opponent.
    #[serde(default)]
    pub targets: Vec<TokenId>,
    /// Roll facts.
    #[serde(default)]
    pub profile: RollProfile,
    /// Current AC or DC per target.
    #[serde(default)]
    pub target_values: Vec<i64>,
    /// Earlier d20 in the same workflow.
    #[serde(default)]
    pub prior_d20: Option<PriorD20>,
    /// Base formula parts of the roll.
    #[serde(default)]
    pub base_parts: Vec<String>,
    /// Opt-in rule ids the player selected.
    #[serde(default)]
    pub selected_opt_ins: BTreeSet<String>,
    /// Host roll mode (public, private, blind...).
    #[serde(default)]
    pub roll_mode: Option<String>,
    /// Advantage button the player clicked, if any.
    #[serde(default)]
    pub advantage_button: Option<String>,
}

impl RollRequest {
    /// A request with no opponent and an empty profile.
    pub fn new(hook: HookType, subject: impl Into<TokenId>) -> Self {
        Self {
            hook,
            subject: subject.into(),
            opponent: None,
            targets: Vec::new(),
            profile: RollProfile::default(),
            target_values: Vec::new(),
            prior_d20: None,
            base_parts: Vec::new(),
            selected_opt_ins: BTreeSet::new(),
            roll_mode: None,
            advantage_button: None,
        }
    }

    /// Set the opponent (builder style); it also becomes the only target.
    pub fn against(mut self, opponent: impl Into<TokenId>) -> Self {
        let opponent = opponent.into();
        if self.targets.is_empty() {
            self.targets.push(opponent.clone());
        }
        self.opponent = Some(opponent);
        self
    }

    /// Set the roll profile (builder style).
    pub fn with_profile(mut self, profile: RollProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Set the target values (builder style).
    pub fn with_target_values(mut self, values: Vec<i64>) -> Self {
        self.target_values = values;
        self
    }

    /// Select an opt-in rule (builder style).
    pub fn select(mut self, rule_id: impl Into<String>) -> Self {
        self.selected_opt_ins.insert(rule_id.into());
        self
    }
}

/// A token together with the actor it represents.
#[derive(Debug, Clone)]
pub struct Participant {
    /// The token on the scene.
    pub token: TokenSnapshot,
    /// The actor behind it.
    pub actor: ActorSnapshot,
}

/// Immutable snapshot of everything one roll attempt may condition on.
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    /// The request this context was built from.
    pub request: RollRequest,
    /// The rolling side.
    pub subject: Participant,
    /// The other side, if any.
    pub opponent: Option<Participant>,
    /// Running combat, if started.
    pub combat: Option<CombatState>,
    /// Distance between subject and opponent.
    pub distance: Option<f64>,
    /// Flat bindings for expression evaluation.
    pub bindings: Bindings,
}

impl EvaluationContext {
    /// Kind of roll.
    pub fn hook(&self) -> HookType {
        self.request.hook
    }

    /// Roll facts.
    pub fn profile(&self) -> &RollProfile {
        &self.request.profile
    }

    /// Targeted tokens (the opponent when none were listed).
    pub fn targets(&self) -> Vec<TokenId> {
        if self.request.targets.is_empty() {
            self.opponent.iter().map(|o| o.token.id.clone()).collect()
        } else {
            self.request.targets.clone()
        }
    }

    /// Bindings extended with an aura source's projection and distance.
    pub fn bindings_with_aura(&self, source: &ActorSnapshot, distance: f64) -> Bindings {
        let mut bindings = self.bindings.clone();
        bindings.extend_prefixed(AURA_ACTOR, source.projection());
        bindings.insert("auraDistance", distance);
        bindings
    }
}

fn participant(battlefield: &Battlefield, token: &TokenId) -> RuleResult<Participant> {
    let token = battlefield.token(token)?.clone();
    let actor = battlefield.actor(&token.actor)?.clone();
    Ok(Participant { token, actor })
}

fn flag(bindings: &mut Bindings, key: Option<&str>) {
    if let Some(key) = key
        && !key.is_empty()
    {
        bindings.insert(key, true);
    }
}

/// Build the evaluation context for a pending roll.
pub fn build_context(
    battlefield: &Battlefield,
    geometry: &dyn Geometry,
    request: &RollRequest,
) -> RuleResult<EvaluationContext> {
    let subject = participant(battlefield, &request.subject)?;
    let opponent = request
        .opponent
        .as_ref()
        .map(|id| participant(battlefield, id))
        .transpose()?;
    let combat = battlefield.combat.clone().filter(CombatState::is_started);
    let profile = &request.profile;

    let mut b = Bindings::new();
    b.extend_prefixed(ROLLING_ACTOR, subject.actor.projection());
    b.insert("rollingActor.tokenId", subject.token.id.as_str());
    b.insert(
        "rollingActor.disposition",
        format!("{:?}", subject.token.disposition).to_lowercase(),
    );

    let mut distance = None;
    if let Some(opp) = &opponent {
        b.extend_prefixed(OPPONENT_ACTOR, opp.actor.projection());
        b.insert("opponentActor.tokenId", opp.token.id.as_str());
        b.insert(
            "opponentActor.disposition",
            format!("{:?}", opp.token.disposition).to_lowercase(),
        );
        let d = geometry.distance(&subject.token, &opp.token);
        distance = Some(d);
        b.insert("distance", d);
        b.insert("canSee", geometry.can_see(&subject.token, &opp.token));
        b.insert("canBeSeen", geometry.can_see(&opp.token, &subject.token));
        b.insert(
            "isAlly",
            subject.token.disposition.is_ally_of(opp.token.disposition),
        );
        b.insert(
            "isEnemy",
            subject.token.disposition.is_enemy_of(opp.token.disposition),
        );
    }
    b.insert("hasOpponent", opponent.is_some());

    let hook = request.hook;
    b.insert("hookType", hook.to_string());
    for (key, h) in [
        ("isAttack", HookType::Attack),
        ("isDamage", HookType::Damage),
        ("isSave", HookType::Save),
        ("isCheck", HookType::Check),
        ("isUse", HookType::Use),
        ("isInit", HookType::Init),
    ] {
        b.insert(key, hook == h);
    }

    b.insert("inCombat", combat.is_some());
    if let Some(c) = &combat {
        b.insert("combat.round", c.round);
        b.insert("combat.turn", c.turn as i64);
        b.insert("isTurn", c.is_turn_of(&subject.actor.id));
        b.insert(
            "isOpponentTurn",
            opponent
                .as_ref()
                .is_some_and(|o| c.is_turn_of(&o.actor.id)),
        );
    } else {
        b.insert("isTurn", false);
        b.insert("isOpponentTurn", false);
    }

    b.insert("ability", Value::from(profile.ability.clone()));
    b.insert("skill", Value::from(profile.skill.clone()));
    b.insert("tool", Value::from(profile.tool.clone()));
    b.insert("attackMode", Value::from(profile.attack_mode.clone()));
    b.insert("actionType", Value::from(profile.action_type.clone()));
    flag(&mut b, profile.action_type.as_deref());
    flag(&mut b, profile.attack_mode.as_deref());
    if let Some(ability) = &profile.ability {
        b.insert(format!("abilities.{ability}"), true);
    }
    if let Some(skill) = &profile.skill {
        b.insert(format!("skills.{skill}"), true);
    }
    if let Some(tool) = &profile.tool {
        b.insert(format!("tools.{tool}"), true);
    }

    b.insert("isSpell", profile.is_spell());
    b.insert("isCantrip", profile.spell_level == Some(0));
    b.insert("spellLevel", Value::from(profile.spell_level));
    b.insert(
        "castingLevel",
        Value::from(profile.casting_level.or(profile.spell_level)),
    );
    b.insert("isConcentration", profile.concentration);
    b.insert("isDeathSave", profile.death_save);
    b.insert("damageTypes", Value::from(profile.damage_types.clone()));
    for damage_type in &profile.damage_types {
        b.insert(damage_type.to_lowercase(), true);
    }

    if let Some(uuid) = &profile.item {
        b.insert("item.uuid", uuid.as_str());
        if let Some(item) = subject.actor.find_item(uuid.as_str()) {
            b.insert("item.name", item.name.as_str());
            b.insert("item.type", item.kind.as_str());
            b.insert("item.equipped", item.equipped);
            b.insert(
                "item.properties",
                Value::from(item.properties.iter().cloned().collect::<Vec<_>>()),
            );
            for property in &item.properties {
                b.insert(format!("item.properties.{property}"), true);
            }
        }
    }
    b.insert("activity", Value::from(profile.activity.clone()));

    let prior = request.prior_d20.unwrap_or_default();
    if let Some(prior) = request.prior_d20 {
        b.insert("attackRollTotal", prior.total);
        b.insert("attackRollD20", prior.natural);
    }
    b.insert("isCritical", prior.is_critical);
    b.insert("isFumble", prior.is_fumble);

    let target_count = if request.targets.is_empty() {
        usize::from(opponent.is_some())
    } else {
        request.targets.len()
    };
    b.insert("targetCount", target_count as i64);
    b.insert("singleTarget", target_count == 1);

    Ok(EvaluationContext {
        request: request.clone(),
        subject,
        opponent,
        combat,
        distance,
        bindings: b,
    })
}
