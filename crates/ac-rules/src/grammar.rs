//! The rule-string grammar.
//!
//! Keys: `[flags.]<namespace>.[grants.|aura.|aura.grants.]<hook>.<mode>`,
//! where the namespace is `ac5e` or the configured module id.
//!
//! Values: `;`-separated fragments. Bare flags (`optin`, `once`, ...),
//! `key=value` / `key:value` fields, damage-type names, and everything
//! else is a condition fragment. Condition fragments are OR'd.

use std::collections::BTreeMap;

use ac_core::{Effect, is_damage_type};
use ac_expr::CompiledExpr;
use tracing::warn;

use crate::context::CONTEXT_KEYWORDS;
use crate::entry::{
    AddTo, Cadence, ConditionFragment, ConsumptionTarget, HookFilter, Mode, RuleEntry, Scope,
    UsesLimit,
};
use crate::error::{RuleError, RuleResult};

/// Namespace every installation understands.
pub const BASE_NAMESPACE: &str = "ac5e";

/// Named fields accepted in a rule value.
pub const FIELDS: &[&str] = &[
    "bonus",
    "set",
    "modifier",
    "threshold",
    "chance",
    "radius",
    "usesCount",
    "name",
    "description",
    "addTo",
    "priority",
    "condition",
    "cadence",
    "short",
    "long",
];

/// The scope, hook and mode encoded in a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedKey {
    /// Rule scope.
    pub scope: Scope,
    /// Hook filter.
    pub hook: HookFilter,
    /// Outcome mode.
    pub mode: Mode,
}

/// Key and value grammar for one installation.
#[derive(Debug, Clone)]
pub struct Grammar {
    module_id: String,
    keywords: BTreeMap<String, String>,
}

impl Default for Grammar {
    fn default() -> Self {
        Self::new("automated-conditions-5e")
    }
}

/// One `;` fragment of a rule value after classification.
#[derive(Debug, Clone, PartialEq)]
enum Fragment {
    Flag(String),
    /// `hook.mode` restating the key; carries no meaning.
    KeyEcho,
    Field(String, String),
    DamageType(String),
    Condition { source: String, negated: bool },
}

impl Grammar {
    /// Grammar accepting `ac5e` and `module_id` namespaces.
    pub fn new(module_id: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            keywords: BTreeMap::new(),
        }
    }

    /// Register a context keyword that expands to `expression`.
    pub fn register_keyword(&mut self, keyword: impl Into<String>, expression: impl Into<String>) {
        self.keywords.insert(keyword.into(), expression.into());
    }

    /// Register several keywords at once (builder style).
    pub fn with_keywords(mut self, keywords: &BTreeMap<String, String>) -> Self {
        for (k, v) in keywords {
            self.register_keyword(k.clone(), v.clone());
        }
        self
    }

    /// The configured module id.
    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// Parse a change key. `Ok(None)` means the key belongs to someone else.
    pub fn parse_key(&self, key: &str) -> RuleResult<Option<ParsedKey>> {
        let trimmed = key.trim();
        let body = trimmed.strip_prefix("flags.").unwrap_or(trimmed);
        let mut segments: Vec<&str> = body.split('.').collect();
        if segments.is_empty() {
            return Ok(None);
        }
        let namespace = segments.remove(0);
        if namespace != BASE_NAMESPACE && namespace != self.module_id {
            return Ok(None);
        }

        let scope = match segments.as_slice() {
            ["aura", "grants", _, _] => Scope::AuraGrants,
            ["grants", _, _] => Scope::Grants,
            ["aura", _, _] => Scope::Aura,
            [_, _] => Scope::Source,
            _ => return Err(RuleError::MalformedKey(key.to_string())),
        };
        let n = segments.len();
        let (hook_segment, mode_segment) = (segments[n - 2], segments[n - 1]);
        let hook = HookFilter::parse(hook_segment).ok_or_else(|| RuleError::UnknownHook {
            key: key.to_string(),
            hook: hook_segment.to_string(),
        })?;
        let mode = Mode::parse(mode_segment).ok_or_else(|| RuleError::UnknownMode {
            key: key.to_string(),
            mode: mode_segment.to_string(),
        })?;
        Ok(Some(ParsedKey { scope, hook, mode }))
    }

    fn classify(&self, raw: &str) -> Fragment {
        let fragment = raw.trim();
        if let Some(rest) = fragment.strip_prefix('!')
            && !rest.starts_with('=')
        {
            return Fragment::Condition {
                source: self.expand(rest.trim()),
                negated: true,
            };
        }
        if is_bare_flag(fragment) {
            return Fragment::Flag(fragment.to_ascii_lowercase());
        }
        if let Some(flag) = disposition_word(fragment) {
            return Fragment::Flag(flag.to_string());
        }
        if let Some((field, value)) = split_field(fragment) {
            return Fragment::Field(field, value);
        }
        if is_damage_type(fragment) {
            return Fragment::DamageType(fragment.to_ascii_lowercase());
        }
        if let Some((hook, mode)) = fragment.split_once('.')
            && HookFilter::parse(hook).is_some()
            && Mode::parse(mode).is_some()
        {
            return Fragment::KeyEcho;
        }
        Fragment::Condition {
            source: self.expand(fragment),
            negated: false,
        }
    }

    fn expand(&self, fragment: &str) -> String {
        match self.keywords.get(fragment) {
            Some(expression) => format!("({expression})"),
            None => fragment.to_string(),
        }
    }

    fn is_known_word(&self, word: &str) -> bool {
        self.keywords.contains_key(word)
            || CONTEXT_KEYWORDS.contains(&word)
            || is_damage_type(word)
            || matches!(word, "true" | "false")
    }

    /// Parse one change record into a rule. `Ok(None)` when the key is not
    /// ours.
    pub fn parse_change(
        &self,
        effect: &Effect,
        change_index: usize,
    ) -> RuleResult<Option<RuleEntry>> {
        let Some(change) = effect.changes.get(change_index) else {
            return Ok(None);
        };
        let Some(key) = self.parse_key(&change.key)? else {
            return Ok(None);
        };
        let source_actor = effect
            .owner
            .clone()
            .ok_or_else(|| RuleError::field("owner", format!("effect {} has no owner", effect.uuid)))?;

        let mut entry = RuleEntry {
            id: RuleEntry::make_id(&effect.uuid, change_index, key.hook, key.scope),
            label: effect.name.clone(),
            description: None,
            source_actor,
            effect: effect.uuid.clone(),
            effect_transfer: effect.transfer,
            origin: effect.origin.clone(),
            change_index,
            hook: key.hook,
            scope: key.scope,
            mode: key.mode,
            conditions: Vec::new(),
            bonus: None,
            set: None,
            modifiers: Vec::new(),
            threshold: None,
            chance: None,
            radius: None,
            short: None,
            long: None,
            priority: 0,
            opt_in: false,
            once: false,
            item_limited: false,
            include_self: false,
            walls_block: false,
            single_aura: false,
            allies: false,
            enemies: false,
            no_long_disadvantage: false,
            no_nearby_foe_disadvantage: false,
            cadence: None,
            uses: None,
            required_damage_types: Vec::new(),
            add_to: AddTo::All,
            warnings: Vec::new(),
        };

        for raw in change.value.split(';') {
            if raw.trim().is_empty() {
                continue;
            }
            match self.classify(raw) {
                Fragment::Flag(flag) => apply_flag(&mut entry, &flag),
                Fragment::KeyEcho => {}
                Fragment::Field(field, value) => apply_field(&mut entry, &field, &value)?,
                Fragment::DamageType(t) => entry.required_damage_types.push(t),
                Fragment::Condition { source, negated } => {
                    let is_word = source
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_');
                    if is_word && !self.is_known_word(&source) {
                        let message = format!("unknown keyword `{source}` treated as a condition");
                        warn!(rule = %entry.id, keyword = %source, "unknown keyword in rule value");
                        entry.warnings.push(message);
                    }
                    push_condition(&mut entry, source, negated);
                }
            }
        }

        // Friend/foe filters match anywhere in the raw value.
        let lower = change.value.to_ascii_lowercase();
        entry.allies |= lower.contains("allies");
        entry.enemies |= lower.contains("enemies");

        if matches!(entry.scope, Scope::Aura | Scope::AuraGrants) && entry.radius.is_none() {
            return Err(RuleError::field("radius", "aura rules need a radius"));
        }
        if entry.mode.needs_value() && entry.bonus.is_none() && entry.set.is_none() && entry.threshold.is_none() {
            entry
                .warnings
                .push(format!("{} rule without a value contributes nothing", entry.mode));
        }
        if entry.mode == Mode::Modifier && entry.modifiers.is_empty() {
            entry
                .warnings
                .push("modifier rule without a valid modifier contributes nothing".to_string());
        }
        Ok(Some(entry))
    }
}

fn push_condition(entry: &mut RuleEntry, source: String, negated: bool) {
    let expr = CompiledExpr::new(source);
    if let Some(error) = expr.error() {
        entry
            .warnings
            .push(format!("condition `{}`: {error}", expr.source()));
    }
    entry.conditions.push(ConditionFragment { expr, negated });
}

fn is_bare_flag(fragment: &str) -> bool {
    matches!(
        fragment.to_ascii_lowercase().as_str(),
        "optin"
            | "once"
            | "itemlimited"
            | "includeself"
            | "wallsblock"
            | "singleaura"
            | "allies"
            | "enemies"
            | "onceperturn"
            | "onceperround"
            | "oncepercombat"
            | "nolongdisadvantage"
            | "nonearbyfoedisadvantage"
    )
}

/// A single word naming a friend/foe filter, such as `alliesOnly`.
fn disposition_word(fragment: &str) -> Option<&'static str> {
    if !fragment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    let lower = fragment.to_ascii_lowercase();
    if lower.contains("allies") {
        Some("allies")
    } else if lower.contains("enemies") {
        Some("enemies")
    } else {
        None
    }
}

fn apply_flag(entry: &mut RuleEntry, flag: &str) {
    match flag {
        "optin" => entry.opt_in = true,
        "once" => entry.once = true,
        "itemlimited" => entry.item_limited = true,
        "includeself" => entry.include_self = true,
        "wallsblock" => entry.walls_block = true,
        "singleaura" => entry.single_aura = true,
        "allies" => entry.allies = true,
        "enemies" => entry.enemies = true,
        "nolongdisadvantage" => entry.no_long_disadvantage = true,
        "nonearbyfoedisadvantage" => entry.no_nearby_foe_disadvantage = true,
        other => entry.cadence = Cadence::parse(other),
    }
}

/// Split `key=value` or `key:value` when `key` is a known field.
fn split_field(fragment: &str) -> Option<(String, String)> {
    let key_len = fragment
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(fragment.len());
    if key_len == 0 {
        return None;
    }
    let (key, rest) = fragment.split_at(key_len);
    let rest = rest.trim_start();
    let value = if let Some(v) = rest.strip_prefix('=') {
        if v.starts_with('=') {
            return None;
        }
        v
    } else {
        rest.strip_prefix(':')?
    };
    let field = FIELDS.iter().find(|f| f.eq_ignore_ascii_case(key))?;
    Some((field.to_string(), value.trim().to_string()))
}

fn compile_field(entry: &mut RuleEntry, field: &str, value: &str) -> CompiledExpr {
    let expr = CompiledExpr::new(value);
    if let Some(error) = expr.error() {
        entry.warnings.push(format!("{field} `{value}`: {error}"));
    }
    expr
}

fn apply_field(entry: &mut RuleEntry, field: &str, value: &str) -> RuleResult<()> {
    match field {
        "bonus" => entry.bonus = Some(compile_field(entry, field, value)),
        "set" => entry.set = Some(compile_field(entry, field, value)),
        "threshold" => entry.threshold = Some(compile_field(entry, field, value)),
        "chance" => entry.chance = Some(compile_field(entry, field, value)),
        "radius" => entry.radius = Some(compile_field(entry, field, value)),
        "short" => entry.short = Some(compile_field(entry, field, value)),
        "long" => entry.long = Some(compile_field(entry, field, value)),
        "condition" => push_condition(entry, value.to_string(), false),
        "modifier" => {
            for modifier in value.split([',', ' ']).filter(|m| !m.is_empty()) {
                if is_valid_modifier(modifier) {
                    entry.modifiers.push(modifier.to_string());
                } else {
                    warn!(rule = %entry.id, modifier, "dropping invalid d20 modifier");
                    entry
                        .warnings
                        .push(format!("invalid d20 modifier `{modifier}` dropped"));
                }
            }
        }
        "name" => entry.label = value.to_string(),
        "description" => entry.description = Some(value.to_string()),
        "priority" => match value.parse() {
            Ok(p) => entry.priority = p,
            Err(_) => entry
                .warnings
                .push(format!("priority `{value}` is not an integer")),
        },
        "cadence" => {
            entry.cadence = Some(
                Cadence::parse(value)
                    .ok_or_else(|| RuleError::field("cadence", format!("unknown cadence `{value}`")))?,
            );
        }
        "usesCount" => entry.uses = Some(parse_uses(value)?),
        "addTo" => entry.add_to = parse_add_to(value),
        _ => {}
    }
    Ok(())
}

/// Parse `<target>[,<cost>]`.
pub fn parse_uses(value: &str) -> RuleResult<UsesLimit> {
    let mut parts = value.split(',').map(str::trim);
    let target = parts.next().unwrap_or_default();
    let cost = match parts.next() {
        Some(c) => c
            .parse::<i64>()
            .map_err(|_| RuleError::field("usesCount", format!("cost `{c}` is not an integer")))?,
        None => 1,
    };
    let target = if let Some((kind, key)) = target.split_once(':') {
        let key = key.trim().to_string();
        if key.is_empty() {
            return Err(RuleError::field("usesCount", "missing counter key"));
        }
        match kind.trim().to_ascii_lowercase().as_str() {
            "item" => ConsumptionTarget::Item(key),
            "quantity" => ConsumptionTarget::Quantity(key),
            "resource" => ConsumptionTarget::Resource(key),
            other => {
                return Err(RuleError::field(
                    "usesCount",
                    format!("unknown counter kind `{other}`"),
                ));
            }
        }
    } else {
        let max = target
            .parse::<i64>()
            .map_err(|_| RuleError::field("usesCount", format!("`{target}` is not a count")))?;
        if max <= 0 {
            return Err(RuleError::field("usesCount", "count must be positive"));
        }
        ConsumptionTarget::Effect(max)
    };
    Ok(UsesLimit { target, cost })
}

/// Parse `all`, `base` or a comma-separated damage-type list.
pub fn parse_add_to(value: &str) -> AddTo {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "all" => AddTo::All,
        "base" => AddTo::Base,
        list => AddTo::Types(
            list.split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        ),
    }
}

/// Returns true for `minN`, `maxN`, `rN`, `r<N`, `r<=N`, `xN`.
pub fn is_valid_modifier(modifier: &str) -> bool {
    let digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    if let Some(n) = modifier.strip_prefix("min").or_else(|| modifier.strip_prefix("max")) {
        return digits(n);
    }
    if let Some(rest) = modifier.strip_prefix('r') {
        let n = rest
            .strip_prefix("<=")
            .or_else(|| rest.strip_prefix('<'))
            .unwrap_or(rest);
        return digits(n);
    }
    if let Some(n) = modifier.strip_prefix('x') {
        return digits(n);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use ac_core::{ActorId, HookType};
    use ac_expr::Bindings;

    fn effect(key: &str, value: &str) -> Effect {
        let mut e = Effect::new("Actor.a.ActiveEffect.e1", "Bless").with_change(key, value);
        e.owner = Some(ActorId::new("Actor.a"));
        e
    }

    fn parse(key: &str, value: &str) -> RuleEntry {
        Grammar::default()
            .parse_change(&effect(key, value), 0)
            .expect("parses")
            .expect("is ours")
    }

    #[test]
    fn key_grammar() {
        let g = Grammar::new("my-module");
        let k = g.parse_key("flags.ac5e.attack.advantage").unwrap().unwrap();
        assert_eq!(k.scope, Scope::Source);
        assert_eq!(k.hook, HookFilter::Hook(HookType::Attack));
        assert_eq!(k.mode, Mode::Advantage);

        let k = g.parse_key("my-module.grants.save.disadvantage").unwrap().unwrap();
        assert_eq!(k.scope, Scope::Grants);

        let k = g.parse_key("ac5e.aura.grants.all.modifyAC").unwrap().unwrap();
        assert_eq!(k.scope, Scope::AuraGrants);
        assert_eq!(k.hook, HookFilter::All);
        assert_eq!(k.mode, Mode::ModifyAc);

        assert!(g.parse_key("flags.dnd5e.something").unwrap().is_none());
        assert!(g.parse_key("system.attributes.ac.bonus").unwrap().is_none());
        assert!(matches!(
            g.parse_key("ac5e.attack.sparkle"),
            Err(RuleError::UnknownMode { .. })
        ));
        assert!(matches!(
            g.parse_key("ac5e.sneeze.advantage"),
            Err(RuleError::UnknownHook { .. })
        ));
        assert!(matches!(
            g.parse_key("ac5e.advantage"),
            Err(RuleError::MalformedKey(_))
        ));
    }

    #[test]
    fn value_flags_and_fields() {
        let e = parse(
            "flags.ac5e.damage.bonus",
            "bonus=1d4; optin; once; priority=3; addTo=fire,cold; name:Hex; usesCount=3,1",
        );
        assert!(e.bonus.is_some());
        assert!(e.opt_in && e.once);
        assert_eq!(e.priority, 3);
        assert_eq!(e.label, "Hex");
        assert_eq!(
            e.add_to,
            AddTo::Types(vec!["fire".to_string(), "cold".to_string()])
        );
        assert_eq!(
            e.uses,
            Some(UsesLimit {
                target: ConsumptionTarget::Effect(3),
                cost: 1
            })
        );
        assert!(e.conditions.is_empty());
        assert!(e.warnings.is_empty(), "{:?}", e.warnings);
    }

    #[test]
    fn bare_damage_type_and_keyword() {
        // A fragment restating the key is not a condition.
        let e = parse("flags.ac5e.damage.bonus", "damage.bonus; bonus=1d4");
        assert!(e.conditions.is_empty());
        assert!(e.bonus.is_some());

        let e = parse("flags.ac5e.damage.bonus", "fire; bonus=2");
        assert_eq!(e.required_damage_types, vec!["fire".to_string()]);
        assert!(e.conditions.is_empty());

        let e = parse("flags.ac5e.attack.advantage", "isSpell");
        assert!(e.warnings.is_empty());
        let e = parse("flags.ac5e.attack.advantage", "isSpel");
        assert_eq!(e.warnings.len(), 1);
    }

    #[test]
    fn conditions_are_ored_and_negated_individually() {
        let e = parse(
            "flags.ac5e.attack.advantage",
            "rollingActor.hp.pct < 50; !isSpell",
        );
        assert_eq!(e.conditions.len(), 2);
        let mut b = Bindings::new();
        b.insert("rollingActor.hp.pct", 80);
        b.insert("isSpell", true);
        assert!(!e.condition_holds(&b));
        b.insert("isSpell", false);
        assert!(e.condition_holds(&b));
        b.insert("isSpell", true);
        b.insert("rollingActor.hp.pct", 10);
        assert!(e.condition_holds(&b));
    }

    #[test]
    fn equality_is_not_a_field() {
        let e = parse("flags.ac5e.attack.advantage", "bonus == 2");
        assert!(e.bonus.is_none());
        assert_eq!(e.conditions.len(), 1);
        let e = parse("flags.ac5e.attack.advantage", "isSpell ? true : false");
        assert_eq!(e.conditions.len(), 1);
    }

    #[test]
    fn registered_keywords_expand() {
        let mut g = Grammar::default();
        g.register_keyword("bloodied", "rollingActor.hp.pct <= 50");
        let entry = g
            .parse_change(&effect("flags.ac5e.attack.advantage", "bloodied"), 0)
            .unwrap()
            .unwrap();
        assert!(entry.warnings.is_empty());
        let mut b = Bindings::new();
        b.insert("rollingActor.hp.pct", 30);
        assert!(entry.condition_holds(&b));
    }

    #[test]
    fn cadence_forms() {
        let e = parse("flags.ac5e.attack.bonus", "bonus=2; oncePerTurn");
        assert_eq!(e.cadence, Some(Cadence::OncePerTurn));
        let e = parse("flags.ac5e.attack.bonus", "bonus=2; cadence=round");
        assert_eq!(e.cadence, Some(Cadence::OncePerRound));
        assert!(
            Grammar::default()
                .parse_change(&effect("flags.ac5e.attack.bonus", "cadence=weekly"), 0)
                .is_err()
        );
    }

    #[test]
    fn aura_needs_radius() {
        let g = Grammar::default();
        assert!(
            g.parse_change(&effect("flags.ac5e.aura.save.bonus", "bonus=2"), 0)
                .is_err()
        );
        let e = parse("flags.ac5e.aura.save.bonus", "bonus=2; radius=10; allies; includeSelf");
        assert!(e.allies && e.include_self && e.radius.is_some());

        let e = parse("flags.ac5e.aura.save.bonus", "bonus=2; radius=10; alliesOnly");
        assert!(e.allies && !e.enemies);
        assert!(e.conditions.is_empty() && e.warnings.is_empty());

        let e = parse("flags.ac5e.aura.attack.disadvantage", "radius=5; onlyEnemies");
        assert!(e.enemies && !e.allies);
    }

    #[test]
    fn uses_targets() {
        assert_eq!(
            parse_uses("item:Item.wand,2").unwrap(),
            UsesLimit {
                target: ConsumptionTarget::Item("Item.wand".to_string()),
                cost: 2
            }
        );
        assert_eq!(
            parse_uses("resource:ki").unwrap().target,
            ConsumptionTarget::Resource("ki".to_string())
        );
        assert!(parse_uses("0").is_err());
        assert!(parse_uses("bag:x").is_err());
        assert!(parse_uses("3,lots").is_err());
    }

    #[test]
    fn d20_modifiers() {
        for ok in ["min10", "max15", "r1", "r<2", "r<=3", "x20"] {
            assert!(is_valid_modifier(ok), "{ok}");
        }
        for bad in ["min", "r<=x", "kh1", "x"] {
            assert!(!is_valid_modifier(bad), "{bad}");
        }
        let e = parse("flags.ac5e.attack.modifier", "modifier=min10 kh1");
        assert_eq!(e.modifiers, vec!["min10".to_string()]);
        assert_eq!(e.warnings.len(), 1);
    }

    #[test]
    fn foreign_keys_are_ignored() {
        let g = Grammar::default();
        let e = effect("system.bonuses.mwak.attack", "+2");
        assert!(g.parse_change(&e, 0).unwrap().is_none());
        assert!(g.parse_change(&e, 5).unwrap().is_none());
    }
}
