//! Aggregator: folds a resolution into the changes to make to the roll.
//!
//! Precedence is fixed: forced advantage modes, then forced fail/success,
//! then forced critical/fumble, then `noCritical`, then plain advantage
//! against disadvantage. Bonuses and target-value changes are independent
//! of all of these.

use std::fmt;

use ac_core::HookType;
use serde::{Deserialize, Serialize};

use crate::context::RollRequest;
use crate::dice::rewrite_dice_terms;
use crate::entry::{AddTo, Mode};
use crate::resolve::{BucketEntry, Resolution};

/// Target value forced by a `fail` rule; no roll reaches it.
pub const FAIL_TARGET: i64 = 1000;
/// Target value forced by a `success` rule; every roll reaches it.
pub const SUCCESS_TARGET: i64 = -1000;
/// Critical threshold that no d20 can reach.
pub const NO_CRITICAL_THRESHOLD: i64 = 21;
/// Fumble threshold that no d20 can reach.
pub const NO_FUMBLE_THRESHOLD: i64 = 0;

/// How the d20 is rolled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AdvantageMode {
    /// One die.
    #[default]
    Normal,
    /// Two dice, keep the higher.
    Advantage,
    /// Two dice, keep the lower.
    Disadvantage,
}

impl fmt::Display for AdvantageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Normal => "normal",
            Self::Advantage => "advantage",
            Self::Disadvantage => "disadvantage",
        })
    }
}

/// Outcome forced regardless of the dice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ForcedOutcome {
    /// The roll fails.
    Fail,
    /// The roll succeeds.
    Success,
}

/// Roll facts the aggregator needs beyond the buckets.
#[derive(Debug, Clone, PartialEq)]
pub struct RollSettings {
    /// Kind of roll.
    pub hook: HookType,
    /// Current AC or DC per target.
    pub target_values: Vec<i64>,
    /// Natural result at or above which the roll crits.
    pub critical_threshold: i64,
    /// Natural result at or below which the roll fumbles.
    pub fumble_threshold: i64,
}

impl RollSettings {
    /// Settings with the default 20/1 thresholds.
    pub fn new(hook: HookType) -> Self {
        Self {
            hook,
            target_values: Vec::new(),
            critical_threshold: 20,
            fumble_threshold: 1,
        }
    }

    /// Settings for a request with explicit default thresholds.
    pub fn for_request(request: &RollRequest, critical: i64, fumble: i64) -> Self {
        Self {
            hook: request.hook,
            target_values: request.target_values.clone(),
            critical_threshold: critical,
            fumble_threshold: fumble,
        }
    }
}

/// A formula part contributed by a bonus rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectedPart {
    /// Signed part: `+1d4`, `-2`.
    pub formula: String,
    /// Rule that contributed it.
    pub rule_id: String,
    /// Damage part routing.
    pub add_to: AddTo,
    /// Damage types the rule was limited to.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub damage_types: Vec<String>,
}

/// Summed range changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeDelta {
    /// Added to short range.
    pub short: f64,
    /// Added to long range.
    pub long: f64,
    /// Long range no longer imposes disadvantage.
    pub no_long_disadvantage: bool,
    /// Nearby foes no longer impose disadvantage.
    pub no_nearby_foe_disadvantage: bool,
}

/// Everything to change about the pending roll.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollDelta {
    /// How the d20 is rolled.
    pub advantage_mode: AdvantageMode,
    /// Button the roll dialog should preselect.
    pub default_button: AdvantageMode,
    /// Every bonus part, in rule order.
    pub injected_formula_parts: Vec<String>,
    /// Parts not yet present in the prior roll state.
    pub appended_parts: Vec<String>,
    /// The bonus parts with their routing.
    pub parts: Vec<InjectedPart>,
    /// d20 modifiers.
    pub d20_modifiers: Vec<String>,
    /// Summed AC/DC change.
    pub target_value_delta: i64,
    /// Lowest target value with the delta (or a forced sentinel).
    pub target_value: Option<i64>,
    /// Change to the critical threshold.
    pub critical_threshold_delta: i64,
    /// Change to the fumble threshold.
    pub fumble_threshold_delta: i64,
    /// Final critical threshold.
    pub critical_threshold: i64,
    /// Final fumble threshold.
    pub fumble_threshold: i64,
    /// Forced critical.
    pub is_critical: bool,
    /// Forced fumble.
    pub is_fumble: bool,
    /// Forced fail or success.
    pub forced_outcome: Option<ForcedOutcome>,
    /// Dice added to every damage term.
    pub extra_dice: i64,
    /// Die size steps for every damage term.
    pub die_steps: i64,
    /// Range changes.
    pub range: RangeDelta,
    /// Human-readable trail of every decision.
    pub reasons: Vec<String>,
}

impl RollDelta {
    /// Returns true if a `fail` rule forced the outcome.
    pub fn is_forced_fail(&self) -> bool {
        self.forced_outcome == Some(ForcedOutcome::Fail)
    }
}

/// The roll's formula parts, plus a marker of which ones we injected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollState {
    /// Current parts.
    pub parts: Vec<String>,
    /// Parts injected by the last applied delta.
    #[serde(default)]
    pub applied: Vec<String>,
}

impl RollState {
    /// State over the roll's own parts.
    pub fn new(parts: Vec<String>) -> Self {
        Self {
            parts,
            applied: Vec::new(),
        }
    }

    /// Replace previously injected parts with the delta's.
    pub fn apply(&mut self, delta: &RollDelta) -> &[String] {
        let base = self.parts.len().saturating_sub(self.applied.len());
        if self.parts[base..] == self.applied[..] {
            self.parts.truncate(base);
        }
        self.parts
            .extend(delta.injected_formula_parts.iter().cloned());
        self.applied = delta.injected_formula_parts.clone();
        &self.parts
    }
}

fn signed(value: &str) -> String {
    let value = value.trim();
    if value.starts_with('+') || value.starts_with('-') {
        value.to_string()
    } else {
        format!("+{value}")
    }
}

fn reason(mode: Mode, entry: &BucketEntry) -> String {
    format!("{mode}: {}", entry.label)
}

fn amount(entry: &BucketEntry) -> i64 {
    entry.amount.map_or(0, |a| a.round() as i64)
}

/// Fold a resolution into a roll delta.
///
/// `prior` is the roll state the delta will be applied to; parts it
/// already carries from an earlier pass are not reported as appended.
pub fn aggregate(resolution: &Resolution, settings: &RollSettings, prior: &RollState) -> RollDelta {
    let mut d = RollDelta {
        critical_threshold: settings.critical_threshold,
        fumble_threshold: settings.fumble_threshold,
        ..RollDelta::default()
    };
    let global = |e: &&BucketEntry| settings.hook != HookType::Damage || !e.is_damage_scoped();

    // Thresholds first, so forcing below can pin them.
    for e in resolution.entries(Mode::CriticalThreshold) {
        match e.set {
            Some(set) => d.critical_threshold = d.critical_threshold.min(set.round() as i64),
            None => d.critical_threshold_delta += amount(e),
        }
        d.reasons.push(reason(Mode::CriticalThreshold, e));
    }
    for e in resolution.entries(Mode::FumbleThreshold) {
        match e.set {
            Some(set) => d.fumble_threshold = d.fumble_threshold.max(set.round() as i64),
            None => d.fumble_threshold_delta += amount(e),
        }
        d.reasons.push(reason(Mode::FumbleThreshold, e));
    }
    d.critical_threshold += d.critical_threshold_delta;
    d.fumble_threshold += d.fumble_threshold_delta;

    // Forced advantage modes.
    let force_adv: Vec<_> = resolution.entries(Mode::ForceAdvantage).collect();
    let force_dis: Vec<_> = resolution.entries(Mode::ForceDisadvantage).collect();
    let forced = !force_adv.is_empty() || !force_dis.is_empty();
    if forced {
        d.advantage_mode = match (force_adv.is_empty(), force_dis.is_empty()) {
            (false, true) => AdvantageMode::Advantage,
            (true, false) => AdvantageMode::Disadvantage,
            _ => AdvantageMode::Normal,
        };
        for e in &force_adv {
            d.reasons.push(reason(Mode::ForceAdvantage, e));
        }
        for e in &force_dis {
            d.reasons.push(reason(Mode::ForceDisadvantage, e));
        }
    }

    // Forced fail/success; fail wins.
    if let Some(e) = resolution.entries(Mode::Fail).next() {
        d.forced_outcome = Some(ForcedOutcome::Fail);
        d.critical_threshold = NO_CRITICAL_THRESHOLD;
        if settings.hook.is_d20() {
            d.target_value = Some(FAIL_TARGET);
        }
        d.reasons.push(reason(Mode::Fail, e));
    } else if let Some(e) = resolution.entries(Mode::Success).next() {
        d.forced_outcome = Some(ForcedOutcome::Success);
        d.fumble_threshold = NO_FUMBLE_THRESHOLD;
        if settings.hook.is_d20() {
            d.target_value = Some(SUCCESS_TARGET);
        }
        d.reasons.push(reason(Mode::Success, e));
    }

    // Forced critical/fumble.
    if d.forced_outcome != Some(ForcedOutcome::Fail)
        && let Some(e) = resolution.entries(Mode::Critical).find(global)
    {
        d.is_critical = true;
        d.critical_threshold = 1;
        d.reasons.push(reason(Mode::Critical, e));
    }
    if d.forced_outcome != Some(ForcedOutcome::Success)
        && let Some(e) = resolution.entries(Mode::Fumble).find(global)
    {
        d.is_fumble = true;
        d.fumble_threshold = 20;
        d.reasons.push(reason(Mode::Fumble, e));
    }

    if let Some(e) = resolution.entries(Mode::NoCritical).next() {
        d.is_critical = false;
        d.critical_threshold = NO_CRITICAL_THRESHOLD;
        d.reasons.push(reason(Mode::NoCritical, e));
    }

    // Plain advantage against disadvantage.
    if !forced {
        let mut advantage = false;
        let mut disadvantage = false;
        if resolution.has(Mode::NoAdvantage) {
            for e in resolution.entries(Mode::NoAdvantage) {
                d.reasons.push(reason(Mode::NoAdvantage, e));
            }
        } else {
            for e in resolution.entries(Mode::Advantage) {
                advantage = true;
                d.reasons.push(reason(Mode::Advantage, e));
            }
        }
        if resolution.has(Mode::NoDisadvantage) {
            for e in resolution.entries(Mode::NoDisadvantage) {
                d.reasons.push(reason(Mode::NoDisadvantage, e));
            }
        } else {
            for e in resolution.entries(Mode::Disadvantage) {
                disadvantage = true;
                d.reasons.push(reason(Mode::Disadvantage, e));
            }
        }
        d.advantage_mode = match (advantage, disadvantage) {
            (true, false) => AdvantageMode::Advantage,
            (false, true) => AdvantageMode::Disadvantage,
            _ => AdvantageMode::Normal,
        };
    }
    d.default_button = d.advantage_mode;

    // Bonus parts.
    for e in resolution.entries(Mode::Bonus) {
        let Some(value) = &e.value else { continue };
        let formula = signed(value);
        d.injected_formula_parts.push(formula.clone());
        d.parts.push(InjectedPart {
            formula,
            rule_id: e.id.clone(),
            add_to: e.add_to.clone(),
            damage_types: e.damage_types.clone(),
        });
        d.reasons.push(format!("{}: {} ({value})", Mode::Bonus, e.label));
    }
    d.appended_parts = if prior.applied == d.injected_formula_parts {
        Vec::new()
    } else {
        d.injected_formula_parts.clone()
    };

    for e in resolution.entries(Mode::Modifier) {
        d.d20_modifiers.extend(e.modifiers.iter().cloned());
        d.reasons.push(reason(Mode::Modifier, e));
    }

    // Target values.
    for mode in [Mode::ModifyAc, Mode::ModifyDc] {
        for e in resolution.entries(mode) {
            d.target_value_delta += amount(e);
            d.reasons.push(format!("{mode}: {} ({:+})", e.label, amount(e)));
        }
    }
    if d.forced_outcome.is_none()
        && let Some(lowest) = settings.target_values.iter().min()
    {
        d.target_value = Some(lowest + d.target_value_delta);
    }

    // Damage dice.
    for e in resolution.entries(Mode::ExtraDice) {
        d.extra_dice += amount(e);
        d.reasons.push(reason(Mode::ExtraDice, e));
    }
    for e in resolution.entries(Mode::DiceUpgrade) {
        d.die_steps += amount(e);
        d.reasons.push(reason(Mode::DiceUpgrade, e));
    }
    for e in resolution.entries(Mode::DiceDowngrade) {
        d.die_steps -= amount(e);
        d.reasons.push(reason(Mode::DiceDowngrade, e));
    }

    for e in resolution.entries(Mode::Range) {
        let both = e.amount.unwrap_or(0.0);
        d.range.short += both + e.short.unwrap_or(0.0);
        d.range.long += both + e.long.unwrap_or(0.0);
        d.range.no_long_disadvantage |= e.no_long_disadvantage;
        d.range.no_nearby_foe_disadvantage |= e.no_nearby_foe_disadvantage;
        d.reasons.push(reason(Mode::Range, e));
    }

    d
}

/// Rewrite damage formulas with the delta's extra dice and die steps.
pub fn apply_damage_dice(parts: &[String], delta: &RollDelta) -> Vec<String> {
    if delta.extra_dice == 0 && delta.die_steps == 0 {
        return parts.to_vec();
    }
    parts
        .iter()
        .map(|p| rewrite_dice_terms(p, delta.extra_dice, delta.die_steps))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Scope;
    use crate::extract::Side;
    use crate::resolve::Buckets;

    fn entry(id: &str) -> BucketEntry {
        BucketEntry {
            id: id.to_string(),
            label: id.to_string(),
            description: None,
            scope: Scope::Source,
            side: Side::Subject,
            value: None,
            amount: None,
            set: None,
            modifiers: Vec::new(),
            add_to: AddTo::All,
            damage_types: Vec::new(),
            priority: 0,
            short: None,
            long: None,
            no_long_disadvantage: false,
            no_nearby_foe_disadvantage: false,
        }
    }

    fn valued(id: &str, value: &str, amount: Option<f64>) -> BucketEntry {
        BucketEntry {
            value: Some(value.to_string()),
            amount,
            ..entry(id)
        }
    }

    fn resolution(subject: &[(Mode, BucketEntry)], opponent: &[(Mode, BucketEntry)]) -> Resolution {
        let mut s = Buckets::new();
        for (mode, e) in subject {
            s.push(*mode, e.clone());
        }
        let mut o = Buckets::new();
        for (mode, e) in opponent {
            o.push(*mode, e.clone());
        }
        let mut res = Resolution::default();
        res.subject = s;
        res.opponent = o;
        res
    }

    fn run(res: &Resolution, hook: HookType) -> RollDelta {
        aggregate(res, &RollSettings::new(hook), &RollState::default())
    }

    #[test]
    fn plain_advantage() {
        let res = resolution(&[(Mode::Advantage, entry("Bless"))], &[]);
        let d = run(&res, HookType::Attack);
        assert_eq!(d.advantage_mode, AdvantageMode::Advantage);
        assert_eq!(d.default_button, AdvantageMode::Advantage);
        assert_eq!(d.reasons, vec!["advantage: Bless".to_string()]);
    }

    #[test]
    fn opposing_modes_cancel() {
        let res = resolution(
            &[(Mode::Advantage, entry("a"))],
            &[(Mode::Disadvantage, entry("b"))],
        );
        let d = run(&res, HookType::Attack);
        assert_eq!(d.advantage_mode, AdvantageMode::Normal);
        assert_eq!(d.default_button.to_string(), "normal");
    }

    #[test]
    fn forced_advantage_beats_any_number_of_disadvantages() {
        let res = resolution(
            &[
                (Mode::ForceAdvantage, entry("force")),
                (Mode::Disadvantage, entry("d1")),
                (Mode::Disadvantage, entry("d2")),
            ],
            &[(Mode::Disadvantage, entry("d3"))],
        );
        let d = run(&res, HookType::Attack);
        assert_eq!(d.advantage_mode, AdvantageMode::Advantage);
    }

    #[test]
    fn no_advantage_suppresses_advantage() {
        let res = resolution(
            &[(Mode::Advantage, entry("a")), (Mode::NoAdvantage, entry("n"))],
            &[],
        );
        assert_eq!(run(&res, HookType::Save).advantage_mode, AdvantageMode::Normal);
    }

    #[test]
    fn fail_wins_over_success_and_critical() {
        let res = resolution(
            &[
                (Mode::Success, entry("s")),
                (Mode::Critical, entry("c")),
            ],
            &[(Mode::Fail, entry("f"))],
        );
        let d = run(&res, HookType::Save);
        assert!(d.is_forced_fail());
        assert_eq!(d.target_value, Some(FAIL_TARGET));
        assert_eq!(d.critical_threshold, NO_CRITICAL_THRESHOLD);
        assert!(!d.is_critical);
    }

    #[test]
    fn success_makes_fumbles_impossible() {
        let res = resolution(&[(Mode::Success, entry("s"))], &[]);
        let d = run(&res, HookType::Check);
        assert_eq!(d.forced_outcome, Some(ForcedOutcome::Success));
        assert_eq!(d.target_value, Some(SUCCESS_TARGET));
        assert_eq!(d.fumble_threshold, NO_FUMBLE_THRESHOLD);
    }

    #[test]
    fn no_critical_clears_forced_critical() {
        let res = resolution(
            &[(Mode::Critical, entry("c"))],
            &[(Mode::NoCritical, entry("n"))],
        );
        let d = run(&res, HookType::Attack);
        assert!(!d.is_critical);
        assert_eq!(d.critical_threshold, NO_CRITICAL_THRESHOLD);
    }

    #[test]
    fn damage_scoped_criticals_do_not_force_damage_rolls() {
        let scoped = BucketEntry {
            damage_types: vec!["fire".to_string()],
            ..entry("c")
        };
        let res = resolution(&[(Mode::Critical, scoped)], &[]);
        assert!(!run(&res, HookType::Damage).is_critical);
        assert!(run(&res, HookType::Attack).is_critical);
    }

    #[test]
    fn bonus_parts_are_idempotent() {
        let res = resolution(&[(Mode::Bonus, valued("bless", "1d4", None))], &[]);
        let settings = RollSettings::new(HookType::Damage);
        let mut state = RollState::new(vec!["1d8 + 3".to_string()]);

        let first = aggregate(&res, &settings, &state);
        assert_eq!(first.injected_formula_parts, vec!["+1d4".to_string()]);
        assert_eq!(first.appended_parts, vec!["+1d4".to_string()]);
        state.apply(&first);

        let second = aggregate(&res, &settings, &state);
        assert_eq!(second.injected_formula_parts, first.injected_formula_parts);
        assert!(second.appended_parts.is_empty());
        state.apply(&second);
        assert_eq!(state.parts, vec!["1d8 + 3".to_string(), "+1d4".to_string()]);
    }

    #[test]
    fn roll_state_replaces_previous_injection() {
        let mut state = RollState::new(vec!["1d20".to_string()]);
        let one = RollDelta {
            injected_formula_parts: vec!["+1d4".to_string(), "+2".to_string()],
            ..RollDelta::default()
        };
        let two = RollDelta {
            injected_formula_parts: vec!["-1".to_string()],
            ..RollDelta::default()
        };
        state.apply(&one);
        state.apply(&two);
        assert_eq!(state.parts, vec!["1d20".to_string(), "-1".to_string()]);
    }

    #[test]
    fn target_modifiers_apply_to_lowest_target() {
        let res = resolution(
            &[(Mode::ModifyAc, valued("cover", "2", Some(2.0)))],
            &[(Mode::ModifyAc, valued("shield", "5", Some(5.0)))],
        );
        let settings = RollSettings {
            target_values: vec![15, 12, 18],
            ..RollSettings::new(HookType::Attack)
        };
        let d = aggregate(&res, &settings, &RollState::default());
        assert_eq!(d.target_value_delta, 7);
        assert_eq!(d.target_value, Some(19));
    }

    #[test]
    fn thresholds_and_damage_dice() {
        let res = resolution(
            &[
                (Mode::CriticalThreshold, valued("improved", "-1", Some(-1.0))),
                (Mode::ExtraDice, valued("brutal", "1", Some(1.0))),
                (Mode::DiceUpgrade, valued("up", "1", Some(1.0))),
            ],
            &[],
        );
        let d = run(&res, HookType::Attack);
        assert_eq!(d.critical_threshold, 19);
        assert_eq!(d.critical_threshold_delta, -1);
        assert_eq!(
            apply_damage_dice(&["2d6 + 3".to_string()], &d),
            vec!["3d8 + 3".to_string()]
        );
        assert_eq!(
            apply_damage_dice(&["1d6".to_string()], &RollDelta::default()),
            vec!["1d6".to_string()]
        );
    }

    #[test]
    fn range_deltas_sum() {
        let long_shot = BucketEntry {
            long: Some(30.0),
            no_long_disadvantage: true,
            ..entry("sharpshooter")
        };
        let res = resolution(&[(Mode::Range, long_shot)], &[]);
        let d = run(&res, HookType::Attack);
        assert_eq!(d.range.long, 30.0);
        assert_eq!(d.range.short, 0.0);
        assert!(d.range.no_long_disadvantage);
    }
}
