//! Rule resolver: evaluates candidates and sorts the ones that fire into
//! per-side, per-mode buckets.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};

use ac_core::Battlefield;
use ac_expr::{Bindings, CompiledExpr, Formula};
use rand::Rng;
use serde::Serialize;
use tracing::debug;

use crate::context::EvaluationContext;
use crate::entry::{AddTo, Mode, RuleEntry, Scope};
use crate::extract::{Candidate, Side};
use crate::gate::{Gate, PendingUse};

/// A fired rule, as recorded in a bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketEntry {
    /// Rule id.
    pub id: String,
    /// Display label.
    pub label: String,
    /// Tooltip description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Scope the rule came from.
    pub scope: Scope,
    /// Side the rule is attributed to.
    pub side: Side,
    /// The `bonus=` value as a formula term (`1d4`, `2`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Numeric value for modes that need one; dice are rolled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    /// Absolute value from `set=` (or `threshold=`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set: Option<f64>,
    /// d20 modifiers.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub modifiers: Vec<String>,
    /// Damage part routing.
    pub add_to: AddTo,
    /// Damage types the rule was limited to.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub damage_types: Vec<String>,
    /// Ordering among rules.
    pub priority: i32,
    /// Short range delta.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short: Option<f64>,
    /// Long range delta.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub long: Option<f64>,
    /// Removes long-range disadvantage.
    pub no_long_disadvantage: bool,
    /// Removes nearby-foe disadvantage.
    pub no_nearby_foe_disadvantage: bool,
}

impl BucketEntry {
    /// Returns true if the rule only applies to some damage types.
    pub fn is_damage_scoped(&self) -> bool {
        !self.damage_types.is_empty()
    }
}

/// One ordered list of fired rules per mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Buckets(BTreeMap<Mode, Vec<BucketEntry>>);

impl Buckets {
    /// Empty buckets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fired rule.
    pub fn push(&mut self, mode: Mode, entry: BucketEntry) {
        self.0.entry(mode).or_default().push(entry);
    }

    /// Entries of one mode.
    pub fn get(&self, mode: Mode) -> &[BucketEntry] {
        self.0.get(&mode).map(Vec::as_slice).unwrap_or_default()
    }

    /// Returns true if the mode has any entries.
    pub fn has(&self, mode: Mode) -> bool {
        !self.get(mode).is_empty()
    }

    /// Drop every entry of a mode, returning them.
    pub fn take(&mut self, mode: Mode) -> Vec<BucketEntry> {
        self.0.remove(&mode).unwrap_or_default()
    }

    /// Non-empty buckets in mode order.
    pub fn iter(&self) -> impl Iterator<Item = (Mode, &[BucketEntry])> {
        self.0
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(m, v)| (*m, v.as_slice()))
    }

    /// Total number of entries.
    pub fn len(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    /// Returns true if nothing fired.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An opt-in rule whose condition held, offered to the player.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptInChoice {
    /// Rule id to select.
    pub id: String,
    /// Display label.
    pub label: String,
    /// Tooltip description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// What the rule does.
    pub mode: Mode,
    /// Side it applies to.
    pub side: Side,
    /// Whether the player selected it.
    pub selected: bool,
}

/// A candidate that did not fire, and why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRule {
    /// Rule id.
    pub id: String,
    /// Reason, for debugging and dry runs.
    pub reason: String,
}

/// Outcome of resolving one roll's candidates.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    /// Rules attributed to the rolling side.
    pub subject: Buckets,
    /// Rules attributed to the other side.
    pub opponent: Buckets,
    /// Staged consequences of gated rules.
    pub pending_uses: Vec<PendingUse>,
    /// Opt-in rules available to the player.
    pub opt_ins: Vec<OptInChoice>,
    /// Candidates that did not fire.
    pub skipped: Vec<SkippedRule>,
    /// Every fired rule, opt-ins included, in resolution order.
    #[serde(skip)]
    fired: Vec<Fired>,
}

/// A rule that passed every check, with the uses it staged.
#[derive(Debug, Clone, PartialEq)]
struct Fired {
    side: Side,
    mode: Mode,
    entry: BucketEntry,
    opt_in: bool,
    uses: Vec<PendingUse>,
    /// Position among the candidates.
    order: usize,
}

impl Resolution {
    /// Buckets of one side.
    pub fn side(&self, side: Side) -> &Buckets {
        match side {
            Side::Subject => &self.subject,
            Side::Opponent => &self.opponent,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut Buckets {
        match side {
            Side::Subject => &mut self.subject,
            Side::Opponent => &mut self.opponent,
        }
    }

    /// Entries of one mode from both sides, subject first.
    pub fn entries(&self, mode: Mode) -> impl Iterator<Item = &BucketEntry> {
        self.subject.get(mode).iter().chain(self.opponent.get(mode))
    }

    /// Returns true if any side has an entry for the mode.
    pub fn has(&self, mode: Mode) -> bool {
        self.subject.has(mode) || self.opponent.has(mode)
    }

    /// Rebuild buckets and pending uses for a new opt-in selection.
    ///
    /// Unselected opt-ins contribute nothing and stage nothing. A forced
    /// advantage mode on a side then discards that side's plain advantage
    /// entries.
    pub fn select(&mut self, selected: &BTreeSet<String>) {
        self.subject = Buckets::new();
        self.opponent = Buckets::new();
        self.pending_uses.clear();
        let fired = std::mem::take(&mut self.fired);
        for f in &fired {
            if f.opt_in && !selected.contains(&f.entry.id) {
                continue;
            }
            self.side_mut(f.side).push(f.mode, f.entry.clone());
            self.pending_uses.extend(f.uses.iter().cloned());
        }
        self.fired = fired;
        for choice in &mut self.opt_ins {
            choice.selected = selected.contains(&choice.id);
        }

        for side in [Side::Subject, Side::Opponent] {
            let buckets = self.side_mut(side);
            if buckets.has(Mode::ForceAdvantage) || buckets.has(Mode::ForceDisadvantage) {
                for mode in [
                    Mode::Advantage,
                    Mode::Disadvantage,
                    Mode::NoAdvantage,
                    Mode::NoDisadvantage,
                ] {
                    let dropped = buckets.take(mode);
                    if !dropped.is_empty() {
                        debug!(?side, %mode, count = dropped.len(), "discarded by forced mode");
                    }
                }
            }
        }
    }

    fn skip(&mut self, entry: &RuleEntry, reason: impl Into<String>) {
        let reason = reason.into();
        debug!(rule = %entry.id, %reason, "rule skipped");
        self.skipped.push(SkippedRule {
            id: entry.id.clone(),
            reason,
        });
    }
}

/// Percentage rolls for `chance=` rules, kept for one roll attempt so
/// re-evaluation does not re-roll.
#[derive(Debug, Clone, Default)]
pub struct ChanceCache {
    rolls: BTreeMap<(String, u32), u32>,
}

impl ChanceCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Roll (or recall) d100 for the rule and compare with `threshold`.
    pub fn passes<R: Rng + ?Sized>(&mut self, rule: &str, threshold: u32, rng: &mut R) -> bool {
        let roll = *self
            .rolls
            .entry((rule.to_string(), threshold))
            .or_insert_with(|| rng.random_range(1..=100));
        roll <= threshold
    }

    /// Number of cached rolls.
    pub fn len(&self) -> usize {
        self.rolls.len()
    }

    /// Returns true if nothing was rolled yet.
    pub fn is_empty(&self) -> bool {
        self.rolls.is_empty()
    }
}

fn rolled<R: Rng + ?Sized>(formula: Option<&Formula>, rng: &mut R) -> Option<f64> {
    formula.and_then(|f| f.roll(rng).ok())
}

fn formula_of(expr: Option<&CompiledExpr>, bindings: &Bindings) -> Option<Formula> {
    expr.and_then(|e| e.formula(bindings))
}

/// Evaluate a rule's values. `None` when a required value is missing.
fn fire<R: Rng + ?Sized>(
    entry: &RuleEntry,
    side: Side,
    bindings: &Bindings,
    rng: &mut R,
) -> Option<BucketEntry> {
    let bonus = formula_of(entry.bonus.as_ref(), bindings);
    let set = formula_of(entry.set.as_ref(), bindings)
        .or_else(|| formula_of(entry.threshold.as_ref(), bindings));

    let numeric = matches!(
        entry.mode,
        Mode::ModifyAc
            | Mode::ModifyDc
            | Mode::CriticalThreshold
            | Mode::FumbleThreshold
            | Mode::ExtraDice
            | Mode::DiceUpgrade
            | Mode::DiceDowngrade
            | Mode::Range
    );
    let mut amount = if numeric {
        rolled(bonus.as_ref(), rng)
    } else {
        bonus.as_ref().and_then(Formula::as_number)
    };
    if matches!(entry.mode, Mode::DiceUpgrade | Mode::DiceDowngrade) && amount.is_none() {
        amount = Some(1.0);
    }
    let set = rolled(set.as_ref(), rng);

    if entry.mode.needs_value() && bonus.is_none() && set.is_none() {
        return None;
    }
    if entry.mode == Mode::Modifier && entry.modifiers.is_empty() {
        return None;
    }

    Some(BucketEntry {
        id: entry.id.clone(),
        label: entry.label.clone(),
        description: entry.description.clone(),
        scope: entry.scope,
        side,
        value: bonus.map(|b| b.to_string()),
        amount,
        set,
        modifiers: entry.modifiers.clone(),
        add_to: entry.add_to.clone(),
        damage_types: entry.required_damage_types.clone(),
        priority: entry.priority,
        short: rolled(formula_of(entry.short.as_ref(), bindings).as_ref(), rng),
        long: rolled(formula_of(entry.long.as_ref(), bindings).as_ref(), rng),
        no_long_disadvantage: entry.no_long_disadvantage,
        no_nearby_foe_disadvantage: entry.no_nearby_foe_disadvantage,
    })
}

/// Resolve candidates into buckets.
///
/// Per candidate, in order: condition, damage types, item limit, chance,
/// values, then the gate. Anything that fails skips the rule alone. Opt-in
/// rules that pass are offered as choices and only count once selected
/// (see [`Resolution::select`]).
///
/// Opt-ins go through the gate after every other rule and see only what
/// those rules left, so an unselected opt-in never uses up a counter.
pub fn resolve<R: Rng + ?Sized>(
    candidates: &[Candidate<'_>],
    ctx: &EvaluationContext,
    battlefield: &Battlefield,
    gate: &Gate,
    chance: &mut ChanceCache,
    rng: &mut R,
) -> Resolution {
    let mut out = Resolution::default();
    let profile = ctx.profile();
    let mut staged: Vec<PendingUse> = Vec::new();

    let (opt_ins, regular): (Vec<_>, Vec<_>) = candidates
        .iter()
        .enumerate()
        .partition(|(_, c)| c.entry.opt_in);

    for (order, candidate) in regular.into_iter().chain(opt_ins) {
        let entry = candidate.entry;
        let bindings = match &candidate.aura {
            Some(aura) => match battlefield.actor(&aura.actor) {
                Ok(source) => Cow::Owned(ctx.bindings_with_aura(source, aura.distance)),
                Err(_) => Cow::Borrowed(&ctx.bindings),
            },
            None => Cow::Borrowed(&ctx.bindings),
        };

        if !entry.condition_holds(&bindings) {
            out.skip(entry, "condition is false");
            continue;
        }
        if !entry.required_damage_types.is_empty()
            && !profile.has_any_damage_type(&entry.required_damage_types)
        {
            out.skip(entry, "damage type does not match");
            continue;
        }
        if entry.item_limited {
            let item = profile.item.as_ref().map(|i| i.as_str());
            if item.is_none() || item != entry.origin.as_deref() {
                out.skip(entry, "not rolled with the origin item");
                continue;
            }
        }
        if let Some(expr) = &entry.chance {
            let Some(threshold) = expr.formula(&bindings).and_then(|f| f.as_number()) else {
                out.skip(entry, "chance is not a number");
                continue;
            };
            let threshold = threshold.clamp(0.0, 100.0) as u32;
            if !chance.passes(&entry.id, threshold, rng) {
                out.skip(entry, format!("chance roll above {threshold}"));
                continue;
            }
        }
        let Some(fired) = fire(entry, candidate.side, &bindings, rng) else {
            out.skip(entry, "no usable value");
            continue;
        };
        let uses = if entry.is_gated() {
            match gate.admit(entry, battlefield, &staged) {
                Ok(uses) => uses,
                Err(error) => {
                    out.skip(entry, error.to_string());
                    continue;
                }
            }
        } else {
            Vec::new()
        };
        if !entry.opt_in {
            staged.extend(uses.iter().cloned());
        }
        if entry.opt_in {
            out.opt_ins.push(OptInChoice {
                id: entry.id.clone(),
                label: entry.label.clone(),
                description: entry.description.clone(),
                mode: entry.mode,
                side: candidate.side,
                selected: false,
            });
        }
        out.fired.push(Fired {
            side: candidate.side,
            mode: entry.mode,
            entry: fired,
            opt_in: entry.opt_in,
            uses,
            order,
        });
    }

    out.fired.sort_by_key(|f| f.order);
    out.select(&ctx.request.selected_opt_ins);
    out
}
