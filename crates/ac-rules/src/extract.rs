//! Rule extractor.
//!
//! Parses every active effect on the battlefield once into a [`RuleIndex`],
//! then picks the rules that apply to one roll: the subject's own rules,
//! rules the opponent grants, and auras in range.

use std::collections::BTreeMap;

use ac_core::{ActorId, Battlefield, DocumentUuid, Geometry, HookType, TokenId};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context::EvaluationContext;
use crate::entry::{RuleEntry, Scope};
use crate::grammar::Grammar;

/// Which side of the roll a fired rule is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// The rolling actor.
    Subject,
    /// The actor on the other side.
    Opponent,
}

/// A change record that could not be turned into a rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleWarning {
    /// Effect carrying the change.
    pub effect: DocumentUuid,
    /// The change key.
    pub key: String,
    /// What was wrong.
    pub message: String,
}

/// Every rule on the battlefield, parsed once per evaluation.
#[derive(Debug, Clone, Default)]
pub struct RuleIndex {
    entries: Vec<RuleEntry>,
    warnings: Vec<RuleWarning>,
}

/// The aura a candidate came from.
#[derive(Debug, Clone, PartialEq)]
pub struct AuraSource {
    /// Token emitting the aura.
    pub token: TokenId,
    /// Actor owning the aura.
    pub actor: ActorId,
    /// Distance from the aura token to the affected token.
    pub distance: f64,
}

/// A rule that applies to the roll, before its condition is checked.
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    /// The rule.
    pub entry: &'a RuleEntry,
    /// Side it is attributed to.
    pub side: Side,
    /// Set for aura rules.
    pub aura: Option<AuraSource>,
}

impl RuleIndex {
    /// Parse every change on every active effect.
    pub fn build(battlefield: &Battlefield, grammar: &Grammar) -> Self {
        let mut index = Self::default();
        for actor in &battlefield.actors {
            for effect in actor.active_effects() {
                let mut effect = effect.clone();
                if effect.owner.is_none() {
                    effect.owner = Some(actor.id.clone());
                }
                for (i, change) in effect.changes.iter().enumerate() {
                    match grammar.parse_change(&effect, i) {
                        Ok(Some(entry)) => index.entries.push(entry),
                        Ok(None) => {}
                        Err(error) => {
                            warn!(effect = %effect.uuid, key = %change.key, %error, "skipping rule");
                            index.warnings.push(RuleWarning {
                                effect: effect.uuid.clone(),
                                key: change.key.clone(),
                                message: error.to_string(),
                            });
                        }
                    }
                }
            }
        }
        debug!(rules = index.entries.len(), "rule index built");
        index
    }

    /// All parsed rules.
    pub fn entries(&self) -> &[RuleEntry] {
        &self.entries
    }

    /// Change records that failed to parse.
    pub fn warnings(&self) -> &[RuleWarning] {
        &self.warnings
    }

    /// Find a rule by id.
    pub fn get(&self, id: &str) -> Option<&RuleEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// The rules applicable to one roll, highest priority first.
    pub fn collect<'a>(
        &'a self,
        ctx: &EvaluationContext,
        battlefield: &Battlefield,
        geometry: &dyn Geometry,
    ) -> Vec<Candidate<'a>> {
        let hook = ctx.hook();
        let subject = &ctx.subject.actor.id;
        let opponent = ctx.opponent.as_ref().map(|o| &o.actor.id);
        let opponent_targeted = ctx
            .opponent
            .as_ref()
            .is_some_and(|o| ctx.targets().contains(&o.token.id));

        let mut out = Vec::new();
        let mut single: Vec<Candidate<'a>> = Vec::new();

        for entry in self
            .entries
            .iter()
            .filter(|e| e.hook.matches(hook, ctx.profile()))
        {
            match entry.scope {
                Scope::Source => {
                    if &entry.source_actor == subject {
                        out.push(Candidate {
                            entry,
                            side: Side::Subject,
                            aura: None,
                        });
                    }
                }
                Scope::Grants => {
                    // Never granted to the carrier itself.
                    if Some(&entry.source_actor) != opponent || &entry.source_actor == subject {
                        continue;
                    }
                    let needs_target = matches!(hook, HookType::Attack | HookType::Damage)
                        && !entry.mode.is_target_modifier();
                    if needs_target && !opponent_targeted {
                        debug!(rule = %entry.id, "granted rule skipped: carrier not targeted");
                        continue;
                    }
                    out.push(Candidate {
                        entry,
                        side: Side::Opponent,
                        aura: None,
                    });
                }
                Scope::Aura | Scope::AuraGrants => {
                    for candidate in aura_candidates(entry, ctx, battlefield, geometry) {
                        if entry.single_aura {
                            single.push(candidate);
                        } else {
                            out.push(candidate);
                        }
                    }
                }
            }
        }

        out.extend(strongest_auras(single));
        out.sort_by(|a, b| {
            b.entry
                .priority
                .cmp(&a.entry.priority)
                .then_with(|| a.entry.id.cmp(&b.entry.id))
        });
        out
    }
}

fn aura_candidates<'a>(
    entry: &'a RuleEntry,
    ctx: &EvaluationContext,
    battlefield: &Battlefield,
    geometry: &dyn Geometry,
) -> Vec<Candidate<'a>> {
    let (side, affected) = match entry.scope {
        Scope::AuraGrants => match &ctx.opponent {
            Some(o) => (Side::Opponent, &o.token),
            None => return Vec::new(),
        },
        _ => (Side::Subject, &ctx.subject.token),
    };
    let Some(radius) = entry
        .radius
        .as_ref()
        .and_then(|r| r.formula(&ctx.bindings))
        .and_then(|f| f.as_number())
    else {
        warn!(rule = %entry.id, "aura radius is not a number");
        return Vec::new();
    };

    let mut out = Vec::new();
    for anchor in battlefield
        .tokens
        .iter()
        .filter(|t| t.actor == entry.source_actor)
    {
        if anchor.id == affected.id && !entry.include_self {
            continue;
        }
        let distance = geometry.distance(anchor, affected);
        if distance > radius {
            continue;
        }
        if entry.allies && !anchor.disposition.is_ally_of(affected.disposition) {
            continue;
        }
        if entry.enemies && !anchor.disposition.is_enemy_of(affected.disposition) {
            continue;
        }
        if entry.walls_block && anchor.id != affected.id && !geometry.can_see(anchor, affected) {
            continue;
        }
        out.push(Candidate {
            entry,
            side,
            aura: Some(AuraSource {
                token: anchor.id.clone(),
                actor: entry.source_actor.clone(),
                distance,
            }),
        });
    }
    out
}

/// Keep one `singleAura` candidate per label and mode: highest priority,
/// then nearest.
fn strongest_auras(candidates: Vec<Candidate<'_>>) -> Vec<Candidate<'_>> {
    let mut best: BTreeMap<(String, crate::entry::Mode, Side), Candidate<'_>> = BTreeMap::new();
    for candidate in candidates {
        let key = (
            candidate.entry.label.clone(),
            candidate.entry.mode,
            candidate.side,
        );
        let replace = match best.get(&key) {
            None => true,
            Some(current) => {
                let (p_new, p_cur) = (candidate.entry.priority, current.entry.priority);
                let d_new = candidate.aura.as_ref().map_or(f64::MAX, |a| a.distance);
                let d_cur = current.aura.as_ref().map_or(f64::MAX, |a| a.distance);
                p_new > p_cur || (p_new == p_cur && d_new < d_cur)
            }
        };
        if replace {
            best.insert(key, candidate);
        }
    }
    best.into_values().collect()
}
