//! Rule extraction, resolution and aggregation for pending rolls.
//!
//! A roll goes through the stages in order: [`build_context`] snapshots the
//! situation, [`RuleIndex`] parses every active effect and picks the rules
//! that apply, [`resolve`] evaluates them into per-side buckets (asking the
//! [`Gate`] about limited rules), and [`aggregate`] folds the buckets into a
//! [`RollDelta`]. Nothing in this crate writes to documents; consumed uses
//! come back as [`PendingUse`]s.

/// Aggregation of buckets into roll changes.
pub mod aggregate;
/// Evaluation context for one roll attempt.
pub mod context;
/// Tooltip text.
pub mod describe;
/// Die sizes and damage-formula rewriting.
pub mod dice;
/// Parsed rule entries.
pub mod entry;
/// Error types.
pub mod error;
/// Rule index and scope filtering.
pub mod extract;
/// Cadence and resource gate.
pub mod gate;
/// Rule key and value grammar.
pub mod grammar;
/// Rule resolution into buckets.
pub mod resolve;

pub use aggregate::{
    AdvantageMode, ForcedOutcome, RollDelta, RollSettings, RollState, aggregate, apply_damage_dice,
};
pub use context::{EvaluationContext, RollRequest, build_context};
pub use describe::{English, Localize, describe};
pub use entry::{Cadence, HookFilter, Mode, RuleEntry, Scope};
pub use error::{GateError, GateResult, RuleError, RuleResult};
pub use extract::{Candidate, RuleIndex, RuleWarning, Side};
pub use gate::{CadenceRecord, CadenceState, Gate, PendingUse, PendingUseKind};
pub use grammar::Grammar;
pub use resolve::{BucketEntry, Buckets, ChanceCache, OptInChoice, Resolution, resolve};

#[cfg(test)]
mod tests {
    use super::*;
    use ac_core::{
        ActorSnapshot, Battlefield, CombatState, Disposition, Effect, GridGeometry, HookType,
        TokenSnapshot,
    };
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    struct Table {
        battlefield: Battlefield,
        cadence: CadenceState,
    }

    impl Table {
        fn new(hero_effects: Vec<Effect>) -> Self {
            let mut battlefield = Battlefield::new();
            let mut hero = ActorSnapshot::new("Actor.hero", "Hero");
            hero.effects = hero_effects;
            battlefield.add_actor(hero);
            battlefield.add_actor(ActorSnapshot::new("Actor.orc", "Orc"));
            battlefield.add_token(TokenSnapshot::new(
                "T.hero",
                "Actor.hero",
                Disposition::Friendly,
                0.0,
                0.0,
            ));
            battlefield.add_token(TokenSnapshot::new(
                "T.orc",
                "Actor.orc",
                Disposition::Hostile,
                5.0,
                0.0,
            ));
            battlefield.normalize();
            Self {
                battlefield,
                cadence: CadenceState::new(),
            }
        }

        fn resolve(&self, request: &RollRequest) -> Resolution {
            let geometry = GridGeometry::new();
            let index = RuleIndex::build(&self.battlefield, &Grammar::default());
            let ctx = build_context(&self.battlefield, &geometry, request).unwrap();
            let candidates = index.collect(&ctx, &self.battlefield, &geometry);
            let gate = Gate::new(self.cadence.clone(), self.battlefield.combat.as_ref());
            let mut rng = StdRng::seed_from_u64(42);
            resolve(
                &candidates,
                &ctx,
                &self.battlefield,
                &gate,
                &mut ChanceCache::new(),
                &mut rng,
            )
        }

        fn commit(&mut self, resolution: &Resolution) {
            for use_ in &resolution.pending_uses {
                self.cadence.apply(use_, 0);
            }
        }
    }

    fn attack() -> RollRequest {
        RollRequest::new(HookType::Attack, "T.hero").against("T.orc")
    }

    #[test]
    fn plain_advantage_scenario() {
        let table = Table::new(vec![
            Effect::new("E.1", "Faerie Fire").with_change("flags.ac5e.attack.advantage", "true"),
        ]);
        let res = table.resolve(&attack());
        let labels: Vec<_> = res
            .subject
            .get(Mode::Advantage)
            .iter()
            .map(|e| e.label.as_str())
            .collect();
        assert_eq!(labels, vec!["Faerie Fire"]);
        let delta = aggregate(&res, &RollSettings::new(HookType::Attack), &RollState::default());
        assert_eq!(delta.advantage_mode.to_string(), "advantage");
    }

    #[test]
    fn opposing_modes_cancel_scenario() {
        let table = Table::new(vec![
            Effect::new("E.1", "Help").with_change("flags.ac5e.attack.advantage", "true"),
            Effect::new("E.2", "Poisoned").with_change("flags.ac5e.attack.disadvantage", "true"),
        ]);
        let delta = aggregate(
            &table.resolve(&attack()),
            &RollSettings::new(HookType::Attack),
            &RollState::default(),
        );
        assert_eq!(delta.advantage_mode, AdvantageMode::Normal);
        assert_eq!(delta.default_button, AdvantageMode::Normal);
    }

    #[test]
    fn bonus_injection_scenario() {
        let table = Table::new(vec![
            Effect::new("E.1", "Bless").with_change("flags.ac5e.damage.bonus", "damage.bonus; bonus=1d4"),
        ]);
        let request = RollRequest::new(HookType::Damage, "T.hero").against("T.orc");
        let res = table.resolve(&request);
        let settings = RollSettings::new(HookType::Damage);
        let mut state = RollState::new(vec!["1d8".to_string()]);

        let first = aggregate(&res, &settings, &state);
        assert_eq!(first.appended_parts, vec!["+1d4".to_string()]);
        state.apply(&first);

        let second = aggregate(&res, &settings, &state);
        assert!(second.appended_parts.is_empty());
        assert_eq!(second.injected_formula_parts, first.injected_formula_parts);
        state.apply(&second);
        assert_eq!(state.parts, vec!["1d8".to_string(), "+1d4".to_string()]);
    }

    #[test]
    fn forced_precedence_scenario() {
        let table = Table::new(vec![
            Effect::new("E.1", "Foresight").with_change("flags.ac5e.attack.forceAdvantage", ""),
            Effect::new("E.2", "Blinded").with_change("flags.ac5e.attack.disadvantage", ""),
            Effect::new("E.3", "Frightened").with_change("flags.ac5e.attack.disadvantage", ""),
            Effect::new("E.4", "Poisoned").with_change("flags.ac5e.attack.disadvantage", ""),
        ]);
        let delta = aggregate(
            &table.resolve(&attack()),
            &RollSettings::new(HookType::Attack),
            &RollState::default(),
        );
        assert_eq!(delta.advantage_mode, AdvantageMode::Advantage);
    }

    #[test]
    fn cadence_gate_scenario() {
        let mut table = Table::new(vec![
            Effect::new("E.1", "Sneak Attack")
                .with_change("flags.ac5e.attack.bonus", "bonus=2; oncePerRound"),
        ]);
        let mut combat = CombatState::new("Combat.1");
        combat.add_combatant("c-hero", "Actor.hero", None, 20.0);
        for i in 0..3 {
            combat.add_combatant(format!("c-{i}"), format!("Actor.{i}"), None, 10.0 - i as f64);
        }
        combat.start();
        combat.set_turn(2, 0);
        table.battlefield.combat = Some(combat);

        let res = table.resolve(&attack());
        assert_eq!(res.subject.get(Mode::Bonus).len(), 1);
        table.commit(&res);

        if let Some(combat) = table.battlefield.combat.as_mut() {
            combat.set_turn(2, 3);
        }
        assert!(table.resolve(&attack()).subject.is_empty());

        if let Some(combat) = table.battlefield.combat.as_mut() {
            combat.set_turn(3, 0);
        }
        assert_eq!(table.resolve(&attack()).subject.get(Mode::Bonus).len(), 1);
    }

    #[test]
    fn once_per_turn_scenario() {
        let mut table = Table::new(vec![
            Effect::new("E.1", "Riposte").with_change("flags.ac5e.attack.advantage", "oncePerTurn"),
        ]);
        let mut combat = CombatState::new("Combat.1");
        combat.add_combatant("c-hero", "Actor.hero", None, 20.0);
        combat.add_combatant("c-orc", "Actor.orc", None, 10.0);
        combat.start();
        table.battlefield.combat = Some(combat);

        let first = table.resolve(&attack());
        assert!(first.subject.has(Mode::Advantage));
        table.commit(&first);
        assert!(!table.resolve(&attack()).subject.has(Mode::Advantage));

        if let Some(combat) = table.battlefield.combat.as_mut() {
            combat.advance();
        }
        assert!(table.resolve(&attack()).subject.has(Mode::Advantage));
    }

    #[test]
    fn aura_self_exclusion_scenario() {
        let mut table = Table::new(vec![
            Effect::new("E.1", "Aura of Menace")
                .with_change("flags.ac5e.aura.attack.disadvantage", "radius=10"),
        ]);
        // Subject's own aura does not apply to its own rolls.
        assert!(table.resolve(&attack()).subject.is_empty());

        // The orc, 5 away, is inside it.
        let from_orc = RollRequest::new(HookType::Attack, "T.orc").against("T.hero");
        assert!(table.resolve(&from_orc).subject.has(Mode::Disadvantage));

        // At 15 it is not.
        table.battlefield.tokens[1].x = 15.0;
        assert!(table.resolve(&from_orc).subject.is_empty());
    }

    #[test]
    fn unsafe_conditions_never_fire() {
        let table = Table::new(vec![
            Effect::new("E.1", "Hack")
                .with_change("flags.ac5e.attack.advantage", "game.user.isGM || true"),
            Effect::new("E.2", "Hack 2")
                .with_change("flags.ac5e.attack.critical", "rollingActor.constructor"),
        ]);
        let res = table.resolve(&attack());
        assert!(res.subject.is_empty());
        assert_eq!(res.skipped.len(), 2);
    }
}
