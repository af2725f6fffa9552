//! Integration tests for the ac-engine crate.

use std::collections::BTreeSet;
use std::sync::Arc;

use ac_core::{
    ActorSnapshot, Battlefield, CombatState, Counter, Disposition, DocumentUuid, Effect,
    GridGeometry, HookType, ItemSnapshot, RollProfile, TokenId, TokenSnapshot,
};
use ac_engine::{
    DocumentStore, Engine, EngineConfig, EngineError, HostResult, MemoryAuthority, MemoryStore,
    NoAuthority, SessionState,
};
use ac_rules::{AdvantageMode, Cadence, CadenceState, Mode, RollRequest};
use async_trait::async_trait;
use serde_json::{Value as Json, json};

const PATH: &str = "flags.automated-conditions-5e.cadence";

fn battlefield(hero_effects: Vec<Effect>) -> Battlefield {
    let mut bf = Battlefield::new();
    let mut hero = ActorSnapshot::new("Actor.hero", "Hero");
    hero.effects = hero_effects;
    hero.items.push(ItemSnapshot {
        uuid: DocumentUuid::new("Actor.hero.Item.wand"),
        name: "Wand".to_string(),
        kind: "equipment".to_string(),
        equipped: true,
        uses: Some(Counter::new(2, Some(2))),
        quantity: None,
        properties: BTreeSet::new(),
    });
    bf.add_actor(hero);
    bf.add_actor(ActorSnapshot::new("Actor.orc", "Orc"));
    bf.add_token(TokenSnapshot::new(
        "T.hero",
        "Actor.hero",
        Disposition::Friendly,
        0.0,
        0.0,
    ));
    bf.add_token(TokenSnapshot::new(
        "T.orc",
        "Actor.orc",
        Disposition::Hostile,
        5.0,
        0.0,
    ));
    bf.normalize();
    bf
}

fn with_combat(mut bf: Battlefield, round: u32, turn: usize) -> Battlefield {
    let mut combat = CombatState::new("Combat.1");
    combat.add_combatant("c-hero", "Actor.hero", Some(TokenId::new("T.hero")), 20.0);
    combat.add_combatant("c-orc", "Actor.orc", Some(TokenId::new("T.orc")), 15.0);
    combat.add_combatant("c-wolf", "Actor.wolf", None, 10.0);
    combat.add_combatant("c-bat", "Actor.bat", None, 5.0);
    combat.start();
    combat.set_turn(round, turn);
    bf.combat = Some(combat);
    bf
}

fn attack() -> RollRequest {
    let mut request = RollRequest::new(HookType::Attack, "T.hero").against("T.orc");
    request.base_parts = vec!["1d20".to_string(), "@mod".to_string()];
    request
}

fn engine(store: Arc<MemoryStore>) -> Engine {
    Engine::new(EngineConfig::default(), store, Arc::new(NoAuthority))
}

async fn roll(engine: &Engine, bf: &Battlefield) -> AdvantageMode {
    let cadence = engine.load_cadence(bf).await.unwrap();
    let mut session = engine.open_session(attack());
    let delta = engine
        .evaluate(&mut session, bf, &GridGeometry::new(), &cadence)
        .unwrap();
    engine.commit_pending_uses(&mut session).await.unwrap();
    delta.advantage_mode
}

#[tokio::test]
async fn commit_decrements_item_uses_once() {
    let bf = battlefield(vec![
        Effect::new("Actor.hero.ActiveEffect.1", "Wand of Aim")
            .with_change("flags.ac5e.attack.advantage", "usesCount=item:Wand"),
    ]);
    let store = Arc::new(MemoryStore::from_battlefield(&bf));
    let engine = engine(store.clone());
    let geometry = GridGeometry::new();
    let cadence = engine.load_cadence(&bf).await.unwrap();

    let mut session = engine.open_session(attack());
    let delta = engine
        .evaluate(&mut session, &bf, &geometry, &cadence)
        .unwrap();
    assert_eq!(delta.advantage_mode, AdvantageMode::Advantage);
    // A second pass of the same dialog must not stage the use twice.
    engine
        .evaluate(&mut session, &bf, &geometry, &cadence)
        .unwrap();
    assert_eq!(session.pending_uses().len(), 1);

    let summary = engine.commit_pending_uses(&mut session).await.unwrap();
    assert!(!summary.blocked);
    assert_eq!(summary.report.applied, 1);
    assert_eq!(session.state(), SessionState::Committed);
    let wand = store.get(&DocumentUuid::new("Actor.hero.Item.wand")).unwrap();
    assert_eq!(wand["system"]["uses"]["value"], json!(1));

    assert!(matches!(
        engine.commit_pending_uses(&mut session).await,
        Err(EngineError::SessionFinalized(_))
    ));
}

#[tokio::test]
async fn exhausted_counter_skips_the_rule() {
    let mut bf = battlefield(vec![
        Effect::new("Actor.hero.ActiveEffect.1", "Wand of Aim")
            .with_change("flags.ac5e.attack.advantage", "usesCount=item:Wand,3"),
    ]);
    bf.actors[0].items[0].uses = Some(Counter::new(2, Some(3)));
    let store = Arc::new(MemoryStore::from_battlefield(&bf));
    let engine = engine(store.clone());
    let mut session = engine.open_session(attack());
    let delta = engine
        .evaluate(&mut session, &bf, &GridGeometry::new(), &Default::default())
        .unwrap();
    assert_eq!(delta.advantage_mode, AdvantageMode::Normal);
    assert!(session.pending_uses().is_empty());
    assert_eq!(session.resolution().unwrap().skipped.len(), 1);

    let summary = engine.commit_pending_uses(&mut session).await.unwrap();
    assert_eq!(summary.report.total(), 0);
    let wand = store.get(&DocumentUuid::new("Actor.hero.Item.wand")).unwrap();
    assert!(wand.get("system").is_none());
}

#[tokio::test]
async fn cancelled_session_writes_nothing() {
    let bf = battlefield(vec![
        Effect::new("Actor.hero.ActiveEffect.1", "Inspiration")
            .with_change("flags.ac5e.attack.advantage", "once"),
    ]);
    let store = Arc::new(MemoryStore::from_battlefield(&bf));
    let engine = engine(store.clone());
    let mut session = engine.open_session(attack());
    engine
        .evaluate(&mut session, &bf, &GridGeometry::new(), &Default::default())
        .unwrap();
    assert_eq!(session.pending_uses().len(), 1);

    session.cancel().unwrap();
    assert!(session.pending_uses().is_empty());
    assert!(engine.commit_pending_uses(&mut session).await.is_err());
    assert!(store.contains(&DocumentUuid::new("Actor.hero.ActiveEffect.1")));
}

#[tokio::test]
async fn fail_outcome_blocks_the_commit() {
    let bf = battlefield(vec![
        Effect::new("Actor.hero.ActiveEffect.1", "Inspiration")
            .with_change("flags.ac5e.attack.advantage", "once"),
        Effect::new("Actor.hero.ActiveEffect.2", "Doom").with_change("flags.ac5e.attack.fail", "true"),
    ]);
    let store = Arc::new(MemoryStore::from_battlefield(&bf));
    let engine = engine(store.clone());
    let mut session = engine.open_session(attack());
    let delta = engine
        .evaluate(&mut session, &bf, &GridGeometry::new(), &Default::default())
        .unwrap();
    assert!(delta.is_forced_fail());

    let summary = engine.commit_pending_uses(&mut session).await.unwrap();
    assert!(summary.blocked);
    assert_eq!(session.state(), SessionState::Discarded);
    assert!(store.contains(&DocumentUuid::new("Actor.hero.ActiveEffect.1")));
}

#[tokio::test]
async fn once_deletes_the_effect_on_commit() {
    let bf = battlefield(vec![
        Effect::new("Actor.hero.ActiveEffect.1", "Inspiration")
            .with_change("flags.ac5e.attack.advantage", "once"),
    ]);
    let store = Arc::new(MemoryStore::from_battlefield(&bf));
    let engine = engine(store.clone());
    let mut session = engine.open_session(attack());
    engine
        .evaluate(&mut session, &bf, &GridGeometry::new(), &Default::default())
        .unwrap();
    engine.commit_pending_uses(&mut session).await.unwrap();
    assert!(!store.contains(&DocumentUuid::new("Actor.hero.ActiveEffect.1")));
}

#[tokio::test]
async fn cadence_survives_in_the_combat_document() {
    let effects = vec![
        Effect::new("Actor.hero.ActiveEffect.1", "Sneak Attack")
            .with_change("flags.ac5e.attack.advantage", "oncePerRound"),
    ];
    let start = with_combat(battlefield(effects.clone()), 2, 0);
    let store = Arc::new(MemoryStore::from_battlefield(&start));
    let engine = engine(store.clone());

    assert_eq!(roll(&engine, &start).await, AdvantageMode::Advantage);
    let later = with_combat(battlefield(effects.clone()), 2, 3);
    assert_eq!(roll(&engine, &later).await, AdvantageMode::Normal);
    let next_round = with_combat(battlefield(effects), 3, 0);
    assert_eq!(roll(&engine, &next_round).await, AdvantageMode::Advantage);
}

#[tokio::test]
async fn non_authority_forwards_cadence_to_the_peer() {
    let bf = with_combat(
        battlefield(vec![
            Effect::new("Actor.hero.ActiveEffect.1", "Riposte")
                .with_change("flags.ac5e.attack.bonus", "bonus=2; oncePerTurn"),
        ]),
        1,
        0,
    );
    let store = Arc::new(MemoryStore::from_battlefield(&bf));
    let peer = Arc::new(MemoryAuthority::new(store.clone(), PATH));
    let config = EngineConfig::default().with_authority(false);
    let engine = Engine::new(config, store.clone(), peer.clone());

    let mut session = engine.open_session(attack());
    engine
        .evaluate(&mut session, &bf, &GridGeometry::new(), &Default::default())
        .unwrap();
    let summary = engine.commit_pending_uses(&mut session).await.unwrap();
    assert_eq!(summary.report.cadence_recorded, 1);
    assert_eq!(peer.queries(), 1);

    let state = engine.load_cadence(&bf).await.unwrap();
    assert!(!state.is_empty());
}

#[tokio::test]
async fn opt_in_reselection_reuses_the_cache() {
    let bf = battlefield(vec![
        Effect::new("Actor.hero.ActiveEffect.1", "Bardic Inspiration")
            .with_change("flags.ac5e.attack.bonus", "bonus=1d6; optin"),
    ]);
    let store = Arc::new(MemoryStore::from_battlefield(&bf));
    let engine = engine(store);
    let geometry = GridGeometry::new();
    let mut session = engine.open_session(attack());

    let first = engine
        .evaluate(&mut session, &bf, &geometry, &Default::default())
        .unwrap();
    assert!(first.injected_formula_parts.is_empty());
    let choice = session.resolution().unwrap().opt_ins[0].clone();
    assert!(!choice.selected);
    assert_eq!(choice.mode, Mode::Bonus);

    let selected = session.request().clone().select(choice.id.clone());
    session.update_request(selected).unwrap();
    let second = engine
        .evaluate(&mut session, &bf, &geometry, &Default::default())
        .unwrap();
    assert_eq!(second.injected_formula_parts, vec!["+1d6".to_string()]);
    assert_eq!(session.cache().stats().0, 1);

    // Re-evaluating the same selection does not stack the part.
    let again = session.request().clone();
    session.update_request(again).unwrap();
    engine
        .evaluate(&mut session, &bf, &geometry, &Default::default())
        .unwrap();
    assert_eq!(session.parts(), ["1d20", "@mod", "+1d6"]);
}

/// Yields to the scheduler after every read, so a read-modify-write can be
/// overtaken between its load and its write.
struct YieldingStore(Arc<MemoryStore>);

#[async_trait]
impl DocumentStore for YieldingStore {
    fn can_write(&self, document: &DocumentUuid) -> bool {
        self.0.can_write(document)
    }

    async fn read_field(&self, document: &DocumentUuid, path: &str) -> HostResult<Option<Json>> {
        let value = self.0.read_field(document, path).await;
        tokio::task::yield_now().await;
        value
    }

    async fn update_document(
        &self,
        document: &DocumentUuid,
        path: &str,
        value: Json,
    ) -> HostResult<()> {
        self.0.update_document(document, path, value).await
    }

    async fn delete_document(&self, document: &DocumentUuid) -> HostResult<()> {
        self.0.delete_document(document).await
    }
}

fn wand_uses(store: &MemoryStore) -> Json {
    store.get(&DocumentUuid::new("Actor.hero.Item.wand")).unwrap()["system"]["uses"]["value"]
        .clone()
}

#[tokio::test]
async fn concurrent_commits_keep_both_cadence_records() {
    let bf = with_combat(
        battlefield(vec![
            Effect::new("Actor.hero.ActiveEffect.a", "Sneak Attack")
                .with_change("flags.ac5e.attack.advantage", "oncePerCombat; optin"),
            Effect::new("Actor.hero.ActiveEffect.b", "Riposte")
                .with_change("flags.ac5e.attack.bonus", "bonus=2; oncePerCombat; optin"),
        ]),
        1,
        0,
    );
    let inner = Arc::new(MemoryStore::from_battlefield(&bf));
    let engine = Engine::new(
        EngineConfig::default(),
        Arc::new(YieldingStore(inner.clone())),
        Arc::new(NoAuthority),
    );
    let geometry = GridGeometry::new();
    let cadence = CadenceState::new();

    let rule_a = "Actor.hero.ActiveEffect.a:0:attack:source";
    let rule_b = "Actor.hero.ActiveEffect.b:0:attack:source";
    let mut first = engine.open_session(attack().select(rule_a));
    engine.evaluate(&mut first, &bf, &geometry, &cadence).unwrap();
    let mut second = engine.open_session(attack().select(rule_b));
    engine.evaluate(&mut second, &bf, &geometry, &cadence).unwrap();
    assert_eq!(first.pending_uses().len(), 1);
    assert_eq!(second.pending_uses().len(), 1);

    let (a, b) = tokio::join!(
        engine.commit_pending_uses(&mut first),
        engine.commit_pending_uses(&mut second)
    );
    assert_eq!(a.unwrap().report.cadence_recorded, 1);
    assert_eq!(b.unwrap().report.cadence_recorded, 1);

    let state = engine.load_cadence(&bf).await.unwrap();
    assert_eq!(state.used.once_per_combat.len(), 2);
    assert!(state.record(Cadence::OncePerCombat, rule_a).is_some());
    assert!(state.record(Cadence::OncePerCombat, rule_b).is_some());
}

#[tokio::test]
async fn rolls_staged_from_one_snapshot_each_spend_a_use() {
    let bf = battlefield(vec![
        Effect::new("Actor.hero.ActiveEffect.1", "Wand of Aim")
            .with_change("flags.ac5e.attack.advantage", "usesCount=item:Wand"),
    ]);
    let store = Arc::new(MemoryStore::from_battlefield(&bf));
    let engine = engine(store.clone());
    let geometry = GridGeometry::new();
    let cadence = CadenceState::new();

    let mut sessions: Vec<_> = (0..3).map(|_| engine.open_session(attack())).collect();
    for session in &mut sessions {
        let delta = engine.evaluate(session, &bf, &geometry, &cadence).unwrap();
        assert_eq!(delta.advantage_mode, AdvantageMode::Advantage);
    }

    let first = engine.commit_pending_uses(&mut sessions[0]).await.unwrap();
    assert_eq!(first.report.applied, 1);
    let second = engine.commit_pending_uses(&mut sessions[1]).await.unwrap();
    assert_eq!(second.report.applied, 1);
    assert_eq!(wand_uses(&store), json!(0));

    // The third roll saw two uses, but both are gone by the time it commits.
    let third = engine.commit_pending_uses(&mut sessions[2]).await.unwrap();
    assert_eq!(third.report.exhausted, 1);
    assert_eq!(third.report.applied, 0);
    assert_eq!(wand_uses(&store), json!(0));
}

#[tokio::test]
async fn evaluation_cache_ends_with_its_session() {
    let bf = battlefield(vec![
        Effect::new("Actor.hero.ActiveEffect.1", "Bless")
            .with_change("flags.ac5e.attack.bonus", "bonus=1d4"),
    ]);
    let engine = engine(Arc::new(MemoryStore::from_battlefield(&bf)));
    let geometry = GridGeometry::new();
    let cadence = CadenceState::new();

    for _ in 0..3 {
        let mut session = engine.open_session(attack());
        engine.evaluate(&mut session, &bf, &geometry, &cadence).unwrap();
        assert_eq!(session.cache().len(), 1);
        engine.commit_pending_uses(&mut session).await.unwrap();
        assert!(session.cache().is_empty());
    }

    let mut session = engine.open_session(attack());
    engine.evaluate(&mut session, &bf, &geometry, &cadence).unwrap();
    let profile = RollProfile {
        ability: Some("dex".to_string()),
        ..RollProfile::default()
    };
    let changed = session.request().clone().with_profile(profile);
    session.update_request(changed).unwrap();
    engine.evaluate(&mut session, &bf, &geometry, &cadence).unwrap();
    assert_eq!(session.cache().len(), 1);

    session.cancel().unwrap();
    assert!(session.cache().is_empty());
}
