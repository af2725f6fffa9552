//! The engine facade the host roll lifecycle talks to.

use std::sync::Arc;

use ac_core::{Battlefield, CombatState, DocumentUuid, Geometry};
use ac_rules::{
    CadenceState, ChanceCache, English, EvaluationContext, Gate, Grammar, PendingUseKind, Resolution, RollDelta, RollRequest, RollSettings, RollState, RuleIndex,
    aggregate, build_context, describe, resolve,
};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{Reevaluation, Signature, policy};
use crate::cadence_store::{CadenceRequest, CadenceStore};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, HostError};
use crate::host::{AuthorityPeer, DocumentStore, Mutation};
use crate::queue::{self, CommitBatch, CommitReport, QueueHandle};
use crate::session::RollSession;

/// What a commit did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitSummary {
    /// The roll was blocked by a `fail` outcome and nothing was written.
    pub blocked: bool,
    /// Cadence records and document mutations.
    pub report: CommitReport,
}

/// Rule evaluation and commit for one client.
pub struct Engine {
    config: EngineConfig,
    grammar: Grammar,
    queue: QueueHandle,
    cadence: CadenceStore,
}

impl Engine {
    /// Create an engine over the host ports.
    ///
    /// Spawns the mutation queue worker, so this must run inside a tokio
    /// runtime.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn DocumentStore>,
        peer: Arc<dyn AuthorityPeer>,
    ) -> Self {
        let grammar =
            Grammar::new(config.module_id.clone()).with_keywords(&config.context_keywords);
        let cadence = CadenceStore::new(
            store.clone(),
            peer.clone(),
            config.cadence_path(),
            config.is_authority,
        );
        let queue = queue::spawn(store, peer, cadence.clone());
        Self {
            config,
            grammar,
            queue,
            cadence,
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Rule grammar in use.
    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    /// Snapshot the situation of a pending roll.
    pub fn build_context(
        &self,
        battlefield: &Battlefield,
        geometry: &dyn Geometry,
        request: &RollRequest,
    ) -> EngineResult<EvaluationContext> {
        Ok(build_context(battlefield, geometry, request)?)
    }

    /// Parse every active effect on the battlefield and resolve the rules
    /// that apply to the context into per-side buckets.
    pub fn resolve_rules<R: Rng + ?Sized>(
        &self,
        ctx: &EvaluationContext,
        battlefield: &Battlefield,
        geometry: &dyn Geometry,
        cadence: &CadenceState,
        chance: &mut ChanceCache,
        rng: &mut R,
    ) -> Resolution {
        let index = RuleIndex::build(battlefield, &self.grammar);
        for warning in index.warnings() {
            debug!(effect = %warning.effect, key = %warning.key, "{}", warning.message);
        }
        let candidates = index.collect(ctx, battlefield, geometry);
        let gate = Gate::new(cadence.clone(), ctx.combat.as_ref());
        let resolution = resolve(&candidates, ctx, battlefield, &gate, chance, rng);
        debug!(
            hook = %ctx.hook(),
            candidates = candidates.len(),
            skipped = resolution.skipped.len(),
            pending = resolution.pending_uses.len(),
            "rules resolved"
        );
        resolution
    }

    /// Fold a resolution into changes for the roll.
    pub fn aggregate(
        &self,
        resolution: &Resolution,
        request: &RollRequest,
        prior: &RollState,
    ) -> RollDelta {
        let settings = RollSettings::for_request(
            request,
            self.config.default_critical_threshold,
            self.config.default_fumble_threshold,
        );
        aggregate(resolution, &settings, prior)
    }

    /// Tooltip text for a resolution.
    pub fn describe(&self, resolution: &Resolution) -> String {
        describe(resolution, &English)
    }

    /// Open a session for a pending roll.
    pub fn open_session(&self, request: RollRequest) -> RollSession {
        RollSession::new(request, self.config.seed)
    }

    /// Persisted cadence state of the battlefield's combat, if one runs.
    pub async fn load_cadence(&self, battlefield: &Battlefield) -> EngineResult<CadenceState> {
        let Some(combat) = battlefield.combat.as_ref().filter(|c| c.is_started()) else {
            return Ok(CadenceState::new());
        };
        match self.cadence.load(&combat.id).await {
            Err(EngineError::Host(HostError::MissingDocument(_))) => Ok(CadenceState::new()),
            other => other,
        }
    }

    /// Evaluate (or re-evaluate) a session against the battlefield.
    ///
    /// A pass that only changed opt-in selection, roll mode or the chosen
    /// button reuses the cached resolution of the previous pass. Formula
    /// parts injected by an earlier pass are replaced, never stacked.
    pub fn evaluate(
        &self,
        session: &mut RollSession,
        battlefield: &Battlefield,
        geometry: &dyn Geometry,
        cadence: &CadenceState,
    ) -> EngineResult<RollDelta> {
        session.ensure_open()?;
        let signature = if self.config.cache_enabled {
            Some(Signature::compute(&session.request, battlefield, cadence)?)
        } else {
            None
        };

        let reuse = policy(session.previous_request.as_ref(), &session.request)
            == Reevaluation::Reuse;
        let cached = match (&signature, reuse) {
            (Some(signature), true) => session.cache.get(signature).cloned(),
            _ => None,
        };

        let resolution = match cached {
            Some(mut resolution) => {
                resolution.select(&session.request.selected_opt_ins);
                resolution
            }
            None => {
                let ctx = self.build_context(battlefield, geometry, &session.request)?;
                let resolution = self.resolve_rules(
                    &ctx,
                    battlefield,
                    geometry,
                    cadence,
                    &mut session.chance,
                    &mut session.rng,
                );
                if let Some(signature) = signature {
                    session.cache.put(signature, resolution.clone());
                }
                resolution
            }
        };

        let delta = self.aggregate(&resolution, &session.request, &session.roll_state);
        session.roll_state.apply(&delta);
        session.marker = battlefield
            .combat
            .as_ref()
            .filter(|c| c.is_started())
            .map(CombatState::marker);
        session.resolution = Some(resolution);
        session.delta = Some(delta.clone());
        Ok(delta)
    }

    /// Commit the uses staged by the session's latest evaluation.
    ///
    /// Callable once per session. A session whose roll is blocked by a
    /// `fail` outcome is discarded instead. Missing authority or documents
    /// never fail the call; they are logged and counted.
    pub async fn commit_pending_uses(
        &self,
        session: &mut RollSession,
    ) -> EngineResult<CommitSummary> {
        session.ensure_open()?;
        let blocked = self.config.fail_blocks_roll
            && session.delta.as_ref().is_some_and(RollDelta::is_forced_fail);
        if blocked {
            info!(session = %session.id(), "roll blocked by a fail outcome");
            session.discard();
            return Ok(CommitSummary {
                blocked: true,
                ..CommitSummary::default()
            });
        }
        session.mark_committed();

        let pending = session.pending_uses().to_vec();
        let mut combats: Vec<DocumentUuid> = pending
            .iter()
            .filter_map(|u| match &u.kind {
                PendingUseKind::RecordCadence { combat, .. } => Some(combat.clone()),
                _ => None,
            })
            .collect();
        combats.sort();
        combats.dedup();
        let batch = CommitBatch {
            cadence: combats
                .iter()
                .filter_map(|c| CadenceRequest::record(c, session.marker.as_ref(), &pending))
                .collect(),
            mutations: pending.iter().filter_map(Mutation::from_pending).collect(),
        };

        let mut summary = CommitSummary::default();
        if !batch.is_empty() {
            summary.report = self.queue.commit(batch).await?;
        }
        info!(
            session = %session.id(),
            uses = pending.len(),
            applied = summary.report.applied,
            cadence = summary.report.cadence_recorded,
            "pending uses committed"
        );
        Ok(summary)
    }

    /// Forget every cadence record of a combat.
    pub async fn reset_cadence(&self, combat: &DocumentUuid) -> EngineResult<CommitReport> {
        let batch = CommitBatch {
            cadence: vec![CadenceRequest::reset(combat)],
            mutations: Vec::new(),
        };
        let report = self.queue.commit(batch).await?;
        if report.cadence_dropped > 0 {
            warn!(combat = %combat, "cadence reset not recorded");
        }
        Ok(report)
    }

    /// Stop the mutation queue.
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.queue.shutdown().await
    }
}
