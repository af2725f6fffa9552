//! One roll attempt from dialog open to commit.
//!
//! A session may be evaluated any number of times while the player changes
//! options. It ends exactly once: committed, or discarded by cancelling or
//! by a blocking `fail` outcome. Discarding drops every staged use.

use ac_core::TurnMarker;
use ac_rules::{ChanceCache, PendingUse, Resolution, RollDelta, RollRequest, RollState};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::cache::EvaluationCache;
use crate::error::{EngineError, EngineResult};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Still being evaluated.
    Open,
    /// Pending uses were handed to the mutation queue.
    Committed,
    /// Cancelled or blocked; nothing was written.
    Discarded,
}

/// A pending roll and everything derived from it so far.
#[derive(Debug)]
pub struct RollSession {
    id: Uuid,
    pub(crate) request: RollRequest,
    pub(crate) previous_request: Option<RollRequest>,
    pub(crate) resolution: Option<Resolution>,
    pub(crate) delta: Option<RollDelta>,
    pub(crate) roll_state: RollState,
    pub(crate) marker: Option<TurnMarker>,
    pub(crate) chance: ChanceCache,
    pub(crate) rng: StdRng,
    pub(crate) cache: EvaluationCache,
    pub(crate) state: SessionState,
}

impl RollSession {
    /// Open a session for a request. `seed` drives chance rolls and dice.
    pub fn new(request: RollRequest, seed: u64) -> Self {
        let roll_state = RollState::new(request.base_parts.clone());
        Self {
            id: Uuid::new_v4(),
            request,
            previous_request: None,
            resolution: None,
            delta: None,
            roll_state,
            marker: None,
            chance: ChanceCache::new(),
            rng: StdRng::seed_from_u64(seed),
            cache: EvaluationCache::new(),
            state: SessionState::Open,
        }
    }

    /// Session id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current request.
    pub fn request(&self) -> &RollRequest {
        &self.request
    }

    /// Lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns true if the session can still be evaluated or committed.
    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    /// Latest resolution.
    pub fn resolution(&self) -> Option<&Resolution> {
        self.resolution.as_ref()
    }

    /// Latest delta.
    pub fn delta(&self) -> Option<&RollDelta> {
        self.delta.as_ref()
    }

    /// Resolutions cached across passes of this roll.
    pub fn cache(&self) -> &EvaluationCache {
        &self.cache
    }

    /// Roll parts with the latest delta applied.
    pub fn parts(&self) -> &[String] {
        &self.roll_state.parts
    }

    /// Uses staged by the latest evaluation.
    pub fn pending_uses(&self) -> &[PendingUse] {
        self.resolution
            .as_ref()
            .map(|r| r.pending_uses.as_slice())
            .unwrap_or_default()
    }

    /// Replace the request after the player changed dialog options. The
    /// next evaluation compares it against the current one.
    pub fn update_request(&mut self, request: RollRequest) -> EngineResult<()> {
        self.ensure_open()?;
        let previous = std::mem::replace(&mut self.request, request);
        self.previous_request = Some(previous);
        Ok(())
    }

    /// Close the dialog without rolling.
    pub fn cancel(&mut self) -> EngineResult<()> {
        self.ensure_open()?;
        self.discard();
        Ok(())
    }

    pub(crate) fn discard(&mut self) {
        let dropped = self.pending_uses().len();
        if let Some(resolution) = &mut self.resolution {
            resolution.pending_uses.clear();
        }
        self.cache.clear();
        self.state = SessionState::Discarded;
        debug!(session = %self.id, dropped, "roll session discarded");
    }

    pub(crate) fn mark_committed(&mut self) {
        self.cache.clear();
        self.state = SessionState::Committed;
    }

    pub(crate) fn ensure_open(&self) -> EngineResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(EngineError::SessionFinalized(self.id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ac_core::HookType;

    fn session() -> RollSession {
        let mut request = RollRequest::new(HookType::Attack, "T.hero");
        request.base_parts = vec!["1d20".to_string(), "@mod".to_string()];
        RollSession::new(request, 7)
    }

    #[test]
    fn new_session_is_open() {
        let session = session();
        assert!(session.is_open());
        assert_eq!(session.parts(), ["1d20", "@mod"]);
        assert!(session.pending_uses().is_empty());
        assert!(session.resolution().is_none());
    }

    #[test]
    fn update_keeps_previous_request() {
        let mut session = session();
        let next = session.request().clone().select("Bless:0");
        session.update_request(next).unwrap();
        assert!(session.previous_request.is_some());
        assert!(session.request().selected_opt_ins.contains("Bless:0"));
    }

    #[test]
    fn cancel_finalizes_once() {
        let mut session = session();
        session.cancel().unwrap();
        assert_eq!(session.state(), SessionState::Discarded);
        assert!(matches!(
            session.cancel(),
            Err(EngineError::SessionFinalized(_))
        ));
        let request = session.request().clone();
        assert!(session.update_request(request).is_err());
    }
}
