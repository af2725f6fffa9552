//! Evaluation cache and the re-evaluation policy.
//!
//! Entries are keyed by a [`Signature`]: a hash over every input that can
//! change which rules fire. Nothing expires by time; a changed input simply
//! produces a different key. Each roll session owns its cache, so entries
//! go away with the session.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;

use ac_core::Battlefield;
use ac_rules::{CadenceState, Resolution, RollRequest};
use serde::Serialize;
use serde_json::{Value as Json, json};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::EngineResult;

/// Request keys whose change alone never requires re-evaluating rules.
pub const REUSABLE_KEYS: &[&str] = &["selectedOptIns", "rollMode", "advantageButton"];

/// Hex SHA-256 over the canonical JSON of the signature inputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Signature(String);

impl Signature {
    /// Signature of one evaluation.
    pub fn compute(
        request: &RollRequest,
        battlefield: &Battlefield,
        cadence: &CadenceState,
    ) -> EngineResult<Self> {
        let mut request = serde_json::to_value(request)?;
        if let Json::Object(map) = &mut request {
            for key in REUSABLE_KEYS {
                map.remove(*key);
            }
        }
        // Map keys serialize sorted, so equal inputs give equal bytes.
        let canonical = json!({
            "request": request,
            "battlefield": serde_json::to_value(battlefield)?,
            "cadence": serde_json::to_value(cadence)?,
        });
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(&canonical)?);
        Ok(Self(hex::encode(hasher.finalize())))
    }

    /// The hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a new pass of the same roll may reuse a cached resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reevaluation {
    /// Only presentation options changed.
    Reuse,
    /// Rules must be evaluated again.
    Full,
}

/// Top-level request keys that differ between two passes.
pub fn changed_keys(previous: &RollRequest, next: &RollRequest) -> EngineResult<BTreeSet<String>> {
    let (Json::Object(prev), Json::Object(next)) =
        (serde_json::to_value(previous)?, serde_json::to_value(next)?)
    else {
        return Ok(BTreeSet::new());
    };
    Ok(prev
        .keys()
        .chain(next.keys())
        .filter(|key| prev.get(*key) != next.get(*key))
        .cloned()
        .collect())
}

/// Decide how to handle a new pass given the previous one.
pub fn policy(previous: Option<&RollRequest>, next: &RollRequest) -> Reevaluation {
    let Some(previous) = previous else {
        return Reevaluation::Full;
    };
    match changed_keys(previous, next) {
        Ok(keys) if keys.iter().all(|k| REUSABLE_KEYS.contains(&k.as_str())) => {
            Reevaluation::Reuse
        }
        _ => Reevaluation::Full,
    }
}

/// Resolutions by signature, oldest evicted first once full.
#[derive(Debug)]
pub struct EvaluationCache {
    entries: HashMap<Signature, Resolution>,
    order: VecDeque<Signature>,
    capacity: usize,
    hits: u64,
    misses: u64,
}

impl Default for EvaluationCache {
    fn default() -> Self {
        Self::with_capacity(1)
    }
}

impl EvaluationCache {
    /// Cache holding only the latest resolution, which is all a re-evaluation
    /// policy comparing against the previous pass can use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache holding at most `capacity` resolutions (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
            hits: 0,
            misses: 0,
        }
    }

    /// Cached resolution for a signature.
    pub fn get(&mut self, signature: &Signature) -> Option<&Resolution> {
        match self.entries.get(signature) {
            Some(resolution) => {
                self.hits += 1;
                debug!(signature = %signature, "evaluation cache hit");
                Some(resolution)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Store (or overwrite) a resolution.
    pub fn put(&mut self, signature: Signature, resolution: Resolution) {
        if self.entries.insert(signature.clone(), resolution).is_none() {
            self.order.push_back(signature);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ac_core::{ActorSnapshot, HookType, RollProfile};

    fn request() -> RollRequest {
        RollRequest::new(HookType::Attack, "T.hero").against("T.orc")
    }

    fn battlefield() -> Battlefield {
        let mut bf = Battlefield::new();
        bf.add_actor(ActorSnapshot::new("Actor.hero", "Hero"));
        bf
    }

    #[test]
    fn equal_inputs_hash_equal() {
        let a = Signature::compute(&request(), &battlefield(), &CadenceState::new()).unwrap();
        let b = Signature::compute(&request(), &battlefield(), &CadenceState::new()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn relevant_changes_change_the_signature() {
        let base = Signature::compute(&request(), &battlefield(), &CadenceState::new()).unwrap();

        let mut bf = battlefield();
        bf.actors[0].statuses.insert("prone".to_string());
        let moved = Signature::compute(&request(), &bf, &CadenceState::new()).unwrap();
        assert_ne!(base, moved);

        let profile = RollProfile {
            ability: Some("dex".to_string()),
            ..RollProfile::default()
        };
        let other = request().with_profile(profile);
        let reprofiled = Signature::compute(&other, &battlefield(), &CadenceState::new()).unwrap();
        assert_ne!(base, reprofiled);
    }

    #[test]
    fn opt_in_selection_keeps_the_signature() {
        let base = Signature::compute(&request(), &battlefield(), &CadenceState::new()).unwrap();
        let selected = request().select("Bless:0");
        let same = Signature::compute(&selected, &battlefield(), &CadenceState::new()).unwrap();
        assert_eq!(base, same);
    }

    #[test]
    fn policy_reuses_only_for_presentation_changes() {
        let first = request();
        assert_eq!(policy(None, &first), Reevaluation::Full);

        let mut second = first.clone().select("Bless:0");
        second.roll_mode = Some("gmroll".to_string());
        assert_eq!(policy(Some(&first), &second), Reevaluation::Reuse);
        assert_eq!(
            changed_keys(&first, &second).unwrap(),
            BTreeSet::from(["rollMode".to_string(), "selectedOptIns".to_string()])
        );

        let retargeted = RollRequest::new(HookType::Attack, "T.hero").against("T.goblin");
        assert_eq!(policy(Some(&first), &retargeted), Reevaluation::Full);
    }

    #[test]
    fn cache_counts_hits_and_misses() {
        let mut cache = EvaluationCache::new();
        let sig = Signature::compute(&request(), &battlefield(), &CadenceState::new()).unwrap();
        assert!(cache.get(&sig).is_none());
        cache.put(sig.clone(), Resolution::default());
        assert!(cache.get(&sig).is_some());
        assert_eq!(cache.stats(), (1, 1));
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn full_cache_evicts_the_oldest_entry() {
        let sig = |target: &str| {
            let request = RollRequest::new(HookType::Attack, "T.hero").against(target);
            Signature::compute(&request, &battlefield(), &CadenceState::new()).unwrap()
        };
        let mut cache = EvaluationCache::with_capacity(2);
        cache.put(sig("T.a"), Resolution::default());
        cache.put(sig("T.b"), Resolution::default());
        cache.put(sig("T.b"), Resolution::default());
        assert_eq!(cache.len(), 2);
        cache.put(sig("T.c"), Resolution::default());
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&sig("T.a")).is_none());
        assert!(cache.get(&sig("T.c")).is_some());

        let mut latest = EvaluationCache::new();
        latest.put(sig("T.a"), Resolution::default());
        latest.put(sig("T.b"), Resolution::default());
        assert_eq!(latest.len(), 1);
    }
}
