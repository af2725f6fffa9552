//! Scenario files: a battlefield, an optional pending roll and the engine
//! configuration, as one JSON document.

use std::path::Path;

use ac_core::{Battlefield, GridGeometry};
use ac_engine::EngineConfig;
use ac_rules::RollRequest;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    #[serde(default)]
    pub config: EngineConfig,
    pub battlefield: Battlefield,
    #[serde(default)]
    pub request: Option<RollRequest>,
    /// Token id pairs that cannot see each other.
    #[serde(default)]
    pub blocked_sight: Vec<(String, String)>,
}

impl Scenario {
    /// Read and normalize a scenario file.
    pub fn load(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        let mut scenario: Scenario = serde_json::from_str(&text)
            .map_err(|e| format!("invalid scenario {}: {e}", path.display()))?;
        scenario.battlefield.normalize();
        Ok(scenario)
    }

    pub fn geometry(&self) -> GridGeometry {
        self.blocked_sight
            .iter()
            .fold(GridGeometry::new(), |g, (a, b)| {
                g.with_blocked_sight(a.as_str(), b.as_str())
            })
    }

    pub fn request(&self) -> Result<&RollRequest, String> {
        self.request
            .as_ref()
            .ok_or_else(|| "scenario has no pending roll (`request`)".to_string())
    }
}
