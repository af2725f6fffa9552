use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Namespace accepted in rule keys besides `ac5e`; also where cadence
    /// state is stored on the combat document.
    pub module_id: String,
    /// RNG seed for chance rolls and rolled values.
    pub seed: u64,
    /// Reuse evaluations when only presentation options changed.
    pub cache_enabled: bool,
    /// The local client is the authoritative peer.
    pub is_authority: bool,
    /// A `fail` outcome blocks the roll and discards its pending uses.
    pub fail_blocks_roll: bool,
    /// Extra condition keywords, expanded to their expressions.
    pub context_keywords: BTreeMap<String, String>,
    /// Natural d20 result that crits by default.
    pub default_critical_threshold: i64,
    /// Natural d20 result that fumbles by default.
    pub default_fumble_threshold: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            module_id: "automated-conditions-5e".to_string(),
            seed: 42,
            cache_enabled: true,
            is_authority: true,
            fail_blocks_roll: true,
            context_keywords: BTreeMap::new(),
            default_critical_threshold: 20,
            default_fumble_threshold: 1,
        }
    }
}

impl EngineConfig {
    /// Set the RNG seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the module id.
    pub fn with_module_id(mut self, module_id: impl Into<String>) -> Self {
        self.module_id = module_id.into();
        self
    }

    /// Enable or disable the evaluation cache.
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Mark the local client as (not) authoritative.
    pub fn with_authority(mut self, is_authority: bool) -> Self {
        self.is_authority = is_authority;
        self
    }

    /// Choose whether a `fail` outcome blocks the roll.
    pub fn with_fail_blocks_roll(mut self, blocks: bool) -> Self {
        self.fail_blocks_roll = blocks;
        self
    }

    /// Register a condition keyword.
    pub fn with_keyword(mut self, keyword: impl Into<String>, expression: impl Into<String>) -> Self {
        self.context_keywords
            .insert(keyword.into(), expression.into());
        self
    }

    /// Set the default critical and fumble thresholds.
    pub fn with_thresholds(mut self, critical: i64, fumble: i64) -> Self {
        self.default_critical_threshold = critical;
        self.default_fumble_threshold = fumble;
        self
    }

    /// Field path of the cadence state on a combat document.
    pub fn cadence_path(&self) -> String {
        format!("flags.{}.cadence", self.module_id)
    }
}
