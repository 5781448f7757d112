// ============================================================
// Layer 3: Optimizer settings
// ============================================================
// One "pack" per parameter scope. Only the "all" scope is used by
// the bundled trainer; other scopes are kept so configs written
// for richer models survive a save/load cycle untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const ALL_SCOPE: &str = "all";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerPack {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimizer:        Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler:        Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub optimizer_config: Map<String, Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub scheduler_config: Map<String, Value>,
}

impl OptimizerPack {
    pub fn named(optimizer: &str, scheduler: &str) -> Self {
        Self {
            optimizer: Some(optimizer.to_string()),
            scheduler: Some(scheduler.to_string()),
            ..Default::default()
        }
    }

    /// Fill every unset field from `defaults`; values already present win.
    pub fn fill_from(&mut self, defaults: &OptimizerPack) {
        if self.optimizer.is_none() {
            self.optimizer = defaults.optimizer.clone();
        }
        if self.scheduler.is_none() {
            self.scheduler = defaults.scheduler.clone();
        }
        for (k, v) in &defaults.optimizer_config {
            self.optimizer_config.entry(k.clone()).or_insert_with(|| v.clone());
        }
        for (k, v) in &defaults.scheduler_config {
            self.scheduler_config.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
}

pub type OptimizerSettings = BTreeMap<String, OptimizerPack>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fill_from_keeps_caller_values() {
        let mut mine = OptimizerPack { optimizer: Some("sgd".into()), ..Default::default() };
        mine.optimizer_config.insert("lr".into(), json!(0.5));

        let mut defaults = OptimizerPack::named("adam", "warmup");
        defaults.optimizer_config.insert("lr".into(), json!(1e-3));
        defaults.optimizer_config.insert("momentum".into(), json!(0.9));

        mine.fill_from(&defaults);
        assert_eq!(mine.optimizer.as_deref(), Some("sgd"));
        assert_eq!(mine.scheduler.as_deref(), Some("warmup"));
        assert_eq!(mine.optimizer_config["lr"], json!(0.5));
        assert_eq!(mine.optimizer_config["momentum"], json!(0.9));
    }
}
