// ============================================================
// Layer 3: Training results and config bundles
// ============================================================

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::device::DeviceInfo;

/// Score summary of one evaluation. `final_score` is the signed,
/// weighted combination of `metric_values` (higher is better).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsOutputs {
    pub final_score:   f64,
    pub metric_values: BTreeMap<String, f64>,
}

/// What `save` writes to `final_results.json`.
pub type FinalResults = MetricsOutputs;

impl MetricsOutputs {
    pub fn new(final_score: f64, metric_values: BTreeMap<String, f64>) -> Self {
        Self { final_score, metric_values }
    }

    /// Stand-in used when results are requested before training finished.
    pub fn placeholder() -> Self {
        let mut metric_values = BTreeMap::new();
        metric_values.insert("unknown".to_string(), 0.0);
        Self { final_score: 0.0, metric_values }
    }
}

/// Everything needed to rebuild a pipeline's shape (not its weights).
/// `extra` carries family-specific keys set by a pack callback and read
/// back by a load callback; they sit at the top level of the JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigBundle<C> {
    pub config:      C,
    pub device_info: DeviceInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_dim:   Option<usize>,
    #[serde(flatten)]
    pub extra:       Map<String, Value>,
}
