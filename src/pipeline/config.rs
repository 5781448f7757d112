// ============================================================
// Layer 2: Pipeline configuration
// ============================================================
// The versioned, serialisable description of a pipeline. After
// trainer defaults are applied it is written to `configs.json` at
// construction, rewritten once data preparation fills derived
// fields, and embedded in `config_bundle.json` by save/pack, so
// feeding it back into a constructor rebuilds an equivalent
// (untrained) pipeline.
//
// Every field has a default so partial JSON files are accepted:
//
//   { "loss_name": "mae", "trainer": { "state_config": { "num_epoch": 5 } } }
//
// `validate` checks names against the injected registries, so an
// unknown loss or metric fails at construction, not mid-training.

use std::collections::BTreeMap;
use std::path::PathBuf;

use burn::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::constants::DATA_INFO_FILE;
use crate::domain::settings::{OptimizerPack, OptimizerSettings, ALL_SCOPE};
use crate::error::{Error, Result};
use crate::ml::callback::{DEFAULT_OPT_SETTINGS, LOG_METRICS_MSG};
use crate::ml::optim::{check_pack, ADAM};
use crate::ml::registries::Registries;

pub const CONFIG_VERSION: u32 = 1;

// ─── Trainer configuration ────────────────────────────────────────────────────
/// Epoch policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub num_epoch:   usize,
    pub max_epoch:   usize,
    pub fixed_epoch: Option<usize>,
    pub log_steps:   Option<usize>,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            num_epoch:   40,
            max_epoch:   1000,
            fixed_epoch: None,
            log_steps:   None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TqdmSettings {
    pub use_tqdm: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub state_config:          StateConfig,
    pub workplace:             PathBuf,
    pub data_info_name:        String,
    pub metric_names:          Option<Vec<String>>,
    pub metric_configs:        BTreeMap<String, Value>,
    pub metric_weights:        BTreeMap<String, f64>,
    pub use_losses_as_metrics: bool,
    pub monitor_names:         Option<Vec<String>>,
    pub monitor_configs:       BTreeMap<String, Value>,
    pub callback_names:        Option<Vec<String>>,
    pub callback_configs:      BTreeMap<String, Value>,
    pub auto_callback:         bool,
    pub optimizer_settings:    Option<OptimizerSettings>,
    pub lr:                    Option<f64>,
    pub clip_norm:             f64,
    pub use_amp:               bool,
    pub tqdm_settings:         TqdmSettings,
    pub seed:                  Option<u64>,
    pub max_snapshot_file:     usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            state_config:          StateConfig::default(),
            workplace:             PathBuf::from("_logs"),
            data_info_name:        DATA_INFO_FILE.to_string(),
            metric_names:          None,
            metric_configs:        BTreeMap::new(),
            metric_weights:        BTreeMap::new(),
            use_losses_as_metrics: false,
            monitor_names:         None,
            monitor_configs:       BTreeMap::new(),
            callback_names:        None,
            callback_configs:      BTreeMap::new(),
            auto_callback:         true,
            optimizer_settings:    None,
            lr:                    None,
            clip_norm:             0.0,
            use_amp:               false,
            tqdm_settings:         TqdmSettings::default(),
            seed:                  None,
            max_snapshot_file:     5,
        }
    }
}

impl TrainerConfig {
    /// Fill optimizer settings, monitors and callbacks the caller left
    /// unset. Anything the caller supplied is kept as is; with
    /// `auto_callback` off only the optimizer settings are filled.
    pub fn apply_defaults(&mut self) {
        if self.optimizer_settings.is_none() {
            let mut settings = OptimizerSettings::new();
            settings.insert(ALL_SCOPE.to_string(), OptimizerPack::named(ADAM, "warmup"));
            self.optimizer_settings = Some(settings);
        }
        if !self.auto_callback {
            return;
        }
        if self.monitor_names.is_none() {
            self.monitor_names = Some(vec!["mean_std".to_string(), "plateau".to_string()]);
        }

        let callbacks = self.callback_names.get_or_insert_with(Vec::new);
        for name in [LOG_METRICS_MSG, DEFAULT_OPT_SETTINGS] {
            if !callbacks.iter().any(|c| c == name) {
                callbacks.push(name.to_string());
            }
        }

        let verbose = !self.tqdm_settings.use_tqdm;
        merge_default(self.callback_configs.entry(LOG_METRICS_MSG.to_string()).or_insert(Value::Null), "verbose", json!(verbose));
        if let Some(lr) = self.lr {
            merge_default(self.callback_configs.entry(DEFAULT_OPT_SETTINGS.to_string()).or_insert(Value::Null), "lr", json!(lr));
        }

    }

    pub fn metric_config(&self, name: &str) -> Value {
        self.metric_configs.get(name).cloned().unwrap_or(Value::Null)
    }

    pub fn monitor_config(&self, name: &str) -> Value {
        self.monitor_configs.get(name).cloned().unwrap_or(Value::Null)
    }

    pub fn callback_config(&self, name: &str) -> Value {
        self.callback_configs.get(name).cloned().unwrap_or(Value::Null)
    }
}

/// Set `key` on a JSON object slot unless it is already present.
fn merge_default(slot: &mut Value, key: &str, value: Value) {
    if slot.is_null() {
        *slot = Value::Object(serde_json::Map::new());
    }
    if let Some(map) = slot.as_object_mut() {
        map.entry(key.to_string()).or_insert(value);
    }
}

// ─── Pipeline configuration ───────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub version:          u32,
    pub loss_name:        String,
    pub loss_config:      Value,
    pub shuffle_train:    bool,
    pub batch_size:       usize,
    pub valid_batch_size: usize,
    pub trainer:          TrainerConfig,
    /// Set while a pipeline is being restored: no workplace, no logs.
    #[serde(skip)]
    pub in_loading:       bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            version:          CONFIG_VERSION,
            loss_name:        String::new(),
            loss_config:      Value::Null,
            shuffle_train:    true,
            batch_size:       128,
            valid_batch_size: 512,
            trainer:          TrainerConfig::default(),
            in_loading:       false,
        }
    }
}

impl PipelineConfig {
    pub fn new(loss_name: &str) -> Self {
        Self { loss_name: loss_name.to_string(), ..Self::default() }
    }

    /// Metrics default to the loss itself; trainer defaults follow.
    pub fn apply_defaults(&mut self) {
        if self.trainer.metric_names.is_none() {
            self.trainer.metric_names = Some(vec![self.loss_name.clone()]);
        }
        self.trainer.apply_defaults();
    }

    pub fn validate<B: Backend>(&self, registries: &Registries<B>) -> Result<()> {
        if self.version != CONFIG_VERSION {
            return Err(Error::config(
                "version",
                format!("unsupported config version {} (expected {CONFIG_VERSION})", self.version),
            ));
        }
        if self.loss_name.is_empty() {
            return Err(Error::config("loss_name", "is required"));
        }
        if !registries.losses.contains(&self.loss_name) {
            return Err(Error::config(
                "loss_name",
                format!("'{}' is not registered (known: {})", self.loss_name, registries.losses.names().join(", ")),
            ));
        }
        if self.batch_size == 0 || self.valid_batch_size == 0 {
            return Err(Error::config("batch_size", "batch sizes must be positive"));
        }

        let t = &self.trainer;
        let state = &t.state_config;
        if state.num_epoch == 0 || state.max_epoch < state.num_epoch {
            return Err(Error::config(
                "trainer.state_config",
                format!("need 0 < num_epoch ({}) <= max_epoch ({})", state.num_epoch, state.max_epoch),
            ));
        }
        if state.fixed_epoch == Some(0) {
            return Err(Error::config("trainer.state_config.fixed_epoch", "must be positive"));
        }
        if t.max_snapshot_file == 0 {
            return Err(Error::config("trainer.max_snapshot_file", "must be positive"));
        }
        if !(t.clip_norm.is_finite() && t.clip_norm >= 0.0) {
            return Err(Error::config("trainer.clip_norm", "must be a non-negative number"));
        }
        if let Some(lr) = t.lr {
            if !(lr.is_finite() && lr > 0.0) {
                return Err(Error::config("trainer.lr", "must be positive"));
            }
        }

        if let Some(settings) = &t.optimizer_settings {
            if !settings.contains_key(ALL_SCOPE) {
                return Err(Error::config("trainer.optimizer_settings", format!("no '{ALL_SCOPE}' scope")));
            }
            for (scope, pack) in settings {
                check_pack(scope, pack)?;
            }
        }

        let families: [(&str, &Option<Vec<String>>, bool); 3] = [
            ("trainer.metric_names", &t.metric_names, true),
            ("trainer.monitor_names", &t.monitor_names, false),
            ("trainer.callback_names", &t.callback_names, false),
        ];
        for (field, names, is_metric) in families {
            for name in names.iter().flatten() {
                let known = match field {
                    "trainer.metric_names" => registries.metrics.contains(name),
                    "trainer.monitor_names" => registries.monitors.contains(name),
                    _ => registries.callbacks.contains(name),
                };
                if !known {
                    return Err(Error::config(field, format!("'{name}' is not registered")));
                }
            }
            if is_metric && names.as_ref().is_some_and(|n| n.is_empty()) {
                return Err(Error::config(field, "at least one metric is required"));
            }
        }
        Ok(())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::optim::SGD;
    use burn::backend::NdArray;

    fn registries() -> Registries<NdArray> {
        Registries::with_defaults().unwrap()
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let cfg: PipelineConfig =
            serde_json::from_str(r#"{"loss_name":"mae","trainer":{"state_config":{"num_epoch":3}}}"#).unwrap();
        assert_eq!(cfg.version, CONFIG_VERSION);
        assert_eq!(cfg.batch_size, 128);
        assert_eq!(cfg.trainer.state_config.num_epoch, 3);
        assert_eq!(cfg.trainer.state_config.max_epoch, 1000);
        assert_eq!(cfg.trainer.workplace, PathBuf::from("_logs"));
        assert!(!cfg.in_loading);
    }

    #[test]
    fn test_defaults_keep_caller_values() {
        let mut cfg = PipelineConfig::new("mse");
        cfg.trainer.callback_names = Some(vec!["_log_metrics_msg".into()]);
        cfg.trainer.callback_configs.insert(LOG_METRICS_MSG.into(), json!({"verbose": false}));
        cfg.trainer.lr = Some(0.1);
        cfg.apply_defaults();

        let t = &cfg.trainer;
        assert_eq!(t.metric_names.as_deref(), Some(&["mse".to_string()][..]));
        assert_eq!(t.monitor_names.as_ref().unwrap(), &vec!["mean_std".to_string(), "plateau".to_string()]);
        assert_eq!(t.callback_names.as_ref().unwrap(), &vec![LOG_METRICS_MSG.to_string(), DEFAULT_OPT_SETTINGS.to_string()]);
        assert_eq!(t.callback_configs[LOG_METRICS_MSG]["verbose"], json!(false));
        assert_eq!(t.callback_configs[DEFAULT_OPT_SETTINGS]["lr"], json!(0.1));
        assert_eq!(t.optimizer_settings.as_ref().unwrap()[ALL_SCOPE].optimizer.as_deref(), Some("adam"));
    }

    #[test]
    fn test_auto_callback_off_still_fills_optimizer() {
        let mut cfg = PipelineConfig::new("mae");
        cfg.trainer.auto_callback = false;
        cfg.apply_defaults();
        assert!(cfg.trainer.monitor_names.is_none());
        assert!(cfg.trainer.callback_names.is_none());
        let all = &cfg.trainer.optimizer_settings.as_ref().unwrap()[ALL_SCOPE];
        assert_eq!(all.optimizer.as_deref(), Some(ADAM));
        assert_eq!(all.scheduler.as_deref(), Some("warmup"));
        assert!(cfg.validate(&registries()).is_ok());
    }

    #[test]
    fn test_optimizer_settings_checked_up_front() {
        let r = registries();

        let mut cfg = PipelineConfig::new("mae");
        let mut settings = OptimizerSettings::new();
        settings.insert(ALL_SCOPE.into(), OptimizerPack { optimizer: Some("nope".into()), ..Default::default() });
        cfg.trainer.optimizer_settings = Some(settings);
        cfg.apply_defaults();
        let err = cfg.validate(&r).unwrap_err().to_string();
        assert!(err.contains("trainer.optimizer_settings.all.optimizer"), "{err}");
        assert!(err.contains("nope"));

        let mut cfg = PipelineConfig::new("mae");
        let mut settings = OptimizerSettings::new();
        settings.insert(ALL_SCOPE.into(), OptimizerPack::named(ADAM, "cosine"));
        cfg.trainer.optimizer_settings = Some(settings);
        cfg.apply_defaults();
        assert!(cfg.validate(&r).unwrap_err().to_string().contains("trainer.optimizer_settings.all.scheduler"));

        let mut cfg = PipelineConfig::new("mae");
        let mut settings = OptimizerSettings::new();
        settings.insert("head".into(), OptimizerPack::named(SGD, "constant"));
        cfg.trainer.optimizer_settings = Some(settings);
        cfg.apply_defaults();
        assert!(cfg.validate(&r).unwrap_err().to_string().contains("no 'all' scope"));
    }

    #[test]
    fn test_validation_names_field() {
        let r = registries();
        assert!(PipelineConfig::new("mae").validate(&r).is_ok());

        let err = PipelineConfig::new("huber").validate(&r).unwrap_err();
        assert!(err.to_string().contains("loss_name"));

        let mut cfg = PipelineConfig::new("mae");
        cfg.trainer.metric_names = Some(vec!["bleu".into()]);
        assert!(cfg.validate(&r).unwrap_err().to_string().contains("trainer.metric_names"));

        let mut cfg = PipelineConfig::new("mae");
        cfg.version = 7;
        assert!(cfg.validate(&r).is_err());

        let mut cfg = PipelineConfig::new("mae");
        cfg.trainer.state_config.max_epoch = 1;
        assert!(cfg.validate(&r).is_err());
    }

    #[test]
    fn test_in_loading_is_not_serialised() {
        let mut cfg = PipelineConfig::new("mae");
        cfg.in_loading = true;
        let json = serde_json::to_value(&cfg).unwrap();
        assert!(json.get("in_loading").is_none());
    }
}
