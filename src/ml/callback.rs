// Built-in trainer callbacks.
//
//   _log_metrics_msg      writes every evaluation to metrics.txt and,
//                         when verbose, echoes it through tracing
//   _default_opt_settings fills optimizer/scheduler defaults into every
//                         scope of the optimizer settings

use serde::Deserialize;
use serde_json::{json, Value};

use crate::domain::results::MetricsOutputs;
use crate::domain::settings::{OptimizerPack, ALL_SCOPE};
use crate::domain::traits::{CallbackContext, EpochRecord, TrainerCallback};
use crate::error::{Error, Result};
use crate::infra::metrics::MetricsLogger;
use crate::ml::optim::{default_lr, ADAM};

pub const LOG_METRICS_MSG: &str = "_log_metrics_msg";
pub const DEFAULT_OPT_SETTINGS: &str = "_default_opt_settings";

fn parse<T: for<'de> Deserialize<'de> + Default>(name: &str, config: &Value) -> Result<T> {
    if config.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(config.clone()).map_err(|e| Error::config(format!("callback_configs.{name}"), e.to_string()))
}

// ─── _log_metrics_msg ─────────────────────────────────────────────────────────
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogMetricsConfig {
    pub verbose: bool,
}

impl Default for LogMetricsConfig {
    fn default() -> Self {
        Self { verbose: true }
    }
}

#[derive(Debug)]
pub struct LogMetricsMsg {
    verbose: bool,
    logger:  Option<MetricsLogger>,
}

impl LogMetricsMsg {
    pub fn from_config(config: &Value) -> Result<Self> {
        let config: LogMetricsConfig = parse(LOG_METRICS_MSG, config)?;
        Ok(Self { verbose: config.verbose, logger: None })
    }
}

impl TrainerCallback for LogMetricsMsg {
    fn name(&self) -> &str {
        LOG_METRICS_MSG
    }

    fn initialize(&mut self, ctx: &mut CallbackContext<'_>) -> Result<()> {
        if let Some(workplace) = ctx.workplace {
            self.logger = Some(MetricsLogger::new(workplace)?);
        }
        Ok(())
    }

    fn log_metrics(&mut self, record: &EpochRecord<'_>) -> Result<()> {
        let line = match &self.logger {
            Some(logger) => logger.log(record)?,
            None => MetricsLogger::format(record),
        };
        if self.verbose {
            tracing::info!("{}", line);
        }
        Ok(())
    }

    fn finalize(&mut self, final_results: &MetricsOutputs) -> Result<()> {
        tracing::info!("Final score: {:.6}", final_results.final_score);
        Ok(())
    }
}

// ─── _default_opt_settings ────────────────────────────────────────────────────
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DefaultOptConfig {
    /// Overrides the per-optimizer default learning rate.
    pub lr: Option<f64>,
}

#[derive(Debug)]
pub struct DefaultOptSettings {
    lr: Option<f64>,
}

impl DefaultOptSettings {
    pub fn from_config(config: &Value) -> Result<Self> {
        let config: DefaultOptConfig = parse(DEFAULT_OPT_SETTINGS, config)?;
        Ok(Self { lr: config.lr })
    }

    fn scheduler_defaults(scheduler: Option<&str>) -> serde_json::Map<String, Value> {
        let defaults = match scheduler {
            Some("warmup") => json!({"multiplier": 3.0, "warmup_step": 100}),
            Some("step") => json!({"step_size": 1000, "gamma": 0.5}),
            _ => json!({}),
        };
        defaults.as_object().cloned().unwrap_or_default()
    }
}

impl TrainerCallback for DefaultOptSettings {
    fn name(&self) -> &str {
        DEFAULT_OPT_SETTINGS
    }

    fn initialize(&mut self, ctx: &mut CallbackContext<'_>) -> Result<()> {
        let settings = &mut *ctx.optimizer_settings;
        if settings.is_empty() {
            settings.insert(ALL_SCOPE.to_string(), OptimizerPack::named(ADAM, "warmup"));
        }
        for (scope, pack) in settings.iter_mut() {
            let mut defaults = OptimizerPack::named(ADAM, "warmup");
            let optimizer    = pack.optimizer.clone().unwrap_or_else(|| ADAM.to_string());
            let lr           = self.lr.unwrap_or_else(|| default_lr(&optimizer));
            defaults.optimizer_config.insert("lr".into(), json!(lr));
            defaults.scheduler_config = Self::scheduler_defaults(pack.scheduler.as_deref().or(Some("warmup")));
            pack.fill_from(&defaults);
            tracing::debug!("Optimizer settings for '{}': {:?}", scope, pack);
        }
        Ok(())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::settings::OptimizerSettings;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_opt_settings_fill_but_keep_caller_values() {
        let mut settings = OptimizerSettings::new();
        settings.insert(ALL_SCOPE.into(), OptimizerPack { optimizer: Some("sgd".into()), ..Default::default() });

        let mut cb  = DefaultOptSettings::from_config(&Value::Null).unwrap();
        let mut ctx = CallbackContext { workplace: None, optimizer_settings: &mut settings };
        cb.initialize(&mut ctx).unwrap();

        let pack = &settings[ALL_SCOPE];
        assert_eq!(pack.optimizer.as_deref(), Some("sgd"));
        assert_eq!(pack.scheduler.as_deref(), Some("warmup"));
        assert_eq!(pack.optimizer_config["lr"], json!(1e-2));
        assert_eq!(pack.scheduler_config["warmup_step"], json!(100));
    }

    #[test]
    fn test_default_opt_settings_creates_all_scope() {
        let mut settings = OptimizerSettings::new();
        let mut cb  = DefaultOptSettings::from_config(&json!({"lr": 0.5})).unwrap();
        let mut ctx = CallbackContext { workplace: None, optimizer_settings: &mut settings };
        cb.initialize(&mut ctx).unwrap();
        assert_eq!(settings[ALL_SCOPE].optimizer.as_deref(), Some(ADAM));
        assert_eq!(settings[ALL_SCOPE].optimizer_config["lr"], json!(0.5));
    }

    #[test]
    fn test_log_metrics_writes_workplace_file() {
        let tmp          = TempDir::new().unwrap();
        let mut settings = OptimizerSettings::new();
        let mut cb       = LogMetricsMsg::from_config(&json!({"verbose": false})).unwrap();
        let mut ctx      = CallbackContext { workplace: Some(tmp.path()), optimizer_settings: &mut settings };
        cb.initialize(&mut ctx).unwrap();

        let metrics = MetricsOutputs::new(-0.1, BTreeMap::from([("mae".to_string(), 0.1)]));
        cb.log_metrics(&EpochRecord { epoch: 1, step: 4, lr: 1e-3, train_loss: 0.2, metrics: &metrics }).unwrap();

        let text = fs::read_to_string(tmp.path().join("metrics.txt")).unwrap();
        assert_eq!(text.lines().count(), 1);
    }
}
