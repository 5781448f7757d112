// ============================================================
// Layer 5: Component registries
// ============================================================
// One explicit name → factory table per pluggable family. Built
// once at process start and handed to pipelines as an Arc:
//
//   let registries = Arc::new(Registries::<CpuBackend>::with_defaults()?);
//   let pipeline   = TabularPipeline::new(config, registries.clone())?;
//
// Callers extend it before sharing:
//
//   let mut r = Registries::with_defaults()?;
//   r.metrics.register("my_metric", |_| Ok(Box::new(MyMetric)))?;

use burn::prelude::*;

use crate::domain::traits::{Metric, TrainerCallback, TrainerMonitor};
use crate::error::{Error, Result};
use crate::infra::registry::Registry;
use crate::ml::callback::{DefaultOptSettings, LogMetricsMsg, DEFAULT_OPT_SETTINGS, LOG_METRICS_MSG};
use crate::ml::loss::{CrossEntropyLoss, MaeLoss, MseLoss, CROSS_ENTROPY, MAE, MSE};
use crate::ml::metrics;
use crate::ml::model::FcnnConfig;
use crate::ml::monitor::{BasicMonitor, MeanStdMonitor, PlateauMonitor};
use crate::ml::protocol::Loss;

pub struct Registries<B: Backend> {
    pub losses:    Registry<Box<dyn Loss<B>>>,
    pub metrics:   Registry<Box<dyn Metric>>,
    pub monitors:  Registry<Box<dyn TrainerMonitor>>,
    pub callbacks: Registry<Box<dyn TrainerCallback>>,
    pub models:    Registry<FcnnConfig>,
}

impl<B: Backend> std::fmt::Debug for Registries<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registries")
            .field("losses", &self.losses)
            .field("metrics", &self.metrics)
            .field("monitors", &self.monitors)
            .field("callbacks", &self.callbacks)
            .field("models", &self.models)
            .finish()
    }
}

impl<B: Backend> Registries<B> {
    pub fn empty() -> Self {
        Self {
            losses:    Registry::new("loss"),
            metrics:   Registry::new("metric"),
            monitors:  Registry::new("monitor"),
            callbacks: Registry::new("callback"),
            models:    Registry::new("model"),
        }
    }

    /// Every built-in component.
    pub fn with_defaults() -> Result<Self> {
        let mut r = Self::empty();

        r.losses.register(MAE, |_| Ok(Box::new(MaeLoss) as Box<dyn Loss<B>>))?;
        r.losses.register(MSE, |_| Ok(Box::new(MseLoss) as Box<dyn Loss<B>>))?;
        r.losses.register(CROSS_ENTROPY, |_| Ok(Box::new(CrossEntropyLoss) as Box<dyn Loss<B>>))?;

        for &name in metrics::BUILTIN {
            r.metrics.register(name, move |config| metrics::from_config(name, config))?;
        }

        r.monitors.register("basic", |_| Ok(Box::new(BasicMonitor::default()) as Box<dyn TrainerMonitor>))?;
        r.monitors.register("mean_std", |c| Ok(Box::new(MeanStdMonitor::from_config(c)?) as Box<dyn TrainerMonitor>))?;
        r.monitors.register("plateau", |c| Ok(Box::new(PlateauMonitor::from_config(c)?) as Box<dyn TrainerMonitor>))?;

        r.callbacks.register(LOG_METRICS_MSG, |c| {
            Ok(Box::new(LogMetricsMsg::from_config(c)?) as Box<dyn TrainerCallback>)
        })?;
        r.callbacks.register(DEFAULT_OPT_SETTINGS, |c| {
            Ok(Box::new(DefaultOptSettings::from_config(c)?) as Box<dyn TrainerCallback>)
        })?;

        r.models.register("fcnn", |c| parse_model("fcnn", c, FcnnConfig::default()))?;
        r.models.register("linear", |c| parse_model("linear", c, FcnnConfig::linear()))?;

        Ok(r)
    }
}

/// Overlay a (possibly partial) JSON object on a model's defaults.
fn parse_model(name: &str, config: &serde_json::Value, defaults: FcnnConfig) -> Result<FcnnConfig> {
    let mut merged = serde_json::to_value(&defaults)
        .map_err(|e| Error::config(format!("model_config.{name}"), e.to_string()))?;
    if let (Some(base), Some(overrides)) = (merged.as_object_mut(), config.as_object()) {
        for (k, v) in overrides {
            base.insert(k.clone(), v.clone());
        }
    }
    let config: FcnnConfig = serde_json::from_value(merged)
        .map_err(|e| Error::config(format!("model_config.{name}"), e.to_string()))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use serde_json::{json, Value};

    #[test]
    fn test_defaults_cover_every_family() {
        let r = Registries::<NdArray>::with_defaults().unwrap();
        assert_eq!(r.losses.names(), vec!["cross_entropy", "mae", "mse"]);
        assert_eq!(r.metrics.names().len(), metrics::BUILTIN.len());
        assert!(r.monitors.contains("mean_std") && r.monitors.contains("plateau"));
        assert!(r.callbacks.contains(LOG_METRICS_MSG));
        assert!(r.models.contains("fcnn") && r.models.contains("linear"));
    }

    #[test]
    fn test_linear_model_has_no_hidden_layers() {
        let r = Registries::<NdArray>::with_defaults().unwrap();
        assert!(r.models.create("linear", &Value::Null).unwrap().hidden_units.is_empty());
        let fcnn = r.models.create("fcnn", &json!({"hidden_units": [8]})).unwrap();
        assert_eq!(fcnn.hidden_units, vec![8]);
        assert!(r.models.create("fcnn", &json!({"dropout": 3.0})).is_err());
    }

    #[test]
    fn test_user_components_can_be_added() {
        let mut r = Registries::<NdArray>::with_defaults().unwrap();
        r.losses.register("l1", |_| Ok(Box::new(MaeLoss) as Box<dyn Loss<NdArray>>)).unwrap();
        assert!(r.losses.register("mae", |_| Ok(Box::new(MaeLoss) as Box<dyn Loss<NdArray>>)).is_err());
    }
}
