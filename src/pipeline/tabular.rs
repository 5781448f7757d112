// ============================================================
// Layer 2: Tabular pipeline family ("ml.simple")
// ============================================================
// Numeric feature rows in, one fully connected network out.
//
//   fit(TabularData::Csv("train.csv"))
//       CsvFileData → TabularModule → (train, valid) loaders
//       FcnnConfig from the model registry → Fcnn<B>
//
// Regression takes its output size from the label width;
// classification needs `output_dim` (the number of classes) and
// expects class indices in the single label column.

use std::path::PathBuf;

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data::csv::read_table;
use crate::data::module::{
    inference_loader, ArrayData, CsvFileData, DataInfo, DataModule, FolderData, Loader, LoaderSettings, TabularModule,
};
use crate::data::weights::SampleWeights;
use crate::domain::device::Placement;
use crate::error::{Error, Result};
use crate::ml::model::Fcnn;
use crate::ml::registries::Registries;
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::dl::DLPipeline;
use crate::pipeline::protocol::{DataPreparable, FamilyConfig, ModulePreparable, PipelineFamily};

pub const TABULAR_PIPELINE: &str = "ml.simple";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TabularConfig {
    #[serde(flatten)]
    pub common:            PipelineConfig,
    pub model_name:        String,
    pub model_config:      Value,
    pub is_classification: bool,
    pub output_dim:        Option<usize>,
    pub label_name:        Option<String>,
    /// Fraction of rows held out for validation when no explicit split exists.
    pub valid_split:       f64,
    pub split_seed:        u64,
}

impl Default for TabularConfig {
    fn default() -> Self {
        Self {
            common:            PipelineConfig::new("mae"),
            model_name:        "fcnn".to_string(),
            model_config:      Value::Null,
            is_classification: false,
            output_dim:        None,
            label_name:        None,
            valid_split:       0.1,
            split_seed:        142857,
        }
    }
}

impl TabularConfig {
    pub fn regression(loss_name: &str) -> Self {
        Self { common: PipelineConfig::new(loss_name), ..Self::default() }
    }

    pub fn classification(num_classes: usize) -> Self {
        Self {
            common: PipelineConfig::new("cross_entropy"),
            is_classification: true,
            output_dim: Some(num_classes),
            ..Self::default()
        }
    }

    fn loader_settings(&self) -> LoaderSettings {
        let common = &self.common;
        let mut settings = LoaderSettings {
            batch_size:       common.batch_size,
            valid_batch_size: common.valid_batch_size,
            shuffle_train:    common.shuffle_train,
            ..LoaderSettings::default()
        };
        if let Some(seed) = common.trainer.seed {
            settings.seed = seed;
        }
        settings
    }
}

impl FamilyConfig for TabularConfig {
    fn common(&self) -> &PipelineConfig {
        &self.common
    }

    fn common_mut(&mut self) -> &mut PipelineConfig {
        &mut self.common
    }

    fn validate_family<B: Backend>(&self, registries: &Registries<B>) -> Result<()> {
        registries.models.create(&self.model_name, &self.model_config)?;
        if !(0.0..1.0).contains(&self.valid_split) {
            return Err(Error::config("valid_split", format!("{} is not in [0, 1)", self.valid_split)));
        }
        match (self.is_classification, self.output_dim) {
            (true, None) => Err(Error::config("output_dim", "classification needs the number of classes")),
            (_, Some(0)) => Err(Error::config("output_dim", "must be positive")),
            _ => Ok(()),
        }
    }
}

/// Data accepted by `fit` and `predict`.
#[derive(Debug, Clone)]
pub enum TabularData {
    Arrays {
        x:     Array2<f32>,
        y:     Option<Array2<f32>>,
        /// Explicit validation pair; otherwise `valid_split` applies.
        valid: Option<(Array2<f32>, Array2<f32>)>,
    },
    Csv(PathBuf),
    Folder(PathBuf),
}

impl TabularData {
    pub fn arrays(x: Array2<f32>, y: Array2<f32>) -> Self {
        TabularData::Arrays { x, y: Some(y), valid: None }
    }

    pub fn features(x: Array2<f32>) -> Self {
        TabularData::Arrays { x, y: None, valid: None }
    }
}

// ─── Family ───────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, Default)]
pub struct Tabular;

pub type TabularPipeline<B> = DLPipeline<B, Tabular>;

impl<B: AutodiffBackend + Placement> PipelineFamily<B> for Tabular {
    const NAME: &'static str = TABULAR_PIPELINE;

    type Config     = TabularConfig;
    type Model      = Fcnn<B>;
    type InnerModel = Fcnn<B::InnerBackend>;
}

impl<B: AutodiffBackend + Placement> DataPreparable<B> for Tabular {
    type Data = TabularData;

    fn prepare_data(config: &TabularConfig, data: TabularData, sample_weights: SampleWeights) -> Result<Box<dyn DataModule>> {
        let settings = config.loader_settings();
        let mut module: Box<dyn DataModule> = match data {
            TabularData::Arrays { x, y, valid } => {
                let y = y.ok_or_else(|| Error::config("y", "fit needs labels"))?;
                let source = match valid {
                    Some((vx, vy)) => ArrayData::new(x, y).with_valid(vx, vy),
                    None => ArrayData::new(x, y).with_valid_split(config.valid_split, config.split_seed),
                };
                Box::new(TabularModule::new(source, settings))
            }
            TabularData::Csv(path) => Box::new(TabularModule::new(
                CsvFileData {
                    path,
                    label_name:  config.label_name.clone(),
                    valid_split: config.valid_split,
                    split_seed:  config.split_seed,
                },
                settings,
            )),
            TabularData::Folder(path) => Box::new(TabularModule::new(
                FolderData { path, label_name: config.label_name.clone() },
                settings,
            )),
        };
        module.prepare(sample_weights)?;
        Ok(module)
    }

    fn absorb_data_info(config: &mut TabularConfig, info: &DataInfo) -> Result<()> {
        if config.is_classification {
            if info.label_dim != Some(1) {
                return Err(Error::config("labels", "classification expects one column of class indices"));
            }
        } else if config.output_dim.is_none() {
            config.output_dim = info.label_dim;
        }
        if config.label_name.is_none() {
            config.label_name = info.label_name.clone();
        }
        Ok(())
    }

    fn make_new_loader(config: &TabularConfig, data: &TabularData, input_dim: usize, batch_size: usize) -> Result<Loader> {
        let (x, y) = match data {
            TabularData::Arrays { x, y, .. } => (x.clone(), y.clone()),
            TabularData::Csv(path) => {
                let table = read_table(path)?;
                match table.columns.len() {
                    n if n == input_dim => (table.values, None),
                    n if n == input_dim + 1 => {
                        let (_, x, _, y) = table.split_label(config.label_name.as_deref())?;
                        (x, Some(y))
                    }
                    n => {
                        return Err(Error::config(
                            path.display().to_string(),
                            format!("{n} columns, expected {input_dim} features (plus an optional label)"),
                        ))
                    }
                }
            }
            TabularData::Folder(path) => {
                return Err(Error::config(
                    path.display().to_string(),
                    "predict takes arrays or a single csv file",
                ))
            }
        };
        if x.ncols() != input_dim {
            return Err(Error::config("x", format!("{} features, model expects {input_dim}", x.ncols())));
        }
        inference_loader(&x, y.as_ref(), batch_size)
    }
}

impl<B: AutodiffBackend + Placement> ModulePreparable<B> for Tabular {
    fn prepare_modules(
        config:     &TabularConfig,
        registries: &Registries<B>,
        input_dim:  usize,
        device:     &B::Device,
    ) -> Result<Fcnn<B>> {
        let model_config = registries.models.create(&config.model_name, &config.model_config)?;
        let output_dim   = config
            .output_dim
            .ok_or_else(|| Error::config("output_dim", "unknown until data has been prepared"))?;
        tracing::info!(
            "Model '{}': {} → {:?} → {}",
            config.model_name, input_dim, model_config.hidden_units, output_dim
        );
        Ok(model_config.init(input_dim, output_dim, device))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use ndarray::Array;

    type B = Autodiff<NdArray>;

    #[test]
    fn test_config_json_is_flat() {
        let cfg  = TabularConfig::regression("mse");
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["loss_name"], "mse");
        assert_eq!(json["model_name"], "fcnn");
        assert!(json.get("common").is_none());

        let back: TabularConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn test_classification_needs_classes() {
        let r = Registries::<B>::with_defaults().unwrap();
        assert!(TabularConfig::classification(3).validate_family(&r).is_ok());

        let mut cfg = TabularConfig::classification(3);
        cfg.output_dim = None;
        assert!(cfg.validate_family(&r).is_err());

        let mut cfg = TabularConfig::regression("mae");
        cfg.model_name = "transformer".into();
        assert!(cfg.validate_family(&r).is_err());
    }

    #[test]
    fn test_regression_output_follows_labels() {
        let mut cfg = TabularConfig::regression("mae");
        let info = DataInfo {
            input_dim:     3,
            label_dim:     Some(2),
            num_train:     10,
            num_valid:     0,
            feature_names: vec![],
            label_name:    Some("target".into()),
        };
        <Tabular as DataPreparable<B>>::absorb_data_info(&mut cfg, &info).unwrap();
        assert_eq!(cfg.output_dim, Some(2));
        assert_eq!(cfg.label_name.as_deref(), Some("target"));
    }

    #[test]
    fn test_predict_loader_checks_width() {
        let cfg = TabularConfig::regression("mae");
        let x   = Array::zeros((4, 3));
        assert!(<Tabular as DataPreparable<B>>::make_new_loader(&cfg, &TabularData::features(x.clone()), 3, 2).is_ok());
        assert!(<Tabular as DataPreparable<B>>::make_new_loader(&cfg, &TabularData::features(x), 5, 2).is_err());
    }
}
