// ============================================================
// Layer 1: CLI Commands and Arguments
// ============================================================
// Four subcommands: `fit`, `predict`, `pack` and `export-onnx`.
//
// `fit` starts from an optional JSON config (same shape as the
// configs.json a pipeline writes) and lets flags override the
// common fields on top of it.
//
// Reference: Rust Book §12 (Building a CLI Program)

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Subcommand};

use forgelearn::pipeline::TabularConfig;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a tabular pipeline on a CSV file (or a folder with train.csv / valid.csv)
    Fit(FitArgs),

    /// Predict a CSV file with a saved pipeline, writing CSV to stdout
    Predict(PredictArgs),

    /// Pack the best checkpoint of a training workplace into an archive
    Pack(PackArgs),

    /// Export a saved pipeline to ONNX
    ExportOnnx(ExportOnnxArgs),
}

#[derive(Args, Debug)]
pub struct FitArgs {
    /// CSV file, or a folder holding train.csv and optionally valid.csv
    #[arg(long)]
    pub data: PathBuf,

    /// JSON pipeline config; flags below override its fields
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Export folder written after training
    #[arg(long, default_value = "out")]
    pub export: PathBuf,

    /// Loss name (mae, mse, cross_entropy)
    #[arg(long)]
    pub loss: Option<String>,

    /// Label column; defaults to the last column
    #[arg(long)]
    pub label: Option<String>,

    /// Treat the label as class indices out of this many classes
    #[arg(long)]
    pub classes: Option<usize>,

    /// Baseline number of epochs
    #[arg(long)]
    pub epochs: Option<usize>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Learning rate for every optimizer scope
    #[arg(long)]
    pub lr: Option<f64>,

    /// Fraction of rows held out for validation (single-file data only)
    #[arg(long)]
    pub valid_split: Option<f64>,

    /// Root under which timestamped workplaces are created
    #[arg(long)]
    pub workplace: Option<PathBuf>,

    /// Device selector: cpu, 0, cuda:1
    #[arg(long)]
    pub device: Option<String>,

    /// Keep the export folder as a plain directory
    #[arg(long)]
    pub no_compress: bool,

    /// Also copy the prepared data into the export folder
    #[arg(long)]
    pub retain_data: bool,
}

impl TryFrom<&FitArgs> for TabularConfig {
    type Error = anyhow::Error;

    fn try_from(a: &FitArgs) -> anyhow::Result<Self> {
        let mut config = match &a.config {
            Some(path) => {
                let text = fs::read_to_string(path).with_context(|| format!("reading config '{}'", path.display()))?;
                serde_json::from_str(&text).with_context(|| format!("parsing config '{}'", path.display()))?
            }
            None => TabularConfig::default(),
        };
        if let Some(classes) = a.classes {
            config.is_classification = true;
            config.output_dim        = Some(classes);
            if a.loss.is_none() && a.config.is_none() {
                config.common.loss_name = "cross_entropy".to_string();
            }
        }
        if let Some(loss) = &a.loss {
            config.common.loss_name = loss.clone();
        }
        if let Some(label) = &a.label {
            config.label_name = Some(label.clone());
        }
        if let Some(epochs) = a.epochs {
            let state = &mut config.common.trainer.state_config;
            state.num_epoch = epochs;
            state.max_epoch = state.max_epoch.max(epochs);
        }
        if let Some(batch_size) = a.batch_size {
            config.common.batch_size = batch_size;
        }
        if let Some(lr) = a.lr {
            config.common.trainer.lr = Some(lr);
        }
        if let Some(split) = a.valid_split {
            config.valid_split = split;
        }
        if let Some(workplace) = &a.workplace {
            config.common.trainer.workplace = workplace.clone();
        }
        Ok(config)
    }
}

#[derive(Args, Debug)]
pub struct PredictArgs {
    /// Export folder written by `fit` or `export-onnx` (without .zip)
    #[arg(long)]
    pub model: PathBuf,

    /// CSV with the same feature columns used for training
    #[arg(long)]
    pub data: PathBuf,

    /// The model folder holds an ONNX export
    #[arg(long)]
    pub onnx: bool,

    #[arg(long, default_value_t = 128)]
    pub batch_size: usize,

    #[arg(long)]
    pub device: Option<String>,
}

#[derive(Args, Debug)]
pub struct PackArgs {
    /// Timestamped workplace folder created during `fit`
    #[arg(long)]
    pub workplace: PathBuf,

    /// Destination folder (the archive is written next to it)
    #[arg(long)]
    pub output: Option<PathBuf>,

    #[arg(long)]
    pub device: Option<String>,
}

#[derive(Args, Debug)]
pub struct ExportOnnxArgs {
    /// Export folder written by `fit` (without .zip)
    #[arg(long)]
    pub model: PathBuf,

    /// Destination folder for model.onnx and onnx.json
    #[arg(long, default_value = "onnx")]
    pub output: PathBuf,

    /// Extra dynamic axes besides the batch axis, e.g. --axis 1
    #[arg(long = "axis")]
    pub axes: Vec<usize>,

    #[arg(long)]
    pub no_compress: bool,
}
