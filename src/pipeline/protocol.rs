// ============================================================
// Layer 2: Pipeline protocol
// ============================================================
// What every pipeline can do, and the hooks a pipeline family
// must provide for the generic DL pipeline to drive it:
//
//   PipelineFamily    name, config type, model type
//   DataPreparable    caller data → DataModule; data → new loader
//   ModulePreparable  config + input_dim → model
//
// A family missing one of the hooks simply does not satisfy the
// bounds on DLPipeline, so the mistake is caught at compile time.

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn::module::AutodiffModule;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::data::module::{DataInfo, DataModule, Loader};
use crate::data::weights::SampleWeights;
use crate::domain::arrays::{NamedArrays, StateDict};
use crate::domain::device::Placement;
use crate::domain::results::ConfigBundle;
use crate::error::Result;
use crate::ml::onnx::export::DynamicAxes;
use crate::ml::protocol::ModelProtocol;
use crate::ml::registries::Registries;
use crate::pipeline::config::PipelineConfig;

// ─── Family hooks ─────────────────────────────────────────────────────────────
/// A family-specific config that embeds the common [`PipelineConfig`].
pub trait FamilyConfig: Clone + Debug + Serialize + DeserializeOwned + Send {
    fn common(&self) -> &PipelineConfig;

    fn common_mut(&mut self) -> &mut PipelineConfig;

    /// Family-level checks on top of `PipelineConfig::validate`.
    fn validate_family<B: Backend>(&self, _registries: &Registries<B>) -> Result<()> {
        Ok(())
    }
}

pub trait PipelineFamily<B: AutodiffBackend + Placement>: Sized {
    const NAME: &'static str;

    type Config: FamilyConfig;
    type Model: ModelProtocol<B> + AutodiffModule<B, InnerModule = Self::InnerModel> + 'static;
    type InnerModel: ModelProtocol<B::InnerBackend>;
}

pub trait DataPreparable<B: AutodiffBackend + Placement>: PipelineFamily<B> {
    /// Whatever `fit` and `predict` accept.
    type Data;

    /// Build and prepare the data module for `fit`.
    fn prepare_data(config: &Self::Config, data: Self::Data, sample_weights: SampleWeights) -> Result<Box<dyn DataModule>>;

    /// Record data-derived fields (output size, label name) in the config.
    fn absorb_data_info(config: &mut Self::Config, info: &DataInfo) -> Result<()>;

    /// A fresh, unshuffled loader over `data` for inference.
    fn make_new_loader(config: &Self::Config, data: &Self::Data, input_dim: usize, batch_size: usize) -> Result<Loader>;
}

pub trait ModulePreparable<B: AutodiffBackend + Placement>: PipelineFamily<B> {
    fn prepare_modules(
        config:     &Self::Config,
        registries: &Registries<B>,
        input_dim:  usize,
        device:     &B::Device,
    ) -> Result<Self::Model>;
}

// ─── Operation options ────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictOptions {
    pub batch_size: usize,
}

impl Default for PredictOptions {
    fn default() -> Self {
        Self { batch_size: 128 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    pub compress:        bool,
    pub retain_data:     bool,
    pub remove_original: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self { compress: true, retain_data: false, remove_original: true }
    }
}

pub type StatesCallback<'a> = &'a dyn Fn(StateDict) -> Result<StateDict>;
/// Runs on the freshly constructed pipeline `P` with the bundle it was
/// built from, before any weights are loaded.
pub type LoadCallback<'a, P, C> = &'a dyn Fn(&mut P, &ConfigBundle<C>) -> Result<()>;

pub struct LoadOptions<'a, P, C> {
    /// Device selector (`"cpu"`, `"0"`, `"cuda:1"`); `None` loads on cpu.
    pub device:          Option<String>,
    pub compress:        bool,
    pub states_callback: Option<StatesCallback<'a>>,
    pub callback:        Option<LoadCallback<'a, P, C>>,
}

impl<P, C> Default for LoadOptions<'_, P, C> {
    fn default() -> Self {
        Self { device: None, compress: true, states_callback: None, callback: None }
    }
}

pub struct PackOptions<'a, C> {
    pub config_bundle_callback: Option<&'a dyn Fn(&mut ConfigBundle<C>)>,
    /// Defaults to `<workplace>/packed`.
    pub pack_folder:            Option<PathBuf>,
    pub device:                 Option<String>,
}

impl<C> Default for PackOptions<'_, C> {
    fn default() -> Self {
        Self { config_bundle_callback: None, pack_folder: None, device: None }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OnnxOptions {
    pub dynamic_axes:    Option<DynamicAxes>,
    pub compress:        bool,
    pub remove_original: bool,
    /// Flattened into `onnx.json` next to the recorded settings.
    pub extra:           Map<String, Value>,
}

impl Default for OnnxOptions {
    fn default() -> Self {
        Self { dynamic_axes: None, compress: true, remove_original: true, extra: Map::new() }
    }
}

pub struct FromOnnxOptions<'a, P, C> {
    pub compress: bool,
    pub callback: Option<LoadCallback<'a, P, C>>,
}

impl<P, C> Default for FromOnnxOptions<'_, P, C> {
    fn default() -> Self {
        Self { compress: true, callback: None }
    }
}

// ─── Pipeline ─────────────────────────────────────────────────────────────────
pub trait Pipeline<B: AutodiffBackend + Placement>: Sized {
    type Config;
    type Data;

    /// Prepare data and modules, then train. A pipeline is fitted once.
    fn fit(&mut self, data: Self::Data, sample_weights: SampleWeights, device: Option<&str>) -> Result<&mut Self>;

    /// Forward results for `data`; nothing is persisted.
    fn predict(&self, data: &Self::Data, options: PredictOptions) -> Result<NamedArrays>;

    fn save(&mut self, export_folder: &Path, options: SaveOptions) -> Result<&mut Self>;

    fn load(
        export_folder: &Path,
        registries:    Arc<Registries<B>>,
        options:       LoadOptions<'_, Self, Self::Config>,
    ) -> Result<Self>;
}
