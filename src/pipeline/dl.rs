// ============================================================
// Layer 2: DL Pipeline
// ============================================================
// The generic lifecycle every deep-learning pipeline shares. The
// family type parameter supplies data handling and the model;
// everything else lives here.
//
//   CONSTRUCTED ──fit()──▶ DATA_PREPARED ──(modules)──▶ TRAINED ──save()──▶ PERSISTED
//   PERSISTED ──load()──▶ RESTORED ──▶ predict() / to_onnx()
//
// Export folder layout written by save():
//
//   out/
//     final_results.json
//     config_bundle.json   ← {config, device_info, input_dim}
//     configs.json
//     metrics.txt
//     checkpoints/{model_0.pt, scores.json}
//     data/                ← only with retain_data
//
// and compressed to out.zip unless asked not to. Every operation
// touching an export folder runs under an ExportLock on its parent.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn::module::AutodiffModule;
use burn::tensor::backend::AutodiffBackend;
use ndarray::Array2;
use serde_json::Map;

use crate::constants::{
    CHECKPOINTS_FOLDER, CONFIGS_FILE, CONFIG_BUNDLE_FILE, FINAL_RESULTS_FILE, INPUT_KEY, METRICS_LOG_FILE,
    ONNX_FILE, ONNX_SETTINGS_FILE, PACKED_FOLDER, WARNING_PREFIX,
};
use crate::data::module::{DataInfo, DataModule};
use crate::data::weights::SampleWeights;
use crate::domain::arrays::NamedArrays;
use crate::domain::device::{DeviceInfo, Placement};
use crate::domain::results::{ConfigBundle, MetricsOutputs};
use crate::error::{Error, IoContext, Result};
use crate::infra::archive::{compress, ExtractedScope};
use crate::infra::checkpoint::{read_state_dict, CheckpointSet};
use crate::infra::io::{copy_if_exists, read_json, remove_path, write_json};
use crate::infra::lock::ExportLock;
use crate::infra::workplace::Workplace;
use crate::ml::inference::{GetOutputsOptions, Inference};
use crate::ml::onnx::export::{resolve_dynamic_axes, OnnxAdapter, OnnxExportSettings};
use crate::ml::onnx::runtime::OnnxSession;
use crate::ml::protocol::{Loss, ModelProtocol, Trainer};
use crate::ml::registries::Registries;
use crate::ml::trainer::LoopTrainer;
use crate::pipeline::protocol::{
    DataPreparable, FamilyConfig, FromOnnxOptions, LoadCallback, LoadOptions, ModulePreparable, OnnxOptions,
    PackOptions, Pipeline, PipelineFamily, PredictOptions, SaveOptions,
};
use crate::pipeline::scope::DeviceScope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Constructed,
    DataPrepared,
    Trained,
    Persisted,
    Restored,
}

pub struct DLPipeline<B, F>
where
    B: AutodiffBackend + Placement,
    F: PipelineFamily<B>,
{
    config:      F::Config,
    registries:  Arc<Registries<B>>,
    workplace:   Option<Workplace>,
    state:       PipelineState,
    device_info: DeviceInfo,
    device:      B::Device,
    input_dim:   Option<usize>,
    data:        Option<Box<dyn DataModule>>,
    model:       Option<F::Model>,
    loss:        Option<Box<dyn Loss<B>>>,
    trainer:     Option<LoopTrainer>,
    inference:   Inference,
}

impl<B, F> std::fmt::Debug for DLPipeline<B, F>
where
    B: AutodiffBackend + Placement,
    F: PipelineFamily<B>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DLPipeline")
            .field("family", &F::NAME)
            .field("state", &self.state)
            .field("workplace", &self.workplace)
            .field("device_info", &self.device_info)
            .field("input_dim", &self.input_dim)
            .field("onnx", &self.inference.is_onnx())
            .finish()
    }
}

impl<B, F> DLPipeline<B, F>
where
    B: AutodiffBackend + Placement,
    F: PipelineFamily<B> + DataPreparable<B> + ModulePreparable<B>,
{
    /// Validate `config`, fill trainer defaults and, unless restoring,
    /// allocate a fresh workplace holding `configs.json`.
    pub fn new(mut config: F::Config, registries: Arc<Registries<B>>) -> Result<Self> {
        config.common_mut().apply_defaults();
        config.common().validate(&registries)?;
        config.validate_family(&registries)?;

        let workplace = if config.common().in_loading {
            None
        } else {
            let workplace = Workplace::allocate(&config.common().trainer.workplace)?;
            write_json(&workplace.configs_path(), &config)?;
            Some(workplace)
        };
        let device_info = DeviceInfo::default();
        tracing::debug!("Constructed '{}' pipeline", F::NAME);
        Ok(Self {
            device: device_info.device::<B>(),
            config,
            registries,
            workplace,
            state: PipelineState::Constructed,
            device_info,
            input_dim: None,
            data: None,
            model: None,
            loss: None,
            trainer: None,
            inference: Inference::native(),
        })
    }

    // ─── Accessors ────────────────────────────────────────────────────────────
    pub fn config(&self) -> &F::Config {
        &self.config
    }

    /// Mainly for load callbacks: changes land before the modules are built.
    pub fn config_mut(&mut self) -> &mut F::Config {
        &mut self.config
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn workplace(&self) -> Option<&Path> {
        self.workplace.as_ref().map(Workplace::path)
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn input_dim(&self) -> Option<usize> {
        self.input_dim
    }

    pub fn model(&self) -> Option<&F::Model> {
        self.model.as_ref()
    }

    pub fn is_onnx(&self) -> bool {
        self.inference.is_onnx()
    }

    pub fn final_results(&self) -> Option<&MetricsOutputs> {
        self.trainer.as_ref().and_then(|t| <LoopTrainer as Trainer<B, F::Model>>::final_results(t))
    }

    fn require_model(&self) -> Result<&F::Model> {
        self.model
            .as_ref()
            .ok_or_else(|| Error::config("model", format!("not available in state {:?}", self.state)))
    }

    fn require_input_dim(&self) -> Result<usize> {
        self.input_dim
            .ok_or_else(|| Error::config("input_dim", format!("unknown in state {:?}", self.state)))
    }

    fn ensure_trainer(&mut self) -> Result<&mut LoopTrainer> {
        if self.trainer.is_none() {
            let workplace = self.workplace.as_ref().map(|w| w.path().to_path_buf());
            self.trainer  = Some(LoopTrainer::new(&self.config.common().trainer, &self.registries, workplace)?);
        }
        self.trainer
            .as_mut()
            .ok_or_else(|| Error::config("trainer", "could not be built"))
    }

    // ─── Lifecycle hooks ──────────────────────────────────────────────────────
    /// Prepare the data (and record what it tells us), then the modules.
    fn before_loop(&mut self, data: F::Data, sample_weights: SampleWeights) -> Result<()> {
        let module = F::prepare_data(&self.config, data, sample_weights)?;
        let info   = module.info()?.clone();
        F::absorb_data_info(&mut self.config, &info)?;
        if let Some(workplace) = &self.workplace {
            write_json(&workplace.join(&self.config.common().trainer.data_info_name), &info)?;
            write_json(&workplace.configs_path(), &self.config)?;
        }
        self.input_dim = Some(info.input_dim);
        self.data      = Some(module);
        self.state     = PipelineState::DataPrepared;
        self.prepare_modules()
    }

    fn prepare_modules(&mut self) -> Result<()> {
        let input_dim = self.require_input_dim()?;
        let common    = self.config.common();
        self.loss  = Some(self.registries.losses.create(&common.loss_name, &common.loss_config)?);
        self.model = Some(F::prepare_modules(&self.config, &self.registries, input_dim, &self.device)?);
        Ok(())
    }

    /// Bundle → freshly constructed pipeline in loading mode.
    fn load_infrastructure(
        folder:     &Path,
        registries: Arc<Registries<B>>,
        device:     Option<&str>,
        callback:   Option<LoadCallback<'_, Self, F::Config>>,
    ) -> Result<Self> {
        let bundle_path = folder.join(CONFIG_BUNDLE_FILE);
        if !bundle_path.is_file() {
            return Err(Error::missing(CONFIG_BUNDLE_FILE, folder));
        }
        let bundle: ConfigBundle<F::Config> = read_json(&bundle_path)?;
        let mut config = bundle.config.clone();
        config.common_mut().in_loading = true;

        let mut pipeline = Self::new(config, registries)?;
        let cuda = DeviceInfo::from_selector(device).cuda().map(String::from);
        pipeline.device_info = bundle.device_info.with_cuda(cuda);
        pipeline.device      = pipeline.device_info.device::<B>();
        pipeline.input_dim   = bundle.input_dim;
        if let Some(callback) = callback {
            callback(&mut pipeline, &bundle)?;
        }
        Ok(pipeline)
    }

    fn bundle(&self) -> ConfigBundle<F::Config> {
        ConfigBundle {
            config:      self.config.clone(),
            device_info: self.device_info.clone(),
            input_dim:   self.input_dim,
            extra:       Map::new(),
        }
    }

    // ─── pack ─────────────────────────────────────────────────────────────────
    /// Turn a training workplace into a deployable archive holding its
    /// best checkpoint.
    pub fn pack(workplace: &Path, options: PackOptions<'_, F::Config>) -> Result<PathBuf> {
        let workplace   = Workplace::existing(workplace)?;
        let pack_folder = options.pack_folder.clone().unwrap_or_else(|| workplace.join(PACKED_FOLDER));
        let lock        = ExportLock::writer(&pack_folder)?;

        let checkpoints = CheckpointSet::open(workplace.checkpoints_dir())?;
        if checkpoints.best().is_none() {
            return Err(Error::missing("checkpoint", workplace.path()));
        }
        if pack_folder.exists() {
            tracing::warn!("{WARNING_PREFIX}'{}' already exists and will be erased", pack_folder.display());
            remove_path(&pack_folder)?;
        }
        checkpoints.pack_best_into(&pack_folder.join(CHECKPOINTS_FOLDER))?;

        let config: F::Config = read_json(&workplace.configs_path())?;
        let info_path = workplace.join(&config.common().trainer.data_info_name);
        let input_dim = if info_path.is_file() {
            Some(read_json::<DataInfo>(&info_path)?.input_dim)
        } else {
            None
        };
        let mut bundle = ConfigBundle {
            config,
            device_info: DeviceInfo::from_selector(options.device.as_deref()),
            input_dim,
            extra: Map::new(),
        };
        if let Some(callback) = options.config_bundle_callback {
            callback(&mut bundle);
        }
        write_json(&pack_folder.join(CONFIG_BUNDLE_FILE), &bundle)?;
        copy_if_exists(&workplace.configs_path(), &pack_folder.join(CONFIGS_FILE))?;
        copy_if_exists(&workplace.join(METRICS_LOG_FILE), &pack_folder.join(METRICS_LOG_FILE))?;

        let archive = compress(&pack_folder, true)?;
        lock.commit();
        tracing::info!("Packed '{}' into '{}'", workplace.path().display(), archive.display());
        Ok(archive)
    }

    // ─── ONNX ─────────────────────────────────────────────────────────────────
    /// Export the current model to `export_folder/model.onnx` (+ `onnx.json`
    /// and the config bundle), then compress.
    pub fn to_onnx(&mut self, export_folder: &Path, options: OnnxOptions) -> Result<&mut Self> {
        if self.inference.is_onnx() {
            return Err(Error::config("to_onnx", "pipeline is already bound to an ONNX graph"));
        }
        self.require_model()?;
        let sample = match self
            .trainer
            .as_ref()
            .and_then(|t| <LoopTrainer as Trainer<B, F::Model>>::input_sample(t))
        {
            Some(sample) => sample.clone(),
            None => {
                let mut sample = NamedArrays::new();
                sample.insert(INPUT_KEY.to_string(), Array2::zeros((1, self.require_input_dim()?)));
                sample
            }
        };

        let lock   = ExportLock::writer(export_folder)?;
        fs::create_dir_all(export_folder).at(export_folder)?;
        let axes   = resolve_dynamic_axes(options.dynamic_axes.as_ref());
        let cpu    = B::cpu();
        {
            let scope   = DeviceScope::<B, F::Model>::enter(&mut self.model, self.device.clone(), cpu.clone());
            let inner   = scope.model()?.valid();
            let adapter = OnnxAdapter::<B::InnerBackend, F::InnerModel>::new(&inner, cpu);
            let settings = adapter.export(&sample, &axes, options.extra.clone(), &export_folder.join(ONNX_FILE))?;
            write_json(&export_folder.join(ONNX_SETTINGS_FILE), &settings)?;
        }
        write_json(&export_folder.join(CONFIG_BUNDLE_FILE), &self.bundle())?;
        if options.compress {
            compress(export_folder, options.remove_original)?;
        }
        lock.commit();
        Ok(self)
    }

    /// Restore a pipeline whose predictions run through an exported graph.
    pub fn from_onnx(
        export_folder: &Path,
        registries:    Arc<Registries<B>>,
        options:       FromOnnxOptions<'_, Self, F::Config>,
    ) -> Result<Self> {
        let _lock = ExportLock::reader(export_folder)?;
        let scope = ExtractedScope::open(export_folder, options.compress)?;

        let mut pipeline = Self::load_infrastructure(scope.path(), registries, None, options.callback)?;
        let settings: OnnxExportSettings = read_json(&scope.path().join(ONNX_SETTINGS_FILE))?;
        let session = OnnxSession::load(&scope.path().join(ONNX_FILE), Some(settings.output_names))?;
        tracing::info!("Bound ONNX graph with inputs {:?}", session.input_names());
        pipeline.inference = Inference::with_onnx(session);
        pipeline.state     = PipelineState::Restored;
        Ok(pipeline)
    }

    /// Best-effort export of pretrained weights (a safetensors state dict).
    /// Missing weights only warn and hand back the untouched pipeline.
    pub fn from_pretrained_onnx(
        mut config:    F::Config,
        registries:    Arc<Registries<B>>,
        input_dim:     usize,
        weights:       &Path,
        export_folder: &Path,
        options:       OnnxOptions,
    ) -> Result<Self> {
        config.common_mut().in_loading = true;
        let mut pipeline = Self::new(config, registries)?;
        pipeline.input_dim = Some(input_dim);
        if !weights.is_file() {
            tracing::warn!("{WARNING_PREFIX}pretrained weights '{}' not found, nothing exported", weights.display());
            return Ok(pipeline);
        }
        pipeline.prepare_modules()?;
        let states = read_state_dict(weights)?;
        let model  = pipeline.require_model()?.clone().load_state_dict(states, &pipeline.device)?;
        pipeline.model = Some(model);
        pipeline.state = PipelineState::Restored;
        pipeline.to_onnx(export_folder, options)?;
        Ok(pipeline)
    }
}

impl<B, F> Pipeline<B> for DLPipeline<B, F>
where
    B: AutodiffBackend + Placement,
    F: PipelineFamily<B> + DataPreparable<B> + ModulePreparable<B>,
{
    type Config = F::Config;
    type Data   = F::Data;

    fn fit(&mut self, data: F::Data, sample_weights: SampleWeights, device: Option<&str>) -> Result<&mut Self> {
        if self.state != PipelineState::Constructed || self.inference.is_onnx() || self.config.common().in_loading {
            return Err(Error::config("fit", format!("cannot fit a pipeline in state {:?}", self.state)));
        }
        self.before_loop(data, sample_weights)?;

        let (train_loader, valid_loader) = self
            .data
            .as_ref()
            .ok_or_else(|| Error::config("data", "data module missing after preparation"))?
            .initialize()?;
        let model = self
            .model
            .take()
            .ok_or_else(|| Error::config("model", "model missing after preparation"))?;
        let loss = self
            .loss
            .take()
            .ok_or_else(|| Error::config("loss_name", "loss missing after preparation"))?;

        let device_info = DeviceInfo::from_selector(device);
        let inference   = self.inference.clone();
        let trainer     = self.ensure_trainer()?;
        let fitted = <LoopTrainer as Trainer<B, F::Model>>::fit(
            trainer,
            loss.as_ref(),
            model,
            &inference,
            train_loader,
            valid_loader,
            device_info,
        );
        self.loss = Some(loss);
        let model = fitted?;

        if let Some(trainer) = &self.trainer {
            self.device_info = <LoopTrainer as Trainer<B, F::Model>>::device_info(trainer).clone();
        }
        self.device = self.device_info.device::<B>();
        self.model  = Some(model);
        self.state  = PipelineState::Trained;
        Ok(self)
    }

    fn predict(&self, data: &F::Data, options: PredictOptions) -> Result<NamedArrays> {
        let input_dim = self.require_input_dim()?;
        let loader    = F::make_new_loader(&self.config, data, input_dim, options.batch_size)?;
        let opts      = GetOutputsOptions { return_labels: false };
        let outputs   = if self.inference.is_onnx() {
            self.inference
                .get_outputs::<B::InnerBackend, F::InnerModel>(&loader, None, &self.device, opts)?
        } else {
            let model = self.require_model()?.valid();
            self.inference
                .get_outputs::<B::InnerBackend, F::InnerModel>(&loader, Some(&model), &self.device, opts)?
        };
        Ok(outputs.forward_results)
    }

    fn save(&mut self, export_folder: &Path, options: SaveOptions) -> Result<&mut Self> {
        let model = self.require_model()?.clone();
        let lock  = ExportLock::writer(export_folder)?;
        if export_folder.exists() {
            remove_path(export_folder)?;
        }
        fs::create_dir_all(export_folder).at(export_folder)?;

        let results = match self.final_results() {
            Some(results) => results.clone(),
            None => {
                tracing::warn!("{WARNING_PREFIX}no final results yet, saving placeholder results");
                MetricsOutputs::placeholder()
            }
        };
        write_json(&export_folder.join(FINAL_RESULTS_FILE), &results)?;
        write_json(&export_folder.join(CONFIG_BUNDLE_FILE), &self.bundle())?;

        let configs_dst = export_folder.join(CONFIGS_FILE);
        let metrics_dst = export_folder.join(METRICS_LOG_FILE);
        let (has_configs, has_metrics) = match &self.workplace {
            Some(w) => (
                copy_if_exists(&w.configs_path(), &configs_dst)?,
                copy_if_exists(&w.join(METRICS_LOG_FILE), &metrics_dst)?,
            ),
            None => (false, false),
        };
        if !has_configs {
            write_json(&configs_dst, &self.config)?;
        }
        if !has_metrics {
            fs::write(&metrics_dst, "").at(&metrics_dst)?;
        }

        let trainer = self.ensure_trainer()?;
        <LoopTrainer as Trainer<B, F::Model>>::save_checkpoint(trainer, results.final_score, export_folder, &model)?;

        if options.retain_data {
            self.data
                .as_ref()
                .ok_or_else(|| Error::config("retain_data", "pipeline holds no prepared data"))?
                .retain(export_folder)?;
        }
        if options.compress {
            compress(export_folder, options.remove_original)?;
        }
        lock.commit();
        self.state = PipelineState::Persisted;
        tracing::info!("Saved '{}' pipeline to '{}'", F::NAME, export_folder.display());
        Ok(self)
    }

    fn load(
        export_folder: &Path,
        registries:    Arc<Registries<B>>,
        options:       LoadOptions<'_, Self, F::Config>,
    ) -> Result<Self> {
        let _lock = ExportLock::reader(export_folder)?;
        let scope = ExtractedScope::open(export_folder, options.compress)?;

        let mut pipeline = Self::load_infrastructure(scope.path(), registries, options.device.as_deref(), options.callback)?;
        pipeline.prepare_modules()?;

        let checkpoints = CheckpointSet::open(scope.path().join(CHECKPOINTS_FOLDER))?;
        if checkpoints.most_recent().is_none() {
            return Err(Error::missing("checkpoint", export_folder));
        }
        let (entry, mut states) = checkpoints.load_most_recent()?;
        if let Some(callback) = options.states_callback {
            states = callback(states)?;
        }
        let model = pipeline
            .model
            .take()
            .ok_or_else(|| Error::config("model", "model missing after preparation"))?;
        pipeline.model = Some(model.load_state_dict(states, &pipeline.device)?);
        pipeline.state = PipelineState::Restored;
        tracing::info!("Loaded '{}' pipeline from '{}' ({})", F::NAME, export_folder.display(), entry.file);
        Ok(pipeline)
    }
}
