// ============================================================
// Layer 5: Training Loop
// ============================================================
// Full train + evaluation loop over host-side loaders.
//
//   for epoch in 1..:
//       for batch in train:  forward → loss → backward → optimizer step
//       evaluate on valid (or train) with model.valid()
//       callbacks.log_metrics ; monitors.snapshot / check_terminate
//
// Key burn insight:
//   - Training runs on B (Autodiff<_>) for gradients
//   - model.valid() returns the model on B::InnerBackend, so
//     evaluation records no graph and dropout is off
//   - B::Device == B::InnerBackend::Device, one device serves both
//
// Epoch policy:
//   num_epoch     baseline number of epochs
//   max_epoch     keep going past num_epoch while the best score
//                 still improves, never past this
//   fixed_epoch   exactly this many epochs, monitors cannot stop it
//
// Reference: Burn Book §5, Kingma & Ba (2015) Adam

use std::path::{Path, PathBuf};

use burn::module::AutodiffModule;
use burn::optim::GradientsParams;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use indicatif::{ProgressBar, ProgressStyle};

use crate::constants::{BATCH_INDICES_KEY, CHECKPOINTS_FOLDER, LABEL_KEY, PREDICTIONS_KEY, SAMPLE_WEIGHTS_KEY, WARNING_PREFIX};
use crate::data::module::Loader;
use crate::domain::arrays::{to_tensors, NamedArrays};
use crate::domain::device::{DeviceInfo, Placement};
use crate::domain::results::MetricsOutputs;
use crate::domain::settings::ALL_SCOPE;
use crate::domain::traits::{CallbackContext, EpochRecord, Metric, TrainerCallback, TrainerMonitor};
use crate::error::{Error, Result};
use crate::infra::checkpoint::CheckpointSet;
use crate::ml::inference::{GetOutputsOptions, Inference};
use crate::ml::metrics::MultipleMetrics;
use crate::ml::optim::ScheduledOptimizer;
use crate::ml::protocol::{Loss, ModelProtocol, Trainer};
use crate::ml::registries::Registries;
use crate::pipeline::config::TrainerConfig;

/// The default [`Trainer`]: a plain epoch loop driven by registered
/// metrics, monitors and callbacks.
pub struct LoopTrainer {
    config:        TrainerConfig,
    workplace:     Option<PathBuf>,
    metrics:       MultipleMetrics,
    monitors:      Vec<Box<dyn TrainerMonitor>>,
    callbacks:     Vec<Box<dyn TrainerCallback>>,
    final_results: Option<MetricsOutputs>,
    device_info:   DeviceInfo,
    input_sample:  Option<NamedArrays>,
}

impl std::fmt::Debug for LoopTrainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopTrainer")
            .field("workplace", &self.workplace)
            .field("metrics", &self.metrics)
            .field("monitors", &self.monitors.iter().map(|m| m.name()).collect::<Vec<_>>())
            .field("callbacks", &self.callbacks.iter().map(|c| c.name()).collect::<Vec<_>>())
            .field("final_results", &self.final_results)
            .field("device_info", &self.device_info)
            .finish()
    }
}

impl LoopTrainer {
    /// Build every named component from `registries`. `workplace` is
    /// `None` when nothing should be written (restored pipelines).
    pub fn new<B: Backend>(config: &TrainerConfig, registries: &Registries<B>, workplace: Option<PathBuf>) -> Result<Self> {
        let metric_names = config
            .metric_names
            .clone()
            .ok_or_else(|| Error::config("trainer.metric_names", "no metrics configured"))?;
        let metrics = metric_names
            .iter()
            .map(|name| registries.metrics.create(name, &config.metric_config(name)))
            .collect::<Result<Vec<Box<dyn Metric>>>>()?;
        let metrics = MultipleMetrics::new(metrics, &config.metric_weights)?;

        let monitors = config
            .monitor_names
            .iter()
            .flatten()
            .map(|name| registries.monitors.create(name, &config.monitor_config(name)))
            .collect::<Result<Vec<_>>>()?;
        let callbacks = config
            .callback_names
            .iter()
            .flatten()
            .map(|name| registries.callbacks.create(name, &config.callback_config(name)))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            "Trainer ready: metrics={:?} monitors={} callbacks={}",
            metrics.names(), monitors.len(), callbacks.len()
        );
        Ok(Self {
            config: config.clone(),
            workplace,
            metrics,
            monitors,
            callbacks,
            final_results: None,
            device_info: DeviceInfo::default(),
            input_sample: None,
        })
    }

    fn progress_bar(&self, epochs: usize) -> Option<ProgressBar> {
        if !self.config.tqdm_settings.use_tqdm {
            return None;
        }
        let bar = ProgressBar::new(epochs as u64);
        if let Ok(style) = ProgressStyle::with_template("{bar:40} {pos}/{len} epochs {msg}") {
            bar.set_style(style);
        }
        Some(bar)
    }

    /// Score the current model on `loader`, optionally adding the loss.
    fn evaluate<B, M>(&self, loss: &dyn Loss<B>, model: &M, loader: &Loader, device: &B::Device) -> Result<MetricsOutputs>
    where
        B: AutodiffBackend,
        M: ModelProtocol<B> + AutodiffModule<B>,
        M::InnerModule: ModelProtocol<B::InnerBackend>,
    {
        let valid   = model.valid();
        let outputs = Inference::native().get_outputs::<B::InnerBackend, M::InnerModule>(
            loader,
            Some(&valid),
            device,
            GetOutputsOptions::default(),
        )?;
        let predictions = outputs
            .forward_results
            .get(PREDICTIONS_KEY)
            .ok_or_else(|| Error::config(format!("outputs.{PREDICTIONS_KEY}"), "model produced no predictions"))?;
        let labels = outputs
            .labels
            .as_ref()
            .ok_or_else(|| Error::config(format!("batch.{LABEL_KEY}"), "evaluation data has no labels"))?;

        let loss_value = if self.config.use_losses_as_metrics {
            let mut batch = NamedArrays::new();
            batch.insert(LABEL_KEY.to_string(), labels.clone());
            if let Some(w) = &outputs.sample_weights {
                batch.insert(SAMPLE_WEIGHTS_KEY.to_string(), w.clone());
            }
            let forward = to_tensors::<B>(&outputs.forward_results, device);
            let value   = loss.forward(&forward, &to_tensors::<B>(&batch, device))?;
            Some(value.into_scalar().elem::<f64>())
        } else {
            None
        };
        Ok(self.metrics.evaluate(predictions.view(), labels.view(), loss_value))
    }
}

impl<B, M> Trainer<B, M> for LoopTrainer
where
    B: AutodiffBackend + Placement,
    M: ModelProtocol<B> + AutodiffModule<B> + 'static,
    M::InnerModule: ModelProtocol<B::InnerBackend>,
{
    fn fit(
        &mut self,
        loss:         &dyn Loss<B>,
        model:        M,
        inference:    &Inference,
        train_loader: Loader,
        valid_loader: Option<Loader>,
        device_info:  DeviceInfo,
    ) -> Result<M> {
        if inference.is_onnx() {
            return Err(Error::config("inference", "an ONNX-bound pipeline cannot be trained"));
        }
        let device = device_info.device::<B>();
        self.device_info = device_info;
        if let Some(seed) = self.config.seed {
            B::seed(seed);
        }
        if self.config.use_amp {
            tracing::warn!("{WARNING_PREFIX}use_amp is not supported by this backend, training in f32");
        }

        // ── Callbacks may rewrite the optimizer settings ──────────────────────
        let mut optimizer_settings = self.config.optimizer_settings.clone().unwrap_or_default();
        {
            let mut ctx = CallbackContext { workplace: self.workplace.as_deref(), optimizer_settings: &mut optimizer_settings };
            for cb in self.callbacks.iter_mut() {
                cb.initialize(&mut ctx)?;
            }
        }
        let pack = optimizer_settings
            .get(ALL_SCOPE)
            .ok_or_else(|| Error::config("trainer.optimizer_settings", format!("no '{ALL_SCOPE}' scope")))?;
        let mut optimizer = ScheduledOptimizer::<M>::build::<B>(pack, self.config.clip_norm)?;

        let mut checkpoints = match &self.workplace {
            Some(dir) => Some(CheckpointSet::create(dir.join(CHECKPOINTS_FOLDER))?),
            None => None,
        };

        let state       = self.config.state_config.clone();
        let fixed       = state.fixed_epoch;
        let max_epoch   = fixed.unwrap_or(state.max_epoch);
        let eval_loader = valid_loader.clone().unwrap_or_else(|| train_loader.clone());
        let bar         = self.progress_bar(fixed.unwrap_or(state.num_epoch));

        let mut model      = model.fork(&device);
        let mut step       = 0usize;
        let mut best_score = f64::NEG_INFINITY;
        let mut last       = None;
        tracing::info!("Training for {} epoch(s) (max {})", fixed.unwrap_or(state.num_epoch), max_epoch);

        for epoch in 1..=max_epoch {
            // ── Training phase ────────────────────────────────────────────────
            let mut loss_sum = 0.0f64;
            let mut batches  = 0usize;
            let mut lr       = optimizer.lr_at(step);

            for mut batch in train_loader.iter() {
                if self.input_sample.is_none() {
                    self.input_sample = Some(batch.clone());
                }
                batch.remove(BATCH_INDICES_KEY);
                let tensors = to_tensors::<B>(&batch, &device);
                let outputs = model.forward(&tensors)?;
                let value   = loss.forward(&outputs, &tensors)?;

                loss_sum += value.clone().into_scalar().elem::<f64>();
                batches  += 1;

                let grads = GradientsParams::from_grads(value.backward(), &model);
                let (next, used) = optimizer.step(step, model, grads);
                model = next;
                lr    = used;
                step += 1;
                if let Some(every) = state.log_steps.filter(|n| *n > 0) {
                    if step % every == 0 {
                        tracing::debug!("step {:>6}  loss {:.6}", step, loss_sum / batches as f64);
                    }
                }
            }
            if batches == 0 {
                return Err(Error::config("train_loader", "training loader yielded no batches"));
            }
            let train_loss = loss_sum / batches as f64;

            // ── Evaluation phase ──────────────────────────────────────────────
            let results = self.evaluate::<B, M>(loss, &model, &eval_loader, &device)?;
            let score   = results.final_score;
            let record  = EpochRecord { epoch, step, lr, train_loss, metrics: &results };
            for cb in self.callbacks.iter_mut() {
                cb.log_metrics(&record)?;
            }

            // every monitor sees every score, so no short-circuiting here
            let mut snapshot  = false;
            let mut terminate = false;
            for monitor in self.monitors.iter_mut() {
                snapshot  |= monitor.snapshot(score);
                terminate |= monitor.check_terminate(score);
            }
            if let (true, Some(set)) = (snapshot, checkpoints.as_mut()) {
                set.push(score, &model.state_dict()?, self.config.max_snapshot_file)?;
            }

            let improved = score > best_score;
            best_score   = best_score.max(score);
            last         = Some(results);
            if let Some(bar) = &bar {
                bar.set_message(format!("score {score:.6}"));
                bar.inc(1);
            }

            match fixed {
                Some(n) if epoch >= n => break,
                Some(_) => continue,
                None => {}
            }
            if terminate {
                tracing::info!("Early stop at epoch {}", epoch);
                break;
            }
            if epoch >= state.num_epoch && !improved {
                break;
            }
            if epoch >= state.num_epoch {
                tracing::debug!("Score still improving at epoch {}, extending", epoch);
            }
        }
        if let Some(bar) = bar {
            bar.finish_and_clear();
        }

        let results = last.ok_or_else(|| Error::config("trainer.state_config", "no epoch was run"))?;
        if let Some(set) = checkpoints.as_mut() {
            if set.most_recent().is_none() {
                set.push(results.final_score, &model.state_dict()?, self.config.max_snapshot_file)?;
            }
        }
        for cb in self.callbacks.iter_mut() {
            cb.finalize(&results)?;
        }
        tracing::info!("Training complete after {} step(s), final score {:.6}", step, results.final_score);
        self.final_results = Some(results);
        Ok(model)
    }

    fn save_checkpoint(&self, score: f64, folder: &Path, model: &M) -> Result<PathBuf> {
        let mut set = CheckpointSet::create(folder.join(CHECKPOINTS_FOLDER))?;
        set.push(score, &model.state_dict()?, self.config.max_snapshot_file)
    }

    fn final_results(&self) -> Option<&MetricsOutputs> {
        self.final_results.as_ref()
    }

    fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    fn input_sample(&self) -> Option<&NamedArrays> {
        self.input_sample.as_ref()
    }
}
