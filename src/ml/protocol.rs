// ============================================================
// Layer 5: Model, loss and trainer contracts
// ============================================================
// The pipeline only ever talks to models, losses and trainers
// through these traits:
//
//   ModelProtocol  named tensors in → named tensors out, plus a
//                  flat StateDict view and a way to describe
//                  itself as an ONNX graph
//   Loss           scalar objective over (outputs, batch)
//   Trainer        owns the optimisation loop and checkpoints
//
// Any burn Module implementing ModelProtocol on both the autodiff
// backend and its inner backend can be trained, saved, restored
// and exported without the pipeline knowing its architecture.

use std::path::{Path, PathBuf};

use burn::module::AutodiffModule;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

use crate::data::module::Loader;
use crate::domain::arrays::{NamedArrays, NamedTensors, StateDict};
use crate::domain::device::{DeviceInfo, Placement};
use crate::domain::results::MetricsOutputs;
use crate::error::Result;
use crate::ml::inference::Inference;
use crate::ml::onnx::export::GraphBuilder;

// ─── ModelProtocol ────────────────────────────────────────────────────────────
pub trait ModelProtocol<B: Backend>: Module<B> {
    /// Run the model on a named batch. Unused keys are ignored.
    fn forward(&self, batch: &NamedTensors<B>) -> Result<NamedTensors<B>>;

    /// Every parameter by its dotted name.
    fn state_dict(&self) -> Result<StateDict>;

    /// Strict load: missing keys, unexpected keys and shape
    /// mismatches are all errors.
    fn load_state_dict(self, states: StateDict, device: &B::Device) -> Result<Self>;

    /// Emit the inference graph into `graph`.
    fn export_graph(&self, graph: &mut GraphBuilder) -> Result<()>;
}

// ─── Loss ─────────────────────────────────────────────────────────────────────
pub trait Loss<B: Backend>: Send + Sync {
    fn name(&self) -> &str;

    /// Mean (sample-weighted when the batch carries weights) loss.
    fn forward(&self, outputs: &NamedTensors<B>, batch: &NamedTensors<B>) -> Result<Tensor<B, 1>>;
}

// ─── Trainer ──────────────────────────────────────────────────────────────────
/// What a pipeline needs from whatever runs its optimisation loop.
pub trait Trainer<B, M>
where
    B: AutodiffBackend + Placement,
    M: ModelProtocol<B> + AutodiffModule<B>,
    M::InnerModule: ModelProtocol<B::InnerBackend>,
{
    /// Train `model` and hand it back.
    #[allow(clippy::too_many_arguments)]
    fn fit(
        &mut self,
        loss:         &dyn Loss<B>,
        model:        M,
        inference:    &Inference,
        train_loader: Loader,
        valid_loader: Option<Loader>,
        device_info:  DeviceInfo,
    ) -> Result<M>;

    /// Write `model` as the newest checkpoint under `folder/checkpoints`.
    fn save_checkpoint(&self, score: f64, folder: &Path, model: &M) -> Result<PathBuf>;

    /// `None` until `fit` has completed.
    fn final_results(&self) -> Option<&MetricsOutputs>;

    fn device_info(&self) -> &DeviceInfo;

    /// First training batch, kept for graph tracing.
    fn input_sample(&self) -> Option<&NamedArrays>;
}
