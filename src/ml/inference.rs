// ============================================================
// Layer 5: Inference
// ============================================================
// Runs a loader through either the native model or a bound ONNX
// session and stitches the per-batch results back together.
//
//   for batch in loader:
//       outputs = onnx.run(batch)  |  model.forward(batch)
//   concat rows → reorder by batch_indices
//
// Reordering means callers always get rows in dataset order, even
// if the loader shuffled. The model passed in here is expected to
// be on a non-autodiff backend (`model.valid()`), so dropout is
// off and no graph is recorded.

use ndarray::{Array1, Array2};

use burn::prelude::*;

use crate::constants::{BATCH_INDICES_KEY, LABEL_KEY, SAMPLE_WEIGHTS_KEY};
use crate::data::module::Loader;
use crate::domain::arrays::{concat_rows, reorder_rows, to_arrays, to_tensors, NamedArrays};
use crate::error::{Error, Result};
use crate::ml::onnx::runtime::OnnxSession;
use crate::ml::protocol::ModelProtocol;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetOutputsOptions {
    /// Collect labels (and sample weights) alongside the outputs.
    pub return_labels: bool,
}

impl Default for GetOutputsOptions {
    fn default() -> Self {
        Self { return_labels: true }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOutputs {
    pub forward_results: NamedArrays,
    pub labels:          Option<Array2<f32>>,
    pub sample_weights:  Option<Array2<f32>>,
}

/// Native or ONNX-backed forward passes over whole loaders.
#[derive(Debug, Clone, Default)]
pub struct Inference {
    onnx: Option<OnnxSession>,
}

impl Inference {
    pub fn native() -> Self {
        Self { onnx: None }
    }

    pub fn with_onnx(session: OnnxSession) -> Self {
        Self { onnx: Some(session) }
    }

    pub fn is_onnx(&self) -> bool {
        self.onnx.is_some()
    }

    pub fn onnx(&self) -> Option<&OnnxSession> {
        self.onnx.as_ref()
    }

    pub fn get_outputs<B, M>(
        &self,
        loader:  &Loader,
        model:   Option<&M>,
        device:  &B::Device,
        options: GetOutputsOptions,
    ) -> Result<InferenceOutputs>
    where
        B: Backend,
        M: ModelProtocol<B>,
    {
        let mut outputs = Vec::new();
        let mut extras  = Vec::new();
        let mut indices = Vec::new();

        for mut batch in loader.iter() {
            let batch_indices = batch
                .remove(BATCH_INDICES_KEY)
                .ok_or_else(|| Error::config(format!("batch.{BATCH_INDICES_KEY}"), "loader batches must carry row indices"))?;
            indices.extend(batch_indices.iter().map(|&i| i as usize));

            let forward = match (&self.onnx, model) {
                (Some(session), _) => session.run(&batch)?,
                (None, Some(model)) => to_arrays(model.forward(&to_tensors::<B>(&batch, device))?)?,
                (None, None) => return Err(Error::config("inference", "no model and no ONNX session bound")),
            };
            outputs.push(forward);

            if options.return_labels {
                let mut extra = NamedArrays::new();
                for key in [LABEL_KEY, SAMPLE_WEIGHTS_KEY] {
                    if let Some(values) = batch.remove(key) {
                        extra.insert(key.to_string(), values);
                    }
                }
                extras.push(extra);
            }
        }

        let order = Array1::from(indices);
        let forward_results = reorder_rows(concat_rows(&outputs)?, &order);
        let (labels, sample_weights) = if options.return_labels {
            let mut extra = reorder_rows(concat_rows(&extras)?, &order);
            (extra.remove(LABEL_KEY), extra.remove(SAMPLE_WEIGHTS_KEY))
        } else {
            (None, None)
        };
        Ok(InferenceOutputs { forward_results, labels, sample_weights })
    }
}
