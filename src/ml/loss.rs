// ============================================================
// Layer 5: Losses
// ============================================================
// Each loss reduces (outputs, batch) to a one-element tensor:
//
//   per-sample loss  l_i           shape [N, 1]
//   weighted mean    Σ w_i l_i / N  (w from "sample_weights")
//
// Sample weights arrive already normalised to mean 1, so the
// weighted and unweighted losses share a scale.
//
// cross_entropy reads labels as class indices stored in f32 and
// predictions as raw logits (no softmax in the model).

use burn::prelude::*;
use burn::tensor::activation::log_softmax;

use crate::constants::{LABEL_KEY, PREDICTIONS_KEY, SAMPLE_WEIGHTS_KEY};
use crate::domain::arrays::NamedTensors;
use crate::error::{Error, Result};
use crate::ml::protocol::Loss;

pub const MAE: &str = "mae";
pub const MSE: &str = "mse";
pub const CROSS_ENTROPY: &str = "cross_entropy";

fn fetch<B: Backend>(map: &NamedTensors<B>, key: &str, loss: &str) -> Result<Tensor<B, 2>> {
    map.get(key)
        .cloned()
        .ok_or_else(|| Error::config(format!("loss.{loss}.{key}"), "required tensor is missing"))
}

fn reduce<B: Backend>(per_sample: Tensor<B, 2>, batch: &NamedTensors<B>) -> Tensor<B, 1> {
    match batch.get(SAMPLE_WEIGHTS_KEY) {
        Some(weights) => (per_sample * weights.clone()).mean(),
        None => per_sample.mean(),
    }
}

fn check_same_shape<B: Backend>(name: &str, predictions: &Tensor<B, 2>, labels: &Tensor<B, 2>) -> Result<()> {
    if predictions.dims() != labels.dims() {
        return Err(Error::Tensor(format!(
            "{name}: predictions {:?} and labels {:?} differ in shape",
            predictions.dims(),
            labels.dims()
        )));
    }
    Ok(())
}

// ─── mae / mse ────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, Default)]
pub struct MaeLoss;

impl<B: Backend> Loss<B> for MaeLoss {
    fn name(&self) -> &str {
        MAE
    }

    fn forward(&self, outputs: &NamedTensors<B>, batch: &NamedTensors<B>) -> Result<Tensor<B, 1>> {
        let predictions = fetch(outputs, PREDICTIONS_KEY, MAE)?;
        let labels      = fetch(batch, LABEL_KEY, MAE)?;
        check_same_shape(MAE, &predictions, &labels)?;
        Ok(reduce((predictions - labels).abs().mean_dim(1), batch))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MseLoss;

impl<B: Backend> Loss<B> for MseLoss {
    fn name(&self) -> &str {
        MSE
    }

    fn forward(&self, outputs: &NamedTensors<B>, batch: &NamedTensors<B>) -> Result<Tensor<B, 1>> {
        let predictions = fetch(outputs, PREDICTIONS_KEY, MSE)?;
        let labels      = fetch(batch, LABEL_KEY, MSE)?;
        check_same_shape(MSE, &predictions, &labels)?;
        Ok(reduce((predictions - labels).powf_scalar(2.0).mean_dim(1), batch))
    }
}

// ─── cross_entropy ────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossEntropyLoss;

impl<B: Backend> Loss<B> for CrossEntropyLoss {
    fn name(&self) -> &str {
        CROSS_ENTROPY
    }

    fn forward(&self, outputs: &NamedTensors<B>, batch: &NamedTensors<B>) -> Result<Tensor<B, 1>> {
        let logits = fetch(outputs, PREDICTIONS_KEY, CROSS_ENTROPY)?;
        let labels = fetch(batch, LABEL_KEY, CROSS_ENTROPY)?;
        let [rows, classes] = logits.dims();
        if classes < 2 {
            return Err(Error::Tensor(format!("cross_entropy needs at least 2 logits per row, got {classes}")));
        }
        if labels.dims() != [rows, 1] {
            return Err(Error::Tensor(format!("cross_entropy labels must be [{rows}, 1], got {:?}", labels.dims())));
        }
        let picked = log_softmax(logits, 1).gather(1, labels.int());
        Ok(reduce(picked.neg(), batch))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::arrays::{to_tensors, NamedArrays};
    use approx::assert_abs_diff_eq;
    use burn::backend::NdArray;
    use ndarray::{array, Array2};

    type B = NdArray;

    fn run(loss: &dyn Loss<B>, predictions: Array2<f32>, batch: NamedArrays) -> f64 {
        let device  = Default::default();
        let mut out = NamedArrays::new();
        out.insert(PREDICTIONS_KEY.into(), predictions);
        let value = loss
            .forward(&to_tensors::<B>(&out, &device), &to_tensors::<B>(&batch, &device))
            .unwrap();
        value.into_scalar().elem::<f64>()
    }

    fn labels(y: Array2<f32>) -> NamedArrays {
        let mut b = NamedArrays::new();
        b.insert(LABEL_KEY.into(), y);
        b
    }

    #[test]
    fn test_mae_and_mse() {
        let p = array![[1.0f32], [2.0], [4.0]];
        let y = array![[0.0f32], [2.0], [2.0]];
        assert_abs_diff_eq!(run(&MaeLoss, p.clone(), labels(y.clone())), 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(run(&MseLoss, p, labels(y)), 5.0 / 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_sample_weights_scale_rows() {
        let mut batch = labels(array![[0.0f32], [0.0]]);
        batch.insert(SAMPLE_WEIGHTS_KEY.into(), array![[2.0f32], [0.0]]);
        assert_abs_diff_eq!(run(&MaeLoss, array![[1.0f32], [5.0]], batch), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_cross_entropy_uniform_logits() {
        let value = run(&CrossEntropyLoss, array![[0.0f32, 0.0], [0.0, 0.0]], labels(array![[0.0f32], [1.0]]));
        assert_abs_diff_eq!(value, std::f64::consts::LN_2, epsilon = 1e-5);
    }

    #[test]
    fn test_missing_labels_is_config_error() {
        let device  = Default::default();
        let mut out = NamedArrays::new();
        out.insert(PREDICTIONS_KEY.into(), array![[1.0f32]]);
        let err = MaeLoss
            .forward(&to_tensors::<B>(&out, &device), &NamedTensors::<B>::new())
            .unwrap_err();
        assert!(err.to_string().contains("loss.mae.labels"));
    }
}
