// ============================================================
// Layer 3: Named arrays and state dicts
// ============================================================
// Batches travel between layers as host-side `ndarray` maps
// keyed by name ("input", "labels", "batch_indices", ...).
// They are only turned into burn tensors at the edge of a
// forward pass, so loaders never hold device memory and the
// same batch can feed either the native model or the ONNX
// runtime.
//
// A StateDict is the flat, backend-free view of a model's
// parameters: "blocks.0.weight" → (shape, row-major f32s).

use std::collections::BTreeMap;

use burn::prelude::*;
use burn::tensor::TensorData;
use ndarray::{Array1, Array2, Axis};

use crate::error::{Error, Result};

/// Host-side batch or prediction map. BTreeMap keeps keys sorted.
pub type NamedArrays = BTreeMap<String, Array2<f32>>;

/// Device-side counterpart of [`NamedArrays`].
pub type NamedTensors<B> = BTreeMap<String, Tensor<B, 2>>;

// ─── StateDict ────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq)]
pub struct ParamTensor {
    pub shape:  Vec<usize>,
    pub values: Vec<f32>,
}

impl ParamTensor {
    pub fn new(shape: Vec<usize>, values: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != values.len() {
            return Err(Error::Tensor(format!(
                "shape {shape:?} needs {expected} values, got {}",
                values.len()
            )));
        }
        Ok(Self { shape, values })
    }

    pub fn numel(&self) -> usize {
        self.values.len()
    }
}

pub type StateDict = BTreeMap<String, ParamTensor>;

// ─── Host ⇄ device conversion ─────────────────────────────────────────────────

pub fn array_to_tensor<B: Backend>(array: &Array2<f32>, device: &B::Device) -> Tensor<B, 2> {
    let (rows, cols) = array.dim();
    // iter() walks in logical (row-major) order even for views
    let values: Vec<f32> = array.iter().copied().collect();
    Tensor::from_data(TensorData::new(values, [rows, cols]), device)
}

pub fn tensor_to_array<B: Backend>(tensor: Tensor<B, 2>) -> Result<Array2<f32>> {
    let [rows, cols] = tensor.dims();
    let values = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| Error::Tensor(format!("{e:?}")))?;
    Array2::from_shape_vec((rows, cols), values).map_err(|e| Error::Tensor(e.to_string()))
}

pub fn to_tensors<B: Backend>(arrays: &NamedArrays, device: &B::Device) -> NamedTensors<B> {
    arrays
        .iter()
        .map(|(k, v)| (k.clone(), array_to_tensor::<B>(v, device)))
        .collect()
}

pub fn to_arrays<B: Backend>(tensors: NamedTensors<B>) -> Result<NamedArrays> {
    tensors
        .into_iter()
        .map(|(k, t)| Ok((k, tensor_to_array(t)?)))
        .collect()
}

// ─── Batch assembly helpers ───────────────────────────────────────────────────

/// Stack per-batch maps row-wise. Every batch must carry the same keys.
pub fn concat_rows(batches: &[NamedArrays]) -> Result<NamedArrays> {
    let Some(first) = batches.first() else {
        return Ok(NamedArrays::new());
    };
    let mut out = NamedArrays::new();
    for key in first.keys() {
        let views = batches
            .iter()
            .map(|b| {
                b.get(key)
                    .map(|a| a.view())
                    .ok_or_else(|| Error::Tensor(format!("batch is missing key '{key}'")))
            })
            .collect::<Result<Vec<_>>>()?;
        let stacked = ndarray::concatenate(Axis(0), &views)
            .map_err(|e| Error::Tensor(format!("cannot stack '{key}': {e}")))?;
        out.insert(key.clone(), stacked);
    }
    Ok(out)
}

/// Reorder every array's rows so that row `i` holds sample `order[i]`.
pub fn reorder_rows(arrays: NamedArrays, indices: &Array1<usize>) -> NamedArrays {
    let mut order: Vec<usize> = (0..indices.len()).collect();
    order.sort_by_key(|&i| indices[i]);
    arrays
        .into_iter()
        .map(|(k, a)| {
            let sorted = a.select(Axis(0), &order);
            (k, sorted)
        })
        .collect()
}
