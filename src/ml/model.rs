// ============================================================
// Layer 5: Fully connected reference model
// ============================================================
// The bundled architecture: a stack of Linear → activation →
// dropout blocks followed by a linear head.
//
//   input [N, input_dim]
//     → blocks.0 → act → dropout
//     → ...
//     → head → predictions [N, output_dim]
//
// "linear" is the same model with no hidden blocks.
//
// Parameters are exposed by dotted name ("blocks.0.weight",
// "head.bias") so checkpoints written by one backend load on
// another. burn's Linear stores its weight as [d_in, d_out],
// which is exactly the B operand ONNX Gemm expects, so export
// needs no transposes.
//
// Reference: Burn Book §3 (Building Blocks, Module derive)

use std::collections::BTreeSet;

use burn::module::{Ignored, Param};
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::{activation, TensorData};
use serde::{Deserialize, Serialize};

use crate::constants::{INPUT_KEY, PREDICTIONS_KEY};
use crate::domain::arrays::{NamedTensors, ParamTensor, StateDict};
use crate::error::{Error, Result};
use crate::ml::onnx::export::GraphBuilder;
use crate::ml::protocol::ModelProtocol;

// ─── Config ───────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Relu,
    Tanh,
    Sigmoid,
}

impl Activation {
    fn apply<B: Backend>(self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        match self {
            Activation::Relu    => activation::relu(x),
            Activation::Tanh    => activation::tanh(x),
            Activation::Sigmoid => activation::sigmoid(x),
        }
    }

    fn onnx_op(self) -> &'static str {
        match self {
            Activation::Relu    => "Relu",
            Activation::Tanh    => "Tanh",
            Activation::Sigmoid => "Sigmoid",
        }
    }
}

// NOTE: a plain serde struct rather than burn's #[derive(Config)]: it is
// embedded in the pipeline's JSON config and must accept partial objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FcnnConfig {
    pub hidden_units: Vec<usize>,
    pub activation:   Activation,
    pub dropout:      f64,
}

impl Default for FcnnConfig {
    fn default() -> Self {
        Self { hidden_units: vec![64, 64], activation: Activation::Relu, dropout: 0.0 }
    }
}

impl FcnnConfig {
    pub fn linear() -> Self {
        Self { hidden_units: Vec::new(), ..Self::default() }
    }

    pub fn validate(&self) -> Result<()> {
        if self.hidden_units.contains(&0) {
            return Err(Error::config("model_config.hidden_units", "every layer needs at least one unit"));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::config("model_config.dropout", format!("{} is not in [0, 1)", self.dropout)));
        }
        Ok(())
    }

    pub fn init<B: Backend>(&self, input_dim: usize, output_dim: usize, device: &B::Device) -> Fcnn<B> {
        let mut d_in   = input_dim;
        let mut blocks = Vec::with_capacity(self.hidden_units.len());
        for &units in &self.hidden_units {
            blocks.push(LinearConfig::new(d_in, units).init(device));
            d_in = units;
        }
        Fcnn {
            blocks,
            head:       LinearConfig::new(d_in, output_dim).init(device),
            dropout:    DropoutConfig::new(self.dropout).init(),
            activation: Ignored(self.activation),
            input_dim,
            output_dim,
        }
    }
}

// ─── Model ────────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct Fcnn<B: Backend> {
    pub blocks:     Vec<Linear<B>>,
    pub head:       Linear<B>,
    pub dropout:    Dropout,
    pub activation: Ignored<Activation>,
    pub input_dim:  usize,
    pub output_dim: usize,
}

fn param_tensor<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<ParamTensor> {
    let shape  = tensor.dims().to_vec();
    let values = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| Error::Tensor(format!("{e:?}")))?;
    ParamTensor::new(shape, values)
}

fn linear_params<B: Backend>(prefix: &str, linear: &Linear<B>) -> Result<[(String, ParamTensor); 2]> {
    let bias = linear
        .bias
        .as_ref()
        .ok_or_else(|| Error::Tensor(format!("'{prefix}' has no bias")))?;
    Ok([
        (format!("{prefix}.weight"), param_tensor(linear.weight.val())?),
        (format!("{prefix}.bias"), param_tensor(bias.val())?),
    ])
}

/// Take `key` out of `states`, checking it against the expected shape.
fn take_param(states: &mut StateDict, key: &str, expected: &[usize]) -> Result<Vec<f32>> {
    let param = states
        .remove(key)
        .ok_or_else(|| Error::config(format!("state_dict.{key}"), "missing key"))?;
    if param.shape != expected {
        return Err(Error::config(
            format!("state_dict.{key}"),
            format!("shape {:?} does not match model shape {expected:?}", param.shape),
        ));
    }
    Ok(param.values)
}

fn load_linear<B: Backend>(
    states: &mut StateDict,
    prefix: &str,
    linear: Linear<B>,
    device: &B::Device,
) -> Result<Linear<B>> {
    let [d_in, d_out] = linear.weight.val().dims();
    let weight = take_param(states, &format!("{prefix}.weight"), &[d_in, d_out])?;
    let bias   = take_param(states, &format!("{prefix}.bias"), &[d_out])?;
    Ok(Linear {
        weight: Param::from_tensor(Tensor::from_data(TensorData::new(weight, [d_in, d_out]), device)),
        bias:   Some(Param::from_tensor(Tensor::from_data(TensorData::new(bias, [d_out]), device))),
    })
}

impl<B: Backend> Fcnn<B> {
    fn named_linears(&self) -> impl Iterator<Item = (String, &Linear<B>)> + '_ {
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, l)| (format!("blocks.{i}"), l))
            .chain(std::iter::once(("head".to_string(), &self.head)))
    }

    fn expected_keys(&self) -> BTreeSet<String> {
        self.named_linears()
            .flat_map(|(prefix, _)| [format!("{prefix}.weight"), format!("{prefix}.bias")])
            .collect()
    }
}

impl<B: Backend> ModelProtocol<B> for Fcnn<B> {
    fn forward(&self, batch: &NamedTensors<B>) -> Result<NamedTensors<B>> {
        let mut x = batch
            .get(INPUT_KEY)
            .cloned()
            .ok_or_else(|| Error::config(format!("batch.{INPUT_KEY}"), "model input is missing"))?;
        let [_, cols] = x.dims();
        if cols != self.input_dim {
            return Err(Error::Tensor(format!("expected {} input features, got {cols}", self.input_dim)));
        }
        for block in &self.blocks {
            x = self.dropout.forward(self.activation.0.apply(block.forward(x)));
        }
        let mut out = NamedTensors::new();
        out.insert(PREDICTIONS_KEY.to_string(), self.head.forward(x));
        Ok(out)
    }

    fn state_dict(&self) -> Result<StateDict> {
        let mut states = StateDict::new();
        for (prefix, linear) in self.named_linears() {
            states.extend(linear_params(&prefix, linear)?);
        }
        Ok(states)
    }

    fn load_state_dict(self, mut states: StateDict, device: &B::Device) -> Result<Self> {
        let expected = self.expected_keys();
        if let Some(extra) = states.keys().find(|k| !expected.contains(*k)) {
            return Err(Error::config(format!("state_dict.{extra}"), "unexpected key"));
        }

        let Fcnn { blocks, head, dropout, activation, input_dim, output_dim } = self;
        let blocks = blocks
            .into_iter()
            .enumerate()
            .map(|(i, l)| load_linear(&mut states, &format!("blocks.{i}"), l, device))
            .collect::<Result<Vec<_>>>()?;
        let head = load_linear(&mut states, "head", head, device)?;
        Ok(Fcnn { blocks, head, dropout, activation, input_dim, output_dim })
    }

    fn export_graph(&self, graph: &mut GraphBuilder) -> Result<()> {
        let mut x = graph.input(INPUT_KEY)?;
        let act   = self.activation.0.onnx_op();
        for (prefix, linear) in self.named_linears() {
            let [(w_name, w), (b_name, b)] = linear_params(&prefix, linear)?;
            let w = graph.initializer(&w_name, &w.shape, &w.values);
            let b = graph.initializer(&b_name, &b.shape, &b.values);
            let h = graph.node("Gemm", &[x.as_str(), w.as_str(), b.as_str()], Vec::new());
            x = if prefix == "head" { h } else { graph.node(act, &[h.as_str()], Vec::new()) };
        }
        graph.output(PREDICTIONS_KEY, &x, self.output_dim);
        Ok(())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::arrays::{to_arrays, to_tensors, NamedArrays};
    use burn::backend::NdArray;
    use ndarray::array;

    type B = NdArray;

    fn batch() -> NamedArrays {
        let mut b = NamedArrays::new();
        b.insert(INPUT_KEY.into(), array![[0.5f32, -1.0, 2.0], [1.0, 0.0, -0.5]]);
        b
    }

    #[test]
    fn test_forward_shape_and_names() {
        let device = Default::default();
        let model: Fcnn<B> = FcnnConfig::default().init(3, 2, &device);
        let out = model.forward(&to_tensors::<B>(&batch(), &device)).unwrap();
        assert_eq!(out.keys().collect::<Vec<_>>(), vec![PREDICTIONS_KEY]);
        assert_eq!(out[PREDICTIONS_KEY].dims(), [2, 2]);
    }

    #[test]
    fn test_state_dict_names_and_shapes() {
        let device = Default::default();
        let model: Fcnn<B> = FcnnConfig { hidden_units: vec![4], ..Default::default() }.init(3, 1, &device);
        let states = model.state_dict().unwrap();
        let keys: Vec<_> = states.keys().cloned().collect();
        assert_eq!(keys, vec!["blocks.0.bias", "blocks.0.weight", "head.bias", "head.weight"]);
        assert_eq!(states["blocks.0.weight"].shape, vec![3, 4]);
        assert_eq!(states["head.bias"].shape, vec![1]);
    }

    #[test]
    fn test_load_state_dict_reproduces_outputs() {
        let device = Default::default();
        let config = FcnnConfig::default();
        let source: Fcnn<B> = config.init(3, 1, &device);
        let target: Fcnn<B> = config.init(3, 1, &device);

        let target = target.load_state_dict(source.state_dict().unwrap(), &device).unwrap();
        let inputs = to_tensors::<B>(&batch(), &device);
        let a = to_arrays(source.forward(&inputs).unwrap()).unwrap();
        let b = to_arrays(target.forward(&inputs).unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_load_state_dict_is_strict() {
        let device = Default::default();
        let model: Fcnn<B> = FcnnConfig::linear().init(3, 1, &device);

        let mut extra = model.state_dict().unwrap();
        extra.insert("bogus".into(), ParamTensor::new(vec![1], vec![0.0]).unwrap());
        let err = model.clone().load_state_dict(extra, &device).unwrap_err();
        assert!(err.to_string().contains("state_dict.bogus"));

        let mut missing = model.state_dict().unwrap();
        missing.remove("head.bias");
        assert!(model.clone().load_state_dict(missing, &device).is_err());

        let mut wrong = model.state_dict().unwrap();
        wrong.insert("head.weight".into(), ParamTensor::new(vec![1, 3], vec![0.0; 3]).unwrap());
        let err = model.load_state_dict(wrong, &device).unwrap_err();
        assert!(err.to_string().contains("shape"));
    }

    #[test]
    fn test_config_validation() {
        assert!(FcnnConfig::default().validate().is_ok());
        assert!(FcnnConfig { hidden_units: vec![0], ..Default::default() }.validate().is_err());
        assert!(FcnnConfig { dropout: 1.5, ..Default::default() }.validate().is_err());
    }
}
