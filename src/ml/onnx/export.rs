// ============================================================
// Layer 5: ONNX export
// ============================================================
// Models describe themselves through GraphBuilder: they ask for
// named inputs, register parameters as initializers, chain
// operators and bind named outputs. OnnxAdapter then pins the
// call signature to
//
//   (named inputs) → (named outputs)
//
// by tracing one forward pass on a representative sample. Input
// and output names are sorted so repeated exports of the same
// model produce identical graphs. Only inputs the graph actually
// reads become graph inputs (labels, weights, etc. are dropped).
//
// Every graph input and output gets the same dynamic-axis map;
// axis 0 is always "batch_size".

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use burn::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::{BATCH_AXIS_NAME, BATCH_INDICES_KEY, ONNX_OPSET_VERSION};
use crate::domain::arrays::{to_arrays, to_tensors, NamedArrays};
use crate::error::{Error, IoContext, Result};
use crate::ml::onnx::proto::{
    dimension, encode, AttributeProto, GraphProto, ModelProto, NodeProto, OperatorSetIdProto,
    TensorProto, ValueInfoProto, IR_VERSION,
};
use crate::ml::protocol::ModelProtocol;

// ─── Dynamic axes ─────────────────────────────────────────────────────────────
/// Caller-supplied dynamic axes: a bare list, or explicit names.
#[derive(Debug, Clone, PartialEq)]
pub enum DynamicAxes {
    Axes(Vec<usize>),
    Named(BTreeMap<usize, String>),
}

/// `[1]` → `{0: "batch_size", 1: "axis.1"}`; axis 0 is always the batch.
pub fn resolve_dynamic_axes(user: Option<&DynamicAxes>) -> BTreeMap<usize, String> {
    let mut axes = match user {
        None => BTreeMap::new(),
        Some(DynamicAxes::Axes(list)) => list.iter().map(|&a| (a, format!("axis.{a}"))).collect(),
        Some(DynamicAxes::Named(map)) => map.clone(),
    };
    axes.insert(0, BATCH_AXIS_NAME.to_string());
    axes
}

// ─── onnx.json ────────────────────────────────────────────────────────────────
/// The exact settings an export used; stored as `onnx.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnnxExportSettings {
    pub input_names:         Vec<String>,
    pub output_names:        Vec<String>,
    pub opset_version:       i64,
    pub export_params:       bool,
    pub do_constant_folding: bool,
    /// name → {axis (as a string key) → symbolic dim}
    pub dynamic_axes:        BTreeMap<String, BTreeMap<String, String>>,
    #[serde(flatten)]
    pub extra:               Map<String, Value>,
}

impl OnnxExportSettings {
    pub fn new(
        input_names:  Vec<String>,
        output_names: Vec<String>,
        axes:         &BTreeMap<usize, String>,
        extra:        Map<String, Value>,
    ) -> Self {
        let per_name: BTreeMap<String, String> = axes.iter().map(|(a, n)| (a.to_string(), n.clone())).collect();
        let dynamic_axes = input_names
            .iter()
            .chain(output_names.iter())
            .map(|name| (name.clone(), per_name.clone()))
            .collect();
        Self {
            input_names,
            output_names,
            opset_version: ONNX_OPSET_VERSION,
            export_params: true,
            do_constant_folding: true,
            dynamic_axes,
            extra,
        }
    }
}

// ─── GraphBuilder ─────────────────────────────────────────────────────────────
#[derive(Debug)]
pub struct GraphBuilder {
    available:    BTreeMap<String, usize>,
    consumed:     BTreeSet<String>,
    nodes:        Vec<NodeProto>,
    initializers: Vec<TensorProto>,
    outputs:      BTreeMap<String, usize>,
    counter:      usize,
}

impl GraphBuilder {
    /// `inputs` maps each candidate input name to its column count.
    pub fn new(inputs: BTreeMap<String, usize>) -> Self {
        Self {
            available:    inputs,
            consumed:     BTreeSet::new(),
            nodes:        Vec::new(),
            initializers: Vec::new(),
            outputs:      BTreeMap::new(),
            counter:      0,
        }
    }

    /// Reference a graph input, returning the value name to wire into nodes.
    pub fn input(&mut self, key: &str) -> Result<String> {
        if !self.available.contains_key(key) {
            return Err(Error::config(
                format!("onnx.input.{key}"),
                format!("model reads it but the sample only has {:?}", self.available.keys()),
            ));
        }
        self.consumed.insert(key.to_string());
        Ok(key.to_string())
    }

    pub fn initializer(&mut self, name: &str, dims: &[usize], values: &[f32]) -> String {
        self.initializers.push(TensorProto::floats(name, dims, values));
        name.to_string()
    }

    /// Append `op_type(inputs)` and return the name of its single output.
    pub fn node(&mut self, op_type: &str, inputs: &[&str], attribute: Vec<AttributeProto>) -> String {
        self.counter += 1;
        let output = format!("{}_{}", op_type.to_lowercase(), self.counter);
        self.nodes.push(NodeProto {
            input:  inputs.iter().map(|s| s.to_string()).collect(),
            output: vec![output.clone()],
            name:   format!("{op_type}_{}", self.counter),
            op_type: op_type.to_string(),
            attribute,
            ..Default::default()
        });
        output
    }

    /// Bind `value` to the graph output `key` with `cols` columns.
    pub fn output(&mut self, key: &str, value: &str, cols: usize) {
        self.nodes.push(NodeProto {
            input:   vec![value.to_string()],
            output:  vec![key.to_string()],
            name:    format!("output_{key}"),
            op_type: "Identity".to_string(),
            ..Default::default()
        });
        self.outputs.insert(key.to_string(), cols);
    }

    pub fn consumed_inputs(&self) -> Vec<String> {
        self.consumed.iter().cloned().collect()
    }

    pub fn output_names(&self) -> Vec<String> {
        self.outputs.keys().cloned().collect()
    }

    fn value_info(name: &str, cols: usize, axes: &BTreeMap<usize, String>) -> ValueInfoProto {
        let dims = [None, Some(cols)]
            .iter()
            .enumerate()
            .map(|(axis, size)| match (axes.get(&axis), size) {
                (Some(param), _) => dimension::Value::DimParam(param.clone()),
                (None, Some(n)) => dimension::Value::DimValue(*n as i64),
                (None, None) => dimension::Value::DimParam(format!("axis.{axis}")),
            })
            .collect();
        ValueInfoProto::float_tensor(name, dims)
    }

    pub fn finish(self, name: &str, axes: &BTreeMap<usize, String>) -> ModelProto {
        let input = self
            .consumed
            .iter()
            .map(|k| Self::value_info(k, self.available[k], axes))
            .collect();
        let output = self
            .outputs
            .iter()
            .map(|(k, cols)| Self::value_info(k, *cols, axes))
            .collect();
        ModelProto {
            ir_version:       IR_VERSION,
            producer_name:    env!("CARGO_PKG_NAME").to_string(),
            producer_version: env!("CARGO_PKG_VERSION").to_string(),
            opset_import:     vec![OperatorSetIdProto { domain: String::new(), version: ONNX_OPSET_VERSION }],
            graph: Some(GraphProto {
                node:        self.nodes,
                name:        name.to_string(),
                initializer: self.initializers,
                input,
                output,
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

// ─── OnnxAdapter ──────────────────────────────────────────────────────────────
/// Pins a model's call signature to named inputs → named outputs.
pub struct OnnxAdapter<'a, B: Backend, M: ModelProtocol<B>> {
    model:  &'a M,
    device: B::Device,
}

impl<'a, B: Backend, M: ModelProtocol<B>> OnnxAdapter<'a, B, M> {
    pub fn new(model: &'a M, device: B::Device) -> Self {
        Self { model, device }
    }

    pub fn forward(&self, inputs: &NamedArrays) -> Result<NamedArrays> {
        let tensors = to_tensors::<B>(inputs, &self.device);
        to_arrays(self.model.forward(&tensors)?)
    }

    /// Trace `sample`, build the graph and write it to `path`.
    pub fn export(
        &self,
        sample: &NamedArrays,
        axes:   &BTreeMap<usize, String>,
        extra:  Map<String, Value>,
        path:   &Path,
    ) -> Result<OnnxExportSettings> {
        let mut sample = sample.clone();
        sample.remove(BATCH_INDICES_KEY);

        let traced = self.forward(&sample)?;
        let output_names: Vec<String> = traced.keys().cloned().collect();

        let candidates = sample.iter().map(|(k, v)| (k.clone(), v.ncols())).collect();
        let mut graph  = GraphBuilder::new(candidates);
        self.model.export_graph(&mut graph)?;

        if graph.output_names() != output_names {
            return Err(Error::onnx(
                path,
                format!("graph outputs {:?} differ from traced outputs {output_names:?}", graph.output_names()),
            ));
        }
        let input_names = graph.consumed_inputs();
        let settings    = OnnxExportSettings::new(input_names, output_names, axes, extra);

        let proto = graph.finish("forgelearn", axes);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }
        fs::write(path, encode(&proto)).at(path)?;
        tracing::info!(
            "Exported ONNX graph to '{}' (inputs {:?}, outputs {:?})",
            path.display(), settings.input_names, settings.output_names
        );
        Ok(settings)
    }
}
