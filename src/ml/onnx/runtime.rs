// ============================================================
// Layer 5: ONNX runtime
// ============================================================
// A small ndarray interpreter for the graphs this crate exports.
// It lets a pipeline restored with `from_onnx` predict without
// the training backend. Nodes are evaluated in file order (the
// exporter writes them topologically).
//
// Supported operators: Gemm, MatMul, Add, Relu, Sigmoid, Tanh,
// Identity, Softmax. Anything else is rejected when the session
// is built, not at predict time.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{Array2, ArrayD, Axis, Ix2};

use crate::domain::arrays::NamedArrays;
use crate::error::{Error, IoContext, Result};
use crate::ml::onnx::proto::{decode, dimension, AttributeProto, GraphProto, NodeProto};

const SUPPORTED: &[&str] = &["Gemm", "MatMul", "Add", "Relu", "Sigmoid", "Tanh", "Identity", "Softmax"];

#[derive(Debug, Clone)]
struct InputSpec {
    name: String,
    dims: Vec<dimension::Value>,
}

/// An exported graph decoded into memory and ready to run.
#[derive(Debug, Clone)]
pub struct OnnxSession {
    path:         PathBuf,
    inputs:       Vec<InputSpec>,
    output_names: Vec<String>,
    nodes:        Vec<NodeProto>,
    constants:    HashMap<String, ArrayD<f32>>,
}

impl OnnxSession {
    /// Decode `path`. `output_names` restricts (and orders) what `run` returns.
    pub fn load(path: &Path, output_names: Option<Vec<String>>) -> Result<Self> {
        let bytes = fs::read(path).at(path)?;
        let model = decode(&bytes).map_err(|e| Error::onnx(path, e.to_string()))?;
        let graph = model.graph.ok_or_else(|| Error::onnx(path, "model has no graph"))?;
        Self::from_graph(path, graph, output_names)
    }

    fn from_graph(path: &Path, graph: GraphProto, output_names: Option<Vec<String>>) -> Result<Self> {
        if let Some(node) = graph.node.iter().find(|n| !SUPPORTED.contains(&n.op_type.as_str())) {
            return Err(Error::onnx(path, format!("unsupported operator '{}'", node.op_type)));
        }

        let mut constants = HashMap::new();
        for t in &graph.initializer {
            let shape: Vec<usize> = t.dims.iter().map(|&d| d as usize).collect();
            let array = ArrayD::from_shape_vec(shape, t.values())
                .map_err(|e| Error::onnx(path, format!("initializer '{}': {e}", t.name)))?;
            constants.insert(t.name.clone(), array);
        }

        let inputs = graph
            .input
            .iter()
            .filter(|v| !constants.contains_key(&v.name))
            .map(|v| InputSpec { name: v.name.clone(), dims: v.dims() })
            .collect();

        let graph_outputs: Vec<String> = graph.output.iter().map(|v| v.name.clone()).collect();
        let output_names = match output_names {
            Some(names) => {
                if let Some(missing) = names.iter().find(|n| !graph_outputs.contains(n)) {
                    return Err(Error::onnx(path, format!("graph has no output '{missing}'")));
                }
                names
            }
            None => graph_outputs,
        };

        Ok(Self { path: path.to_path_buf(), inputs, output_names, nodes: graph.node, constants })
    }

    pub fn input_names(&self) -> Vec<&str> {
        self.inputs.iter().map(|i| i.name.as_str()).collect()
    }

    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }

    fn check_input(&self, spec: &InputSpec, value: &Array2<f32>) -> Result<()> {
        let actual = [value.nrows(), value.ncols()];
        if spec.dims.len() != actual.len() {
            return Err(Error::onnx(&self.path, format!("input '{}' must be rank {}", spec.name, spec.dims.len())));
        }
        for (axis, (dim, size)) in spec.dims.iter().zip(actual).enumerate() {
            if let dimension::Value::DimValue(expected) = dim {
                if *expected as usize != size {
                    return Err(Error::onnx(
                        &self.path,
                        format!("input '{}' axis {axis}: expected {expected}, got {size}", spec.name),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Evaluate the graph. Extra keys in `inputs` are ignored.
    pub fn run(&self, inputs: &NamedArrays) -> Result<NamedArrays> {
        let mut values: HashMap<&str, ArrayD<f32>> = HashMap::new();
        for spec in &self.inputs {
            let value = inputs
                .get(&spec.name)
                .ok_or_else(|| Error::onnx(&self.path, format!("missing input '{}'", spec.name)))?;
            self.check_input(spec, value)?;
            values.insert(spec.name.as_str(), value.clone().into_dyn());
        }

        for node in &self.nodes {
            let args = node
                .input
                .iter()
                .map(|name| {
                    values
                        .get(name.as_str())
                        .or_else(|| self.constants.get(name))
                        .ok_or_else(|| Error::onnx(&self.path, format!("node '{}' reads unknown value '{name}'", node.name)))
                })
                .collect::<Result<Vec<&ArrayD<f32>>>>()?;
            let result = self.eval(node, &args)?;
            let name   = node
                .output
                .first()
                .ok_or_else(|| Error::onnx(&self.path, format!("node '{}' has no output", node.name)))?;
            values.insert(name.as_str(), result);
        }

        self.output_names
            .iter()
            .map(|name| {
                let value = values
                    .remove(name.as_str())
                    .ok_or_else(|| Error::onnx(&self.path, format!("output '{name}' was never produced")))?;
                let value = value
                    .into_dimensionality::<Ix2>()
                    .map_err(|e| Error::onnx(&self.path, format!("output '{name}': {e}")))?;
                Ok((name.clone(), value))
            })
            .collect()
    }

    fn eval(&self, node: &NodeProto, args: &[&ArrayD<f32>]) -> Result<ArrayD<f32>> {
        let arity = |n: usize| -> Result<()> {
            if args.len() < n {
                return Err(Error::onnx(&self.path, format!("'{}' needs {n} inputs, got {}", node.name, args.len())));
            }
            Ok(())
        };
        let matrix = |a: &ArrayD<f32>| -> Result<Array2<f32>> {
            a.clone()
                .into_dimensionality::<Ix2>()
                .map_err(|e| Error::onnx(&self.path, format!("'{}': {e}", node.name)))
        };

        let product = |a: &Array2<f32>, b: &Array2<f32>| -> Result<Array2<f32>> {
            if a.ncols() != b.nrows() {
                return Err(Error::onnx(
                    &self.path,
                    format!("'{}': cannot multiply {:?} by {:?}", node.name, a.dim(), b.dim()),
                ));
            }
            Ok(a.dot(b))
        };
        let add = |a: &ArrayD<f32>, b: &ArrayD<f32>| -> Result<ArrayD<f32>> {
            if broadcast_shape(a.shape(), b.shape()).is_none() {
                return Err(Error::onnx(
                    &self.path,
                    format!("'{}': cannot broadcast {:?} with {:?}", node.name, a.shape(), b.shape()),
                ));
            }
            Ok(a + b)
        };

        match node.op_type.as_str() {
            "Gemm" => {
                arity(2)?;
                let alpha   = attr_f(&node.attribute, "alpha", 1.0);
                let beta    = attr_f(&node.attribute, "beta", 1.0);
                let a       = matrix(args[0])?;
                let b       = matrix(args[1])?;
                let a       = if attr_i(&node.attribute, "transA", 0) != 0 { a.t().to_owned() } else { a };
                let b       = if attr_i(&node.attribute, "transB", 0) != 0 { b.t().to_owned() } else { b };
                let scaled = (product(&a, &b)? * alpha).into_dyn();
                match args.get(2) {
                    Some(c) => add(&scaled, &(*c * beta)),
                    None => Ok(scaled),
                }
            }
            "MatMul" => {
                arity(2)?;
                Ok(product(&matrix(args[0])?, &matrix(args[1])?)?.into_dyn())
            }
            "Add" => {
                arity(2)?;
                add(args[0], args[1])
            }
            "Relu"     => { arity(1)?; Ok(args[0].mapv(|v| v.max(0.0))) }
            "Sigmoid"  => { arity(1)?; Ok(args[0].mapv(|v| 1.0 / (1.0 + (-v).exp()))) }
            "Tanh"     => { arity(1)?; Ok(args[0].mapv(f32::tanh)) }
            "Identity" => { arity(1)?; Ok(args[0].clone()) }
            "Softmax"  => {
                arity(1)?;
                let mut m = matrix(args[0])?;
                for mut row in m.axis_iter_mut(Axis(0)) {
                    let max = row.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
                    row.mapv_inplace(|v| (v - max).exp());
                    let sum = row.sum();
                    row.mapv_inplace(|v| v / sum);
                }
                Ok(m.into_dyn())
            }
            other => Err(Error::onnx(&self.path, format!("unsupported operator '{other}'"))),
        }
    }
}

/// Numpy-style broadcast of two shapes, `None` when they clash.
fn broadcast_shape(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let rank    = a.len().max(b.len());
    let padded  = |s: &[usize], i: usize| if i + s.len() < rank { 1 } else { s[i + s.len() - rank] };
    (0..rank)
        .map(|i| match (padded(a, i), padded(b, i)) {
            (x, y) if x == y => Some(x),
            (1, y) => Some(y),
            (x, 1) => Some(x),
            _ => None,
        })
        .collect()
}

fn attr_f(attrs: &[AttributeProto], name: &str, default: f32) -> f32 {
    attrs.iter().find(|a| a.name == name).map(|a| a.f).unwrap_or(default)
}

fn attr_i(attrs: &[AttributeProto], name: &str, default: i64) -> i64 {
    attrs.iter().find(|a| a.name == name).map(|a| a.i).unwrap_or(default)
}
