// ONNX graph export and a minimal runtime for the exported graphs.

pub mod export;
pub mod proto;
pub mod runtime;

pub use export::{resolve_dynamic_axes, DynamicAxes, GraphBuilder, OnnxAdapter, OnnxExportSettings};
pub use runtime::OnnxSession;
