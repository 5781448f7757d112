// ============================================================
// Layer 3: Domain Layer
// ============================================================
// The vocabulary every other layer speaks: named batches, device
// descriptions, results, bundles and the traits behind which the
// pluggable training components live.

pub mod arrays;
pub mod device;
pub mod results;
pub mod settings;
pub mod traits;

pub use arrays::{NamedArrays, NamedTensors, ParamTensor, StateDict};
pub use device::{DeviceInfo, Placement};
pub use results::{ConfigBundle, FinalResults, MetricsOutputs};
pub use settings::{OptimizerPack, OptimizerSettings};
