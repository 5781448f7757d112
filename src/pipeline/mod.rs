// ============================================================
// Layer 2: Pipelines
// ============================================================
// The user-facing lifecycle: construct from a config, fit, save,
// load, pack and export. `dl` holds the generic machinery and
// `tabular` the one concrete family shipped with the crate.

pub mod config;
pub mod dl;
pub mod protocol;
pub mod scope;
pub mod tabular;

pub use config::{PipelineConfig, StateConfig, TqdmSettings, TrainerConfig};
pub use dl::{DLPipeline, PipelineState};
pub use protocol::{
    DataPreparable, FamilyConfig, FromOnnxOptions, LoadCallback, LoadOptions, ModulePreparable, OnnxOptions, PackOptions, Pipeline,
    PipelineFamily, PredictOptions, SaveOptions,
};
pub use scope::DeviceScope;
pub use tabular::{Tabular, TabularConfig, TabularData, TabularPipeline};
