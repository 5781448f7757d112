#![recursion_limit = "256"]
//! Deep-learning pipeline lifecycle on burn: fit a model, keep
//! rotating checkpoints, save / load / pack export folders under an
//! advisory lock, and export to ONNX.
//!
//! ```no_run
//! use std::sync::Arc;
//! use forgelearn::prelude::*;
//!
//! # fn main() -> forgelearn::Result<()> {
//! let registries = Arc::new(Registries::<CpuBackend>::with_defaults()?);
//! let mut p = TabularPipeline::new(TabularConfig::regression("mae"), registries.clone())?;
//! p.fit(TabularData::Csv("train.csv".into()), SampleWeights::None, None)?;
//! p.save("out".as_ref(), SaveOptions::default())?;
//!
//! let restored = TabularPipeline::<CpuBackend>::load("out".as_ref(), registries, LoadOptions::default())?;
//! let outputs  = restored.predict(&TabularData::Csv("test.csv".into()), PredictOptions::default())?;
//! # let _ = outputs;
//! # Ok(())
//! # }
//! ```

pub mod constants;
pub mod data;
pub mod domain;
pub mod error;
pub mod infra;
pub mod ml;
pub mod pipeline;

pub use error::{Error, Result};

/// Default training backend.
#[cfg(feature = "ndarray")]
pub type CpuBackend = burn::backend::Autodiff<burn::backend::NdArray>;

#[cfg(feature = "wgpu")]
pub type GpuBackend = burn::backend::Autodiff<burn::backend::Wgpu>;

pub mod prelude {
    #[cfg(feature = "ndarray")]
    pub use crate::CpuBackend;
    pub use crate::data::SampleWeights;
    pub use crate::domain::{DeviceInfo, NamedArrays};
    pub use crate::ml::Registries;
    pub use crate::pipeline::{
        FromOnnxOptions, LoadOptions, OnnxOptions, PackOptions, Pipeline, PredictOptions, SaveOptions,
        TabularConfig, TabularData, TabularPipeline,
    };
}
