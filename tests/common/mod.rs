// Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use ndarray::{Array, Array2};

use forgelearn::prelude::*;

pub type B = CpuBackend;

pub fn registries() -> Arc<Registries<B>> {
    Arc::new(Registries::with_defaults().unwrap())
}

/// y = 2·x0 − x1 + 0.5 over a small deterministic grid.
pub fn regression_data(rows: usize) -> (Array2<f32>, Array2<f32>) {
    let x = Array::from_shape_fn((rows, 2), |(i, j)| ((i * (j + 3)) % 11) as f32 / 11.0);
    let y = Array::from_shape_fn((rows, 1), |(i, _)| 2.0 * x[[i, 0]] - x[[i, 1]] + 0.5);
    (x, y)
}

pub fn small_config(workplace: &Path) -> TabularConfig {
    let mut config = TabularConfig::regression("mae");
    config.model_config = serde_json::json!({"hidden_units": [8]});
    config.common.batch_size = 16;
    let trainer = &mut config.common.trainer;
    trainer.workplace = workplace.to_path_buf();
    trainer.state_config.num_epoch = 3;
    trainer.state_config.max_epoch = 3;
    trainer.seed = Some(7);
    config
}

pub fn fitted(workplace: &Path) -> TabularPipeline<B> {
    let (x, y) = regression_data(64);
    let mut pipeline = TabularPipeline::<B>::new(small_config(workplace), registries()).unwrap();
    pipeline.fit(TabularData::arrays(x, y), SampleWeights::None, None).unwrap();
    pipeline
}

pub fn predictions(pipeline: &TabularPipeline<B>, x: &Array2<f32>) -> Array2<f32> {
    let outputs = pipeline
        .predict(&TabularData::features(x.clone()), PredictOptions::default())
        .unwrap();
    outputs["predictions"].clone()
}

pub fn assert_close(a: &Array2<f32>, b: &Array2<f32>, tolerance: f32) {
    assert_eq!(a.dim(), b.dim());
    for (p, q) in a.iter().zip(b.iter()) {
        assert!((p - q).abs() <= tolerance, "{p} vs {q}");
    }
}
