mod common;

use std::fs;

use serde_json::{json, Map};
use tempfile::TempDir;

use forgelearn::constants::{CONFIG_BUNDLE_FILE, ONNX_FILE, ONNX_OPSET_VERSION, ONNX_SETTINGS_FILE};
use forgelearn::infra::archive::archive_path;
use forgelearn::infra::checkpoint::write_state_dict;
use forgelearn::ml::onnx::{DynamicAxes, OnnxExportSettings};
use forgelearn::ml::ModelProtocol;
use forgelearn::pipeline::PipelineState;
use forgelearn::prelude::*;
use forgelearn::Error;

use common::*;

fn plain() -> OnnxOptions {
    OnnxOptions { compress: false, ..OnnxOptions::default() }
}

fn settings(folder: &std::path::Path) -> OnnxExportSettings {
    serde_json::from_str(&fs::read_to_string(folder.join(ONNX_SETTINGS_FILE)).unwrap()).unwrap()
}

#[test]
fn test_onnx_predictions_match_native() {
    let tmp    = TempDir::new().unwrap();
    let mut p  = fitted(&tmp.path().join("_logs"));
    let (x, _) = regression_data(30);
    let native = predictions(&p, &x);
    let export = tmp.path().join("onnx");

    p.to_onnx(&export, OnnxOptions::default()).unwrap();
    assert!(archive_path(&export).is_file());
    assert!(!export.exists());

    let restored = TabularPipeline::<B>::from_onnx(&export, registries(), FromOnnxOptions::default()).unwrap();
    assert!(restored.is_onnx());
    assert_eq!(restored.state(), PipelineState::Restored);
    assert_close(&native, &predictions(&restored, &x), 1e-4);
}

#[test]
fn test_onnx_settings_are_recorded() {
    let tmp    = TempDir::new().unwrap();
    let mut p  = fitted(&tmp.path().join("_logs"));
    let export = tmp.path().join("onnx");

    let mut extra = Map::new();
    extra.insert("note".into(), json!("nightly"));
    p.to_onnx(&export, OnnxOptions { extra, ..plain() }).unwrap();

    assert!(export.join(ONNX_FILE).is_file());
    assert!(export.join(CONFIG_BUNDLE_FILE).is_file());
    let s = settings(&export);
    assert_eq!(s.input_names, vec!["input"]);
    assert_eq!(s.output_names, vec!["predictions"]);
    assert_eq!(s.opset_version, ONNX_OPSET_VERSION);
    assert!(s.export_params && s.do_constant_folding);
    assert_eq!(s.dynamic_axes["input"]["0"], "batch_size");
    assert_eq!(s.dynamic_axes["predictions"]["0"], "batch_size");
    assert_eq!(s.extra["note"], "nightly");
}

#[test]
fn test_listed_dynamic_axes_get_generated_names() {
    let tmp    = TempDir::new().unwrap();
    let mut p  = fitted(&tmp.path().join("_logs"));
    let export = tmp.path().join("onnx");

    let options = OnnxOptions { dynamic_axes: Some(DynamicAxes::Axes(vec![1])), ..plain() };
    p.to_onnx(&export, options).unwrap();

    let axes = &settings(&export).dynamic_axes["input"];
    assert_eq!(axes.len(), 2);
    assert_eq!(axes["0"], "batch_size");
    assert_eq!(axes["1"], "axis.1");
}

#[test]
fn test_onnx_pipeline_cannot_train_or_reexport() {
    let tmp    = TempDir::new().unwrap();
    let mut p  = fitted(&tmp.path().join("_logs"));
    let export = tmp.path().join("onnx");
    p.to_onnx(&export, OnnxOptions::default()).unwrap();

    let mut restored = TabularPipeline::<B>::from_onnx(&export, registries(), FromOnnxOptions::default()).unwrap();
    let (x, y) = regression_data(16);
    let err    = restored.fit(TabularData::arrays(x, y), SampleWeights::None, None).unwrap_err();
    assert!(matches!(err, Error::Config { .. }));
    assert!(restored.to_onnx(&tmp.path().join("again"), plain()).is_err());
}

#[test]
fn test_failed_export_keeps_model_usable() {
    let tmp    = TempDir::new().unwrap();
    let mut p  = fitted(&tmp.path().join("_logs"));
    let (x, _) = regression_data(10);
    let before = predictions(&p, &x);
    let export = tmp.path().join("broken");
    // a directory where the graph file should go makes the write fail
    fs::create_dir_all(export.join(ONNX_FILE)).unwrap();

    assert!(p.to_onnx(&export, plain()).is_err());
    assert!(!export.exists());
    assert!(p.device_info().is_cpu());
    assert!(!p.is_onnx());
    assert_close(&before, &predictions(&p, &x), 0.0);
}

#[test]
fn test_pretrained_export_without_weights_only_warns() {
    let tmp    = TempDir::new().unwrap();
    let p      = fitted(&tmp.path().join("_logs"));
    let export = tmp.path().join("pretrained");

    let pipeline = TabularPipeline::<B>::from_pretrained_onnx(
        p.config().clone(),
        registries(),
        2,
        &tmp.path().join("missing.safetensors"),
        &export,
        OnnxOptions::default(),
    )
    .unwrap();
    assert!(pipeline.model().is_none());
    assert!(!export.exists());
    assert!(!archive_path(&export).exists());
}

#[test]
fn test_pretrained_weights_export_matches_native() {
    let tmp     = TempDir::new().unwrap();
    let p       = fitted(&tmp.path().join("_logs"));
    let (x, _)  = regression_data(25);
    let weights = tmp.path().join("weights.safetensors");
    write_state_dict(&weights, &p.model().unwrap().state_dict().unwrap()).unwrap();

    let export = tmp.path().join("pretrained");
    let pipeline = TabularPipeline::<B>::from_pretrained_onnx(
        p.config().clone(),
        registries(),
        2,
        &weights,
        &export,
        plain(),
    )
    .unwrap();
    assert!(pipeline.workplace().is_none());
    assert!(export.join(ONNX_FILE).is_file());

    let options  = FromOnnxOptions { compress: false, ..FromOnnxOptions::default() };
    let restored = TabularPipeline::<B>::from_onnx(&export, registries(), options).unwrap();
    assert_close(&predictions(&p, &x), &predictions(&restored, &x), 1e-4);
}
