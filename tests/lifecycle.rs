mod common;

use std::cell::Cell;
use std::fs;

use forgelearn::constants::{
    CHECKPOINTS_FOLDER, CONFIGS_FILE, CONFIG_BUNDLE_FILE, DATA_FOLDER, FINAL_RESULTS_FILE, METRICS_LOG_FILE, SCORES_FILE,
};
use forgelearn::domain::{ConfigBundle, MetricsOutputs, OptimizerPack, OptimizerSettings, StateDict};
use forgelearn::infra::archive::{archive_path, compress, ExtractedScope};
use forgelearn::pipeline::PipelineState;
use forgelearn::prelude::*;
use forgelearn::Error;
use tempfile::TempDir;

use common::*;

#[test]
fn test_fit_save_load_predict_round_trip() {
    let tmp        = TempDir::new().unwrap();
    let mut p      = fitted(&tmp.path().join("_logs"));
    let (x, _)     = regression_data(20);
    let before     = predictions(&p, &x);
    let out        = tmp.path().join("out");

    p.save(&out, SaveOptions::default()).unwrap();
    assert_eq!(p.state(), PipelineState::Persisted);
    assert!(archive_path(&out).is_file());
    assert!(!out.exists());

    let restored = TabularPipeline::<B>::load(&out, registries(), LoadOptions::default()).unwrap();
    assert_eq!(restored.state(), PipelineState::Restored);
    assert!(restored.workplace().is_none());
    assert_close(&before, &predictions(&restored, &x), 1e-6);
}

#[test]
fn test_export_folder_layout() {
    let tmp   = TempDir::new().unwrap();
    let mut p = fitted(&tmp.path().join("_logs"));
    let out   = tmp.path().join("plain");

    let options = SaveOptions { compress: false, retain_data: true, ..SaveOptions::default() };
    p.save(&out, options).unwrap();

    for file in [FINAL_RESULTS_FILE, CONFIG_BUNDLE_FILE, CONFIGS_FILE, METRICS_LOG_FILE] {
        assert!(out.join(file).is_file(), "missing {file}");
    }
    assert!(out.join(CHECKPOINTS_FOLDER).join("model_0.pt").is_file());
    assert!(out.join(CHECKPOINTS_FOLDER).join(SCORES_FILE).is_file());
    assert!(out.join(DATA_FOLDER).join("train.csv").is_file());

    let log = fs::read_to_string(out.join(METRICS_LOG_FILE)).unwrap();
    assert_eq!(log.lines().count(), 3);

    let results: MetricsOutputs =
        serde_json::from_str(&fs::read_to_string(out.join(FINAL_RESULTS_FILE)).unwrap()).unwrap();
    assert!(results.metric_values.contains_key("mae"));
}

#[test]
fn test_compression_preserves_bytes() {
    let tmp   = TempDir::new().unwrap();
    let mut p = fitted(&tmp.path().join("_logs"));
    let out   = tmp.path().join("bytes");
    p.save(&out, SaveOptions { compress: false, ..SaveOptions::default() }).unwrap();

    let files = [
        CONFIGS_FILE.to_string(),
        FINAL_RESULTS_FILE.to_string(),
        format!("{CHECKPOINTS_FOLDER}/{SCORES_FILE}"),
    ];
    let original: Vec<Vec<u8>> = files.iter().map(|f| fs::read(out.join(f)).unwrap()).collect();

    compress(&out, true).unwrap();
    let scope = ExtractedScope::open(&out, true).unwrap();
    assert!(scope.is_temporary());
    for (file, bytes) in files.iter().zip(original) {
        assert_eq!(fs::read(scope.path().join(file)).unwrap(), bytes, "{file} changed");
    }
}

#[test]
fn test_workplace_holds_configs_before_training() {
    let tmp = TempDir::new().unwrap();
    let p   = TabularPipeline::<B>::new(small_config(tmp.path()), registries()).unwrap();
    let workplace = p.workplace().unwrap();
    assert!(workplace.starts_with(tmp.path()));
    assert!(workplace.join(CONFIGS_FILE).is_file());

    let second = TabularPipeline::<B>::new(small_config(tmp.path()), registries()).unwrap();
    assert_ne!(second.workplace().unwrap(), workplace);
}

#[test]
fn test_workplace_configs_gain_data_fields_after_fit() {
    let tmp    = TempDir::new().unwrap();
    let (x, y) = regression_data(32);
    let mut p  = TabularPipeline::<B>::new(small_config(tmp.path()), registries()).unwrap();
    let path   = p.workplace().unwrap().join(CONFIGS_FILE);
    let read   = || -> serde_json::Value { serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap() };

    let before = read();
    assert!(before["output_dim"].is_null());
    assert_eq!(before["trainer"]["optimizer_settings"]["all"]["optimizer"], "adam");

    p.fit(TabularData::arrays(x, y), SampleWeights::None, None).unwrap();
    assert_eq!(read()["output_dim"], 1);
}

#[test]
fn test_refit_is_rejected() {
    let tmp    = TempDir::new().unwrap();
    let mut p  = fitted(tmp.path());
    let (x, y) = regression_data(16);
    let err    = p.fit(TabularData::arrays(x, y), SampleWeights::None, None).unwrap_err();
    assert!(matches!(err, Error::Config { .. }));
}

#[test]
fn test_save_before_fit_is_rejected() {
    let tmp   = TempDir::new().unwrap();
    let mut p = TabularPipeline::<B>::new(small_config(tmp.path()), registries()).unwrap();
    assert!(p.save(&tmp.path().join("out"), SaveOptions::default()).is_err());
    assert!(!tmp.path().join("out").exists());
}

#[test]
fn test_load_missing_export_names_path() {
    let tmp = TempDir::new().unwrap();
    let err = TabularPipeline::<B>::load(&tmp.path().join("nowhere"), registries(), LoadOptions::default()).unwrap_err();
    assert!(matches!(err, Error::MissingArtifact { .. }));
    assert!(err.to_string().contains("nowhere"));
}

#[test]
fn test_states_callback_and_strict_loading() {
    let tmp   = TempDir::new().unwrap();
    let mut p = fitted(&tmp.path().join("_logs"));
    let out   = tmp.path().join("out");
    p.save(&out, SaveOptions::default()).unwrap();

    let drop_head = |mut states: StateDict| -> forgelearn::Result<StateDict> {
        states.remove("head.bias");
        Ok(states)
    };
    let options = LoadOptions { states_callback: Some(&drop_head), ..LoadOptions::default() };
    let err = TabularPipeline::<B>::load(&out, registries(), options).unwrap_err();
    assert!(err.to_string().contains("head.bias"));

    let keep = |states: StateDict| -> forgelearn::Result<StateDict> { Ok(states) };
    let options = LoadOptions { states_callback: Some(&keep), ..LoadOptions::default() };
    assert!(TabularPipeline::<B>::load(&out, registries(), options).is_ok());
}

#[test]
fn test_load_callback_sees_constructed_pipeline() {
    let tmp   = TempDir::new().unwrap();
    let mut p = fitted(&tmp.path().join("_logs"));
    let out   = tmp.path().join("out");
    p.save(&out, SaveOptions::default()).unwrap();

    let seen = Cell::new(None);
    let bump = |pipeline: &mut TabularPipeline<B>, bundle: &ConfigBundle<TabularConfig>| -> forgelearn::Result<()> {
        assert_eq!(pipeline.state(), PipelineState::Constructed);
        assert!(pipeline.config().common.in_loading);
        seen.set(bundle.input_dim);
        pipeline.config_mut().common.batch_size = 3;
        Ok(())
    };
    let options  = LoadOptions { callback: Some(&bump), device: Some("cpu".into()), ..LoadOptions::default() };
    let restored = TabularPipeline::<B>::load(&out, registries(), options).unwrap();
    assert_eq!(seen.get(), Some(2));
    assert_eq!(restored.config().common.batch_size, 3);
    assert!(restored.device_info().is_cpu());
}

#[test]
fn test_failing_load_callback_aborts_load() {
    let tmp   = TempDir::new().unwrap();
    let mut p = fitted(&tmp.path().join("_logs"));
    let out   = tmp.path().join("out");
    p.save(&out, SaveOptions::default()).unwrap();

    let refuse = |_: &mut TabularPipeline<B>, _: &ConfigBundle<TabularConfig>| -> forgelearn::Result<()> {
        Err(Error::config("bundle.tokenizer", "missing"))
    };
    let options = LoadOptions { callback: Some(&refuse), ..LoadOptions::default() };
    let err = TabularPipeline::<B>::load(&out, registries(), options).unwrap_err();
    assert!(err.to_string().contains("bundle.tokenizer"));
}

#[test]
fn test_load_without_device_goes_to_cpu() {
    let tmp   = TempDir::new().unwrap();
    let mut p = fitted(&tmp.path().join("_logs"));
    let out   = tmp.path().join("gpu_trained");
    p.save(&out, SaveOptions { compress: false, ..SaveOptions::default() }).unwrap();

    let path = out.join(CONFIG_BUNDLE_FILE);
    let mut bundle: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    bundle["device_info"]["cuda"] = serde_json::json!("0");
    fs::write(&path, serde_json::to_string(&bundle).unwrap()).unwrap();

    let plain    = LoadOptions { compress: false, ..LoadOptions::default() };
    let restored = TabularPipeline::<B>::load(&out, registries(), plain).unwrap();
    assert!(restored.device_info().is_cpu());

    let pinned   = LoadOptions { compress: false, device: Some("cuda:1".into()), ..LoadOptions::default() };
    let restored = TabularPipeline::<B>::load(&out, registries(), pinned).unwrap();
    assert_eq!(restored.device_info().cuda(), Some("1"));
}

#[test]
fn test_fit_without_auto_callbacks_uses_default_optimizer() {
    let tmp    = TempDir::new().unwrap();
    let mut config = small_config(tmp.path());
    config.common.trainer.auto_callback = false;
    let (x, y) = regression_data(32);

    let mut p = TabularPipeline::<B>::new(config, registries()).unwrap();
    p.fit(TabularData::arrays(x, y), SampleWeights::None, None).unwrap();
    assert_eq!(p.state(), PipelineState::Trained);
}

#[test]
fn test_unknown_optimizer_fails_at_construction() {
    let tmp        = TempDir::new().unwrap();
    let mut config = small_config(tmp.path());
    let mut settings = OptimizerSettings::new();
    settings.insert("all".into(), OptimizerPack { optimizer: Some("nope".into()), ..OptimizerPack::default() });
    config.common.trainer.optimizer_settings = Some(settings);

    let err = TabularPipeline::<B>::new(config, registries()).unwrap_err();
    assert!(matches!(err, Error::Config { .. }));
    assert!(err.to_string().contains("nope"));
    assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
}

#[test]
fn test_csv_fit_and_predict() {
    let tmp    = TempDir::new().unwrap();
    let (x, y) = regression_data(40);
    let mut csv = String::from("a,b,target\n");
    for (row, label) in x.rows().into_iter().zip(y.iter()) {
        csv.push_str(&format!("{},{},{}\n", row[0], row[1], label));
    }
    let path = tmp.path().join("train.csv");
    fs::write(&path, csv).unwrap();

    let mut p = TabularPipeline::<B>::new(small_config(tmp.path()), registries()).unwrap();
    p.fit(TabularData::Csv(path.clone()), SampleWeights::None, None).unwrap();
    assert_eq!(p.config().label_name.as_deref(), Some("target"));
    assert_eq!(p.input_dim(), Some(2));

    let outputs = p.predict(&TabularData::Csv(path), PredictOptions { batch_size: 7 }).unwrap();
    assert_eq!(outputs["predictions"].dim(), (40, 1));
}

#[test]
fn test_placeholder_results_for_restored_pipeline() {
    let tmp   = TempDir::new().unwrap();
    let mut p = fitted(&tmp.path().join("_logs"));
    let out   = tmp.path().join("out");
    p.save(&out, SaveOptions::default()).unwrap();

    let mut restored = TabularPipeline::<B>::load(&out, registries(), LoadOptions::default()).unwrap();
    let again = tmp.path().join("again");
    restored.save(&again, SaveOptions { compress: false, ..SaveOptions::default() }).unwrap();

    let results: MetricsOutputs =
        serde_json::from_str(&fs::read_to_string(again.join(FINAL_RESULTS_FILE)).unwrap()).unwrap();
    assert_eq!(results, MetricsOutputs::placeholder());
    assert_eq!(fs::read_to_string(again.join(METRICS_LOG_FILE)).unwrap(), "");
}
