// ============================================================
// Shared names: files, folders and batch keys
// ============================================================

/// Every recoverable notice starts with this so log scrapers can
/// tell degraded-but-continuable conditions apart from failures.
pub const WARNING_PREFIX: &str = "~~~  [ warning ] ";

/// chrono format for workplace folder names (microsecond precision).
pub const TIME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S-%6f";

// ─── Export folder layout ─────────────────────────────────────────────────────
pub const CONFIGS_FILE:       &str = "configs.json";
pub const METRICS_LOG_FILE:   &str = "metrics.txt";
pub const FINAL_RESULTS_FILE: &str = "final_results.json";
pub const CONFIG_BUNDLE_FILE: &str = "config_bundle.json";
pub const CHECKPOINTS_FOLDER: &str = "checkpoints";
pub const SCORES_FILE:        &str = "scores.json";
pub const ONNX_FILE:          &str = "model.onnx";
pub const ONNX_SETTINGS_FILE: &str = "onnx.json";
pub const DATA_INFO_FILE:     &str = "__data__.json";
pub const DATA_FOLDER:        &str = "data";
pub const PACKED_FOLDER:      &str = "packed";
pub const LOCK_FILE:          &str = "__lock__";
pub const ARCHIVE_EXTENSION:  &str = "zip";

// ─── Checkpoint naming ────────────────────────────────────────────────────────
pub const CHECKPOINT_PREFIX:    &str = "model_";
pub const CHECKPOINT_EXTENSION: &str = "pt";
/// Rank used by `pack` for the single surviving checkpoint.
pub const PACKED_RANK: i64 = -1;

// ─── Batch keys ───────────────────────────────────────────────────────────────
pub const INPUT_KEY:          &str = "input";
pub const LABEL_KEY:          &str = "labels";
pub const PREDICTIONS_KEY:    &str = "predictions";
pub const BATCH_INDICES_KEY:  &str = "batch_indices";
pub const SAMPLE_WEIGHTS_KEY: &str = "sample_weights";
/// Row indices ride in f32 batches and stay exact up to 2^24.
pub const MAX_INDEXED_ROWS: usize = 1 << 24;

// ─── ONNX ─────────────────────────────────────────────────────────────────────
pub const ONNX_OPSET_VERSION: i64 = 11;
pub const BATCH_AXIS_NAME:    &str = "batch_size";

/// `model_<rank>.pt`
pub fn checkpoint_file(rank: i64) -> String {
    format!("{CHECKPOINT_PREFIX}{rank}.{CHECKPOINT_EXTENSION}")
}

/// Parse the rank back out of a checkpoint file name.
pub fn checkpoint_rank(file: &str) -> Option<i64> {
    file.strip_prefix(CHECKPOINT_PREFIX)?
        .strip_suffix(CHECKPOINT_EXTENSION)?
        .strip_suffix('.')?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_names() {
        assert_eq!(checkpoint_file(0), "model_0.pt");
        assert_eq!(checkpoint_file(PACKED_RANK), "model_-1.pt");
        assert_eq!(checkpoint_rank("model_3.pt"), Some(3));
        assert_eq!(checkpoint_rank("model_-1.pt"), Some(-1));
        assert_eq!(checkpoint_rank("scores.json"), None);
    }
}
