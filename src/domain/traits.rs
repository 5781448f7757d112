// ============================================================
// Layer 3: Pluggable training components
// ============================================================
// Metrics, monitors and callbacks are looked up by name in the
// registries and only ever seen through these traits, so the
// trainer loop does not know which concrete ones it is running.
//
// None of these touch tensors: metrics score host-side arrays,
// monitors only see scalar scores, callbacks see epoch records.

use std::path::Path;

use ndarray::ArrayView2;

use crate::domain::results::MetricsOutputs;
use crate::domain::settings::OptimizerSettings;
use crate::error::Result;

// ─── Metric ───────────────────────────────────────────────────────────────────
/// Scores predictions against labels.
pub trait Metric: Send + Sync {
    fn name(&self) -> &str;

    /// `true` when larger values are better (accuracy), `false` for errors (mae).
    fn is_positive(&self) -> bool;

    /// `None` means the value is undefined for this input, for example
    /// r2 on constant labels; callers substitute a neutral score.
    fn evaluate(&self, predictions: ArrayView2<f32>, labels: ArrayView2<f32>) -> Option<f64>;
}

// ─── TrainerMonitor ───────────────────────────────────────────────────────────
/// Watches the per-epoch score and decides on snapshots and early stops.
pub trait TrainerMonitor: Send {
    fn name(&self) -> &str;

    /// Should a checkpoint be written for this score?
    fn snapshot(&mut self, score: f64) -> bool;

    /// Should training stop after this score?
    fn check_terminate(&mut self, score: f64) -> bool;
}

// ─── TrainerCallback ──────────────────────────────────────────────────────────
/// Mutable view a callback receives before the loop starts.
pub struct CallbackContext<'a> {
    pub workplace:          Option<&'a Path>,
    pub optimizer_settings: &'a mut OptimizerSettings,
}

/// One finished epoch as seen by callbacks.
#[derive(Debug, Clone)]
pub struct EpochRecord<'a> {
    pub epoch:      usize,
    pub step:       usize,
    pub lr:         f64,
    pub train_loss: f64,
    pub metrics:    &'a MetricsOutputs,
}

pub trait TrainerCallback: Send {
    fn name(&self) -> &str;

    fn initialize(&mut self, _ctx: &mut CallbackContext<'_>) -> Result<()> {
        Ok(())
    }

    fn log_metrics(&mut self, _record: &EpochRecord<'_>) -> Result<()> {
        Ok(())
    }

    fn finalize(&mut self, _final_results: &MetricsOutputs) -> Result<()> {
        Ok(())
    }
}
