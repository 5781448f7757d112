// ============================================================
// Layer 5: Trainer monitors
// ============================================================
// Monitors see one score per evaluation (larger is better) and
// answer two questions: write a checkpoint now? stop now?
// The trainer asks every configured monitor and acts if any of
// them says yes.
//
//   basic     snapshot whenever the best score improves
//   mean_std  snapshot when score ≥ mean + std_factor · std of
//             the recent history (rewards clear outliers)
//   plateau   stop after `patience` evaluations without an
//             improvement larger than `tolerance`

use std::collections::VecDeque;

use serde::Deserialize;
use serde_json::Value;

use crate::domain::traits::TrainerMonitor;
use crate::error::{Error, Result};

fn parse<T: for<'de> Deserialize<'de> + Default>(name: &str, config: &Value) -> Result<T> {
    if config.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(config.clone()).map_err(|e| Error::config(format!("monitor_configs.{name}"), e.to_string()))
}

// ─── basic ────────────────────────────────────────────────────────────────────
#[derive(Debug, Default)]
pub struct BasicMonitor {
    best: Option<f64>,
}

impl TrainerMonitor for BasicMonitor {
    fn name(&self) -> &str {
        "basic"
    }

    fn snapshot(&mut self, score: f64) -> bool {
        if self.best.map_or(true, |best| score > best) {
            self.best = Some(score);
            return true;
        }
        false
    }

    fn check_terminate(&mut self, _score: f64) -> bool {
        false
    }
}

// ─── mean_std ─────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MeanStdConfig {
    pub std_factor: f64,
    pub window:     usize,
}

impl Default for MeanStdConfig {
    fn default() -> Self {
        Self { std_factor: 0.1, window: 25 }
    }
}

#[derive(Debug)]
pub struct MeanStdMonitor {
    config:  MeanStdConfig,
    history: VecDeque<f64>,
}

impl MeanStdMonitor {
    pub fn from_config(config: &Value) -> Result<Self> {
        let config: MeanStdConfig = parse("mean_std", config)?;
        if config.window == 0 {
            return Err(Error::config("monitor_configs.mean_std.window", "must be positive"));
        }
        Ok(Self { config, history: VecDeque::new() })
    }
}

impl TrainerMonitor for MeanStdMonitor {
    fn name(&self) -> &str {
        "mean_std"
    }

    fn snapshot(&mut self, score: f64) -> bool {
        let decision = if self.history.is_empty() {
            true
        } else {
            let n    = self.history.len() as f64;
            let mean = self.history.iter().sum::<f64>() / n;
            let std  = (self.history.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n).sqrt();
            score >= mean + self.config.std_factor * std
        };
        self.history.push_back(score);
        if self.history.len() > self.config.window {
            self.history.pop_front();
        }
        decision
    }

    fn check_terminate(&mut self, _score: f64) -> bool {
        false
    }
}

// ─── plateau ──────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlateauConfig {
    pub patience:  usize,
    pub tolerance: f64,
}

impl Default for PlateauConfig {
    fn default() -> Self {
        Self { patience: 5, tolerance: 1e-4 }
    }
}

#[derive(Debug)]
pub struct PlateauMonitor {
    config:   PlateauConfig,
    best:     Option<f64>,
    num_flat: usize,
}

impl PlateauMonitor {
    pub fn from_config(config: &Value) -> Result<Self> {
        let config: PlateauConfig = parse("plateau", config)?;
        if config.patience == 0 {
            return Err(Error::config("monitor_configs.plateau.patience", "must be positive"));
        }
        Ok(Self { config, best: None, num_flat: 0 })
    }
}

impl TrainerMonitor for PlateauMonitor {
    fn name(&self) -> &str {
        "plateau"
    }

    fn snapshot(&mut self, _score: f64) -> bool {
        false
    }

    fn check_terminate(&mut self, score: f64) -> bool {
        match self.best {
            Some(best) if score <= best + self.config.tolerance => {
                self.num_flat += 1;
                if score > best {
                    self.best = Some(score);
                }
            }
            _ => {
                self.best     = Some(score);
                self.num_flat = 0;
            }
        }
        let stop = self.num_flat >= self.config.patience;
        if stop {
            tracing::info!("Score plateaued for {} evaluations, stopping", self.num_flat);
        }
        stop
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_basic_snapshots_on_improvement_only() {
        let mut m = BasicMonitor::default();
        assert!(m.snapshot(-1.0));
        assert!(!m.snapshot(-2.0));
        assert!(m.snapshot(-0.5));
        assert!(!m.check_terminate(-10.0));
    }

    #[test]
    fn test_mean_std_rewards_outliers() {
        let mut m = MeanStdMonitor::from_config(&json!({"std_factor": 1.0})).unwrap();
        assert!(m.snapshot(0.0));
        assert!(m.snapshot(0.0));
        assert!(!m.snapshot(-1.0));
        assert!(m.snapshot(5.0));
    }

    #[test]
    fn test_plateau_patience() {
        let mut m = PlateauMonitor::from_config(&json!({"patience": 2, "tolerance": 0.1})).unwrap();
        assert!(!m.check_terminate(1.0));
        assert!(!m.check_terminate(1.05));
        assert!(m.check_terminate(1.0));

        let mut m = PlateauMonitor::from_config(&json!({"patience": 2})).unwrap();
        assert!(!m.check_terminate(1.0));
        assert!(!m.check_terminate(0.0));
        assert!(!m.check_terminate(2.0));
        assert!(!m.check_terminate(2.0));
        assert!(m.check_terminate(2.0));
    }

    #[test]
    fn test_invalid_config_names_field() {
        let err = PlateauMonitor::from_config(&json!({"patience": 0})).unwrap_err();
        assert!(err.to_string().contains("monitor_configs.plateau.patience"));
        assert!(MeanStdMonitor::from_config(&json!({"window": "x"})).is_err());
    }
}
