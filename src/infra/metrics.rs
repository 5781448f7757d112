// ============================================================
// Layer 6: Metrics Logger
// ============================================================
// Appends one human-readable line per evaluation to metrics.txt
// inside the workplace. `save` copies this file into the export
// folder so a bundle carries its own training history.
//
// Example output:
//   epoch  1  step     12  lr 1.000000e-3  | loss 0.812400 | mae 0.803100 | score -0.803100
//   epoch  2  step     24  lr 1.000000e-3  | loss 0.411000 | mae 0.402500 | score -0.402500
//
// The line format is for people, not parsers: metric order follows
// the (sorted) metric names so consecutive lines stay aligned.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::constants::METRICS_LOG_FILE;
use crate::domain::traits::EpochRecord;
use crate::error::{IoContext, Result};

/// Logs evaluation results to `<workplace>/metrics.txt`.
#[derive(Debug, Clone)]
pub struct MetricsLogger {
    path: PathBuf,
}

impl MetricsLogger {
    /// Create the log file (empty) if it doesn't exist yet.
    pub fn new(workplace: &Path) -> Result<Self> {
        fs::create_dir_all(workplace).at(workplace)?;
        let path = workplace.join(METRICS_LOG_FILE);
        if !path.exists() {
            fs::File::create(&path).at(&path)?;
            tracing::debug!("Created metrics log: '{}'", path.display());
        }
        Ok(Self { path })
    }

    pub fn format(record: &EpochRecord<'_>) -> String {
        let mut line = format!(
            "epoch {:>2}  step {:>6}  lr {:.6e}  | loss {:.6}",
            record.epoch, record.step, record.lr, record.train_loss,
        );
        for (name, value) in &record.metrics.metric_values {
            line.push_str(&format!(" | {name} {value:.6}"));
        }
        line.push_str(&format!(" | score {:.6}", record.metrics.final_score));
        line
    }

    pub fn log(&self, record: &EpochRecord<'_>) -> Result<String> {
        let line = Self::format(record);
        let mut f = OpenOptions::new().append(true).open(&self.path).at(&self.path)?;
        writeln!(f, "{line}").at(&self.path)?;
        Ok(line)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::results::MetricsOutputs;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_lines_are_appended() {
        let tmp    = TempDir::new().unwrap();
        let logger = MetricsLogger::new(tmp.path()).unwrap();

        let mut values = BTreeMap::new();
        values.insert("mae".to_string(), 0.25);
        let metrics = MetricsOutputs::new(-0.25, values);
        for epoch in 1..=2 {
            let record = EpochRecord { epoch, step: epoch * 10, lr: 1e-3, train_loss: 0.3, metrics: &metrics };
            logger.log(&record).unwrap();
        }

        let text = fs::read_to_string(logger.path()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("epoch  2"));
        assert!(lines[1].contains("mae 0.250000"));
        assert!(lines[1].ends_with("score -0.250000"));
    }
}
