// ============================================================
// Layer 4: Sample weights
// ============================================================
// Callers may weight samples for training, for validation, or
// both. Each side is normalised independently so that its mean
// weight is 1: the loss scale then matches the unweighted case
// and a learning rate tuned without weights still behaves.
//
//   raw      [1, 1, 2]   → sum 4
//   p = w/4  [.25 .25 .5]
//   × len 3  [.75 .75 1.5]

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq)]
pub enum SampleWeights {
    #[default]
    None,
    /// One weight per sample across train followed by validation.
    All(Vec<f32>),
    /// Weights for the training side only.
    Train(Vec<f32>),
    Split {
        train: Option<Vec<f32>>,
        valid: Option<Vec<f32>>,
    },
}

impl SampleWeights {
    pub fn is_none(&self) -> bool {
        matches!(self, SampleWeights::None)
    }

    /// Resolve into per-side raw weights given the side sizes.
    pub fn split(self, num_train: usize, num_valid: usize) -> Result<(Option<Vec<f32>>, Option<Vec<f32>>)> {
        let check = |side: &str, w: &[f32], n: usize| -> Result<()> {
            if w.len() != n {
                return Err(Error::config(
                    format!("sample_weights.{side}"),
                    format!("expected {n} weights, got {}", w.len()),
                ));
            }
            Ok(())
        };
        match self {
            SampleWeights::None => Ok((None, None)),
            SampleWeights::All(mut w) => {
                check("all", &w, num_train + num_valid)?;
                let valid = w.split_off(num_train);
                Ok((Some(w), (num_valid > 0).then_some(valid)))
            }
            SampleWeights::Train(w) => {
                check("train", &w, num_train)?;
                Ok((Some(w), None))
            }
            SampleWeights::Split { train, valid } => {
                if let Some(w) = &train {
                    check("train", w, num_train)?;
                }
                if let Some(w) = &valid {
                    check("valid", w, num_valid)?;
                }
                Ok((train, valid))
            }
        }
    }
}

/// Rescale so the weights sum to their count.
pub fn normalize(side: &str, weights: &[f32]) -> Result<Vec<f32>> {
    if let Some(bad) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
        return Err(Error::config(format!("sample_weights.{side}"), format!("invalid weight {bad}")));
    }
    let sum: f64 = weights.iter().map(|&w| w as f64).sum();
    if sum <= 0.0 {
        return Err(Error::config(format!("sample_weights.{side}"), "weights must not sum to zero"));
    }
    let scale = weights.len() as f64 / sum;
    Ok(weights.iter().map(|&w| (w as f64 * scale) as f32).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_normalize_gives_unit_mean() {
        let w = normalize("train", &[1.0, 1.0, 2.0]).unwrap();
        assert_abs_diff_eq!(w[0], 0.75, epsilon = 1e-6);
        assert_abs_diff_eq!(w[2], 1.5, epsilon = 1e-6);
        assert_abs_diff_eq!(w.iter().sum::<f32>(), 3.0, epsilon = 1e-5);
    }

    #[test]
    fn test_normalize_rejects_degenerate() {
        assert!(normalize("train", &[0.0, 0.0]).is_err());
        assert!(normalize("train", &[1.0, -1.0]).is_err());
        assert!(normalize("train", &[f32::NAN]).is_err());
    }

    #[test]
    fn test_all_is_split_by_position() {
        let (train, valid) = SampleWeights::All(vec![1.0, 2.0, 3.0]).split(2, 1).unwrap();
        assert_eq!(train, Some(vec![1.0, 2.0]));
        assert_eq!(valid, Some(vec![3.0]));
    }

    #[test]
    fn test_length_mismatch_is_config_error() {
        let err = SampleWeights::Train(vec![1.0]).split(2, 0).unwrap_err();
        assert!(err.to_string().contains("sample_weights.train"));
    }
}
