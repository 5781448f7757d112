// ============================================================
// Layer 5: Metrics
// ============================================================
// Host-side metrics over (predictions, labels) arrays. They run
// on the concatenated outputs of a whole validation pass, never
// per batch.
//
// Regression metrics (mae, mse, r2, corr, quantile) compare the
// prediction matrix to labels element-wise. Classification
// metrics (acc, f1, auc, cross_entropy) read labels as class
// indices and predictions either as one logit column per class
// or, with a single column, as the probability of class 1.
//
// MultipleMetrics folds everything into one score:
//
//   score = Σ w_k · sign_k · value_k / Σ w_k
//
// where sign_k is +1 for "higher is better" metrics and -1
// otherwise, so a larger score is always better.

use std::collections::BTreeMap;

use ndarray::{ArrayView1, ArrayView2, Axis};
use serde::Deserialize;
use serde_json::Value;

use crate::constants::WARNING_PREFIX;
use crate::domain::results::MetricsOutputs;
use crate::domain::traits::Metric;
use crate::error::{Error, Result};

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn pairs<'a>(p: &'a ArrayView2<f32>, y: &'a ArrayView2<f32>) -> impl Iterator<Item = (f64, f64)> + 'a {
    p.iter().zip(y.iter()).map(|(&a, &b)| (a as f64, b as f64))
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

fn softmax_row(row: ArrayView1<f32>) -> Vec<f64> {
    let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v)) as f64;
    let exp: Vec<f64> = row.iter().map(|&v| (v as f64 - max).exp()).collect();
    let sum: f64 = exp.iter().sum();
    exp.into_iter().map(|e| e / sum).collect()
}

fn predicted_classes(p: &ArrayView2<f32>) -> Vec<usize> {
    if p.ncols() == 1 {
        return p.column(0).iter().map(|&v| usize::from(v > 0.5)).collect();
    }
    p.axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
                .0
        })
        .collect()
}

fn label_classes(y: &ArrayView2<f32>) -> Vec<usize> {
    y.column(0).iter().map(|&v| v.round().max(0.0) as usize).collect()
}

/// Probability assigned to class 1.
fn positive_scores(p: &ArrayView2<f32>) -> Vec<f64> {
    if p.ncols() == 1 {
        return p.column(0).iter().map(|&v| v as f64).collect();
    }
    p.axis_iter(Axis(0)).map(|row| softmax_row(row)[1]).collect()
}

fn parse<T: for<'de> Deserialize<'de> + Default>(name: &str, config: &Value) -> Result<T> {
    if config.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(config.clone()).map_err(|e| Error::config(format!("metric_configs.{name}"), e.to_string()))
}

// ─── Regression ───────────────────────────────────────────────────────────────
#[derive(Debug, Default)]
pub struct Mae;

impl Metric for Mae {
    fn name(&self) -> &str { "mae" }
    fn is_positive(&self) -> bool { false }
    fn evaluate(&self, p: ArrayView2<f32>, y: ArrayView2<f32>) -> Option<f64> {
        mean(pairs(&p, &y).map(|(a, b)| (a - b).abs()))
    }
}

#[derive(Debug, Default)]
pub struct Mse;

impl Metric for Mse {
    fn name(&self) -> &str { "mse" }
    fn is_positive(&self) -> bool { false }
    fn evaluate(&self, p: ArrayView2<f32>, y: ArrayView2<f32>) -> Option<f64> {
        mean(pairs(&p, &y).map(|(a, b)| (a - b).powi(2)))
    }
}

/// Coefficient of determination. Undefined for constant labels.
#[derive(Debug, Default)]
pub struct R2;

impl Metric for R2 {
    fn name(&self) -> &str { "r2" }
    fn is_positive(&self) -> bool { true }
    fn evaluate(&self, p: ArrayView2<f32>, y: ArrayView2<f32>) -> Option<f64> {
        let y_mean = mean(y.iter().map(|&v| v as f64))?;
        let ss_tot: f64 = y.iter().map(|&v| (v as f64 - y_mean).powi(2)).sum();
        if ss_tot == 0.0 {
            return None;
        }
        let ss_res: f64 = pairs(&p, &y).map(|(a, b)| (a - b).powi(2)).sum();
        Some(1.0 - ss_res / ss_tot)
    }
}

/// Pearson correlation over all elements.
#[derive(Debug, Default)]
pub struct Corr;

impl Metric for Corr {
    fn name(&self) -> &str { "corr" }
    fn is_positive(&self) -> bool { true }
    fn evaluate(&self, p: ArrayView2<f32>, y: ArrayView2<f32>) -> Option<f64> {
        let p_mean = mean(p.iter().map(|&v| v as f64))?;
        let y_mean = mean(y.iter().map(|&v| v as f64))?;
        let (mut cov, mut var_p, mut var_y) = (0.0, 0.0, 0.0);
        for (a, b) in pairs(&p, &y) {
            cov   += (a - p_mean) * (b - y_mean);
            var_p += (a - p_mean).powi(2);
            var_y += (b - y_mean).powi(2);
        }
        let denom = (var_p * var_y).sqrt();
        (denom > 0.0).then(|| cov / denom)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuantileConfig {
    pub q: f64,
}

impl Default for QuantileConfig {
    fn default() -> Self {
        Self { q: 0.5 }
    }
}

/// Pinball loss at quantile `q`.
#[derive(Debug, Default)]
pub struct Quantile {
    config: QuantileConfig,
}

impl Quantile {
    pub fn from_config(config: &Value) -> Result<Self> {
        let config: QuantileConfig = parse("quantile", config)?;
        if !(0.0..=1.0).contains(&config.q) {
            return Err(Error::config("metric_configs.quantile.q", format!("{} is not in [0, 1]", config.q)));
        }
        Ok(Self { config })
    }
}

impl Metric for Quantile {
    fn name(&self) -> &str { "quantile" }
    fn is_positive(&self) -> bool { false }
    fn evaluate(&self, p: ArrayView2<f32>, y: ArrayView2<f32>) -> Option<f64> {
        let q = self.config.q;
        mean(pairs(&p, &y).map(|(a, b)| {
            let diff = b - a;
            (q * diff).max((q - 1.0) * diff)
        }))
    }
}

// ─── Classification ───────────────────────────────────────────────────────────
#[derive(Debug, Default)]
pub struct Accuracy;

impl Metric for Accuracy {
    fn name(&self) -> &str { "acc" }
    fn is_positive(&self) -> bool { true }
    fn evaluate(&self, p: ArrayView2<f32>, y: ArrayView2<f32>) -> Option<f64> {
        let hits = predicted_classes(&p).into_iter().zip(label_classes(&y)).map(|(a, b)| f64::from(u8::from(a == b)));
        mean(hits)
    }
}

/// Binary F1 with class 1 as the positive class.
#[derive(Debug, Default)]
pub struct F1;

impl Metric for F1 {
    fn name(&self) -> &str { "f1" }
    fn is_positive(&self) -> bool { true }
    fn evaluate(&self, p: ArrayView2<f32>, y: ArrayView2<f32>) -> Option<f64> {
        let (mut tp, mut fp, mut fn_) = (0usize, 0usize, 0usize);
        for (pred, label) in predicted_classes(&p).into_iter().zip(label_classes(&y)) {
            match (pred == 1, label == 1) {
                (true, true)  => tp += 1,
                (true, false) => fp += 1,
                (false, true) => fn_ += 1,
                _ => {}
            }
        }
        let denom = 2 * tp + fp + fn_;
        (denom > 0).then(|| 2.0 * tp as f64 / denom as f64)
    }
}

/// Binary ROC AUC via the rank-sum statistic (ties share their mean rank).
#[derive(Debug, Default)]
pub struct Auc;

impl Metric for Auc {
    fn name(&self) -> &str { "auc" }
    fn is_positive(&self) -> bool { true }
    fn evaluate(&self, p: ArrayView2<f32>, y: ArrayView2<f32>) -> Option<f64> {
        let scores = positive_scores(&p);
        let labels = label_classes(&y);
        let n_pos  = labels.iter().filter(|&&l| l == 1).count();
        let n_neg  = labels.len() - n_pos;
        if n_pos == 0 || n_neg == 0 {
            return None;
        }

        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));
        let mut ranks = vec![0.0; scores.len()];
        let mut i = 0;
        while i < order.len() {
            let mut j = i;
            while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
                j += 1;
            }
            let rank = (i + j) as f64 / 2.0 + 1.0;
            for &k in &order[i..=j] {
                ranks[k] = rank;
            }
            i = j + 1;
        }

        let pos_rank_sum: f64 = labels.iter().zip(&ranks).filter(|(&l, _)| l == 1).map(|(_, r)| r).sum();
        let u = pos_rank_sum - (n_pos * (n_pos + 1)) as f64 / 2.0;
        Some(u / (n_pos * n_neg) as f64)
    }
}

/// Mean negative log-likelihood of the labelled class under softmax(predictions).
#[derive(Debug, Default)]
pub struct CrossEntropy;

impl Metric for CrossEntropy {
    fn name(&self) -> &str { "cross_entropy" }
    fn is_positive(&self) -> bool { false }
    fn evaluate(&self, p: ArrayView2<f32>, y: ArrayView2<f32>) -> Option<f64> {
        if p.ncols() < 2 {
            return None;
        }
        let labels = label_classes(&y);
        let nll = p.axis_iter(Axis(0)).zip(labels).map(|(row, label)| {
            let probs = softmax_row(row);
            -probs.get(label).copied().unwrap_or(0.0).max(1e-12).ln()
        });
        mean(nll)
    }
}

pub fn from_config(name: &str, config: &Value) -> Result<Box<dyn Metric>> {
    Ok(match name {
        "quantile" => Box::new(Quantile::from_config(config)?),
        "mae" => Box::new(Mae),
        "mse" => Box::new(Mse),
        "r2" => Box::new(R2),
        "corr" => Box::new(Corr),
        "acc" => Box::new(Accuracy),
        "f1" => Box::new(F1),
        "auc" => Box::new(Auc),
        "cross_entropy" => Box::new(CrossEntropy),
        other => return Err(Error::config("metric_names", format!("no built-in metric '{other}'"))),
    })
}

/// Name under which the validation loss is reported.
pub const LOSS_METRIC: &str = "loss";

pub const BUILTIN: &[&str] = &["mae", "mse", "acc", "r2", "corr", "f1", "quantile", "auc", "cross_entropy"];

// ─── MultipleMetrics ──────────────────────────────────────────────────────────
/// A weighted set of metrics evaluated together.
pub struct MultipleMetrics {
    metrics: Vec<(Box<dyn Metric>, f64)>,
}

impl std::fmt::Debug for MultipleMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.metrics.iter().map(|(m, w)| (m.name().to_string(), *w)).collect();
        f.debug_struct("MultipleMetrics").field("metrics", &names).finish()
    }
}

impl MultipleMetrics {
    /// `weights` defaults to 1.0 for any metric it does not name.
    pub fn new(metrics: Vec<Box<dyn Metric>>, weights: &BTreeMap<String, f64>) -> Result<Self> {
        if metrics.is_empty() {
            return Err(Error::config("metric_names", "at least one metric is required"));
        }
        let metrics = metrics
            .into_iter()
            .map(|m| {
                let w = weights.get(m.name()).copied().unwrap_or(1.0);
                if !(w.is_finite() && w >= 0.0) {
                    return Err(Error::config(format!("metric_weights.{}", m.name()), format!("{w} is not a valid weight")));
                }
                Ok((m, w))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { metrics })
    }

    pub fn names(&self) -> Vec<&str> {
        self.metrics.iter().map(|(m, _)| m.name()).collect()
    }

    /// Evaluate every metric; undefined values become 0.0 with a warning.
    /// A `loss` value joins the score as a "lower is better" entry of weight 1.
    pub fn evaluate(&self, predictions: ArrayView2<f32>, labels: ArrayView2<f32>, loss: Option<f64>) -> MetricsOutputs {
        let mut values       = BTreeMap::new();
        let mut weighted     = 0.0;
        let mut total_weight = 0.0;
        for (metric, weight) in &self.metrics {
            let value = match metric.evaluate(predictions.view(), labels.view()) {
                Some(v) if v.is_finite() => v,
                _ => {
                    tracing::warn!("{WARNING_PREFIX}metric '{}' is undefined here, using 0.0", metric.name());
                    0.0
                }
            };
            let sign = if metric.is_positive() { 1.0 } else { -1.0 };
            weighted     += weight * sign * value;
            total_weight += weight;
            values.insert(metric.name().to_string(), value);
        }
        if let Some(loss) = loss {
            weighted     -= loss;
            total_weight += 1.0;
            values.insert(LOSS_METRIC.to_string(), loss);
        }
        let final_score = if total_weight > 0.0 { weighted / total_weight } else { 0.0 };
        MetricsOutputs::new(final_score, values)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_regression_metrics() {
        let p = array![[1.0f32], [2.0], [3.0]];
        let y = array![[1.0f32], [2.0], [5.0]];
        assert_abs_diff_eq!(Mae.evaluate(p.view(), y.view()).unwrap(), 2.0 / 3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(Mse.evaluate(p.view(), y.view()).unwrap(), 4.0 / 3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(R2.evaluate(y.view(), y.view()).unwrap(), 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(Corr.evaluate(p.view(), p.view()).unwrap(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_undefined_values() {
        let constant = array![[2.0f32], [2.0]];
        assert!(R2.evaluate(constant.view(), constant.view()).is_none());
        let one_class = array![[1.0f32], [1.0]];
        assert!(Auc.evaluate(array![[0.2f32], [0.7]].view(), one_class.view()).is_none());
    }

    #[test]
    fn test_classification_metrics() {
        let logits = array![[2.0f32, 0.0], [0.0, 3.0], [1.0, 0.5], [0.0, 1.0]];
        let labels = array![[0.0f32], [1.0], [1.0], [1.0]];
        assert_abs_diff_eq!(Accuracy.evaluate(logits.view(), labels.view()).unwrap(), 0.75, epsilon = 1e-9);
        assert_abs_diff_eq!(F1.evaluate(logits.view(), labels.view()).unwrap(), 0.8, epsilon = 1e-9);
        // class-1 probabilities rank the negative sample lowest
        assert_abs_diff_eq!(Auc.evaluate(logits.view(), labels.view()).unwrap(), 1.0, epsilon = 1e-9);
        assert!(CrossEntropy.evaluate(logits.view(), labels.view()).unwrap() > 0.0);
    }

    #[test]
    fn test_auc_ties_share_rank() {
        let scores = array![[0.5f32], [0.5], [0.5], [0.5]];
        let labels = array![[0.0f32], [1.0], [0.0], [1.0]];
        assert_abs_diff_eq!(Auc.evaluate(scores.view(), labels.view()).unwrap(), 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_quantile_config() {
        let q = Quantile::from_config(&serde_json::json!({"q": 0.9})).unwrap();
        let value = q.evaluate(array![[0.0f32]].view(), array![[1.0f32]].view()).unwrap();
        assert_abs_diff_eq!(value, 0.9, epsilon = 1e-9);
        assert!(Quantile::from_config(&serde_json::json!({"q": 2.0})).is_err());
    }

    #[test]
    fn test_multiple_metrics_signed_weighted_score() {
        let mut weights = BTreeMap::new();
        weights.insert("mae".to_string(), 3.0);
        let metrics = MultipleMetrics::new(vec![Box::new(Mae) as Box<dyn Metric>, Box::new(R2)], &weights).unwrap();

        let p = array![[1.0f32], [3.0]];
        let y = array![[2.0f32], [3.0]];
        let out = metrics.evaluate(p.view(), y.view(), None);
        let mae = 0.5;
        let r2  = 1.0 - 1.0 / 0.5;
        assert_abs_diff_eq!(out.metric_values["mae"], mae, epsilon = 1e-9);
        assert_abs_diff_eq!(out.final_score, (-3.0 * mae + r2) / 4.0, epsilon = 1e-9);
    }

    #[test]
    fn test_undefined_metric_is_neutral() {
        let metrics  = MultipleMetrics::new(vec![Box::new(R2) as Box<dyn Metric>], &BTreeMap::new()).unwrap();
        let constant = array![[1.0f32], [1.0]];
        let out      = metrics.evaluate(constant.view(), constant.view(), None);
        assert_eq!(out.metric_values["r2"], 0.0);
        assert_eq!(out.final_score, 0.0);
    }

    #[test]
    fn test_loss_joins_score() {
        let metrics = MultipleMetrics::new(vec![Box::new(Mae) as Box<dyn Metric>], &BTreeMap::new()).unwrap();
        let p   = array![[1.0f32]];
        let y   = array![[2.0f32]];
        let out = metrics.evaluate(p.view(), y.view(), Some(3.0));
        assert_eq!(out.metric_values[LOSS_METRIC], 3.0);
        assert_abs_diff_eq!(out.final_score, (-1.0 - 3.0) / 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_empty_metric_set_is_rejected() {
        assert!(MultipleMetrics::new(Vec::new(), &BTreeMap::new()).is_err());
    }
}
