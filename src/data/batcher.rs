// ============================================================
// Layer 4: Tabular Batcher
// ============================================================
// Implements Burn's Batcher trait to stack a Vec<TabularSample>
// into one host-side NamedArrays batch.
//
// Output keys (all 2-D, first axis = batch):
//   "input"          [N, input_dim]
//   "labels"         [N, label_dim]   only if every sample has y
//   "sample_weights" [N, 1]           only if every sample has a weight
//   "batch_indices"  [N, 1]           original row positions
//
// Batches stay on the host: the trainer or the inference runner
// moves them to whatever device (or ONNX runtime) needs them.
//
// Reference: Burn Book §4 (Batcher)

use burn::data::dataloader::batcher::Batcher;
use ndarray::Array2;

use crate::constants::{BATCH_INDICES_KEY, INPUT_KEY, LABEL_KEY, SAMPLE_WEIGHTS_KEY};
use crate::data::dataset::TabularSample;
use crate::domain::arrays::NamedArrays;

#[derive(Clone, Debug, Default)]
pub struct TabularBatcher;

impl TabularBatcher {
    pub fn new() -> Self {
        Self
    }
}

fn stack(rows: usize, cols: usize, flat: Vec<f32>) -> Array2<f32> {
    // every row was produced with exactly `cols` values
    Array2::from_shape_vec((rows, cols), flat).unwrap_or_else(|_| Array2::zeros((rows, cols)))
}

impl Batcher<TabularSample, NamedArrays> for TabularBatcher {
    fn batch(&self, items: Vec<TabularSample>) -> NamedArrays {
        let n         = items.len();
        let input_dim = items.first().map(|s| s.x.len()).unwrap_or(0);
        let mut batch = NamedArrays::new();

        // ── Features ──────────────────────────────────────────────────────────
        let x: Vec<f32> = items.iter().flat_map(|s| s.x.iter().copied()).collect();
        batch.insert(INPUT_KEY.to_string(), stack(n, input_dim, x));

        // ── Labels ────────────────────────────────────────────────────────────
        if let Some(label_dim) = items.first().and_then(|s| s.y.as_ref()).map(Vec::len) {
            let labels: Option<Vec<f32>> = items
                .iter()
                .map(|s| s.y.as_ref())
                .collect::<Option<Vec<_>>>()
                .map(|ys| ys.into_iter().flatten().copied().collect());
            if let Some(labels) = labels {
                batch.insert(LABEL_KEY.to_string(), stack(n, label_dim, labels));
            }
        }

        // ── Sample weights ────────────────────────────────────────────────────
        if let Some(weights) = items.iter().map(|s| s.weight).collect::<Option<Vec<f32>>>() {
            if n > 0 {
                batch.insert(SAMPLE_WEIGHTS_KEY.to_string(), stack(n, 1, weights));
            }
        }

        // ── Bookkeeping ───────────────────────────────────────────────────────
        // exact while row counts stay within MAX_INDEXED_ROWS
        let indices: Vec<f32> = items.iter().map(|s| s.index as f32).collect();
        batch.insert(BATCH_INDICES_KEY.to_string(), stack(n, 1, indices));

        batch
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn sample(index: usize, y: Option<f32>, weight: Option<f32>) -> TabularSample {
        TabularSample { index, x: vec![index as f32, 1.0], y: y.map(|v| vec![v]), weight }
    }

    #[test]
    fn test_batch_shapes() {
        let batch = TabularBatcher::new().batch(vec![sample(4, Some(1.0), None), sample(7, Some(2.0), None)]);
        assert_eq!(batch[INPUT_KEY].dim(), (2, 2));
        assert_eq!(batch[LABEL_KEY].dim(), (2, 1));
        assert_eq!(batch[BATCH_INDICES_KEY].column(0).to_vec(), vec![4.0, 7.0]);
        assert!(!batch.contains_key(SAMPLE_WEIGHTS_KEY));
    }

    #[test]
    fn test_unlabelled_batch_has_no_labels() {
        let batch = TabularBatcher::new().batch(vec![sample(0, None, Some(2.0))]);
        assert!(!batch.contains_key(LABEL_KEY));
        assert_eq!(batch[SAMPLE_WEIGHTS_KEY][[0, 0]], 2.0);
    }
}
