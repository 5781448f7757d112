// ============================================================
// Layer 4: Train/Validation Splitter
// ============================================================
// Shuffles samples and splits them into two sets:
//   - Training set:   used to update model weights
//   - Validation set: used to score epochs and pick checkpoints
//
// The shuffle is seeded: the same config always yields the same split.
//
// Uses Fisher-Yates shuffle via rand::seq::SliceRandom.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Shuffle `samples` with `seed` and split into (train, validation).
///
/// `train_fraction` of 0.8 keeps 80% for training. The split index is
/// clamped to the sample count.
pub fn split_train_val<T>(mut samples: Vec<T>, train_fraction: f64, seed: u64) -> (Vec<T>, Vec<T>) {
    let mut rng = StdRng::seed_from_u64(seed);
    samples.shuffle(&mut rng);

    let total    = samples.len();
    let split_at = ((total as f64) * train_fraction).round() as usize;
    let split_at = split_at.min(total);

    let val = samples.split_off(split_at);

    tracing::debug!(
        "Dataset split: {} training, {} validation ({}% / {}%)",
        samples.len(),
        val.len(),
        (samples.len() * 100) / total.max(1),
        (val.len()     * 100) / total.max(1),
    );

    (samples, val)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correct_split_sizes() {
        let items: Vec<usize> = (0..100).collect();
        let (train, val)      = split_train_val(items, 0.8, 7);
        assert_eq!(train.len(), 80);
        assert_eq!(val.len(),   20);
    }

    #[test]
    fn test_all_items_preserved() {
        let items: Vec<usize> = (0..50).collect();
        let (train, val)      = split_train_val(items, 0.7, 7);
        let mut all: Vec<_>   = train.into_iter().chain(val).collect();
        all.sort_unstable();
        assert_eq!(all, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_same_seed_same_split() {
        let a = split_train_val((0..30).collect::<Vec<usize>>(), 0.5, 42);
        let b = split_train_val((0..30).collect::<Vec<usize>>(), 0.5, 42);
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_dataset() {
        let items: Vec<usize> = Vec::new();
        let (train, val)      = split_train_val(items, 0.8, 0);
        assert!(train.is_empty());
        assert!(val.is_empty());
    }

    #[test]
    fn test_full_training_split() {
        let items: Vec<usize> = (0..10).collect();
        let (train, val)      = split_train_val(items, 1.0, 0);
        assert_eq!(train.len(), 10);
        assert!(val.is_empty());
    }
}
