//! Seeded statistical estimators used by the analytics engines.
//! Deterministic given a seed; no hidden global state.

pub mod forest;
pub mod isolation;
pub mod kmeans;
pub mod scaler;
pub mod tree;

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

pub use forest::{RandomForestClassifier, RandomForestRegressor};
pub use isolation::IsolationForest;
pub use kmeans::{KMeans, silhouette_score};
pub use scaler::StandardScaler;

/// Seed used when the configuration does not override it.
pub const DEFAULT_SEED: u64 = 42;

pub fn seeded_rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// Shuffled train/test index split. The test side holds `ceil(n * test_fraction)`
/// rows, at least one and never all of them when `n >= 2`.
pub fn train_test_split(n: usize, test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut idx: Vec<usize> = (0..n).collect();
    idx.shuffle(&mut seeded_rng(seed));
    if n < 2 {
        return (idx, Vec::new());
    }
    let n_test = ((n as f64 * test_fraction).ceil() as usize).clamp(1, n - 1);
    let test = idx.split_off(n - n_test);
    (idx, test)
}

/// Select rows by index.
pub fn take_rows<T: Clone>(rows: &[T], idx: &[usize]) -> Vec<T> {
    idx.iter().map(|&i| rows[i].clone()).collect()
}
