//! Bootstrap-aggregated tree ensembles.

use super::seeded_rng;
use super::tree::{DecisionTree, Target, TreeParams};
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub max_features: Option<usize>,
    pub seed: u64,
}

impl ForestParams {
    pub fn new(n_estimators: usize, seed: u64) -> Self {
        Self {
            n_estimators: n_estimators.max(1),
            max_depth: None,
            max_features: None,
            seed,
        }
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn max_features(mut self, k: usize) -> Self {
        self.max_features = Some(k);
        self
    }
}

fn grow_forest(
    x: &[Vec<f64>],
    target: Target,
    params: &ForestParams,
) -> (Vec<DecisionTree>, Vec<f64>) {
    let n = x.len();
    let n_features = x.first().map(|r| r.len()).unwrap_or(0);
    let tree_params = TreeParams {
        max_depth: params.max_depth,
        min_samples_split: 2,
        max_features: params.max_features,
    };
    let mut rng = seeded_rng(params.seed);
    let mut trees = Vec::with_capacity(params.n_estimators);
    let mut importances = vec![0.0; n_features];

    for _ in 0..params.n_estimators {
        let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
        let mut tree_imp = vec![0.0; n_features];
        trees.push(DecisionTree::fit(
            x,
            target,
            &bootstrap,
            &tree_params,
            &mut rng,
            &mut tree_imp,
        ));
        let total: f64 = tree_imp.iter().sum();
        if total > 0.0 {
            for (acc, v) in importances.iter_mut().zip(&tree_imp) {
                *acc += v / total;
            }
        }
    }

    let total: f64 = importances.iter().sum();
    if total > 0.0 {
        importances.iter_mut().for_each(|v| *v /= total);
    }
    (trees, importances)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestClassifier {
    pub trees: Vec<DecisionTree>,
    pub n_classes: usize,
    pub feature_importances: Vec<f64>,
}

impl RandomForestClassifier {
    /// Fit on class indices in `0..n_classes`. `x` must be non-empty.
    pub fn fit(x: &[Vec<f64>], labels: &[usize], n_classes: usize, params: &ForestParams) -> Self {
        let (trees, feature_importances) = grow_forest(
            x,
            Target::Classes { labels, n_classes },
            params,
        );
        Self {
            trees,
            n_classes,
            feature_importances,
        }
    }

    /// Mean of per-tree leaf class frequencies.
    pub fn predict_proba(&self, row: &[f64]) -> Vec<f64> {
        let mut acc = vec![0.0; self.n_classes];
        for tree in &self.trees {
            for (a, p) in acc.iter_mut().zip(tree.leaf_value(row)) {
                *a += p;
            }
        }
        let n = self.trees.len().max(1) as f64;
        acc.iter_mut().for_each(|a| *a /= n);
        acc
    }

    pub fn predict(&self, row: &[f64]) -> usize {
        crate::utils::math::argmax(&self.predict_proba(row)).unwrap_or(0)
    }

    /// Fraction of rows predicted correctly; 0.0 on empty input.
    pub fn score(&self, x: &[Vec<f64>], labels: &[usize]) -> f64 {
        if x.is_empty() {
            return 0.0;
        }
        let correct = x
            .iter()
            .zip(labels)
            .filter(|(row, y)| self.predict(row) == **y)
            .count();
        correct as f64 / x.len() as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestRegressor {
    pub trees: Vec<DecisionTree>,
    pub feature_importances: Vec<f64>,
}

impl RandomForestRegressor {
    /// Fit on real-valued targets. `x` must be non-empty.
    pub fn fit(x: &[Vec<f64>], y: &[f64], params: &ForestParams) -> Self {
        let (trees, feature_importances) = grow_forest(x, Target::Values(y), params);
        Self {
            trees,
            feature_importances,
        }
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let sum: f64 = self
            .trees
            .iter()
            .map(|t| t.leaf_value(row).first().copied().unwrap_or(0.0))
            .sum();
        sum / self.trees.len().max(1) as f64
    }

    pub fn predict(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter().map(|r| self.predict_row(r)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_blobs() -> (Vec<Vec<f64>>, Vec<usize>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..10 {
            x.push(vec![i as f64 * 0.1, 0.0]);
            y.push(0);
            x.push(vec![10.0 + i as f64 * 0.1, 1.0]);
            y.push(1);
        }
        (x, y)
    }

    #[test]
    fn classifier_learns_separable_blobs() {
        let (x, y) = two_blobs();
        let rf = RandomForestClassifier::fit(&x, &y, 2, &ForestParams::new(20, 42));
        assert_eq!(rf.score(&x, &y), 1.0);
        let p = rf.predict_proba(&[10.5, 1.0]);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(p[1] > p[0]);
        let imp: f64 = rf.feature_importances.iter().sum();
        assert!((imp - 1.0).abs() < 1e-9);
    }

    #[test]
    fn fitting_is_reproducible_for_a_seed() {
        let (x, y) = two_blobs();
        let a = RandomForestClassifier::fit(&x, &y, 2, &ForestParams::new(5, 7).max_depth(3));
        let b = RandomForestClassifier::fit(&x, &y, 2, &ForestParams::new(5, 7).max_depth(3));
        assert_eq!(a, b);
    }

    #[test]
    fn regressor_tracks_targets() {
        let x: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..20).map(|i| if i < 10 { 1.0 } else { 5.0 }).collect();
        let rf = RandomForestRegressor::fit(&x, &y, &ForestParams::new(30, 42));
        assert!(rf.predict_row(&[2.0]) < 2.0);
        assert!(rf.predict_row(&[17.0]) > 4.0);
    }
}
