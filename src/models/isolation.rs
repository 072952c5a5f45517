//! Isolation forest outlier scoring.
//!
//! Score convention: `score_samples` is the negated anomaly score
//! `-(2^(-E[h(x)] / c(psi)))`, so lower means more abnormal. `offset` is the
//! `contamination` quantile of the training scores and
//! `decision_function = score_samples - offset`; negative decisions are outliers.

use super::seeded_rng;
use rand::Rng;
use rand::seq::index::sample;
use serde::{Deserialize, Serialize};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;
const MAX_SAMPLES: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum INode {
    External { size: usize },
    Internal {
        feature: usize,
        split: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ITree {
    nodes: Vec<INode>,
}

/// Average path length of an unsuccessful BST search over `n` points.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

impl ITree {
    fn build<R: Rng>(x: &[Vec<f64>], idx: Vec<usize>, height_limit: usize, rng: &mut R) -> Self {
        let mut tree = ITree { nodes: Vec::new() };
        tree.grow(x, idx, 0, height_limit, rng);
        tree
    }

    fn grow<R: Rng>(
        &mut self,
        x: &[Vec<f64>],
        idx: Vec<usize>,
        depth: usize,
        height_limit: usize,
        rng: &mut R,
    ) -> usize {
        let node_id = self.nodes.len();
        self.nodes.push(INode::External { size: idx.len() });
        if depth >= height_limit || idx.len() <= 1 {
            return node_id;
        }

        // Only features that still vary inside this node can isolate anything.
        let n_features = x.first().map(|r| r.len()).unwrap_or(0);
        let spans: Vec<(usize, f64, f64)> = (0..n_features)
            .filter_map(|f| {
                let (lo, hi) = idx.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
                    (lo.min(x[i][f]), hi.max(x[i][f]))
                });
                (hi > lo).then_some((f, lo, hi))
            })
            .collect();
        if spans.is_empty() {
            return node_id;
        }

        let (feature, lo, hi) = spans[rng.gen_range(0..spans.len())];
        let split = rng.gen_range(lo..hi);
        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) =
            idx.into_iter().partition(|&i| x[i][feature] < split);
        if left_idx.is_empty() || right_idx.is_empty() {
            return node_id;
        }
        let left = self.grow(x, left_idx, depth + 1, height_limit, rng);
        let right = self.grow(x, right_idx, depth + 1, height_limit, rng);
        self.nodes[node_id] = INode::Internal {
            feature,
            split,
            left,
            right,
        };
        node_id
    }

    fn path_length(&self, row: &[f64]) -> f64 {
        let mut i = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[i] {
                INode::External { size } => return depth + average_path_length(*size),
                INode::Internal {
                    feature,
                    split,
                    left,
                    right,
                } => {
                    let v = row.get(*feature).copied().unwrap_or(0.0);
                    i = if v < *split { *left } else { *right };
                    depth += 1.0;
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<ITree>,
    sample_size: usize,
    pub contamination: f64,
    pub offset: f64,
}

impl IsolationForest {
    /// Fit on `x` (non-empty) and calibrate the decision offset.
    pub fn fit(x: &[Vec<f64>], n_estimators: usize, contamination: f64, seed: u64) -> Self {
        let n = x.len();
        let sample_size = n.min(MAX_SAMPLES).max(1);
        let height_limit = (sample_size as f64).log2().ceil().max(1.0) as usize;
        let mut rng = seeded_rng(seed);
        let trees = (0..n_estimators.max(1))
            .map(|_| {
                let idx = sample(&mut rng, n, sample_size).into_vec();
                ITree::build(x, idx, height_limit, &mut rng)
            })
            .collect();

        let mut forest = Self {
            trees,
            sample_size,
            contamination,
            offset: 0.0,
        };
        let scores = forest.score_samples(x);
        forest.offset = percentile(&scores, contamination * 100.0);
        forest
    }

    pub fn score_row(&self, row: &[f64]) -> f64 {
        let mean_path = self.trees.iter().map(|t| t.path_length(row)).sum::<f64>()
            / self.trees.len().max(1) as f64;
        let c = average_path_length(self.sample_size);
        if c <= 0.0 {
            return -1.0;
        }
        -(2f64.powf(-mean_path / c))
    }

    pub fn score_samples(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter().map(|r| self.score_row(r)).collect()
    }

    pub fn decision_function(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter().map(|r| self.score_row(r) - self.offset).collect()
    }

    /// `-1` for outliers, `1` for inliers, aligned with the rows of `x`.
    pub fn predict(&self, x: &[Vec<f64>]) -> Vec<i8> {
        self.decision_function(x)
            .into_iter()
            .map(|d| if d < 0.0 { -1 } else { 1 })
            .collect()
    }
}

/// Linear-interpolated percentile, `q` in `[0, 100]`.
fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_length_constants() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!(average_path_length(256) > 9.0);
    }

    #[test]
    fn percentile_interpolates() {
        assert_eq!(percentile(&[0.0, 10.0], 50.0), 5.0);
        assert_eq!(percentile(&[3.0, 1.0, 2.0], 0.0), 1.0);
    }

    #[test]
    fn far_point_is_the_only_outlier() {
        let mut x: Vec<Vec<f64>> = (0..9)
            .map(|i| vec![(i % 3) as f64 * 0.01, (i / 3) as f64 * 0.01])
            .collect();
        x.push(vec![50.0, 50.0]);
        let forest = IsolationForest::fit(&x, 100, 0.1, 42);
        let labels = forest.predict(&x);
        assert_eq!(labels[9], -1);
        assert_eq!(labels.iter().filter(|l| **l == -1).count(), 1);
    }
}
