//! CART decision trees for classification (gini) and regression (variance).

use rand::Rng;
use rand::seq::index::sample;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    Classes { labels: &'a [usize], n_classes: usize },
    Values(&'a [f64]),
}

#[derive(Debug, Clone)]
pub struct TreeParams {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    /// Features examined per split; `None` means all.
    pub max_features: Option<usize>,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            max_features: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// Class distribution (classification) or `[mean]` (regression).
    Leaf { value: Vec<f64> },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<Node>,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    decrease: f64,
}

/// Running sufficient statistics for one side of a split.
#[derive(Clone)]
enum Stats {
    Gini { counts: Vec<f64>, n: f64 },
    Var { sum: f64, sum_sq: f64, n: f64 },
}

impl Stats {
    fn empty(target: &Target) -> Self {
        match target {
            Target::Classes { n_classes, .. } => Stats::Gini {
                counts: vec![0.0; *n_classes],
                n: 0.0,
            },
            Target::Values(_) => Stats::Var {
                sum: 0.0,
                sum_sq: 0.0,
                n: 0.0,
            },
        }
    }

    fn of(target: &Target, idx: &[usize]) -> Self {
        let mut s = Self::empty(target);
        for &i in idx {
            s.add(target, i, 1.0);
        }
        s
    }

    fn add(&mut self, target: &Target, i: usize, sign: f64) {
        match (self, target) {
            (Stats::Gini { counts, n }, Target::Classes { labels, .. }) => {
                counts[labels[i]] += sign;
                *n += sign;
            }
            (Stats::Var { sum, sum_sq, n }, Target::Values(y)) => {
                *sum += sign * y[i];
                *sum_sq += sign * y[i] * y[i];
                *n += sign;
            }
            _ => unreachable!("stats kind always matches target kind"),
        }
    }

    fn n(&self) -> f64 {
        match self {
            Stats::Gini { n, .. } | Stats::Var { n, .. } => *n,
        }
    }

    fn impurity(&self) -> f64 {
        match self {
            Stats::Gini { counts, n } => {
                if *n <= 0.0 {
                    return 0.0;
                }
                1.0 - counts.iter().map(|c| (c / n) * (c / n)).sum::<f64>()
            }
            Stats::Var { sum, sum_sq, n } => {
                if *n <= 0.0 {
                    return 0.0;
                }
                let m = sum / n;
                (sum_sq / n - m * m).max(0.0)
            }
        }
    }

    fn leaf_value(&self) -> Vec<f64> {
        match self {
            Stats::Gini { counts, n } => {
                if *n <= 0.0 {
                    return counts.clone();
                }
                counts.iter().map(|c| c / n).collect()
            }
            Stats::Var { sum, n, .. } => vec![if *n > 0.0 { sum / n } else { 0.0 }],
        }
    }
}

impl DecisionTree {
    /// Grow a tree over the rows in `idx` (duplicates allowed for bootstrap
    /// samples). Unnormalized impurity decreases are added to `importances`.
    pub fn fit<R: Rng>(
        x: &[Vec<f64>],
        target: Target,
        idx: &[usize],
        params: &TreeParams,
        rng: &mut R,
        importances: &mut [f64],
    ) -> Self {
        let mut tree = DecisionTree { nodes: Vec::new() };
        tree.grow(x, &target, idx.to_vec(), 0, params, rng, importances);
        tree
    }

    #[allow(clippy::too_many_arguments)]
    fn grow<R: Rng>(
        &mut self,
        x: &[Vec<f64>],
        target: &Target,
        idx: Vec<usize>,
        depth: usize,
        params: &TreeParams,
        rng: &mut R,
        importances: &mut [f64],
    ) -> usize {
        let stats = Stats::of(target, &idx);
        let node_id = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: stats.leaf_value(),
        });

        let depth_ok = params.max_depth.is_none_or(|d| depth < d);
        if !depth_ok || idx.len() < params.min_samples_split || stats.impurity() <= 0.0 {
            return node_id;
        }

        let Some(best) = best_split(x, target, &idx, &stats, params, rng) else {
            return node_id;
        };
        importances[best.feature] += best.decrease;

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = idx
            .into_iter()
            .partition(|&i| x[i][best.feature] <= best.threshold);

        let left = self.grow(x, target, left_idx, depth + 1, params, rng, importances);
        let right = self.grow(x, target, right_idx, depth + 1, params, rng, importances);
        self.nodes[node_id] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        node_id
    }

    pub fn leaf_value(&self, row: &[f64]) -> &[f64] {
        let mut i = 0;
        loop {
            match &self.nodes[i] {
                Node::Leaf { value } => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let v = row.get(*feature).copied().unwrap_or(0.0);
                    i = if v <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

fn best_split<R: Rng>(
    x: &[Vec<f64>],
    target: &Target,
    idx: &[usize],
    parent: &Stats,
    params: &TreeParams,
    rng: &mut R,
) -> Option<SplitCandidate> {
    let n_features = x.first().map(|r| r.len()).unwrap_or(0);
    if n_features == 0 {
        return None;
    }
    let k = params.max_features.unwrap_or(n_features).clamp(1, n_features);
    let drawn: Vec<usize> = sample(rng, n_features, n_features).into_vec();

    // Examine the first `k` drawn features; keep going past `k` only while
    // nothing splittable has been found.
    let mut best: Option<SplitCandidate> = None;
    for (visited, &f) in drawn.iter().enumerate() {
        if visited >= k && best.is_some() {
            break;
        }
        if let Some(c) = best_split_on(x, target, idx, parent, f)
            && best.as_ref().is_none_or(|b| c.decrease > b.decrease)
        {
            best = Some(c);
        }
    }
    best
}

fn best_split_on(
    x: &[Vec<f64>],
    target: &Target,
    idx: &[usize],
    parent: &Stats,
    feature: usize,
) -> Option<SplitCandidate> {
    let mut order: Vec<usize> = idx.to_vec();
    order.sort_by(|&a, &b| x[a][feature].total_cmp(&x[b][feature]));

    let n = parent.n();
    let parent_weighted = n * parent.impurity();
    let mut left = Stats::empty(target);
    let mut right = parent.clone();
    let mut best: Option<SplitCandidate> = None;

    for w in 0..order.len().saturating_sub(1) {
        let i = order[w];
        left.add(target, i, 1.0);
        right.add(target, i, -1.0);
        let here = x[i][feature];
        let next = x[order[w + 1]][feature];
        if next <= here {
            continue;
        }
        let child = left.n() * left.impurity() + right.n() * right.impurity();
        let decrease = parent_weighted - child;
        if decrease > 1e-12 && best.as_ref().is_none_or(|b| decrease > b.decrease) {
            best = Some(SplitCandidate {
                feature,
                threshold: here + (next - here) / 2.0,
                decrease,
            });
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::seeded_rng;

    #[test]
    fn classifier_tree_separates_threshold() {
        let x: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let labels: Vec<usize> = (0..10).map(|i| usize::from(i >= 5)).collect();
        let idx: Vec<usize> = (0..10).collect();
        let mut imp = vec![0.0];
        let tree = DecisionTree::fit(
            &x,
            Target::Classes {
                labels: &labels,
                n_classes: 2,
            },
            &idx,
            &TreeParams::default(),
            &mut seeded_rng(1),
            &mut imp,
        );
        assert_eq!(tree.leaf_value(&[1.0]), &[1.0, 0.0]);
        assert_eq!(tree.leaf_value(&[8.0]), &[0.0, 1.0]);
        assert!(imp[0] > 0.0);
    }

    #[test]
    fn regression_tree_fits_step() {
        let x: Vec<Vec<f64>> = (0..6).map(|i| vec![i as f64, 0.0]).collect();
        let y = [1.0, 1.0, 1.0, 4.0, 4.0, 4.0];
        let idx: Vec<usize> = (0..6).collect();
        let mut imp = vec![0.0, 0.0];
        let tree = DecisionTree::fit(
            &x,
            Target::Values(&y),
            &idx,
            &TreeParams::default(),
            &mut seeded_rng(1),
            &mut imp,
        );
        assert_eq!(tree.leaf_value(&[0.0, 0.0]), &[1.0]);
        assert_eq!(tree.leaf_value(&[5.0, 0.0]), &[4.0]);
        assert_eq!(imp[1], 0.0);
    }

    #[test]
    fn pure_node_is_a_leaf() {
        let x = vec![vec![0.0], vec![1.0]];
        let y = [2.0, 2.0];
        let mut imp = vec![0.0];
        let tree = DecisionTree::fit(
            &x,
            Target::Values(&y),
            &[0, 1],
            &TreeParams::default(),
            &mut seeded_rng(1),
            &mut imp,
        );
        assert_eq!(tree.nodes.len(), 1);
    }
}
