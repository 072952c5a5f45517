//! Lloyd's k-means with k-means++ seeding, plus silhouette scoring.

use super::seeded_rng;
use crate::utils::math::{euclidean_distance, squared_distance};
use rand::Rng;
use serde::{Deserialize, Serialize};

const MAX_ITER: usize = 300;
const N_INIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KMeans {
    pub centroids: Vec<Vec<f64>>,
    pub inertia: f64,
}

impl KMeans {
    /// Fit `k` clusters (`1 <= k <= x.len()`), keeping the lowest-inertia of
    /// several seeded restarts. Returns the model and per-row labels.
    pub fn fit(x: &[Vec<f64>], k: usize, seed: u64) -> (Self, Vec<usize>) {
        let mut rng = seeded_rng(seed);
        let mut best: Option<(KMeans, Vec<usize>)> = None;
        for _ in 0..N_INIT {
            let init = plus_plus_init(x, k, &mut rng);
            let (model, labels) = lloyd(x, init);
            if best.as_ref().is_none_or(|(b, _)| model.inertia < b.inertia) {
                best = Some((model, labels));
            }
        }
        best.unwrap_or_else(|| {
            (
                KMeans {
                    centroids: Vec::new(),
                    inertia: 0.0,
                },
                vec![0; x.len()],
            )
        })
    }

    pub fn predict_row(&self, row: &[f64]) -> usize {
        nearest(&self.centroids, row).0
    }
}

fn nearest(centroids: &[Vec<f64>], row: &[f64]) -> (usize, f64) {
    centroids
        .iter()
        .enumerate()
        .map(|(c, centroid)| (c, squared_distance(row, centroid)))
        .fold((0, f64::INFINITY), |acc, cur| if cur.1 < acc.1 { cur } else { acc })
}

fn plus_plus_init<R: Rng>(x: &[Vec<f64>], k: usize, rng: &mut R) -> Vec<Vec<f64>> {
    let n = x.len();
    let mut centroids = vec![x[rng.gen_range(0..n)].clone()];
    while centroids.len() < k {
        let d2: Vec<f64> = x.iter().map(|r| nearest(&centroids, r).1).collect();
        let total: f64 = d2.iter().sum();
        let pick = if total <= 0.0 {
            rng.gen_range(0..n)
        } else {
            let mut target = rng.gen_range(0.0..total);
            let mut chosen = n - 1;
            for (i, d) in d2.iter().enumerate() {
                if target < *d {
                    chosen = i;
                    break;
                }
                target -= d;
            }
            chosen
        };
        centroids.push(x[pick].clone());
    }
    centroids
}

fn lloyd(x: &[Vec<f64>], mut centroids: Vec<Vec<f64>>) -> (KMeans, Vec<usize>) {
    let k = centroids.len();
    let dim = x.first().map(|r| r.len()).unwrap_or(0);
    let mut labels = vec![usize::MAX; x.len()];

    for _ in 0..MAX_ITER {
        let mut changed = false;
        for (i, row) in x.iter().enumerate() {
            let (c, _) = nearest(&centroids, row);
            if labels[i] != c {
                labels[i] = c;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = vec![vec![0.0; dim]; k];
        let mut counts = vec![0usize; k];
        for (row, &c) in x.iter().zip(&labels) {
            counts[c] += 1;
            for (s, v) in sums[c].iter_mut().zip(row) {
                *s += v;
            }
        }
        for c in 0..k {
            if counts[c] > 0 {
                centroids[c] = sums[c].iter().map(|s| s / counts[c] as f64).collect();
            } else {
                // Empty cluster: re-seed on the point farthest from its centroid.
                let far = x
                    .iter()
                    .enumerate()
                    .map(|(i, r)| (i, squared_distance(r, &centroids[labels[i]])))
                    .fold((0, -1.0), |acc, cur| if cur.1 > acc.1 { cur } else { acc })
                    .0;
                centroids[c] = x[far].clone();
            }
        }
    }

    let inertia = x
        .iter()
        .zip(&labels)
        .map(|(r, &c)| squared_distance(r, &centroids[c]))
        .sum();
    (KMeans { centroids, inertia }, labels)
}

/// Mean silhouette coefficient with euclidean distance.
///
/// Defined only for `2 <= distinct labels <= n - 1`; returns 0.0 otherwise.
/// Members of singleton clusters contribute 0.
pub fn silhouette_score(x: &[Vec<f64>], labels: &[usize]) -> f64 {
    let n = x.len();
    let mut distinct: Vec<usize> = labels.to_vec();
    distinct.sort_unstable();
    distinct.dedup();
    if distinct.len() < 2 || distinct.len() > n.saturating_sub(1) {
        return 0.0;
    }

    let mut total = 0.0;
    for i in 0..n {
        let mut sums = vec![0.0; distinct.len()];
        let mut counts = vec![0usize; distinct.len()];
        for j in 0..n {
            if i == j {
                continue;
            }
            let slot = distinct.binary_search(&labels[j]).unwrap_or(0);
            sums[slot] += euclidean_distance(&x[i], &x[j]);
            counts[slot] += 1;
        }
        let own = distinct.binary_search(&labels[i]).unwrap_or(0);
        if counts[own] == 0 {
            continue;
        }
        let a = sums[own] / counts[own] as f64;
        let b = (0..distinct.len())
            .filter(|&s| s != own && counts[s] > 0)
            .map(|s| sums[s] / counts[s] as f64)
            .fold(f64::INFINITY, f64::min);
        let denom = a.max(b);
        if denom > 0.0 && b.is_finite() {
            total += (b - a) / denom;
        }
    }
    total / n as f64
}
