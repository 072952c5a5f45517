//! Similar-problem clustering.

use super::{ModelEngine, truncate_chars};
use crate::bundle::TrainedModelBundle;
use crate::error::{AnalyticsError, Result};
use crate::features::extract_matrix;
use crate::models::{DEFAULT_SEED, KMeans, StandardScaler, silhouette_score};
use crate::schemas::ProblemRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MIN_RECORDS: usize = 3;
const DESCRIPTION_PREVIEW_CHARS: usize = 100;

/// k = clamp(floor(n / 2), 2, 6).
pub fn choose_k(n: usize) -> usize {
    (n / 2).clamp(2, 6)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterModel {
    pub scaler: StandardScaler,
    pub kmeans: KMeans,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterMember {
    pub problem_id: String,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterReport {
    /// Cluster index (as a string key) to members, in input order.
    pub clusters: BTreeMap<String, Vec<ClusterMember>>,
    pub silhouette_score: f64,
    pub n_clusters: usize,
}

#[derive(Debug, Clone)]
pub struct ClusterAnalyzer {
    pub seed: u64,
}

impl Default for ClusterAnalyzer {
    fn default() -> Self {
        Self { seed: DEFAULT_SEED }
    }
}

impl ModelEngine for ClusterAnalyzer {
    const NAME: &'static str = "clustering";
    type Model = ClusterModel;
}

impl ClusterAnalyzer {
    pub fn cluster(
        &self,
        problems: &[ProblemRecord],
    ) -> Result<(TrainedModelBundle<ClusterModel>, ClusterReport)> {
        if problems.len() < MIN_RECORDS {
            return Err(AnalyticsError::insufficient(
                "cluster_problems",
                MIN_RECORDS,
                problems.len(),
            ));
        }

        let x = extract_matrix(problems);
        let (scaler, x_scaled) = StandardScaler::fit_transform(&x);
        let k = choose_k(problems.len());
        let (kmeans, labels) = KMeans::fit(&x_scaled, k, self.seed);
        let silhouette = silhouette_score(&x_scaled, &labels);

        let mut clusters: BTreeMap<String, Vec<ClusterMember>> = BTreeMap::new();
        for (problem, label) in problems.iter().zip(&labels) {
            clusters
                .entry(label.to_string())
                .or_default()
                .push(ClusterMember {
                    problem_id: problem.id.clone(),
                    title: problem.title.clone(),
                    description: truncate_chars(&problem.description, DESCRIPTION_PREVIEW_CHARS),
                });
        }

        tracing::info!(
            "Clustered {} records into k={} (silhouette={:.3})",
            problems.len(),
            k,
            silhouette
        );

        let report = ClusterReport {
            clusters,
            silhouette_score: silhouette,
            n_clusters: k,
        };
        Ok((TrainedModelBundle::fitted(ClusterModel { scaler, kmeans }), report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::{CauseType, LoopType};

    #[test]
    fn k_is_clamped() {
        assert_eq!(choose_k(3), 2);
        assert_eq!(choose_k(5), 2);
        assert_eq!(choose_k(8), 4);
        assert_eq!(choose_k(12), 6);
        assert_eq!(choose_k(40), 6);
    }

    #[test]
    fn clusters_cover_every_record() {
        let problems: Vec<ProblemRecord> = (0..12)
            .map(|i| {
                let mut p = ProblemRecord::new(i.to_string(), format!("Problem {i}"), "x".repeat(150));
                for _ in 0..(i % 4) {
                    p = p.with_cause("c", CauseType::Primary).with_loop("l", LoopType::Reinforcing);
                }
                p
            })
            .collect();
        let (bundle, report) = ClusterAnalyzer::default().cluster(&problems).unwrap();
        assert!(bundle.is_fitted());
        assert_eq!(report.n_clusters, 6);
        let members: usize = report.clusters.values().map(|m| m.len()).sum();
        assert_eq!(members, 12);
        let first = report.clusters.values().next().unwrap().first().unwrap();
        assert_eq!(first.description.chars().count(), 103);
        assert!((-1.0..=1.0).contains(&report.silhouette_score));
    }

    #[test]
    fn three_records_use_two_clusters() {
        let problems: Vec<ProblemRecord> = (0..3)
            .map(|i| ProblemRecord::new(i.to_string(), "t", "d").with_cause("c", CauseType::Latent))
            .collect();
        let (_, report) = ClusterAnalyzer::default().cluster(&problems).unwrap();
        assert_eq!(report.n_clusters, 2);
    }

    #[test]
    fn two_records_are_insufficient() {
        let problems = vec![ProblemRecord::default(), ProblemRecord::default()];
        assert_eq!(
            ClusterAnalyzer::default().cluster(&problems).unwrap_err().code(),
            "insufficient_data"
        );
    }
}
