//! Outlier detection over a corpus of problem records.

use super::ModelEngine;
use crate::bundle::TrainedModelBundle;
use crate::error::{AnalyticsError, Result};
use crate::features::extract_matrix;
use crate::models::{DEFAULT_SEED, IsolationForest, StandardScaler};
use crate::schemas::ProblemRecord;
use serde::{Deserialize, Serialize};

pub const MIN_RECORDS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyModel {
    pub scaler: StandardScaler,
    pub forest: IsolationForest,
    /// blake3 of the raw feature matrix the model was fitted on.
    pub corpus_fingerprint: String,
    pub n_estimators: usize,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEntry {
    pub problem_id: String,
    pub title: String,
    pub anomaly_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub anomalies_detected: usize,
    pub anomalies: Vec<AnomalyEntry>,
    pub total_analyzed: usize,
}

#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    pub n_estimators: usize,
    pub contamination: f64,
    pub seed: u64,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            contamination: 0.1,
            seed: DEFAULT_SEED,
        }
    }
}

impl ModelEngine for AnomalyDetector {
    const NAME: &'static str = "anomaly";
    type Model = AnomalyModel;
}

fn fingerprint(x: &[Vec<f64>]) -> String {
    let mut hasher = blake3::Hasher::new();
    for row in x {
        for v in row {
            hasher.update(&v.to_le_bytes());
        }
        hasher.update(b"|");
    }
    hasher.finalize().to_hex().to_string()
}

impl AnomalyDetector {
    /// Fit on `problems` and report every record labelled as an outlier.
    ///
    /// A `previous` bundle fitted on the identical corpus is reused instead
    /// of refitting; anything else is refitted from scratch.
    pub fn detect(
        &self,
        problems: &[ProblemRecord],
        previous: Option<&TrainedModelBundle<AnomalyModel>>,
    ) -> Result<(TrainedModelBundle<AnomalyModel>, AnomalyReport)> {
        if problems.len() < MIN_RECORDS {
            return Err(AnalyticsError::insufficient(
                "detect_anomalies",
                MIN_RECORDS,
                problems.len(),
            ));
        }

        let x = extract_matrix(problems);
        let corpus_fingerprint = fingerprint(&x);

        let reusable = previous
            .and_then(|b| b.model(Self::NAME).ok())
            .filter(|m| {
                m.corpus_fingerprint == corpus_fingerprint
                    && m.forest.contamination == self.contamination
                    && m.n_estimators == self.n_estimators
                    && m.seed == self.seed
            })
            .cloned();

        let bundle = match reusable {
            Some(model) => {
                tracing::debug!("Reusing anomaly model for identical corpus");
                TrainedModelBundle::fitted(model)
            }
            None => {
                let scaler = StandardScaler::fit(&x);
                let x_scaled = scaler.transform(&x);
                let forest =
                    IsolationForest::fit(&x_scaled, self.n_estimators, self.contamination, self.seed);
                TrainedModelBundle::fitted(AnomalyModel {
                    scaler,
                    forest,
                    corpus_fingerprint,
                    n_estimators: self.n_estimators,
                    seed: self.seed,
                })
            }
        };

        let model = bundle.model(Self::NAME)?;
        let x_scaled = model.scaler.transform(&x);
        let labels = model.forest.predict(&x_scaled);
        let scores = model.forest.decision_function(&x_scaled);

        // Walk the per-record label array so entries stay aligned with `problems`.
        let anomalies: Vec<AnomalyEntry> = labels
            .iter()
            .enumerate()
            .filter(|(_, label)| **label == -1)
            .map(|(i, _)| AnomalyEntry {
                problem_id: problems[i].id.clone(),
                title: problems[i].title.clone(),
                anomaly_score: scores[i],
            })
            .collect();

        tracing::info!(
            "Anomaly detection: {} of {} records flagged",
            anomalies.len(),
            problems.len()
        );

        let report = AnomalyReport {
            anomalies_detected: anomalies.len(),
            anomalies,
            total_analyzed: problems.len(),
        };
        Ok((bundle, report))
    }
}
