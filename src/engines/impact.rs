//! Impact count regression and rule-based impact type scoring.

use super::ModelEngine;
use crate::bundle::TrainedModelBundle;
use crate::error::{AnalyticsError, Result};
use crate::features::complexity_score;
use crate::models::forest::ForestParams;
use crate::models::{
    DEFAULT_SEED, RandomForestRegressor, StandardScaler, take_rows, train_test_split,
};
use crate::schemas::{CauseType, ImpactType, LoopType, ProblemRecord};
use crate::utils::math::{mean_squared_error, population_variance, r2_score};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MIN_TRAINING_RECORDS: usize = 10;
const PROBE_TEST_FRACTION: f64 = 0.2;
const KEYWORD_WEIGHT: f64 = 0.2;
const CONFIDENCE_FLOOR: f64 = 0.5;
const CONFIDENCE_CEIL: f64 = 0.95;

pub const IMPACT_FEATURE_NAMES: [&str; 8] = [
    "total_causes",
    "primary_causes",
    "secondary_causes",
    "latent_causes",
    "total_loops",
    "reinforcing_loops",
    "balancing_loops",
    "complexity_score",
];

fn impact_keywords(kind: ImpactType) -> &'static [&'static str] {
    match kind {
        ImpactType::Technical => &["software", "hardware", "system", "technology", "data", "network"],
        ImpactType::Business => &["revenue", "cost", "profit", "market", "customer", "sales"],
        ImpactType::Operational => &["process", "workflow", "efficiency", "productivity", "operation"],
        ImpactType::Environmental => &["environment", "pollution", "energy", "sustainability", "climate"],
        ImpactType::Health => &["health", "safety", "medical", "patient", "wellness"],
        ImpactType::Educational => &["education", "learning", "student", "teacher", "curriculum"],
        ImpactType::Other => &[],
    }
}

/// Cause and loop composition features for one record.
pub fn impact_features(problem: &ProblemRecord) -> Vec<f64> {
    vec![
        problem.causes.len() as f64,
        problem.cause_count(CauseType::Primary) as f64,
        problem.cause_count(CauseType::Secondary) as f64,
        problem.cause_count(CauseType::Latent) as f64,
        problem.feedback_loops.len() as f64,
        problem.loop_count(LoopType::Reinforcing) as f64,
        problem.loop_count(LoopType::Balancing) as f64,
        complexity_score(problem),
    ]
}

/// Normalized impact type distribution from keyword hits in title and
/// description; uniform when nothing matches.
pub fn impact_type_distribution(problem: &ProblemRecord) -> BTreeMap<String, f64> {
    let text = problem.lower_text();
    let raw: Vec<(ImpactType, f64)> = ImpactType::ALL
        .iter()
        .map(|kind| {
            let hits = impact_keywords(*kind)
                .iter()
                .filter(|kw| text.contains(*kw))
                .count();
            (*kind, hits as f64 * KEYWORD_WEIGHT)
        })
        .collect();

    let total: f64 = raw.iter().map(|(_, s)| s).sum();
    let uniform = 1.0 / ImpactType::ALL.len() as f64;
    raw.into_iter()
        .map(|(kind, score)| {
            let p = if total > 0.0 { score / total } else { uniform };
            (kind.as_str().to_string(), p)
        })
        .collect()
}

/// Confidence from held-out error relative to target spread.
pub fn confidence_from_error(heldout_mse: f64, target_variance: f64) -> f64 {
    let denom = target_variance + heldout_mse;
    if denom <= 0.0 {
        return CONFIDENCE_CEIL;
    }
    (1.0 - heldout_mse / (denom + f64::EPSILON)).clamp(CONFIDENCE_FLOOR, CONFIDENCE_CEIL)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactModel {
    pub scaler: StandardScaler,
    pub regressor: RandomForestRegressor,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactTrainReport {
    pub model_trained: bool,
    pub mse: f64,
    pub r2_score: f64,
    pub feature_importance: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactPrediction {
    pub predicted_impact_count: u64,
    pub confidence: f64,
    pub predicted_types: BTreeMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct ImpactPredictor {
    pub n_estimators: usize,
    pub seed: u64,
}

impl Default for ImpactPredictor {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            seed: DEFAULT_SEED,
        }
    }
}

impl ModelEngine for ImpactPredictor {
    const NAME: &'static str = "impact";
    type Model = ImpactModel;
}

impl ImpactPredictor {
    pub fn train(
        &self,
        problems: &[ProblemRecord],
    ) -> Result<(TrainedModelBundle<ImpactModel>, ImpactTrainReport)> {
        if problems.len() < MIN_TRAINING_RECORDS {
            return Err(AnalyticsError::insufficient(
                "train_impact_predictor",
                MIN_TRAINING_RECORDS,
                problems.len(),
            ));
        }

        let x: Vec<Vec<f64>> = problems.iter().map(impact_features).collect();
        let y: Vec<f64> = problems.iter().map(|p| p.impacts.len() as f64).collect();
        let (scaler, x_scaled) = StandardScaler::fit_transform(&x);
        let params = ForestParams::new(self.n_estimators, self.seed);

        let (train_idx, test_idx) = train_test_split(x.len(), PROBE_TEST_FRACTION, self.seed);
        let probe = RandomForestRegressor::fit(
            &take_rows(&x_scaled, &train_idx),
            &take_rows(&y, &train_idx),
            &params,
        );
        let y_test = take_rows(&y, &test_idx);
        let heldout_mse = mean_squared_error(&y_test, &probe.predict(&take_rows(&x_scaled, &test_idx)));
        let confidence = confidence_from_error(heldout_mse, population_variance(&y));

        let regressor = RandomForestRegressor::fit(&x_scaled, &y, &params);
        let fitted = regressor.predict(&x_scaled);
        let mse = mean_squared_error(&y, &fitted);
        let r2 = r2_score(&y, &fitted);

        let feature_importance = IMPACT_FEATURE_NAMES
            .iter()
            .zip(&regressor.feature_importances)
            .map(|(n, v)| (n.to_string(), *v))
            .collect();

        tracing::info!(
            "Impact predictor trained on {} records: mse={:.4}, r2={:.4}, confidence={:.3}",
            problems.len(),
            mse,
            r2,
            confidence
        );

        let report = ImpactTrainReport {
            model_trained: true,
            mse,
            r2_score: r2,
            feature_importance,
        };
        let model = ImpactModel {
            scaler,
            regressor,
            confidence,
        };
        Ok((TrainedModelBundle::fitted(model), report))
    }

    pub fn predict(
        &self,
        bundle: &TrainedModelBundle<ImpactModel>,
        problem: &ProblemRecord,
    ) -> Result<ImpactPrediction> {
        let model = bundle.model(Self::NAME)?;
        let row = model.scaler.transform_row(&impact_features(problem));
        let raw = model.regressor.predict_row(&row);

        Ok(ImpactPrediction {
            predicted_impact_count: raw.round().max(0.0) as u64,
            confidence: model.confidence,
            predicted_types: impact_type_distribution(problem),
        })
    }
}
