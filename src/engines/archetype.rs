//! System archetype classification.
//!
//! Training data is weak-labelled by keyword scoring against the six
//! archetypes, then a random forest is fitted on standardized feature vectors.

use super::ModelEngine;
use crate::bundle::TrainedModelBundle;
use crate::error::{AnalyticsError, Result};
use crate::features::{FEATURE_COUNT, FEATURE_NAMES, extract, extract_matrix};
use crate::models::forest::ForestParams;
use crate::models::{
    DEFAULT_SEED, RandomForestClassifier, StandardScaler, take_rows, train_test_split,
};
use crate::schemas::ProblemRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MIN_TRAINING_RECORDS: usize = 10;
const TEST_FRACTION: f64 = 0.2;

/// Archetype labels. Declaration order is the weak-label tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Archetype {
    GrowthLimited,
    SharedResourceDepletion,
    EscalationByRetaliation,
    FixThatBackfires,
    BurdenShifting,
    SuccessBreedsSuccess,
    Unknown,
}

impl Archetype {
    /// Scored archetypes in tie-break order (excludes `Unknown`).
    pub const PATTERNS: [Archetype; 6] = [
        Archetype::GrowthLimited,
        Archetype::SharedResourceDepletion,
        Archetype::EscalationByRetaliation,
        Archetype::FixThatBackfires,
        Archetype::BurdenShifting,
        Archetype::SuccessBreedsSuccess,
    ];

    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            Archetype::GrowthLimited => &["growth", "limit", "constraint", "capacity", "saturation"],
            Archetype::SharedResourceDepletion => {
                &["shared", "resource", "depletion", "overuse", "competition"]
            }
            Archetype::EscalationByRetaliation => &[
                "competition",
                "arms_race",
                "retaliation",
                "escalation",
                "conflict",
            ],
            Archetype::FixThatBackfires => &[
                "solution",
                "unintended",
                "consequence",
                "side_effect",
                "worsen",
            ],
            Archetype::BurdenShifting => &[
                "dependency",
                "symptom",
                "quick_fix",
                "fundamental",
                "weaken",
            ],
            Archetype::SuccessBreedsSuccess => &[
                "advantage",
                "resource_allocation",
                "rich_get_richer",
                "inequality",
            ],
            Archetype::Unknown => &[],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Archetype::GrowthLimited => "growth_limited",
            Archetype::SharedResourceDepletion => "shared_resource_depletion",
            Archetype::EscalationByRetaliation => "escalation_by_retaliation",
            Archetype::FixThatBackfires => "fix_that_backfires",
            Archetype::BurdenShifting => "burden_shifting",
            Archetype::SuccessBreedsSuccess => "success_breeds_success",
            Archetype::Unknown => "unknown",
        }
    }
}

/// Keyword weak label: highest keyword count wins, earliest archetype on ties,
/// `Unknown` when nothing matches.
pub fn weak_label(problem: &ProblemRecord) -> Archetype {
    let text = problem.lower_text();
    let mut label = Archetype::Unknown;
    let mut max_score = 0;
    for archetype in Archetype::PATTERNS {
        let score = archetype
            .keywords()
            .iter()
            .filter(|kw| text.contains(*kw))
            .count();
        if score > max_score {
            max_score = score;
            label = archetype;
        }
    }
    label
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchetypeModel {
    pub scaler: StandardScaler,
    pub classifier: RandomForestClassifier,
    /// Label vocabulary; index `i` is class `i` of the classifier.
    pub labels: Vec<Archetype>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchetypeTrainReport {
    pub model_trained: bool,
    pub accuracy: f64,
    pub classes: Vec<Archetype>,
    pub feature_importance: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchetypePrediction {
    pub predicted_archetype: Archetype,
    pub confidence: f64,
    pub probability_distribution: BTreeMap<Archetype, f64>,
}

#[derive(Debug, Clone)]
pub struct ArchetypeClassifier {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub seed: u64,
}

impl Default for ArchetypeClassifier {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 10,
            seed: DEFAULT_SEED,
        }
    }
}

impl ModelEngine for ArchetypeClassifier {
    const NAME: &'static str = "archetype";
    type Model = ArchetypeModel;
}

impl ArchetypeClassifier {
    pub fn train(
        &self,
        problems: &[ProblemRecord],
    ) -> Result<(TrainedModelBundle<ArchetypeModel>, ArchetypeTrainReport)> {
        if problems.len() < MIN_TRAINING_RECORDS {
            return Err(AnalyticsError::insufficient(
                "train_archetype_classifier",
                MIN_TRAINING_RECORDS,
                problems.len(),
            ));
        }

        let x = extract_matrix(problems);
        let raw_labels: Vec<Archetype> = problems.iter().map(weak_label).collect();
        let mut vocab = raw_labels.clone();
        vocab.sort();
        vocab.dedup();
        let y: Vec<usize> = raw_labels
            .iter()
            .map(|l| vocab.binary_search(l).unwrap_or(0))
            .collect();

        let (scaler, x_scaled) = StandardScaler::fit_transform(&x);
        let (train_idx, test_idx) = train_test_split(x.len(), TEST_FRACTION, self.seed);
        let x_train = take_rows(&x_scaled, &train_idx);
        let y_train = take_rows(&y, &train_idx);
        let x_test = take_rows(&x_scaled, &test_idx);
        let y_test = take_rows(&y, &test_idx);

        let max_features = (FEATURE_COUNT as f64).sqrt().floor() as usize;
        let params = ForestParams::new(self.n_estimators, self.seed)
            .max_depth(self.max_depth)
            .max_features(max_features);
        let classifier = RandomForestClassifier::fit(&x_train, &y_train, vocab.len(), &params);
        let accuracy = classifier.score(&x_test, &y_test);

        let feature_importance = FEATURE_NAMES
            .iter()
            .zip(&classifier.feature_importances)
            .map(|(n, v)| (n.to_string(), *v))
            .collect();

        tracing::info!(
            "Archetype classifier trained on {} records: accuracy={:.3}, classes={}",
            problems.len(),
            accuracy,
            vocab.len()
        );

        let report = ArchetypeTrainReport {
            model_trained: true,
            accuracy,
            classes: vocab.clone(),
            feature_importance,
        };
        let model = ArchetypeModel {
            scaler,
            classifier,
            labels: vocab,
        };
        Ok((TrainedModelBundle::fitted(model), report))
    }

    pub fn predict(
        &self,
        bundle: &TrainedModelBundle<ArchetypeModel>,
        problem: &ProblemRecord,
    ) -> Result<ArchetypePrediction> {
        let model = bundle.model(Self::NAME)?;
        let row = model.scaler.transform_row(extract(problem).as_slice());
        let proba = model.classifier.predict_proba(&row);
        let best = crate::utils::math::argmax(&proba).unwrap_or(0);

        let probability_distribution = model
            .labels
            .iter()
            .zip(&proba)
            .map(|(l, p)| (*l, *p))
            .collect();

        Ok(ArchetypePrediction {
            predicted_archetype: model.labels.get(best).copied().unwrap_or(Archetype::Unknown),
            confidence: proba.get(best).copied().unwrap_or(0.0),
            probability_distribution,
        })
    }
}
