//! Feature extraction over problem records.
//!
//! Produces a fixed 24-slot numeric vector per record. The slot order is the
//! schema; bump [`FEATURE_SCHEMA_VERSION`] whenever it changes so persisted
//! bundles trained on the old layout are rejected on load.

use crate::schemas::{CauseType, ImpactType, LoopType, ProblemRecord};
use std::collections::HashSet;

pub const FEATURE_SCHEMA_VERSION: u32 = 1;
pub const FEATURE_COUNT: usize = 24;

/// Slot names in vector order.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "causes_count",
    "impacts_count",
    "feedback_loops_count",
    "remediations_count",
    "word_count",
    "reinforcing_count",
    "balancing_count",
    "feedback_count",
    "loop_count",
    "cause_count",
    "effect_count",
    "impact_count",
    "system_count",
    "primary_causes",
    "secondary_causes",
    "latent_causes",
    "technical_impacts",
    "business_impacts",
    "operational_impacts",
    "environmental_impacts",
    "health_impacts",
    "educational_impacts",
    "reinforcing_loops",
    "balancing_loops",
];

/// Lexical markers counted (case-sensitive, non-overlapping) in title + description.
pub const LEXICAL_MARKERS: [&str; 8] = [
    "reinforcing",
    "balancing",
    "feedback",
    "loop",
    "cause",
    "effect",
    "impact",
    "system",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector(pub [f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.0.to_vec()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|i| self.0[i])
    }
}

/// Extract the feature vector for a single record. Total over partial records.
pub fn extract(problem: &ProblemRecord) -> FeatureVector {
    let text = problem.text();
    let mut v = [0.0; FEATURE_COUNT];

    v[0] = problem.causes.len() as f64;
    v[1] = problem.impacts.len() as f64;
    v[2] = problem.feedback_loops.len() as f64;
    v[3] = problem.remediations.len() as f64;
    v[4] = text.split_whitespace().count() as f64;

    for (i, marker) in LEXICAL_MARKERS.iter().enumerate() {
        v[5 + i] = text.matches(marker).count() as f64;
    }

    let mut slot = 5 + LEXICAL_MARKERS.len();
    for kind in CauseType::ALL {
        v[slot] = problem.cause_count(kind) as f64;
        slot += 1;
    }
    for kind in ImpactType::ALL {
        v[slot] = problem.impact_count(kind) as f64;
        slot += 1;
    }
    v[slot] = problem.loop_count(LoopType::Reinforcing) as f64;
    v[slot + 1] = problem.loop_count(LoopType::Balancing) as f64;

    FeatureVector(v)
}

/// Extract a row-major feature matrix, one row per record.
pub fn extract_matrix(problems: &[ProblemRecord]) -> Vec<Vec<f64>> {
    problems.iter().map(|p| extract(p).to_vec()).collect()
}

/// Weighted composite of structural counts and type diversity.
pub fn complexity_score(problem: &ProblemRecord) -> f64 {
    let cause_types: HashSet<Option<CauseType>> = problem.causes.iter().map(|c| c.kind).collect();
    let impact_types: HashSet<Option<ImpactType>> =
        problem.impacts.iter().map(|i| i.kind).collect();

    problem.causes.len() as f64 * 1.0
        + problem.impacts.len() as f64 * 0.8
        + problem.feedback_loops.len() as f64 * 1.5
        + cause_types.len() as f64 * 0.5
        + impact_types.len() as f64 * 0.3
}
