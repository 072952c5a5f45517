//! Rule-based feedback loop suggestions from cause/impact wording.

use crate::schemas::{LoopType, ProblemRecord};
use serde::{Deserialize, Serialize};

pub const MAX_SUGGESTIONS: usize = 5;
pub const REINFORCING_CONFIDENCE: f64 = 0.7;
pub const BALANCING_CONFIDENCE: f64 = 0.6;

const GROWTH_WORDS: [&str; 4] = ["increase", "grow", "expand", "improve"];
const DRIVER_WORDS: [&str; 3] = ["increase", "grow", "expand"];
const LIMIT_WORDS: [&str; 4] = ["decrease", "reduce", "limit", "constraint"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopSuggestion {
    #[serde(rename = "type")]
    pub kind: LoopType,
    pub description: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopSuggestions {
    pub suggested_loops: Vec<LoopSuggestion>,
    pub total_suggestions: usize,
}

fn mentions(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(w))
}

/// Scan every (cause, impact) pair for growth/limit wording.
///
/// Results are stably sorted by descending confidence, so equal-confidence
/// suggestions keep discovery order, then cut to the top five.
pub fn suggest_loops(problem: &ProblemRecord) -> LoopSuggestions {
    let causes: Vec<String> = problem
        .causes
        .iter()
        .map(|c| c.description.to_lowercase())
        .collect();
    let impacts: Vec<String> = problem
        .impacts
        .iter()
        .map(|i| i.description.to_lowercase())
        .collect();

    let mut suggestions = Vec::new();
    for cause in &causes {
        for impact in &impacts {
            if mentions(cause, &GROWTH_WORDS) && mentions(impact, &GROWTH_WORDS) {
                suggestions.push(LoopSuggestion {
                    kind: LoopType::Reinforcing,
                    description: format!("Potential reinforcing loop: {cause} → {impact}"),
                    confidence: REINFORCING_CONFIDENCE,
                });
            }
            if mentions(cause, &DRIVER_WORDS) && mentions(impact, &LIMIT_WORDS) {
                suggestions.push(LoopSuggestion {
                    kind: LoopType::Balancing,
                    description: format!("Potential balancing loop: {cause} → {impact}"),
                    confidence: BALANCING_CONFIDENCE,
                });
            }
        }
    }

    suggestions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let total_suggestions = suggestions.len();
    suggestions.truncate(MAX_SUGGESTIONS);

    LoopSuggestions {
        suggested_loops: suggestions,
        total_suggestions,
    }
}
