//! Analytics engines: archetype classification, anomaly detection,
//! clustering, loop suggestions, trend forecasting, impact prediction and
//! loop dynamics simulation.
//!
//! Engines are plain configuration carriers. Fitted state lives in an explicit
//! [`TrainedModelBundle`](crate::bundle::TrainedModelBundle) that `train`
//! returns and `predict` borrows, so nothing is shared behind the caller's back.

pub mod anomaly;
pub mod archetype;
pub mod clustering;
pub mod forecast;
pub mod impact;
pub mod simulation;
pub mod suggestions;

use serde::Serialize;
use serde::de::DeserializeOwned;

pub use anomaly::AnomalyDetector;
pub use archetype::{Archetype, ArchetypeClassifier};
pub use clustering::ClusterAnalyzer;
pub use forecast::TrendForecaster;
pub use impact::ImpactPredictor;
pub use simulation::LoopDynamicsSimulator;
pub use suggestions::suggest_loops;

/// An engine whose fitted state can be persisted as a bundle.
pub trait ModelEngine: 'static {
    /// Stable engine name, used as the bundle file stem.
    const NAME: &'static str;
    type Model: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;
}

/// Truncate to at most `max` characters, appending "..." when shortened.
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((byte_idx, _)) => format!("{}...", &s[..byte_idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::truncate_chars;

    #[test]
    fn truncation_is_char_safe() {
        assert_eq!(truncate_chars("héllo", 2), "hé...");
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("exact", 5), "exact");
    }
}
