//! Typed notification events and the in-process broadcast bus.
//!
//! The analytics core only publishes; transports (SSE, logs) subscribe.
//! Publishing with no subscribers is not an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    ArchetypePrediction,
    LoopSuggestions,
    ImpactPrediction,
    Simulation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub total_problems: usize,
    pub total_causes: usize,
    pub total_impacts: usize,
    pub total_loops: usize,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum AnalysisEvent {
    ProblemAdded {
        problem_id: String,
        title: String,
    },
    ModelsUpdated {
        engine: String,
        status: String,
    },
    AnalysisUpdate {
        problem_id: String,
        #[serde(rename = "type")]
        kind: AnalysisKind,
        payload: Value,
    },
    AnalysisFailed {
        problem_id: String,
        error: Value,
    },
    SystemStats(SystemStats),
}

impl AnalysisEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            AnalysisEvent::ProblemAdded { .. } => "problem_added",
            AnalysisEvent::ModelsUpdated { .. } => "models_updated",
            AnalysisEvent::AnalysisUpdate { .. } => "analysis_update",
            AnalysisEvent::AnalysisFailed { .. } => "analysis_error",
            AnalysisEvent::SystemStats(_) => "system_stats",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AnalysisEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns the number of subscribers that received the event.
    pub fn publish(&self, event: AnalysisEvent) -> usize {
        let name = event.name();
        match self.tx.send(event) {
            Ok(n) => n,
            Err(_) => {
                tracing::trace!("No subscribers for {} event", name);
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AnalysisEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
