//! Analytics service: owns the engines, their bundles, the record store
//! handle and the event bus.
//!
//! Each engine bundle sits behind its own readers-writer lock holding an
//! `Arc`. Predictions clone the `Arc` and release the lock immediately;
//! training runs on the blocking pool and swaps a fresh `Arc` in on success.

use crate::bundle::{BundleStore, TrainedModelBundle};
use crate::config::AnalyticsConfig;
use crate::engines::anomaly::AnomalyReport;
use crate::engines::archetype::{ArchetypePrediction, ArchetypeTrainReport};
use crate::engines::clustering::ClusterReport;
use crate::engines::forecast::{ForecastResult, ForecastTrainReport};
use crate::engines::impact::{ImpactPrediction, ImpactTrainReport};
use crate::engines::simulation::SimulationTrace;
use crate::engines::suggestions::LoopSuggestions;
use crate::engines::{
    AnomalyDetector, ArchetypeClassifier, ClusterAnalyzer, ImpactPredictor,
    LoopDynamicsSimulator, ModelEngine, TrendForecaster, suggest_loops,
};
use crate::error::{AnalyticsError, Result};
use crate::events::{AnalysisEvent, AnalysisKind, EventBus, SystemStats};
use crate::store::RecordStore;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Current bundle of one engine plus a lock serializing its training runs.
pub struct EngineSlot<E: ModelEngine> {
    bundle: RwLock<Arc<TrainedModelBundle<E::Model>>>,
    training: Mutex<()>,
}

impl<E: ModelEngine> Default for EngineSlot<E> {
    fn default() -> Self {
        Self {
            bundle: RwLock::new(Arc::new(TrainedModelBundle::untrained())),
            training: Mutex::new(()),
        }
    }
}

impl<E: ModelEngine> EngineSlot<E> {
    pub async fn current(&self) -> Arc<TrainedModelBundle<E::Model>> {
        self.bundle.read().await.clone()
    }

    pub async fn replace(&self, bundle: TrainedModelBundle<E::Model>) -> Arc<TrainedModelBundle<E::Model>> {
        let fresh = Arc::new(bundle);
        *self.bundle.write().await = fresh.clone();
        fresh
    }

    pub async fn is_fitted(&self) -> bool {
        self.bundle.read().await.is_fitted()
    }
}

/// Run CPU-bound work on the blocking pool.
async fn blocking<T, F>(label: &'static str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|_| AnalyticsError::Internal {
            message: format!("{label} task panicked"),
        })?
}

/// Outcome of one half of a combined training call: report or error payload.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TrainOutcome<T> {
    Trained(T),
    Failed(Value),
}

impl<T> TrainOutcome<T> {
    fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(report) => TrainOutcome::Trained(report),
            Err(e) => TrainOutcome::Failed(e.to_payload()),
        }
    }

    pub fn is_trained(&self) -> bool {
        matches!(self, TrainOutcome::Trained(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictiveTrainReport {
    pub time_series: TrainOutcome<ForecastTrainReport>,
    pub impact_predictor: TrainOutcome<ImpactTrainReport>,
}

/// Which engines currently hold a fitted bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelStatus {
    pub archetype: bool,
    pub anomaly: bool,
    pub clustering: bool,
    pub forecast: bool,
    pub impact: bool,
}

pub struct AnalyticsService {
    store: Arc<dyn RecordStore>,
    events: EventBus,
    bundles: Option<BundleStore>,
    settings: AnalyticsConfig,
    archetype: EngineSlot<ArchetypeClassifier>,
    anomaly: EngineSlot<AnomalyDetector>,
    clustering: EngineSlot<ClusterAnalyzer>,
    forecast: EngineSlot<TrendForecaster>,
    impact: EngineSlot<ImpactPredictor>,
}

impl AnalyticsService {
    /// `bundles = None` keeps every bundle in memory only.
    pub fn new(
        store: Arc<dyn RecordStore>,
        events: EventBus,
        bundles: Option<BundleStore>,
        settings: AnalyticsConfig,
    ) -> Self {
        Self {
            store,
            events,
            bundles,
            settings,
            archetype: EngineSlot::default(),
            anomaly: EngineSlot::default(),
            clustering: EngineSlot::default(),
            forecast: EngineSlot::default(),
            impact: EngineSlot::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn settings(&self) -> &AnalyticsConfig {
        &self.settings
    }

    pub async fn model_status(&self) -> ModelStatus {
        ModelStatus {
            archetype: self.archetype.is_fitted().await,
            anomaly: self.anomaly.is_fitted().await,
            clustering: self.clustering.is_fitted().await,
            forecast: self.forecast.is_fitted().await,
            impact: self.impact.is_fitted().await,
        }
    }

    // ---- persistence ----

    async fn restore_slot<E: ModelEngine>(&self, slot: &EngineSlot<E>) -> bool {
        let Some(bundles) = self.bundles.clone() else {
            return false;
        };
        let _guard = slot.training.lock().await;
        match blocking("bundle load", move || bundles.load::<E>()).await {
            Ok(bundle) => {
                let fitted = bundle.is_fitted();
                slot.replace(bundle).await;
                fitted
            }
            Err(e) => {
                tracing::warn!("Could not restore {} bundle: {}", E::NAME, e);
                false
            }
        }
    }

    /// Load every engine bundle from disk. Missing or unreadable bundles
    /// leave that engine untrained.
    pub async fn restore(&self) -> ModelStatus {
        self.restore_slot(&self.archetype).await;
        self.restore_slot(&self.anomaly).await;
        self.restore_slot(&self.clustering).await;
        self.restore_slot(&self.forecast).await;
        self.restore_slot(&self.impact).await;
        let status = self.model_status().await;
        tracing::info!("Restored model bundles: {:?}", status);
        status
    }

    async fn persist<E: ModelEngine>(&self, bundle: Arc<TrainedModelBundle<E::Model>>) {
        let Some(bundles) = self.bundles.clone() else {
            return;
        };
        if let Err(e) = blocking("bundle save", move || bundles.save::<E>(&bundle)).await {
            tracing::error!("Failed to persist {} bundle: {}", E::NAME, e);
        }
    }

    async fn record(&self, problem_id: &str) -> Result<crate::schemas::ProblemRecord> {
        self.store.get(problem_id).await
    }

    // ---- pattern engines ----

    pub async fn train_patterns(&self) -> Result<ArchetypeTrainReport> {
        let problems = self.store.list().await?;
        let _guard = self.archetype.training.lock().await;
        let engine = self.settings.archetype_classifier();
        let (bundle, report) = blocking("archetype training", move || engine.train(&problems)).await?;
        let fresh = self.archetype.replace(bundle).await;
        self.persist::<ArchetypeClassifier>(fresh).await;
        self.events.publish(AnalysisEvent::ModelsUpdated {
            engine: ArchetypeClassifier::NAME.into(),
            status: "trained".into(),
        });
        Ok(report)
    }

    pub async fn predict_archetype(&self, problem_id: &str) -> Result<ArchetypePrediction> {
        let problem = self.record(problem_id).await?;
        let bundle = self.archetype.current().await;
        self.settings.archetype_classifier().predict(&bundle, &problem)
    }

    pub async fn detect_anomalies(&self) -> Result<AnomalyReport> {
        let problems = self.store.list().await?;
        let _guard = self.anomaly.training.lock().await;
        let previous = self.anomaly.current().await;
        let engine = self.settings.anomaly_detector();
        let (bundle, report) =
            blocking("anomaly detection", move || engine.detect(&problems, Some(previous.as_ref()))).await?;
        let fresh = self.anomaly.replace(bundle).await;
        self.persist::<AnomalyDetector>(fresh).await;
        Ok(report)
    }

    pub async fn cluster_problems(&self) -> Result<ClusterReport> {
        let problems = self.store.list().await?;
        let _guard = self.clustering.training.lock().await;
        let engine = self.settings.cluster_analyzer();
        let (bundle, report) = blocking("clustering", move || engine.cluster(&problems)).await?;
        let fresh = self.clustering.replace(bundle).await;
        self.persist::<ClusterAnalyzer>(fresh).await;
        Ok(report)
    }

    pub async fn suggest_loops(&self, problem_id: &str) -> Result<LoopSuggestions> {
        Ok(suggest_loops(&self.record(problem_id).await?))
    }

    // ---- predictive engines ----

    pub async fn train_forecasters(&self) -> Result<ForecastTrainReport> {
        let problems = self.store.list().await?;
        let _guard = self.forecast.training.lock().await;
        let engine = self.settings.trend_forecaster();
        let now = chrono::Utc::now();
        let (bundle, report) =
            blocking("forecaster training", move || engine.train(&problems, now)).await?;
        let fresh = self.forecast.replace(bundle).await;
        self.persist::<TrendForecaster>(fresh).await;
        Ok(report)
    }

    pub async fn train_impact_predictor(&self) -> Result<ImpactTrainReport> {
        let problems = self.store.list().await?;
        let _guard = self.impact.training.lock().await;
        let engine = self.settings.impact_predictor();
        let (bundle, report) =
            blocking("impact training", move || engine.train(&problems)).await?;
        let fresh = self.impact.replace(bundle).await;
        self.persist::<ImpactPredictor>(fresh).await;
        Ok(report)
    }

    /// Train forecasters and the impact predictor from the same corpus.
    /// Each half succeeds or fails on its own.
    pub async fn train_predictive_models(&self) -> PredictiveTrainReport {
        let time_series = TrainOutcome::from_result(self.train_forecasters().await);
        let impact_predictor = TrainOutcome::from_result(self.train_impact_predictor().await);
        if time_series.is_trained() || impact_predictor.is_trained() {
            self.events.publish(AnalysisEvent::ModelsUpdated {
                engine: "predictive".into(),
                status: "trained".into(),
            });
        }
        PredictiveTrainReport {
            time_series,
            impact_predictor,
        }
    }

    pub async fn forecast(&self, days: Option<u32>) -> Result<ForecastResult> {
        let days = days.unwrap_or(self.settings.default_forecast_days);
        let bundle = self.forecast.current().await;
        self.settings
            .trend_forecaster()
            .forecast(&bundle, days, chrono::Utc::now())
    }

    pub async fn predict_impacts(&self, problem_id: &str) -> Result<ImpactPrediction> {
        let problem = self.record(problem_id).await?;
        let bundle = self.impact.current().await;
        self.settings.impact_predictor().predict(&bundle, &problem)
    }

    pub async fn simulate(&self, problem_id: &str, steps: Option<usize>) -> Result<SimulationTrace> {
        let problem = self.record(problem_id).await?;
        let steps = steps.unwrap_or(self.settings.default_sim_steps);
        LoopDynamicsSimulator::default().simulate(&problem, steps)
    }

    // ---- background work ----

    fn publish_step<T: Serialize>(&self, problem_id: &str, kind: AnalysisKind, result: Result<T>) {
        let event = match result.and_then(|v| Ok(serde_json::to_value(v)?)) {
            Ok(payload) => AnalysisEvent::AnalysisUpdate {
                problem_id: problem_id.to_string(),
                kind,
                payload,
            },
            Err(e) => {
                tracing::warn!("Analysis step {:?} failed for {}: {}", kind, problem_id, e);
                AnalysisEvent::AnalysisFailed {
                    problem_id: problem_id.to_string(),
                    error: e.to_payload(),
                }
            }
        };
        self.events.publish(event);
    }

    async fn run_analysis(&self, problem_id: &str) {
        let problem = match self.record(problem_id).await {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("Background analysis for {} aborted: {}", problem_id, e);
                self.events.publish(AnalysisEvent::AnalysisFailed {
                    problem_id: problem_id.to_string(),
                    error: e.to_payload(),
                });
                return;
            }
        };

        let archetype = self.archetype.current().await;
        self.publish_step(
            problem_id,
            AnalysisKind::ArchetypePrediction,
            self.settings.archetype_classifier().predict(&archetype, &problem),
        );
        self.publish_step(
            problem_id,
            AnalysisKind::LoopSuggestions,
            Ok(suggest_loops(&problem)),
        );
        let impact = self.impact.current().await;
        self.publish_step(
            problem_id,
            AnalysisKind::ImpactPrediction,
            self.settings.impact_predictor().predict(&impact, &problem),
        );
        self.publish_step(
            problem_id,
            AnalysisKind::Simulation,
            LoopDynamicsSimulator::default().simulate(&problem, self.settings.default_sim_steps),
        );
    }

    /// Spawn an independent analysis task for one record. Every step
    /// reports through the event bus; the task never fails its caller.
    pub fn request_analysis(self: &Arc<Self>, problem_id: impl Into<String>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let problem_id = problem_id.into();
        tokio::spawn(async move {
            service.run_analysis(&problem_id).await;
            tracing::debug!("Background analysis for {} finished", problem_id);
        })
    }

    pub async fn system_stats(&self) -> Result<SystemStats> {
        let problems = self.store.list().await?;
        Ok(SystemStats {
            total_problems: problems.len(),
            total_causes: problems.iter().map(|p| p.causes.len()).sum(),
            total_impacts: problems.iter().map(|p| p.impacts.len()).sum(),
            total_loops: problems.iter().map(|p| p.feedback_loops.len()).sum(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        })
    }

    /// Publish `SystemStats` every `interval` until `cancel` fires.
    pub fn spawn_stats_loop(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("Stats loop cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        match service.system_stats().await {
                            Ok(stats) => {
                                service.events.publish(AnalysisEvent::SystemStats(stats));
                            }
                            Err(e) => tracing::error!("Error collecting system stats: {}", e),
                        }
                    }
                }
            }
        })
    }
}
