use causal_loop_analytics::bundle::BundleStore;
use causal_loop_analytics::config::AnalyticsConfig;
use causal_loop_analytics::events::{AnalysisEvent, EventBus};
use causal_loop_analytics::schemas::{CauseType, ImpactType, LoopType, ProblemRecord};
use causal_loop_analytics::service::AnalyticsService;
use causal_loop_analytics::store::{JsonFileStore, RecordStore};
use causal_loop_analytics::worker::{TrainingJob, TrainingWorker};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn record(i: usize) -> ProblemRecord {
    let title = if i % 2 == 0 { "Growth limit" } else { "Shared resource overuse" };
    let mut p = ProblemRecord::new(format!("r{i}"), title, "capacity constraint on a shared system")
        .with_created_at(&format!("2024-05-{:02}T12:00:00Z", i + 1))
        .with_cause("load will increase", CauseType::Primary)
        .with_impact("throughput grows", ImpactType::Operational)
        .with_loop("queueing", LoopType::Balancing);
    for _ in 0..(i % 3) {
        p = p
            .with_cause("aging hardware", CauseType::Secondary)
            .with_impact("data loss", ImpactType::Technical);
    }
    p
}

async fn seeded_store(path: &Path, n: usize) -> Arc<JsonFileStore> {
    let store = Arc::new(JsonFileStore::new(path));
    for i in 0..n {
        store.create(record(i)).await.unwrap();
    }
    store
}

fn service(store: Arc<JsonFileStore>, models: &Path) -> Arc<AnalyticsService> {
    Arc::new(AnalyticsService::new(
        store,
        EventBus::new(64),
        Some(BundleStore::new(models)),
        AnalyticsConfig::default(),
    ))
}

#[tokio::test]
async fn trained_models_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("problems.json");
    let models = dir.path().join("models");
    let store = seeded_store(&data, 12).await;

    let first = service(store.clone(), &models);
    let mut events = first.events().subscribe();
    first.train_patterns().await.unwrap();
    let predictive = first.train_predictive_models().await;
    assert!(predictive.time_series.is_trained());
    assert!(predictive.impact_predictor.is_trained());

    let mut engines = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let AnalysisEvent::ModelsUpdated { engine, .. } = event {
            engines.push(engine);
        }
    }
    assert_eq!(engines, vec!["archetype".to_string(), "predictive".to_string()]);

    let before_archetype = first.predict_archetype("r3").await.unwrap();
    let before_impact = first.predict_impacts("r3").await.unwrap();

    let second = service(store, &models);
    let status = second.restore().await;
    assert!(status.archetype && status.forecast && status.impact);
    assert!(!status.anomaly && !status.clustering);
    assert_eq!(second.predict_archetype("r3").await.unwrap(), before_archetype);
    assert_eq!(second.predict_impacts("r3").await.unwrap(), before_impact);
}

#[tokio::test]
async fn restore_without_bundles_leaves_engines_untrained() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir.path().join("problems.json"), 1).await;
    let svc = service(store, &dir.path().join("models"));
    let status = svc.restore().await;
    assert!(!status.archetype && !status.impact && !status.forecast);
    assert_eq!(
        svc.predict_impacts("r0").await.unwrap_err().code(),
        "model_not_trained"
    );
}

#[tokio::test]
async fn corrupt_bundle_is_reported_not_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let models = dir.path().join("models");
    std::fs::create_dir_all(&models).unwrap();
    std::fs::write(models.join("archetype.bundle"), b"not a bundle").unwrap();
    let store = seeded_store(&dir.path().join("problems.json"), 1).await;
    let svc = service(store, &models);
    assert!(!svc.restore().await.archetype);
}

#[tokio::test]
async fn worker_trains_through_the_queue() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir.path().join("problems.json"), 10).await;
    let svc = service(store, &dir.path().join("models"));
    let cancel = CancellationToken::new();
    let (trainer, join) = TrainingWorker::spawn(svc.clone(), 2, cancel.clone());

    let report = trainer.run(TrainingJob::Patterns).await.unwrap();
    assert_eq!(report["model_trained"], true);
    let clusters = trainer.run(TrainingJob::Clusters).await.unwrap();
    assert_eq!(clusters["n_clusters"], 5);
    assert!(svc.model_status().await.clustering);

    cancel.cancel();
    join.await.unwrap();
}

#[tokio::test]
async fn background_analysis_publishes_all_steps_when_trained() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir.path().join("problems.json"), 12).await;
    let svc = service(store, &dir.path().join("models"));
    svc.train_patterns().await.unwrap();
    svc.train_impact_predictor().await.unwrap();

    let mut events = svc.events().subscribe();
    svc.request_analysis("r4").await.unwrap();

    let mut updates = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            AnalysisEvent::AnalysisUpdate { problem_id, .. } => {
                assert_eq!(problem_id, "r4");
                updates += 1;
            }
            AnalysisEvent::AnalysisFailed { error, .. } => panic!("unexpected failure {error}"),
            _ => {}
        }
    }
    assert_eq!(updates, 4);
}

#[tokio::test]
async fn analysis_of_missing_record_reports_failure() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir.path().join("problems.json"), 1).await;
    let svc = service(store, &dir.path().join("models"));
    let mut events = svc.events().subscribe();
    svc.request_analysis("ghost").await.unwrap();
    match events.try_recv().unwrap() {
        AnalysisEvent::AnalysisFailed { problem_id, error } => {
            assert_eq!(problem_id, "ghost");
            assert_eq!(error["error"]["code"], "not_found");
        }
        other => panic!("unexpected event {other:?}"),
    }
}
