use causal_loop_analytics::bundle::{BundleStore, TrainedModelBundle, decode, encode};
use causal_loop_analytics::engines::archetype::Archetype;
use causal_loop_analytics::engines::forecast::TrendDirection;
use causal_loop_analytics::engines::{
    AnomalyDetector, ArchetypeClassifier, ClusterAnalyzer, ImpactPredictor,
    LoopDynamicsSimulator, TrendForecaster, suggest_loops,
};
use causal_loop_analytics::features::{FEATURE_COUNT, extract};
use causal_loop_analytics::schemas::{CauseType, ImpactType, LoopType, ProblemRecord};
use chrono::{TimeZone, Utc};

const THEMES: [(&str, &str); 4] = [
    ("Growth stalls", "growth hits a capacity limit and saturation"),
    ("Shared pasture", "shared resource depletion through overuse"),
    ("Patch regret", "a quick solution had an unintended consequence"),
    ("Arms race", "retaliation and escalation of conflict"),
];

fn corpus(n: usize) -> Vec<ProblemRecord> {
    (0..n)
        .map(|i| {
            let (title, desc) = THEMES[i % THEMES.len()];
            let mut p = ProblemRecord::new(format!("p{i}"), title, desc)
                .with_created_at(&format!("2024-0{}-{:02}T09:00:00Z", 1 + i % 6, 1 + i))
                .with_cause("demand will increase", CauseType::Primary)
                .with_impact("costs grow", ImpactType::Business);
            for _ in 0..(i % 3) {
                p = p
                    .with_cause("hidden factor", CauseType::Latent)
                    .with_impact("network outage", ImpactType::Technical)
                    .with_loop("spiral", LoopType::Reinforcing);
            }
            if i % 2 == 0 {
                p = p.with_loop("correction", LoopType::Balancing);
            }
            p
        })
        .collect()
}

#[test]
fn feature_extraction_is_deterministic() {
    let p = &corpus(1)[0];
    let a = extract(p);
    let b = extract(p);
    assert_eq!(a, b);
    assert_eq!(a.as_slice().len(), FEATURE_COUNT);
    assert_eq!(extract(&ProblemRecord::default()).as_slice().len(), 24);
}

#[test]
fn archetype_training_reports_observed_labels() {
    let engine = ArchetypeClassifier::default();
    let (bundle, report) = engine.train(&corpus(12)).unwrap();
    assert!(report.model_trained);
    assert!((0.0..=1.0).contains(&report.accuracy));
    assert_eq!(report.feature_importance.len(), FEATURE_COUNT);
    for label in &report.classes {
        assert!(Archetype::PATTERNS.contains(label) || *label == Archetype::Unknown);
    }

    let prediction = engine.predict(&bundle, &corpus(12)[0]).unwrap();
    let total: f64 = prediction.probability_distribution.values().sum();
    assert!((total - 1.0).abs() < 1e-9);
    assert_eq!(
        prediction.probability_distribution[&prediction.predicted_archetype],
        prediction.confidence
    );
}

#[test]
fn training_is_reproducible_for_a_fixed_seed() {
    let engine = ArchetypeClassifier::default();
    let (a, ra) = engine.train(&corpus(15)).unwrap();
    let (b, rb) = engine.train(&corpus(15)).unwrap();
    assert_eq!(a.model, b.model);
    assert_eq!(ra.accuracy, rb.accuracy);
}

#[test]
fn saved_bundles_reproduce_predictions() {
    let dir = tempfile::tempdir().unwrap();
    let store = BundleStore::new(dir.path());
    let problems = corpus(14);
    let probe = &problems[5];

    let archetype = ArchetypeClassifier::default();
    let (bundle, _) = archetype.train(&problems).unwrap();
    store.save::<ArchetypeClassifier>(&bundle).unwrap();
    let restored = store.load::<ArchetypeClassifier>().unwrap();
    assert_eq!(
        archetype.predict(&bundle, probe).unwrap(),
        archetype.predict(&restored, probe).unwrap()
    );

    let impact = ImpactPredictor::default();
    let (bundle, _) = impact.train(&problems).unwrap();
    store.save::<ImpactPredictor>(&bundle).unwrap();
    let restored = store.load::<ImpactPredictor>().unwrap();
    assert_eq!(
        impact.predict(&bundle, probe).unwrap(),
        impact.predict(&restored, probe).unwrap()
    );

    let now = Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap();
    let forecaster = TrendForecaster::default();
    let (bundle, _) = forecaster.train(&problems, now).unwrap();
    let bytes = encode::<TrendForecaster>(&bundle).unwrap();
    let restored = decode::<TrendForecaster>(&bytes).unwrap();
    assert_eq!(
        forecaster.forecast(&bundle, 10, now).unwrap(),
        forecaster.forecast(&restored, 10, now).unwrap()
    );
}

#[test]
fn bundles_are_bound_to_their_engine() {
    let (bundle, _) = ImpactPredictor::default().train(&corpus(10)).unwrap();
    let bytes = encode::<ImpactPredictor>(&bundle).unwrap();
    let err = decode::<ArchetypeClassifier>(&bytes).unwrap_err();
    assert_eq!(err.code(), "serialization_failure");
}

#[test]
fn missing_bundle_file_is_an_untrained_engine() {
    let dir = tempfile::tempdir().unwrap();
    let store = BundleStore::new(dir.path().join("nothing-here"));
    let bundle: TrainedModelBundle<_> = store.load::<ImpactPredictor>().unwrap();
    assert!(!bundle.is_fitted());
    let err = ImpactPredictor::default()
        .predict(&bundle, &ProblemRecord::default())
        .unwrap_err();
    assert_eq!(err.code(), "model_not_trained");
}

#[test]
fn forecast_trend_matches_its_own_endpoints() {
    let now = Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap();
    let forecaster = TrendForecaster::default();
    let (bundle, report) = forecaster.train(&corpus(10), now).unwrap();
    assert!(report.models_trained);
    for forecast in forecaster.forecast(&bundle, 30, now).unwrap().values() {
        let first = forecast.predictions[0];
        let last = forecast.predictions[forecast.predictions.len() - 1];
        let expected = if last > first {
            TrendDirection::Increasing
        } else {
            TrendDirection::Decreasing
        };
        assert_eq!(forecast.current_trend, expected);
        assert_eq!(forecast.dates.len(), 30);
    }
}

#[test]
fn anomaly_detection_flags_the_outlier() {
    let mut problems: Vec<ProblemRecord> = (0..6)
        .map(|i| {
            ProblemRecord::new(format!("same{i}"), "Queue delay", "orders wait")
                .with_cause("staffing", CauseType::Primary)
        })
        .collect();
    let mut outlier = ProblemRecord::new(
        "far",
        "System feedback loop",
        "reinforcing balancing feedback loop cause effect impact system system",
    );
    for _ in 0..15 {
        outlier = outlier
            .with_cause("c", CauseType::Secondary)
            .with_impact("i", ImpactType::Environmental)
            .with_loop("l", LoopType::Balancing);
    }
    problems.push(outlier);

    let (_, report) = AnomalyDetector::default().detect(&problems, None).unwrap();
    assert_eq!(report.anomalies_detected, 1);
    assert_eq!(report.anomalies[0].problem_id, "far");
    assert_eq!(report.total_analyzed, 7);
}

#[test]
fn cluster_count_boundaries() {
    let (_, three) = ClusterAnalyzer::default().cluster(&corpus(3)).unwrap();
    assert_eq!(three.n_clusters, 2);
    let (_, twelve) = ClusterAnalyzer::default().cluster(&corpus(12)).unwrap();
    assert_eq!(twelve.n_clusters, 6);
    let members: usize = twelve.clusters.values().map(Vec::len).sum();
    assert_eq!(members, 12);
}

#[test]
fn suggestions_and_simulation_work_on_a_single_record() {
    let p = &corpus(3)[2];
    let suggestions = suggest_loops(p);
    assert!(suggestions.suggested_loops.len() <= 5);
    assert!(
        suggestions
            .suggested_loops
            .windows(2)
            .all(|w| w[0].confidence >= w[1].confidence)
    );

    let trace = LoopDynamicsSimulator::default().simulate(p, 50).unwrap();
    assert_eq!(trace.reinforcing_loops.count, 2);
    assert_eq!(trace.balancing_loops.count, 1);
    assert_eq!(trace.time_points.len(), 50);
}
