use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::engines::{
    AnomalyDetector, ArchetypeClassifier, ClusterAnalyzer, ImpactPredictor, TrendForecaster,
};

/// Main configuration structure loaded from causal_loop.toml and environment variables
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    /// Runtime configuration loaded from environment variables
    #[serde(skip)]
    pub runtime: RuntimeConfig,
}

/// Storage locations for records and fitted model bundles
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SystemConfig {
    pub data_file: PathBuf,
    pub models_dir: PathBuf,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from("data/problems.json"),
            models_dir: default_models_dir(),
        }
    }
}

/// `<data_local_dir>/causal-loop-analytics/models`, or `./models` when the
/// platform has no data directory.
pub fn default_models_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("causal-loop-analytics").join("models"))
        .unwrap_or_else(|| PathBuf::from("models"))
}

/// Estimator sizes, seeds and operation defaults
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub seed: u64,
    pub classifier_trees: usize,
    pub classifier_max_depth: usize,
    pub forecast_trees: usize,
    pub impact_trees: usize,
    pub anomaly_trees: usize,
    pub contamination: f64,
    pub default_forecast_days: u32,
    pub default_sim_steps: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            seed: crate::models::DEFAULT_SEED,
            classifier_trees: 100,
            classifier_max_depth: 10,
            forecast_trees: 50,
            impact_trees: 100,
            anomaly_trees: 100,
            contamination: 0.1,
            default_forecast_days: 30,
            default_sim_steps: crate::engines::simulation::DEFAULT_STEPS,
        }
    }
}

impl AnalyticsConfig {
    /// Clamp every field into its supported range, warning on each change.
    pub fn validate(&mut self) {
        fn clamp_usize(name: &str, v: &mut usize, lo: usize, hi: usize) {
            let c = (*v).clamp(lo, hi);
            if c != *v {
                tracing::warn!("{} {} out of range {}..={}, clamping to {}", name, v, lo, hi, c);
                *v = c;
            }
        }

        clamp_usize("classifier_trees", &mut self.classifier_trees, 1, 500);
        clamp_usize("forecast_trees", &mut self.forecast_trees, 1, 500);
        clamp_usize("impact_trees", &mut self.impact_trees, 1, 500);
        clamp_usize("anomaly_trees", &mut self.anomaly_trees, 1, 500);
        clamp_usize("classifier_max_depth", &mut self.classifier_max_depth, 1, 32);
        clamp_usize("default_sim_steps", &mut self.default_sim_steps, 1, 10_000);

        let days = self.default_forecast_days.clamp(1, 365);
        if days != self.default_forecast_days {
            tracing::warn!(
                "default_forecast_days {} out of range 1..=365, clamping to {}",
                self.default_forecast_days,
                days
            );
            self.default_forecast_days = days;
        }

        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            let c = if self.contamination.is_nan() {
                0.1
            } else {
                self.contamination.clamp(0.001, 0.5)
            };
            tracing::warn!(
                "contamination {} outside (0, 0.5], using {}",
                self.contamination,
                c
            );
            self.contamination = c;
        }
    }

    pub fn archetype_classifier(&self) -> ArchetypeClassifier {
        ArchetypeClassifier {
            n_estimators: self.classifier_trees,
            max_depth: self.classifier_max_depth,
            seed: self.seed,
        }
    }

    pub fn anomaly_detector(&self) -> AnomalyDetector {
        AnomalyDetector {
            n_estimators: self.anomaly_trees,
            contamination: self.contamination,
            seed: self.seed,
        }
    }

    pub fn cluster_analyzer(&self) -> ClusterAnalyzer {
        ClusterAnalyzer { seed: self.seed }
    }

    pub fn trend_forecaster(&self) -> TrendForecaster {
        TrendForecaster {
            n_estimators: self.forecast_trees,
            seed: self.seed,
        }
    }

    pub fn impact_predictor(&self) -> ImpactPredictor {
        ImpactPredictor {
            n_estimators: self.impact_trees,
            seed: self.seed,
        }
    }
}

/// Runtime configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub log_level: String,
    pub http_bind: std::net::SocketAddr,
    pub event_capacity: usize,
    pub job_queue_capacity: usize,
    pub stats_interval_secs: u64,
}

const DEFAULT_LOG_LEVEL: &str = "causal_loop_analytics=info";

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            http_bind: std::net::SocketAddr::from(([127, 0, 0, 1], 5000)),
            event_capacity: 256,
            job_queue_capacity: 32,
            stats_interval_secs: 30,
        }
    }
}

impl RuntimeConfig {
    /// Load runtime configuration from environment variables
    pub fn load_from_env() -> Self {
        let mut cfg = Self {
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string()),
            ..Self::default()
        };

        if let Ok(v) = std::env::var("CLA_HTTP_BIND")
            && let Ok(bind) = v.parse::<std::net::SocketAddr>()
        {
            cfg.http_bind = bind;
        }
        if let Some(cap) = std::env::var("CLA_EVENT_CAPACITY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            cfg.event_capacity = cap.max(1);
        }
        if let Some(cap) = std::env::var("CLA_JOB_QUEUE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            cfg.job_queue_capacity = cap.max(1);
        }
        if let Some(secs) = std::env::var("CLA_STATS_INTERVAL")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            cfg.stats_interval_secs = secs.max(1);
        }

        cfg
    }
}

impl Config {
    /// Load configuration from TOML file and environment variables
    /// Uses CAUSAL_LOOP_CONFIG environment variable or defaults to "causal_loop.toml"
    pub fn load() -> anyhow::Result<Self> {
        // CLA_ENV_FILE if set, otherwise ./.env; both optional
        if let Ok(env_path) = std::env::var("CLA_ENV_FILE") {
            let _ = dotenvy::from_path(env_path);
        } else {
            let _ = dotenvy::from_path(".env");
        }

        let config_path =
            std::env::var("CAUSAL_LOOP_CONFIG").unwrap_or_else(|_| "causal_loop.toml".to_string());

        let mut config: Config = if let Ok(content) = std::fs::read_to_string(&config_path) {
            Self::from_toml_str(&content)?
        } else {
            tracing::warn!("Config file {} not found, using defaults", config_path);
            Self::default()
        };

        // Env-first overrides
        if let Ok(path) = std::env::var("CLA_DATA_FILE") {
            tracing::debug!("CLA_DATA_FILE env override applied");
            config.system.data_file = PathBuf::from(path);
        }
        if let Ok(dir) = std::env::var("CLA_MODELS_DIR") {
            tracing::debug!("CLA_MODELS_DIR env override applied");
            config.system.models_dir = PathBuf::from(dir);
        }
        if let Ok(seed) = std::env::var("CLA_SEED") {
            match seed.parse::<u64>() {
                Ok(s) => config.analytics.seed = s,
                Err(_) => tracing::warn!("Ignoring non-numeric CLA_SEED '{}'", seed),
            }
        }

        config.runtime = RuntimeConfig::load_from_env();
        config.analytics.validate();

        Ok(config)
    }

    /// Parse a TOML document; absent sections and keys fall back to defaults.
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.analytics.validate();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.analytics.seed, 42);
        assert_eq!(config.analytics.classifier_trees, 100);
        assert_eq!(config.analytics.default_forecast_days, 30);
        assert_eq!(config.analytics.default_sim_steps, 50);
        assert_eq!(config.runtime.log_level, "causal_loop_analytics=info");
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let config = Config::from_toml_str(
            r#"
            [system]
            data_file = "records.json"

            [analytics]
            seed = 7
            forecast_trees = 20
            "#,
        )
        .unwrap();
        assert_eq!(config.system.data_file, PathBuf::from("records.json"));
        assert_eq!(config.system.models_dir, default_models_dir());
        assert_eq!(config.analytics.seed, 7);
        assert_eq!(config.analytics.forecast_trees, 20);
        assert_eq!(config.analytics.impact_trees, 100);
        assert_eq!(config.analytics.trend_forecaster().n_estimators, 20);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let config = Config::from_toml_str(
            r#"
            [analytics]
            classifier_trees = 0
            classifier_max_depth = 100
            contamination = 0.9
            default_forecast_days = 1000
            default_sim_steps = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.analytics.classifier_trees, 1);
        assert_eq!(config.analytics.classifier_max_depth, 32);
        assert_eq!(config.analytics.contamination, 0.5);
        assert_eq!(config.analytics.default_forecast_days, 365);
        assert_eq!(config.analytics.default_sim_steps, 1);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(Config::from_toml_str("[analytics\nseed = ").is_err());
    }
}
