//! Trend forecasting of structural metrics over calendar features.

use super::ModelEngine;
use crate::bundle::TrainedModelBundle;
use crate::error::{AnalyticsError, Result};
use crate::features::complexity_score;
use crate::models::forest::ForestParams;
use crate::models::{DEFAULT_SEED, RandomForestRegressor};
use crate::schemas::ProblemRecord;
use crate::utils::math::{mean_squared_error, r2_score};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MIN_RECORDS: usize = 5;
pub const MAX_FORECAST_DAYS: u32 = 365;
pub const CALENDAR_FEATURES: [&str; 4] = ["day_of_week", "month", "quarter", "days_since_start"];

/// Tracked per-record metrics, in training order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    CausesCount,
    ImpactsCount,
    FeedbackLoopsCount,
    ComplexityScore,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::CausesCount,
        Metric::ImpactsCount,
        Metric::FeedbackLoopsCount,
        Metric::ComplexityScore,
    ];

    pub fn of(&self, problem: &ProblemRecord) -> f64 {
        match self {
            Metric::CausesCount => problem.causes.len() as f64,
            Metric::ImpactsCount => problem.impacts.len() as f64,
            Metric::FeedbackLoopsCount => problem.feedback_loops.len() as f64,
            Metric::ComplexityScore => complexity_score(problem),
        }
    }
}

/// Parse an ISO-8601 timestamp. Accepts RFC 3339 (with `Z` or an offset),
/// naive date-times (treated as UTC) and bare dates.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|n| n.and_utc())
}

/// Calendar feature row: weekday (Mon=0), month, quarter, whole days offset.
pub fn calendar_row(ts: DateTime<Utc>, start: DateTime<Utc>) -> Vec<f64> {
    let month = ts.month();
    vec![
        ts.weekday().num_days_from_monday() as f64,
        month as f64,
        ((month - 1) / 3 + 1) as f64,
        (ts - start).num_days() as f64,
    ]
}

/// One time-ordered observation.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub problem_id: String,
    pub values: BTreeMap<Metric, f64>,
}

/// Build the time-ordered series; missing or malformed timestamps become `now`.
pub fn build_series(problems: &[ProblemRecord], now: DateTime<Utc>) -> Vec<SeriesPoint> {
    let mut series: Vec<SeriesPoint> = problems
        .iter()
        .map(|p| {
            let timestamp = match p.created_at.as_deref().map(parse_timestamp) {
                Some(Some(ts)) => ts,
                Some(None) => {
                    tracing::warn!("Malformed created_at on problem '{}', using now", p.id);
                    now
                }
                None => now,
            };
            SeriesPoint {
                timestamp,
                problem_id: p.id.clone(),
                values: Metric::ALL.iter().map(|m| (*m, m.of(p))).collect(),
            }
        })
        .collect();
    series.sort_by_key(|s| s.timestamp);
    series
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricModel {
    pub regressor: RandomForestRegressor,
    pub mse: f64,
    pub r2: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastModel {
    pub metrics: BTreeMap<Metric, MetricModel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPerformance {
    pub mse: f64,
    pub r2: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastTrainReport {
    pub models_trained: bool,
    pub metrics_trained: Vec<Metric>,
    pub performance: BTreeMap<Metric, MetricPerformance>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricForecast {
    pub dates: Vec<String>,
    pub predictions: Vec<f64>,
    pub current_trend: TrendDirection,
}

/// Per-metric forecasts.
pub type ForecastResult = BTreeMap<Metric, MetricForecast>;

/// Two-point comparison of the last and first forecast values.
pub fn trend_of(predictions: &[f64]) -> TrendDirection {
    match (predictions.first(), predictions.last()) {
        (Some(first), Some(last)) if last > first => TrendDirection::Increasing,
        _ => TrendDirection::Decreasing,
    }
}

#[derive(Debug, Clone)]
pub struct TrendForecaster {
    pub n_estimators: usize,
    pub seed: u64,
}

impl Default for TrendForecaster {
    fn default() -> Self {
        Self {
            n_estimators: 50,
            seed: DEFAULT_SEED,
        }
    }
}

impl ModelEngine for TrendForecaster {
    const NAME: &'static str = "forecast";
    type Model = ForecastModel;
}

impl TrendForecaster {
    pub fn train(
        &self,
        problems: &[ProblemRecord],
        now: DateTime<Utc>,
    ) -> Result<(TrainedModelBundle<ForecastModel>, ForecastTrainReport)> {
        let series = build_series(problems, now);
        if series.len() < MIN_RECORDS {
            return Err(AnalyticsError::insufficient(
                "train_forecasters",
                MIN_RECORDS,
                series.len(),
            ));
        }

        let start = series[0].timestamp;
        let x: Vec<Vec<f64>> = series
            .iter()
            .map(|s| calendar_row(s.timestamp, start))
            .collect();

        let params = ForestParams::new(self.n_estimators, self.seed);
        let mut metrics = BTreeMap::new();
        let mut performance = BTreeMap::new();
        for metric in Metric::ALL {
            let y: Vec<f64> = series.iter().map(|s| s.values[&metric]).collect();
            let regressor = RandomForestRegressor::fit(&x, &y, &params);
            let fitted = regressor.predict(&x);
            let mse = mean_squared_error(&y, &fitted);
            let r2 = r2_score(&y, &fitted);
            tracing::debug!("Forecaster {:?}: mse={:.4} r2={:.4}", metric, mse, r2);
            performance.insert(metric, MetricPerformance { mse, r2 });
            metrics.insert(metric, MetricModel { regressor, mse, r2 });
        }

        tracing::info!("Trend forecasters trained on {} records", series.len());
        let report = ForecastTrainReport {
            models_trained: true,
            metrics_trained: Metric::ALL.to_vec(),
            performance,
        };
        Ok((TrainedModelBundle::fitted(ForecastModel { metrics }), report))
    }

    /// Forecast `days` days ahead of `now` for every tracked metric.
    pub fn forecast(
        &self,
        bundle: &TrainedModelBundle<ForecastModel>,
        days: u32,
        now: DateTime<Utc>,
    ) -> Result<ForecastResult> {
        if !(1..=MAX_FORECAST_DAYS).contains(&days) {
            return Err(AnalyticsError::InvalidParams {
                message: format!("days must be between 1 and {}, got {}", MAX_FORECAST_DAYS, days),
            });
        }
        let model = bundle.model(Self::NAME)?;

        let future: Vec<DateTime<Utc>> = (1..=i64::from(days))
            .map(|d| now + Duration::days(d))
            .collect();
        let rows: Vec<Vec<f64>> = future.iter().map(|d| calendar_row(*d, now)).collect();
        let dates: Vec<String> = future
            .iter()
            .map(|d| d.to_rfc3339_opts(SecondsFormat::Secs, true))
            .collect();

        Ok(model
            .metrics
            .iter()
            .map(|(metric, m)| {
                let predictions = m.regressor.predict(&rows);
                let current_trend = trend_of(&predictions);
                (
                    *metric,
                    MetricForecast {
                        dates: dates.clone(),
                        predictions,
                        current_trend,
                    },
                )
            })
            .collect())
    }
}
