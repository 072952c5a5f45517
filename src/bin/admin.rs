//! Offline admin CLI over the JSON record file.
//!
//! Usage:
//!   cargo run --bin admin -- train
//!   cargo run --bin admin -- predict <problem-id>
//!   cargo run --bin admin -- anomalies
//!   cargo run --bin admin -- cluster
//!   cargo run --bin admin -- suggest <problem-id>
//!   cargo run --bin admin -- forecast --days 14
//!   cargo run --bin admin -- impacts <problem-id>
//!   cargo run --bin admin -- simulate <problem-id> --steps 100
//!
//! Fitted bundles are written to the configured models directory, so
//! `train` followed by `predict` works across invocations.

use anyhow::Result;
use causal_loop_analytics::config::Config;
use causal_loop_analytics::service::{AnalyticsService, TrainOutcome};
use clap::{Parser, Subcommand};
use prettytable::{Table, row};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "admin")]
#[command(about = "Causal loop analytics admin utilities", long_about = None)]
struct Cli {
    /// Record file (overrides config and CLA_DATA_FILE)
    #[arg(long, global = true)]
    data: Option<PathBuf>,
    /// Model bundle directory (overrides config and CLA_MODELS_DIR)
    #[arg(long, global = true)]
    models_dir: Option<PathBuf>,
    /// Print raw JSON instead of tables
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train the archetype classifier, forecasters and impact predictor
    Train,
    /// Predict the system archetype of a record
    Predict { id: String },
    /// Detect anomalous records across the corpus
    Anomalies,
    /// Cluster similar records
    Cluster,
    /// Suggest feedback loops from cause/impact wording
    Suggest { id: String },
    /// Forecast structural metrics
    Forecast {
        #[arg(long)]
        days: Option<u32>,
    },
    /// Predict impact count and impact types of a record
    Impacts { id: String },
    /// Simulate feedback loop dynamics of a record
    Simulate {
        id: String,
        #[arg(long)]
        steps: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("causal_loop_analytics=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load()?;
    if let Some(data) = cli.data.clone() {
        config.system.data_file = data;
    }
    if let Some(dir) = cli.models_dir.clone() {
        config.system.models_dir = dir;
    }
    let service = causal_loop_analytics::build_service(&config).await;

    match cli.command {
        Commands::Train => train(&service, cli.json).await,
        Commands::Predict { ref id } => {
            let p = service.predict_archetype(id).await?;
            emit(cli.json, &p, || {
                let mut table = Table::new();
                table.add_row(row!["Archetype", "Probability"]);
                for (label, prob) in &p.probability_distribution {
                    table.add_row(row![label.as_str(), format!("{:.3}", prob)]);
                }
                println!(
                    "Predicted: {} (confidence {:.3})",
                    p.predicted_archetype.as_str(),
                    p.confidence
                );
                table.printstd();
            })
        }
        Commands::Anomalies => {
            let report = service.detect_anomalies().await?;
            emit(cli.json, &report, || {
                let mut table = Table::new();
                table.add_row(row!["Problem ID", "Title", "Score"]);
                for a in &report.anomalies {
                    table.add_row(row![a.problem_id, a.title, format!("{:.4}", a.anomaly_score)]);
                }
                println!(
                    "{} of {} records flagged",
                    report.anomalies_detected, report.total_analyzed
                );
                table.printstd();
            })
        }
        Commands::Cluster => {
            let report = service.cluster_problems().await?;
            emit(cli.json, &report, || {
                let mut table = Table::new();
                table.add_row(row!["Cluster", "Problem ID", "Title"]);
                for (cluster, members) in &report.clusters {
                    for m in members {
                        table.add_row(row![cluster, m.problem_id, m.title]);
                    }
                }
                println!(
                    "k={} silhouette={:.3}",
                    report.n_clusters, report.silhouette_score
                );
                table.printstd();
            })
        }
        Commands::Suggest { ref id } => {
            let s = service.suggest_loops(id).await?;
            emit(cli.json, &s, || {
                let mut table = Table::new();
                table.add_row(row!["Type", "Confidence", "Description"]);
                for l in &s.suggested_loops {
                    table.add_row(row![format!("{:?}", l.kind), l.confidence, l.description]);
                }
                println!("{} suggestions in total", s.total_suggestions);
                table.printstd();
            })
        }
        Commands::Forecast { days } => {
            let result = service.forecast(days).await?;
            emit(cli.json, &result, || {
                let mut table = Table::new();
                table.add_row(row!["Metric", "Trend", "First", "Last"]);
                for (metric, f) in &result {
                    table.add_row(row![
                        format!("{:?}", metric),
                        format!("{:?}", f.current_trend),
                        format!("{:.3}", f.predictions.first().copied().unwrap_or_default()),
                        format!("{:.3}", f.predictions.last().copied().unwrap_or_default()),
                    ]);
                }
                table.printstd();
            })
        }
        Commands::Impacts { ref id } => {
            let p = service.predict_impacts(id).await?;
            emit(cli.json, &p, || {
                let mut table = Table::new();
                table.add_row(row!["Impact type", "Probability"]);
                for (kind, prob) in &p.predicted_types {
                    table.add_row(row![kind, format!("{:.3}", prob)]);
                }
                println!(
                    "Predicted impacts: {} (confidence {:.2})",
                    p.predicted_impact_count, p.confidence
                );
                table.printstd();
            })
        }
        Commands::Simulate { ref id, steps } => {
            let trace = service.simulate(id, steps).await?;
            emit(cli.json, &trace, || {
                let mut table = Table::new();
                table.add_row(row!["Cohort", "Count", "Final values"]);
                table.add_row(row![
                    "reinforcing",
                    trace.reinforcing_loops.count,
                    format_values(&trace.reinforcing_loops.final_values)
                ]);
                table.add_row(row![
                    "balancing",
                    trace.balancing_loops.count,
                    format_values(&trace.balancing_loops.final_values)
                ]);
                table.printstd();
                println!(
                    "Behavior: {:?} (score {:.1}, variance {:.4})",
                    trace.system_stability.behavior,
                    trace.system_stability.stability_score,
                    trace.system_stability.variance
                );
            })
        }
    }
}

fn emit<T: Serialize>(json: bool, value: &T, table: impl FnOnce()) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        table();
    }
    Ok(())
}

fn format_values(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| format!("{:.4}", v))
        .collect::<Vec<_>>()
        .join(", ")
}

fn outcome_line<T>(name: &str, outcome: &TrainOutcome<T>) -> String {
    match outcome {
        TrainOutcome::Trained(_) => format!("{name}: trained"),
        TrainOutcome::Failed(err) => format!(
            "{name}: failed ({})",
            err["error"]["message"].as_str().unwrap_or("unknown error")
        ),
    }
}

async fn train(service: &AnalyticsService, json: bool) -> Result<()> {
    let patterns = service.train_patterns().await;
    let predictive = service.train_predictive_models().await;

    if json {
        let patterns = match &patterns {
            Ok(report) => serde_json::to_value(report)?,
            Err(e) => e.to_payload(),
        };
        let out = serde_json::json!({ "patterns": patterns, "predictive": predictive });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    match &patterns {
        Ok(report) => println!(
            "archetype: trained (accuracy {:.3}, {} classes)",
            report.accuracy,
            report.classes.len()
        ),
        Err(e) => println!("archetype: failed ({})", e),
    }
    println!("{}", outcome_line("forecast", &predictive.time_series));
    println!("{}", outcome_line("impact", &predictive.impact_predictor));
    Ok(())
}
