use anyhow::Result;
use causal_loop_analytics::config::Config;
use causal_loop_analytics::http::{HttpState, start_http_server};
use causal_loop_analytics::worker::TrainingWorker;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.runtime.log_level))
        .with_ansi(false)
        .init();

    info!(
        "Starting causal-loop-analytics (data: {}, models: {})",
        config.system.data_file.display(),
        config.system.models_dir.display()
    );

    let service = causal_loop_analytics::build_service(&config).await;
    let cancel = CancellationToken::new();

    let (trainer, worker) =
        TrainingWorker::spawn(service.clone(), config.runtime.job_queue_capacity, cancel.clone());
    let stats = service.spawn_stats_loop(
        Duration::from_secs(config.runtime.stats_interval_secs),
        cancel.clone(),
    );

    let state = HttpState {
        config: Arc::new(config),
        service,
        trainer,
    };

    let result = tokio::select! {
        r = start_http_server(state) => r,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(())
        }
    };

    cancel.cancel();
    let _ = tokio::join!(worker, stats);
    result
}
