//! Dedicated training worker.
//!
//! Training requests are queued on a bounded channel and executed one at a
//! time, so request handlers never run a fit themselves. Each job carries
//! an optional reply channel; failures are reported as structured payloads.

use crate::error::{AnalyticsError, Result};
use crate::service::AnalyticsService;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingJob {
    Patterns,
    Predictive,
    Anomalies,
    Clusters,
}

struct QueuedJob {
    job: TrainingJob,
    reply: Option<oneshot::Sender<Result<Value>>>,
}

#[derive(Clone)]
pub struct TrainingHandle {
    tx: mpsc::Sender<QueuedJob>,
}

impl TrainingHandle {
    /// Queue a job without waiting for it. Fails if the queue is full.
    pub fn submit(&self, job: TrainingJob) -> Result<()> {
        self.tx
            .try_send(QueuedJob { job, reply: None })
            .map_err(|e| queue_error(job, e))
    }

    /// Queue a job and wait for its result.
    pub async fn run(&self, job: TrainingJob) -> Result<Value> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(QueuedJob {
                job,
                reply: Some(reply),
            })
            .await
            .map_err(|_| AnalyticsError::Internal {
                message: "training worker has stopped".into(),
            })?;
        rx.await.map_err(|_| AnalyticsError::Internal {
            message: format!("training job {:?} was dropped", job),
        })?
    }
}

fn queue_error(job: TrainingJob, e: mpsc::error::TrySendError<QueuedJob>) -> AnalyticsError {
    match e {
        mpsc::error::TrySendError::Full(_) => AnalyticsError::InvalidParams {
            message: format!("training queue is full, {:?} not accepted", job),
        },
        mpsc::error::TrySendError::Closed(_) => AnalyticsError::Internal {
            message: "training worker has stopped".into(),
        },
    }
}

async fn execute(service: &AnalyticsService, job: TrainingJob) -> Result<Value> {
    match job {
        TrainingJob::Patterns => Ok(serde_json::to_value(service.train_patterns().await?)?),
        TrainingJob::Predictive => Ok(serde_json::to_value(
            service.train_predictive_models().await,
        )?),
        TrainingJob::Anomalies => Ok(serde_json::to_value(service.detect_anomalies().await?)?),
        TrainingJob::Clusters => Ok(serde_json::to_value(service.cluster_problems().await?)?),
    }
}

pub struct TrainingWorker;

impl TrainingWorker {
    /// Start the worker loop. It exits when `cancel` fires or every handle
    /// is dropped; a job already running is finished first.
    pub fn spawn(
        service: Arc<AnalyticsService>,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (TrainingHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<QueuedJob>(capacity.max(1));
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("Training worker shutting down");
                        break;
                    }
                    next = rx.recv() => {
                        let Some(QueuedJob { job, reply }) = next else {
                            tracing::debug!("Training queue closed");
                            break;
                        };
                        tracing::info!("Running training job {:?}", job);
                        let result = execute(&service, job).await;
                        if let Err(e) = &result {
                            tracing::error!("Training job {:?} failed: {}", job, e);
                        }
                        if let Some(reply) = reply {
                            let _ = reply.send(result);
                        }
                    }
                }
            }
        });
        (TrainingHandle { tx }, handle)
    }
}
