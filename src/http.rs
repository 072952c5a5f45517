//! HTTP transport for the analytics service
//!
//! Thin axum surface: record CRUD, analytics endpoints and an SSE stream
//! of analysis events. Every error is returned as a structured JSON payload.

use crate::config::Config;
use crate::error::AnalyticsError;
use crate::events::AnalysisEvent;
use crate::schemas::ProblemRecord;
use crate::service::AnalyticsService;
use crate::worker::{TrainingHandle, TrainingJob};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};

const MAX_SIM_STEPS: i64 = crate::engines::simulation::MAX_STEPS as i64;
const MAX_FORECAST_DAYS: i64 = crate::engines::forecast::MAX_FORECAST_DAYS as i64;

/// Shared state for HTTP server
#[derive(Clone)]
pub struct HttpState {
    pub config: Arc<Config>,
    pub service: Arc<AnalyticsService>,
    pub trainer: TrainingHandle,
}

/// Error wrapper that renders as a status code plus the error payload.
pub struct ApiError(pub AnalyticsError);

impl From<AnalyticsError> for ApiError {
    fn from(e: AnalyticsError) -> Self {
        ApiError(e)
    }
}

pub fn status_for(error: &AnalyticsError) -> StatusCode {
    match error {
        AnalyticsError::InsufficientData { .. } | AnalyticsError::NoLoopsToSimulate => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        AnalyticsError::ModelNotTrained { .. } => StatusCode::CONFLICT,
        AnalyticsError::NotFound { .. } => StatusCode::NOT_FOUND,
        AnalyticsError::InvalidParams { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        }
        json_response(status, &self.0.to_payload())
    }
}

type ApiResult = std::result::Result<Response, ApiError>;

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_string(body) {
        Ok(text) => (status, [(header::CONTENT_TYPE, "application/json")], text).into_response(),
        Err(e) => ApiError(e.into()).into_response(),
    }
}

fn ok<T: Serialize>(body: &T) -> ApiResult {
    Ok(json_response(StatusCode::OK, body))
}

fn invalid(message: impl Into<String>) -> ApiError {
    ApiError(AnalyticsError::InvalidParams {
        message: message.into(),
    })
}

/// Health check endpoint
pub async fn health_handler(State(state): State<HttpState>) -> impl IntoResponse {
    let models = state.service.model_status().await;
    json_response(
        StatusCode::OK,
        &json!({
            "status": "ok",
            "models": models,
            "data_file": state.config.system.data_file.display().to_string(),
        }),
    )
}

// ---- records ----

async fn list_problems(State(state): State<HttpState>) -> ApiResult {
    let problems = state.service.store().list().await?;
    ok(&json!({ "problems": problems }))
}

async fn create_problem(State(state): State<HttpState>, Json(body): Json<Value>) -> ApiResult {
    for field in ["title", "description"] {
        if body.get(field).is_none() {
            return Err(invalid(format!("Missing required field: {}", field)));
        }
    }
    let mut record: ProblemRecord =
        serde_json::from_value(body).map_err(|e| ApiError(e.into()))?;
    record.id.clear();
    record.created_at = None;
    record.updated_at = None;
    let created = state.service.store().create(record).await?;
    Ok(json_response(StatusCode::CREATED, &created))
}

async fn get_problem(State(state): State<HttpState>, Path(id): Path<String>) -> ApiResult {
    ok(&state.service.store().get(&id).await?)
}

async fn update_problem(
    State(state): State<HttpState>,
    Path(id): Path<String>,
    Json(patch): Json<Value>,
) -> ApiResult {
    ok(&state.service.store().update(&id, patch).await?)
}

async fn delete_problem(State(state): State<HttpState>, Path(id): Path<String>) -> ApiResult {
    let removed = state.service.store().delete(&id).await?;
    ok(&json!({ "message": "Problem deleted successfully", "removed": removed }))
}

async fn import_problem(
    State(state): State<HttpState>,
    Json(record): Json<ProblemRecord>,
) -> ApiResult {
    let imported = state.service.store().import(record).await?;
    state.service.events().publish(AnalysisEvent::ProblemAdded {
        problem_id: imported.id.clone(),
        title: imported.title.clone(),
    });
    Ok(json_response(StatusCode::CREATED, &imported))
}

// ---- pattern analytics ----

async fn train_patterns(State(state): State<HttpState>) -> ApiResult {
    ok(&state.trainer.run(TrainingJob::Patterns).await?)
}

async fn predict_archetype(State(state): State<HttpState>, Path(id): Path<String>) -> ApiResult {
    ok(&state.service.predict_archetype(&id).await?)
}

async fn detect_anomalies(State(state): State<HttpState>) -> ApiResult {
    ok(&state.trainer.run(TrainingJob::Anomalies).await?)
}

async fn cluster_problems(State(state): State<HttpState>) -> ApiResult {
    ok(&state.trainer.run(TrainingJob::Clusters).await?)
}

async fn suggest_loops(State(state): State<HttpState>, Path(id): Path<String>) -> ApiResult {
    ok(&state.service.suggest_loops(&id).await?)
}

// ---- predictive analytics ----

#[derive(Debug, Deserialize)]
struct ForecastQuery {
    days: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct SimulateBody {
    time_steps: Option<i64>,
}

async fn train_predictive(State(state): State<HttpState>) -> ApiResult {
    ok(&state.trainer.run(TrainingJob::Predictive).await?)
}

async fn forecast(State(state): State<HttpState>, Query(q): Query<ForecastQuery>) -> ApiResult {
    let days = match q.days {
        None => None,
        Some(d) if (1..=MAX_FORECAST_DAYS).contains(&d) => Some(d as u32),
        Some(d) => {
            return Err(invalid(format!(
                "days must be between 1 and {}, got {}",
                MAX_FORECAST_DAYS, d
            )));
        }
    };
    ok(&state.service.forecast(days).await?)
}

async fn predict_impacts(State(state): State<HttpState>, Path(id): Path<String>) -> ApiResult {
    ok(&state.service.predict_impacts(&id).await?)
}

async fn simulate(
    State(state): State<HttpState>,
    Path(id): Path<String>,
    body: Option<Json<SimulateBody>>,
) -> ApiResult {
    let Json(body) = body.unwrap_or_default();
    let steps = match body.time_steps {
        None => None,
        Some(s) if (1..=MAX_SIM_STEPS).contains(&s) => Some(s as usize),
        Some(s) => {
            return Err(invalid(format!(
                "time_steps must be between 1 and {}, got {}",
                MAX_SIM_STEPS, s
            )));
        }
    };
    ok(&state.service.simulate(&id, steps).await?)
}

// ---- real-time ----

async fn request_analysis(State(state): State<HttpState>, Path(id): Path<String>) -> ApiResult {
    // 404 up front; everything after this reports through the event stream
    state.service.store().get(&id).await?;
    let _ = state.service.request_analysis(id.clone());
    Ok(json_response(
        StatusCode::ACCEPTED,
        &json!({ "problem_id": id, "status": "started" }),
    ))
}

fn event_stream(
    rx: tokio::sync::broadcast::Receiver<AnalysisEvent>,
) -> impl Stream<Item = std::result::Result<Event, axum::Error>> {
    futures_util::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let sse = Event::default().event(event.name()).json_data(&event);
                    return Some((sse, rx));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("SSE subscriber lagged, {} events skipped", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

async fn events_handler(
    State(state): State<HttpState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>> {
    Sse::new(event_stream(state.service.events().subscribe())).keep_alive(KeepAlive::default())
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/problems", get(list_problems).post(create_problem))
        .route(
            "/api/problems/:id",
            get(get_problem).put(update_problem).delete(delete_problem),
        )
        .route("/api/export/:id", get(get_problem))
        .route("/api/import", post(import_problem))
        .route("/api/ml/train-patterns", post(train_patterns))
        .route("/api/ml/predict-archetype/:id", post(predict_archetype))
        .route("/api/ml/detect-anomalies", post(detect_anomalies))
        .route("/api/ml/cluster-problems", post(cluster_problems))
        .route("/api/ml/suggest-loops/:id", post(suggest_loops))
        .route("/api/predictive/train-models", post(train_predictive))
        .route("/api/predictive/forecast", get(forecast))
        .route("/api/predictive/predict-impacts/:id", post(predict_impacts))
        .route("/api/predictive/simulate/:id", post(simulate))
        .route("/api/analysis/:id", post(request_analysis))
        .route("/api/events", get(events_handler))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_http_server(state: HttpState) -> anyhow::Result<()> {
    let bind = state.config.runtime.http_bind;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind HTTP listener: {}", e))?;

    tracing::info!("Starting HTTP server on {}", bind);

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalyticsConfig;
    use crate::events::EventBus;
    use crate::schemas::LoopType;
    use crate::store::MemoryStore;
    use crate::worker::TrainingWorker;
    use axum::body::Body;
    use axum::http::Request;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    fn app(records: Vec<ProblemRecord>) -> Router {
        let service = Arc::new(AnalyticsService::new(
            Arc::new(MemoryStore::new(records)),
            EventBus::new(16),
            None,
            AnalyticsConfig::default(),
        ));
        let (trainer, _) = TrainingWorker::spawn(service.clone(), 4, CancellationToken::new());
        router(HttpState {
            config: Arc::new(Config::default()),
            service,
            trainer,
        })
    }

    async fn call(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                req = req.header(header::CONTENT_TYPE, "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let res = app.oneshot(req.body(body).unwrap()).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[test]
    fn error_statuses() {
        assert_eq!(
            status_for(&AnalyticsError::insufficient("x", 5, 1)),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(status_for(&AnalyticsError::not_trained("impact")), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&AnalyticsError::NoLoopsToSimulate),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&AnalyticsError::SerializationFailure { message: "x".into() }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn create_requires_title_and_description() {
        let (status, body) = call(app(vec![]), "POST", "/api/problems", Some(json!({"title": "t"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "invalid_params");

        let (status, body) = call(
            app(vec![]),
            "POST",
            "/api/problems",
            Some(json!({"title": "t", "description": "d", "causes": null})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(!body["id"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn analytics_errors_map_to_statuses() {
        let records = vec![
            ProblemRecord::new("p1", "t", "d"),
            ProblemRecord::new("p2", "t", "d").with_loop("l", LoopType::Balancing),
        ];
        let (status, _) = call(app(records.clone()), "POST", "/api/ml/predict-archetype/p1", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, _) = call(app(records.clone()), "POST", "/api/ml/cluster-problems", None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let (status, _) = call(app(records.clone()), "POST", "/api/predictive/simulate/p1", None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let (status, _) = call(app(records.clone()), "GET", "/api/problems/zzz", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(app(records.clone()), "GET", "/api/predictive/forecast?days=0", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            app(records),
            "POST",
            "/api/predictive/simulate/p2",
            Some(json!({"time_steps": 10})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["time_points"].as_array().unwrap().len(), 10);
        assert_eq!(body["balancing_loops"]["count"], 1);
    }

    #[tokio::test]
    async fn suggestions_and_listing() {
        let (status, body) = call(
            app(vec![ProblemRecord::new("p1", "t", "d")]),
            "POST",
            "/api/ml/suggest-loops/p1",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_suggestions"], 0);

        let (status, body) = call(app(vec![ProblemRecord::new("p1", "t", "d")]), "GET", "/api/problems", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["problems"][0]["id"], "p1");
    }
}
