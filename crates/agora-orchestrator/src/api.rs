//! REST surface of `agora-node`

use std::sync::Arc;

use agora_common::{
    AgoraError, CycleId, IdentityError, LedgerError, RankingError, RegistryError, SkillProfile, TaskError, TaskId,
    TaskSpec, VentureError, VentureId, WorkerId, WorkerRegistration,
};
use agora_venture::PhaseTemplate;
use axum::{
    extract::{Path, Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::orchestrator::Orchestrator;

type AppState = Arc<Orchestrator>;

/// Engine error mapped onto an HTTP status
pub struct ApiError(AgoraError);

impl From<AgoraError> for ApiError {
    fn from(err: AgoraError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn bad_request(msg: impl Into<String>) -> Self {
        Self(AgoraError::Task(TaskError::InvalidSpec(msg.into())))
    }

    fn status(&self) -> StatusCode {
        match &self.0 {
            e if e.is_not_found() => StatusCode::NOT_FOUND,
            AgoraError::Registry(RegistryError::DuplicateWorker(_)) => StatusCode::CONFLICT,
            AgoraError::Registry(RegistryError::InvalidRegistration(_)) => StatusCode::BAD_REQUEST,
            AgoraError::Registry(_) => StatusCode::CONFLICT,
            AgoraError::Task(TaskError::InvalidSpec(_) | TaskError::InvalidQuality(_)) => StatusCode::BAD_REQUEST,
            AgoraError::Task(_) => StatusCode::CONFLICT,
            AgoraError::Venture(
                VentureError::InvalidBudget | VentureError::InvalidBudgetFractions { .. } | VentureError::NoPhases,
            ) => StatusCode::BAD_REQUEST,
            AgoraError::Venture(_) => StatusCode::CONFLICT,
            AgoraError::Identity(IdentityError::Unauthorized(_)) => StatusCode::UNAUTHORIZED,
            AgoraError::Identity(IdentityError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            AgoraError::Ledger(LedgerError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            AgoraError::Ranking(RankingError::CycleAborted { .. } | RankingError::RetriesExhausted { .. }) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

fn parse_task_id(raw: &str) -> Result<TaskId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("invalid task id: {raw}")))
}

fn parse_venture_id(raw: &str) -> Result<VentureId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("invalid venture id: {raw}")))
}

/// External task submission; venture linkage is only set by the venture manager
#[derive(Debug, Deserialize)]
struct SubmitTaskRequest {
    description: String,
    requirements: SkillProfile,
    max_cost: Decimal,
}

#[derive(Debug, Deserialize)]
struct WorkerRequest {
    worker_id: String,
}

#[derive(Debug, Deserialize)]
struct CompleteRequest {
    worker_id: String,
    quality: f64,
}

#[derive(Debug, Deserialize)]
struct FailRequest {
    worker_id: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateVentureRequest {
    name: String,
    budget: Decimal,
    /// Standard six-phase plan when absent
    #[serde(default)]
    phases: Option<Vec<PhaseTemplate>>,
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    #[serde(default)]
    since: u64,
}

/// Build the router
pub fn router(orchestrator: Arc<Orchestrator>, server: &ServerConfig) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        // Workers
        .route("/workers", get(list_workers).post(register_worker))
        .route("/workers/:worker_id", get(get_worker))
        .route("/workers/:worker_id/offline", post(worker_offline))
        .route("/workers/:worker_id/online", post(worker_online))
        .route("/workers/:worker_id/utility", get(worker_utility))
        // Tasks
        .route("/tasks", post(submit_task))
        .route("/tasks/:task_id", get(get_task))
        .route("/tasks/:task_id/start", post(start_task))
        .route("/tasks/:task_id/complete", post(complete_task))
        .route("/tasks/:task_id/fail", post(fail_task))
        // Ranking
        .route("/ranking/cycles/:cycle_id", post(run_cycle))
        // Ventures
        .route("/ventures", get(list_ventures).post(create_venture))
        .route("/ventures/:venture_id", get(venture_status))
        .route("/ventures/:venture_id/tasks/:task_id/resubmit", post(resubmit_venture_task))
        // State
        .route("/events", get(events))
        .route("/snapshot", get(snapshot))
        .route("/tick", post(tick))
        .layer(TraceLayer::new_for_http())
        .with_state(orchestrator);

    if server.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);
        router.layer(cors)
    } else {
        router
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "version": agora_common::VERSION,
    }))
}

async fn metrics(State(orch): State<AppState>) -> Result<String, ApiError> {
    orch.metrics()
        .encode()
        .map_err(|e| ApiError(AgoraError::Internal(e.to_string())))
}

async fn register_worker(
    State(orch): State<AppState>,
    Json(registration): Json<WorkerRegistration>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let worker_id = orch.register_worker(registration).await?;
    Ok((StatusCode::CREATED, Json(json!({ "worker_id": worker_id }))))
}

async fn list_workers(State(orch): State<AppState>) -> Json<Vec<agora_common::Worker>> {
    Json(orch.list_workers())
}

async fn get_worker(State(orch): State<AppState>, Path(worker_id): Path<String>) -> ApiResult<agora_common::Worker> {
    Ok(Json(orch.get_worker(&WorkerId::from(worker_id))?))
}

async fn worker_offline(
    State(orch): State<AppState>,
    Path(worker_id): Path<String>,
) -> ApiResult<agora_common::Worker> {
    Ok(Json(orch.set_worker_offline(&WorkerId::from(worker_id)).await?))
}

async fn worker_online(
    State(orch): State<AppState>,
    Path(worker_id): Path<String>,
) -> ApiResult<agora_common::Worker> {
    Ok(Json(orch.set_worker_online(&WorkerId::from(worker_id)).await?))
}

async fn worker_utility(State(orch): State<AppState>, Path(worker_id): Path<String>) -> ApiResult<serde_json::Value> {
    let worker_id = WorkerId::from(worker_id);
    let utility = orch.utility_of(&worker_id).await?;
    Ok(Json(json!({ "worker_id": worker_id, "utility": utility })))
}

async fn submit_task(
    State(orch): State<AppState>,
    Json(req): Json<SubmitTaskRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let task_id = orch
        .submit_task(TaskSpec::new(req.description, req.requirements, req.max_cost))
        .await?;
    let status = orch.get_task_status(task_id)?;
    Ok((StatusCode::CREATED, Json(json!({ "task_id": task_id, "status": status }))))
}

async fn get_task(State(orch): State<AppState>, Path(task_id): Path<String>) -> ApiResult<agora_common::Task> {
    Ok(Json(orch.get_task(parse_task_id(&task_id)?)?))
}

async fn start_task(
    State(orch): State<AppState>,
    Path(task_id): Path<String>,
    Json(req): Json<WorkerRequest>,
) -> ApiResult<agora_common::Task> {
    let task_id = parse_task_id(&task_id)?;
    Ok(Json(orch.start_task(task_id, &WorkerId::from(req.worker_id)).await?))
}

async fn complete_task(
    State(orch): State<AppState>,
    Path(task_id): Path<String>,
    Json(req): Json<CompleteRequest>,
) -> ApiResult<crate::orchestrator::CompletionReport> {
    let task_id = parse_task_id(&task_id)?;
    Ok(Json(
        orch.complete_task(task_id, &WorkerId::from(req.worker_id), req.quality)
            .await?,
    ))
}

async fn fail_task(
    State(orch): State<AppState>,
    Path(task_id): Path<String>,
    Json(req): Json<FailRequest>,
) -> ApiResult<crate::orchestrator::FailureReport> {
    let task_id = parse_task_id(&task_id)?;
    let reason = req.reason.unwrap_or_else(|| "reported by worker".to_string());
    Ok(Json(orch.fail_task(task_id, &WorkerId::from(req.worker_id), reason).await?))
}

async fn run_cycle(
    State(orch): State<AppState>,
    Path(cycle_id): Path<String>,
) -> ApiResult<agora_darwinian::RankCycleResult> {
    Ok(Json(orch.run_ranking_cycle(&CycleId::new(cycle_id)).await?))
}

async fn create_venture(
    State(orch): State<AppState>,
    Json(req): Json<CreateVentureRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let phases = req.phases.unwrap_or_else(PhaseTemplate::standard);
    let venture_id = orch.create_venture(&req.name, req.budget, phases).await?;
    Ok((StatusCode::CREATED, Json(json!({ "venture_id": venture_id }))))
}

async fn list_ventures(State(orch): State<AppState>) -> Json<Vec<agora_venture::Venture>> {
    Json(orch.list_ventures())
}

async fn venture_status(
    State(orch): State<AppState>,
    Path(venture_id): Path<String>,
) -> ApiResult<agora_venture::VentureStatusReport> {
    Ok(Json(orch.get_venture_status(parse_venture_id(&venture_id)?)?))
}

async fn resubmit_venture_task(
    State(orch): State<AppState>,
    Path((venture_id, task_id)): Path<(String, String)>,
) -> ApiResult<serde_json::Value> {
    let venture_id = parse_venture_id(&venture_id)?;
    let task_id = parse_task_id(&task_id)?;
    let replacement = orch.resubmit_venture_task(venture_id, task_id).await?;
    Ok(Json(json!({ "task_id": replacement })))
}

async fn events(
    State(orch): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Json<Vec<agora_common::events::SequencedEvent>> {
    Json(orch.events().since(query.since))
}

async fn snapshot(State(orch): State<AppState>) -> Json<crate::orchestrator::OrchestratorSnapshot> {
    Json(orch.snapshot())
}

async fn tick(State(orch): State<AppState>) -> Json<crate::orchestrator::TickReport> {
    Json(orch.tick().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn app() -> Router {
        let mut config = crate::config::AgoraConfig::default();
        config.audit.console = false;
        let orch = Arc::new(Orchestrator::new(config.clone()).await.unwrap());
        router(orch, &config.server)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_register_and_submit() {
        let app = app().await;

        let (status, _) = send(
            &app,
            "POST",
            "/workers",
            json!({ "id": "w-1", "skills": { "python": 1.0 } }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _) = send(&app, "POST", "/workers", json!({ "id": "w-1", "skills": { "python": 1.0 } })).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send(
            &app,
            "POST",
            "/tasks",
            json!({ "description": "etl", "requirements": { "python": 0.8 }, "max_cost": "10" }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "assigned");
    }

    #[tokio::test]
    async fn test_submitted_task_cannot_claim_venture() {
        let app = app().await;
        let venture_id = VentureId::new();

        let (status, body) = send(
            &app,
            "POST",
            "/tasks",
            json!({
                "description": "etl",
                "requirements": { "python": 0.8 },
                "max_cost": "10",
                "origin": { "venture_id": venture_id, "phase_index": 0 }
            }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let task_id = body["task_id"].as_str().unwrap().to_string();
        let (status, task) = send(&app, "GET", &format!("/tasks/{task_id}"), json!(null)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(task["origin"].is_null());
    }

    #[tokio::test]
    async fn test_errors_map_to_status() {
        let app = app().await;

        let (status, _) = send(&app, "GET", "/tasks/not-a-uuid", json!(null)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, "GET", "/workers/ghost", json!(null)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app,
            "POST",
            "/tasks",
            json!({ "description": "etl", "requirements": {}, "max_cost": "10" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let app = app().await;
        let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
