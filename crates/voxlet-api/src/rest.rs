//! Control-plane REST handlers
//!
//! Job submission is synchronous: the handler holds the request open until
//! the dispatcher reaches a terminal state, mirroring the shape callers
//! expect from a speech API.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;
use voxlet_core::{Job, JobOutput, JobPayload, Node, VoxletError};
use voxlet_node::NodeCoordinator;
use voxlet_scheduler::{JobDispatcher, JobRegistry};

/// Application state shared across control-plane handlers
pub struct AppState {
    pub registry: Arc<JobRegistry>,
    pub dispatcher: Arc<JobDispatcher>,
    pub coordinator: Arc<NodeCoordinator>,
}

/// Create the control-plane router
pub fn create_router(
    registry: Arc<JobRegistry>,
    dispatcher: Arc<JobDispatcher>,
    coordinator: Arc<NodeCoordinator>,
    cors_enabled: bool,
) -> Router {
    let state = Arc::new(AppState {
        registry,
        dispatcher,
        coordinator,
    });

    let mut router = Router::new()
        .route("/api/v1/jobs", post(submit_job))
        .route("/api/v1/jobs", get(list_jobs))
        .route("/api/v1/jobs/:id", get(get_job))
        .route("/api/v1/nodes", get(list_nodes))
        .route("/api/v1/status", get(get_status))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if cors_enabled {
        router = router.layer(CorsLayer::permissive());
    }

    router
}

fn error_response(e: VoxletError) -> (StatusCode, String) {
    let status = match &e {
        VoxletError::JobNotFound(_) | VoxletError::NodeNotFound(_) => StatusCode::NOT_FOUND,
        VoxletError::JobTimeout { .. } | VoxletError::SlotTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        VoxletError::ResourceExhausted(_) => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

/// Request to submit a job
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    /// Kind-tagged payload
    #[serde(flatten)]
    pub payload: JobPayload,
    /// Per-job wall-clock budget override
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Terminal response for a submitted job
#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub id: Uuid,
    pub status: String,
    pub attempts: u32,
    pub output: JobOutput,
}

/// Submit a job and wait for its result
async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitJobRequest>,
) -> Result<Json<SubmitJobResponse>, (StatusCode, String)> {
    info!(kind = %req.payload.kind(), "Job submission received");

    let handle = state
        .dispatcher
        .submit(req.payload, req.timeout_secs)
        .await
        .map_err(error_response)?;
    let job_id = handle.job_id;

    let output = handle.wait().await.map_err(error_response)?;
    let record = state.registry.get(job_id).await.map_err(error_response)?;

    Ok(Json(SubmitJobResponse {
        id: job_id,
        status: record.status.to_string(),
        attempts: record.attempts,
        output,
    }))
}

/// Job record response
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: Uuid,
    pub kind: String,
    pub status: String,
    pub attempts: u32,
    pub assigned_node: Option<Uuid>,
    pub failure: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            kind: job.kind.to_string(),
            status: job.status.to_string(),
            attempts: job.attempts,
            assigned_node: job.assigned_node,
            failure: job.failure,
            created_at: job.created_at,
        }
    }
}

/// List all job records
async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobResponse>> {
    let jobs = state.registry.list().await;
    Json(jobs.into_iter().map(JobResponse::from).collect())
}

/// Get a specific job record
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobResponse>, (StatusCode, String)> {
    let job = state.registry.get(id).await.map_err(error_response)?;
    Ok(Json(JobResponse::from(job)))
}

/// Node record response
#[derive(Debug, Serialize)]
pub struct NodeResponse {
    pub id: Uuid,
    pub instance_id: String,
    pub status: String,
    pub volume_id: String,
    pub endpoint: String,
    pub idle_since: Option<chrono::DateTime<chrono::Utc>>,
    pub cost_per_hour: f64,
}

impl From<Node> for NodeResponse {
    fn from(node: Node) -> Self {
        Self {
            id: node.id,
            instance_id: node.instance_id,
            status: node.status.to_string(),
            volume_id: node.volume_id,
            endpoint: node.endpoint.url(),
            idle_since: node.idle_since,
            cost_per_hour: node.cost_per_hour,
        }
    }
}

/// List node records, including stopped and errored ones
async fn list_nodes(State(state): State<Arc<AppState>>) -> Json<Vec<NodeResponse>> {
    let nodes = state.coordinator.list().await;
    Json(nodes.into_iter().map(NodeResponse::from).collect())
}

/// System status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub jobs: usize,
    pub nodes: usize,
}

/// Get system status
async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        jobs: state.registry.list().await.len(),
        nodes: state.coordinator.list().await.len(),
    })
}
