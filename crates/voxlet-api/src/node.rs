//! Node-side REST surface
//!
//! Served on the GPU node itself: the health contract polled by the
//! coordinator, plus the synthesis and transcription routes the dispatcher
//! invokes. Health is idempotent and side-effect-free.

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::debug;
use voxlet_core::{
    HealthReport, JobKind, JobOutput, JobPayload, SynthesisRequest, SynthesisResult,
    TranscriptionRequest, TranscriptionResult, VoxletError,
};
use voxlet_engine::ReadinessSequencer;

/// Create the node-side router
pub fn create_node_router(sequencer: Arc<ReadinessSequencer>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tts", post(synthesize))
        .route("/transcribe", post(transcribe))
        .with_state(sequencer)
        .layer(TraceLayer::new_for_http())
}

/// The health contract: overall state plus per-artifact readiness
async fn health(State(sequencer): State<Arc<ReadinessSequencer>>) -> Json<HealthReport> {
    Json(sequencer.report().await)
}

/// How long an inference request racing startup waits for the ready flip
/// before being turned away
const READY_GRACE: Duration = Duration::from_millis(500);

async fn run_engine(
    sequencer: &ReadinessSequencer,
    kind: JobKind,
    payload: JobPayload,
) -> Result<JobOutput, (StatusCode, String)> {
    if let Err(e) = sequencer.wait_ready(READY_GRACE).await {
        return Err((StatusCode::SERVICE_UNAVAILABLE, e.to_string()));
    }

    let engine = sequencer.engine_for(kind).ok_or_else(|| {
        let e = VoxletError::EngineNotFound(kind.to_string());
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    debug!(kind = %kind, engine = engine.name(), "Running inference");
    engine
        .infer(&payload)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// Synthesize speech from text
async fn synthesize(
    State(sequencer): State<Arc<ReadinessSequencer>>,
    Json(req): Json<SynthesisRequest>,
) -> Result<Json<SynthesisResult>, (StatusCode, String)> {
    let output = run_engine(
        &sequencer,
        JobKind::Synthesis,
        JobPayload::Synthesis(req),
    )
    .await?;

    match output {
        JobOutput::Synthesis(result) => Ok(Json(result)),
        JobOutput::Transcription(_) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            "engine returned mismatched output".to_string(),
        )),
    }
}

/// Transcribe audio fetched from a URL
async fn transcribe(
    State(sequencer): State<Arc<ReadinessSequencer>>,
    Json(req): Json<TranscriptionRequest>,
) -> Result<Json<TranscriptionResult>, (StatusCode, String)> {
    let output = run_engine(
        &sequencer,
        JobKind::Transcription,
        JobPayload::Transcription(req),
    )
    .await?;

    match output {
        JobOutput::Transcription(result) => Ok(Json(result)),
        JobOutput::Synthesis(_) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            "engine returned mismatched output".to_string(),
        )),
    }
}
