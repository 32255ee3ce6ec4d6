//! Inference invocation against a node's job routes

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use voxlet_core::{Endpoint, JobOutput, JobPayload, SynthesisResult, TranscriptionResult, VoxletError, VoxletResult};

/// Invokes the inference collaborator behind a node endpoint.
///
/// Callers hold the node's execution slot for the duration of the call, so
/// the implementation never sees concurrent invocations for one endpoint.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Run one inference call and return its output
    async fn infer(&self, endpoint: &Endpoint, payload: &JobPayload) -> VoxletResult<JobOutput>;
}

/// HTTP implementation posting payloads to the node's synthesis and
/// transcription routes
pub struct HttpInferenceClient {
    client: reqwest::Client,
}

impl HttpInferenceClient {
    /// Create a client with the given per-request timeout
    pub fn new(timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self { client }
    }

    fn route(payload: &JobPayload) -> &'static str {
        match payload {
            JobPayload::Synthesis(_) => "/tts",
            JobPayload::Transcription(_) => "/transcribe",
        }
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn infer(&self, endpoint: &Endpoint, payload: &JobPayload) -> VoxletResult<JobOutput> {
        let url = format!("{}{}", endpoint.url(), Self::route(payload));
        debug!(endpoint = %url, kind = ?payload.kind(), "Dispatching inference call");

        let response = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| VoxletError::Internal(format!("inference request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(VoxletError::Internal(format!(
                "inference call returned {}",
                response.status()
            )));
        }

        let output = match payload {
            JobPayload::Synthesis(_) => {
                let result: SynthesisResult = response.json().await.map_err(|e| {
                    VoxletError::Serialization(format!("invalid synthesis response: {}", e))
                })?;
                JobOutput::Synthesis(result)
            }
            JobPayload::Transcription(_) => {
                let result: TranscriptionResult = response.json().await.map_err(|e| {
                    VoxletError::Serialization(format!("invalid transcription response: {}", e))
                })?;
                JobOutput::Transcription(result)
            }
        };

        Ok(output)
    }
}
