//! Startup state machine gating inference traffic
//!
//! Drives provision -> load -> serve once per process lifetime and answers
//! health queries. Failure states are terminal; the recovery path is an
//! external restart, which is cheap because artifacts already on the volume
//! short-circuit provisioning.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, RwLock};
use tracing::{error, info};
use voxlet_core::{
    ArtifactSpec, HealthReport, JobKind, ReadinessState, VoxletError, VoxletResult,
};
use voxlet_store::VolumeCache;

use crate::traits::InferenceEngine;

/// Single-instance readiness sequencer.
///
/// State transitions are monotonic: `Uninitialized -> Provisioning -> Loading
/// -> Ready`, with `ProvisioningFailed` and `LoadFailed` on unrecoverable
/// error. The health report never claims `Ready` before every artifact marker
/// and every engine load has actually succeeded.
pub struct ReadinessSequencer {
    state: RwLock<ReadinessState>,
    cache: Arc<VolumeCache>,
    engines: Vec<Arc<dyn InferenceEngine>>,
    changed: Notify,
    device: Option<String>,
}

impl ReadinessSequencer {
    /// Create a sequencer in the `Uninitialized` state
    pub fn new(
        cache: Arc<VolumeCache>,
        engines: Vec<Arc<dyn InferenceEngine>>,
        device: Option<String>,
    ) -> Self {
        Self {
            state: RwLock::new(ReadinessState::Uninitialized),
            cache,
            engines,
            changed: Notify::new(),
            device,
        }
    }

    /// Current readiness state
    pub async fn state(&self) -> ReadinessState {
        *self.state.read().await
    }

    async fn set_state(&self, next: ReadinessState) {
        let mut state = self.state.write().await;
        info!(from = %*state, to = %next, "Readiness transition");
        *state = next;
        drop(state);
        self.changed.notify_waiters();
    }

    /// Artifact specs required by the registered engines
    pub fn required_artifacts(&self) -> Vec<ArtifactSpec> {
        self.engines.iter().map(|e| e.artifact()).collect()
    }

    /// Engine registered for the given job kind
    pub fn engine_for(&self, kind: JobKind) -> Option<Arc<dyn InferenceEngine>> {
        self.engines.iter().find(|e| e.kind() == kind).cloned()
    }

    /// Drive the startup sequence to `Ready`.
    ///
    /// Idempotent when already `Ready`; a terminal failure state stays failed
    /// until the process is restarted.
    pub async fn initialize(&self) -> VoxletResult<()> {
        {
            let state = self.state.read().await;
            match *state {
                ReadinessState::Uninitialized => {}
                ReadinessState::Ready => return Ok(()),
                other => {
                    return Err(VoxletError::Internal(format!(
                        "initialize called in state {}",
                        other
                    )))
                }
            }
        }

        self.set_state(ReadinessState::Provisioning).await;
        self.cache.init().await?;

        for engine in &self.engines {
            let spec = engine.artifact();
            if let Err(e) = self.cache.ensure(&spec).await {
                error!(artifact = %spec.name, error = %e, "Artifact provisioning failed");
                self.set_state(ReadinessState::ProvisioningFailed).await;
                return Err(e);
            }
        }

        self.set_state(ReadinessState::Loading).await;

        for engine in &self.engines {
            let spec = engine.artifact();
            let path = self.cache.artifact_path(&spec);
            if let Err(e) = engine.load(&path).await {
                error!(engine = engine.name(), error = %e, "Engine load failed");
                self.set_state(ReadinessState::LoadFailed).await;
                return Err(e);
            }
            info!(engine = engine.name(), artifact = %spec.name, "Engine loaded");
        }

        self.set_state(ReadinessState::Ready).await;
        Ok(())
    }

    /// Idempotent, side-effect-free health report.
    ///
    /// An artifact counts as ready only when its completion marker exists, and
    /// the overall state only reaches `Ready` after every engine load.
    pub async fn report(&self) -> HealthReport {
        HealthReport {
            status: self.state().await,
            artifacts: self.cache.presence_map(&self.required_artifacts()),
            device: self.device.clone(),
        }
    }

    /// Wait until `Ready`, bounded by `deadline`.
    ///
    /// A cooperative wait on state transitions, never a busy loop. Terminal
    /// failure states and deadline expiry surface as errors.
    pub async fn wait_ready(&self, deadline: Duration) -> VoxletResult<()> {
        let start = Instant::now();

        loop {
            let notified = self.changed.notified();

            match self.state().await {
                ReadinessState::Ready => return Ok(()),
                ReadinessState::ProvisioningFailed => {
                    return Err(VoxletError::Provisioning(
                        "node readiness failed during provisioning".to_string(),
                    ))
                }
                ReadinessState::LoadFailed => {
                    return Err(VoxletError::Load(
                        "node readiness failed during engine load".to_string(),
                    ))
                }
                _ => {}
            }

            let elapsed = start.elapsed();
            if elapsed >= deadline {
                return Err(VoxletError::NodeProvisioning(format!(
                    "node not ready within {:?}",
                    deadline
                )));
            }

            let _ = tokio::time::timeout(deadline - elapsed, notified).await;
        }
    }
}
