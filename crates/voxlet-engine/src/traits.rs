//! Inference engine trait definitions

use async_trait::async_trait;
use std::path::Path;
use voxlet_core::{ArtifactSpec, JobKind, JobOutput, JobPayload, VoxletResult};

/// An inference collaborator bound to one artifact and one job kind.
///
/// Engines are loaded once by the readiness sequencer and invoked under the
/// node's exclusive execution slot, so implementations may assume `infer` is
/// never called concurrently on the same accelerator.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Job kind this engine serves
    fn kind(&self) -> JobKind;

    /// Artifact the engine needs provisioned before loading
    fn artifact(&self) -> ArtifactSpec;

    /// Initialize from the provisioned artifact content.
    ///
    /// A failure here is a `LoadError`: terminal for the process lifetime.
    async fn load(&self, artifact_path: &Path) -> VoxletResult<()>;

    /// Whether `load` has succeeded
    fn is_loaded(&self) -> bool;

    /// Run one inference. Only called while the caller holds a lease.
    async fn infer(&self, payload: &JobPayload) -> VoxletResult<JobOutput>;

    /// Engine name for logging
    fn name(&self) -> &'static str;
}
