//! Compute provider trait definitions

use async_trait::async_trait;
use voxlet_core::{Endpoint, VoxletResult};

/// A node instance launched at the provider
#[derive(Debug, Clone)]
pub struct LaunchedInstance {
    /// Provider-side instance identifier
    pub instance_id: String,
    /// Endpoint the node's health and inference API will serve on
    pub endpoint: Endpoint,
}

/// Remote compute provider for launching and stopping GPU nodes.
///
/// `launch` must always bind the given persistent volume so a new node sees
/// the artifacts cached by its predecessors; `stop` stops only the compute
/// instance and never detaches or destroys the volume.
#[async_trait]
pub trait NodeProvider: Send + Sync {
    /// Launch a node attached to the persistent volume
    async fn launch(&self, volume_id: &str) -> VoxletResult<LaunchedInstance>;

    /// Stop a running node instance
    async fn stop(&self, instance_id: &str) -> VoxletResult<()>;

    /// Provider name for logging
    fn name(&self) -> &'static str;
}
