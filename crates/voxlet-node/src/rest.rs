//! REST compute provider
//!
//! Speaks to a rentable-GPU offering over HTTP: create an instance bound to a
//! persistent volume, stop it by id. Transport and non-success responses map
//! to `NodeProvisioning`, which the coordinator retries with backoff.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use voxlet_core::{Endpoint, VoxletError, VoxletResult};

use crate::provider::{LaunchedInstance, NodeProvider};

/// Provider client for a REST compute API
pub struct RestProvider {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
}

#[derive(Debug, Serialize)]
struct CreateInstanceRequest<'a> {
    volume_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateInstanceResponse {
    id: String,
    host: String,
    port: u16,
}

impl RestProvider {
    /// Create a provider client against the given API base URL
    pub fn new(base_url: String, api_token: String, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        }
    }
}

#[async_trait]
impl NodeProvider for RestProvider {
    async fn launch(&self, volume_id: &str) -> VoxletResult<LaunchedInstance> {
        let url = format!("{}/instances", self.base_url);
        debug!(url = %url, volume_id = volume_id, "Requesting node instance");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&CreateInstanceRequest { volume_id })
            .send()
            .await
            .map_err(|e| VoxletError::NodeProvisioning(format!("launch request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| VoxletError::NodeProvisioning(format!("launch rejected: {}", e)))?;

        let body: CreateInstanceResponse = response
            .json()
            .await
            .map_err(|e| VoxletError::NodeProvisioning(format!("launch response invalid: {}", e)))?;

        info!(
            instance_id = %body.id,
            host = %body.host,
            port = body.port,
            "Node instance launched"
        );

        Ok(LaunchedInstance {
            instance_id: body.id,
            endpoint: Endpoint::new(body.host, body.port),
        })
    }

    async fn stop(&self, instance_id: &str) -> VoxletResult<()> {
        let url = format!("{}/instances/{}", self.base_url, instance_id);
        debug!(url = %url, "Stopping node instance");

        self.client
            .delete(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| VoxletError::NodeProvisioning(format!("stop request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| VoxletError::NodeProvisioning(format!("stop rejected: {}", e)))?;

        info!(instance_id = instance_id, "Node instance stopped");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "rest"
    }
}
