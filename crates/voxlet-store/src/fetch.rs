//! Artifact transfer abstraction

use async_trait::async_trait;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use voxlet_core::{ArtifactSpec, VoxletError, VoxletResult};

/// Transfers artifact content from its source to a destination path.
///
/// Implementations must be safe to call repeatedly for the same artifact; the
/// cache writes to a temporary destination and renames only after
/// verification, so a failed fetch never leaves partial content in place.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Fetch the artifact content into `dest`, returning bytes written
    async fn fetch(&self, spec: &ArtifactSpec, dest: &Path) -> VoxletResult<u64>;

    /// Fetcher name for logging
    fn name(&self) -> &'static str;
}

/// HTTP fetcher streaming the artifact body to disk
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher with the given HTTP client
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl ArtifactFetcher for HttpFetcher {
    async fn fetch(&self, spec: &ArtifactSpec, dest: &Path) -> VoxletResult<u64> {
        debug!(
            artifact = %spec.name,
            url = %spec.source_url,
            "Starting artifact transfer"
        );

        let mut response = self
            .client
            .get(&spec.source_url)
            .send()
            .await
            .map_err(|e| VoxletError::Provisioning(format!("request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| VoxletError::Provisioning(format!("bad status: {}", e)))?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| VoxletError::Provisioning(format!("body read failed: {}", e)))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;

        info!(
            artifact = %spec.name,
            bytes = written,
            "Artifact transfer complete"
        );

        Ok(written)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
