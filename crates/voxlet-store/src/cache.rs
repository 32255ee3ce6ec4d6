//! Idempotent artifact cache on the persistent volume

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};
use voxlet_core::{
    retry_with_backoff, ArtifactMarker, ArtifactSpec, EnsureOutcome, RetryConfig, VolumeConfig,
    VoxletError, VoxletResult,
};

use crate::fetch::ArtifactFetcher;
use crate::lock::ProvisionLock;

/// Completion marker file name inside an artifact directory
pub const MARKER_FILE: &str = ".complete";

/// Suffix for in-flight transfer files
const PARTIAL_SUFFIX: &str = ".partial";

/// Idempotent provisioning of named artifacts onto the volume.
///
/// The volume is never assumed empty or pristine: presence is judged by the
/// completion marker, written only after a full, verified transfer, so a
/// truncated prior download is never treated as complete. Disk usage grows
/// monotonically; the cache never deletes artifacts.
pub struct VolumeCache {
    config: VolumeConfig,
    fetcher: Arc<dyn ArtifactFetcher>,
}

impl VolumeCache {
    /// Create a cache over the configured volume root
    pub fn new(config: VolumeConfig, fetcher: Arc<dyn ArtifactFetcher>) -> Self {
        Self { config, fetcher }
    }

    /// Create the artifacts root if the volume does not have one yet
    pub async fn init(&self) -> VoxletResult<()> {
        if !self.config.root.exists() {
            tokio::fs::create_dir_all(&self.config.root).await?;
            info!(path = %self.config.root.display(), "Created artifacts root");
        }
        Ok(())
    }

    /// Final content path for an artifact
    pub fn artifact_path(&self, spec: &ArtifactSpec) -> PathBuf {
        spec.content_path(&self.config.root)
    }

    /// Whether the artifact's completion marker exists
    pub fn is_present(&self, spec: &ArtifactSpec) -> bool {
        spec.dir(&self.config.root).join(MARKER_FILE).exists()
    }

    /// Per-artifact presence map for the health report
    pub fn presence_map(&self, specs: &[ArtifactSpec]) -> BTreeMap<String, bool> {
        specs
            .iter()
            .map(|s| (s.name.clone(), self.is_present(s)))
            .collect()
    }

    /// Ensure the artifact is present and verified on the volume.
    ///
    /// Returns `AlreadyPresent` without touching the marker when a prior call
    /// completed, otherwise transfers under an exclusive volume-scoped lock
    /// with bounded retries and writes the marker only after verification.
    pub async fn ensure(&self, spec: &ArtifactSpec) -> VoxletResult<EnsureOutcome> {
        let dir = spec.dir(&self.config.root);
        let marker = dir.join(MARKER_FILE);

        if marker.exists() {
            return Ok(EnsureOutcome::AlreadyPresent);
        }

        tokio::fs::create_dir_all(&dir).await?;

        let lock =
            ProvisionLock::acquire(&dir, self.config.lock_stale(), self.config.lock_poll()).await?;

        // Another caller may have finished while we waited on the lock
        if marker.exists() {
            lock.release()?;
            return Ok(EnsureOutcome::AlreadyPresent);
        }

        let retry = RetryConfig::with_max_attempts(self.config.download_attempts);
        let result = retry_with_backoff(&retry, "artifact_transfer", VoxletError::is_transient, || {
            self.transfer(spec)
        })
        .await;

        let (bytes, sha256) = match result {
            Ok(v) => v,
            Err(e) => {
                warn!(artifact = %spec.name, error = %e, "Artifact provisioning failed");
                // Keep the provisioning error even if the lock cleanup fails
                if let Err(re) = lock.release() {
                    warn!(artifact = %spec.name, error = %re, "Failed to release provisioning lock");
                }
                return Err(e);
            }
        };

        let marker_body = serde_json::to_vec_pretty(&ArtifactMarker {
            name: spec.name.clone(),
            size: bytes,
            sha256,
            provisioned_at: Utc::now(),
        })?;
        tokio::fs::write(&marker, marker_body).await?;

        lock.release()?;

        info!(
            artifact = %spec.name,
            bytes = bytes,
            "Artifact provisioned"
        );

        Ok(EnsureOutcome::Provisioned { bytes })
    }

    /// One transfer attempt: fetch to a temporary path, verify, rename.
    ///
    /// A crash mid-transfer leaves only the partial file behind, never a
    /// falsely complete artifact.
    async fn transfer(&self, spec: &ArtifactSpec) -> VoxletResult<(u64, String)> {
        let dir = spec.dir(&self.config.root);
        let partial = dir.join(format!("{}{}", spec.file_name, PARTIAL_SUFFIX));
        let final_path = spec.content_path(&self.config.root);

        let fetched = self.fetcher.fetch(spec, &partial).await;
        let bytes = match fetched {
            Ok(b) => b,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e);
            }
        };

        let sha256 = match self.verify(spec, &partial, bytes).await {
            Ok(sha) => sha,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e);
            }
        };

        tokio::fs::rename(&partial, &final_path).await?;

        Ok((bytes, sha256))
    }

    /// Verify size and checksum against the spec's expectations.
    ///
    /// Returns the computed content hash so the marker reuses it instead of
    /// hashing the file a second time.
    async fn verify(&self, spec: &ArtifactSpec, path: &std::path::Path, bytes: u64) -> VoxletResult<String> {
        if let Some(expected) = spec.expected_size {
            if bytes != expected {
                return Err(VoxletError::Integrity(format!(
                    "{}: size mismatch, expected {} bytes, got {}",
                    spec.name, expected, bytes
                )));
            }
        }

        let actual = file_sha256(path).await?;
        if let Some(ref expected) = spec.sha256 {
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(VoxletError::Integrity(format!(
                    "{}: sha256 mismatch, expected {}, got {}",
                    spec.name, expected, actual
                )));
            }
        }

        Ok(actual)
    }
}

/// Hex-encoded SHA-256 of a file, streamed in chunks
async fn file_sha256(path: &std::path::Path) -> VoxletResult<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
