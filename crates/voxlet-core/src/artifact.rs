//! Artifact specifications and provisioning outcomes

use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Specification of a named artifact to provision onto the volume.
///
/// Identity is the name; an artifact is immutable once provisioned and is
/// never deleted by the coordinator (operator-triggered purge only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactSpec {
    /// Unique artifact name, also the subdirectory name on the volume
    pub name: String,
    /// Source URL the content is transferred from
    pub source_url: String,
    /// File name of the transferred content inside the artifact directory
    pub file_name: String,
    /// Expected size in bytes, verified after transfer when present
    pub expected_size: Option<u64>,
    /// Expected hex-encoded SHA-256 of the content, verified when present
    pub sha256: Option<String>,
}

impl ArtifactSpec {
    /// Create a spec with no integrity expectations
    pub fn new(name: impl Into<String>, source_url: impl Into<String>) -> Self {
        let source_url = source_url.into();
        let file_name = source_url
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("content.bin")
            .to_string();
        Self {
            name: name.into(),
            source_url,
            file_name,
            expected_size: None,
            sha256: None,
        }
    }

    /// Directory holding this artifact under the given volume root
    pub fn dir(&self, root: &Path) -> PathBuf {
        root.join(&self.name)
    }

    /// Final path of the transferred content under the given volume root
    pub fn content_path(&self, root: &Path) -> PathBuf {
        self.dir(root).join(&self.file_name)
    }
}

/// Outcome of an idempotent `ensure` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// Completion marker already present, zero bytes transferred
    AlreadyPresent,
    /// Artifact transferred and verified during this call
    Provisioned {
        /// Bytes transferred
        bytes: u64,
    },
}

/// Completion marker persisted next to the artifact content.
///
/// Written only after a full, verified transfer. Its presence, not the raw
/// content files, is what makes an artifact count as cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMarker {
    /// Artifact name
    pub name: String,
    /// Verified content size in bytes
    pub size: u64,
    /// Hex-encoded SHA-256 of the content
    pub sha256: String,
    /// When provisioning completed
    pub provisioned_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_from_url() {
        let spec = ArtifactSpec::new("tts-v1", "https://models.example.com/tts/v1/weights.bin");
        assert_eq!(spec.file_name, "weights.bin");
    }

    #[test]
    fn test_paths_under_root() {
        let spec = ArtifactSpec::new("whisper-large-v3", "https://example.com/model.ct2");
        let root = Path::new("/data/models");
        assert_eq!(spec.dir(root), PathBuf::from("/data/models/whisper-large-v3"));
        assert_eq!(
            spec.content_path(root),
            PathBuf::from("/data/models/whisper-large-v3/model.ct2")
        );
    }
}
