//! Error types for voxlet

use thiserror::Error;

/// Main error type for voxlet
#[derive(Error, Debug)]
pub enum VoxletError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transient failure while transferring an artifact to the volume
    #[error("Provisioning error: {0}")]
    Provisioning(String),

    /// Checksum or size mismatch after an artifact transfer
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// An inference engine failed to initialize from a present artifact
    #[error("Load error: {0}")]
    Load(String),

    /// Remote compute node could not be provisioned
    #[error("Node provisioning error: {0}")]
    NodeProvisioning(String),

    /// Job exceeded its wall-clock budget
    #[error("Job timed out after {attempts} attempt(s): {reason}")]
    JobTimeout {
        /// Description of the timed-out job
        reason: String,
        /// Attempts consumed when the timeout fired
        attempts: u32,
    },

    /// The execution slot could not be acquired before the deadline
    #[error("Slot acquisition timed out: {0}")]
    SlotTimeout(String),

    /// Node not found
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Job not found
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Engine not registered for a job kind
    #[error("Engine not found: {0}")]
    EngineNotFound(String),

    /// Resource exhausted
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for voxlet operations
pub type VoxletResult<T> = Result<T, VoxletError>;

impl VoxletError {
    /// Whether the error is transient and the operation is safe to retry.
    ///
    /// Integrity and load failures indicate persistent inconsistency and are
    /// never retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            VoxletError::Provisioning(_)
                | VoxletError::NodeProvisioning(_)
                | VoxletError::SlotTimeout(_)
                | VoxletError::JobTimeout { .. }
        )
    }
}

impl From<serde_json::Error> for VoxletError {
    fn from(err: serde_json::Error) -> Self {
        VoxletError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for VoxletError {
    fn from(err: toml::de::Error) -> Self {
        VoxletError::Config(err.to_string())
    }
}
