//! Configuration types for voxlet

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// API server configuration
    pub api: ApiConfig,
    /// Volume cache configuration
    pub volume: VolumeConfig,
    /// Remote node configuration
    pub node: NodeConfig,
    /// Job dispatch configuration
    pub jobs: JobConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl DaemonConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, crate::VoxletError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::VoxletError::Config(format!("Failed to read config file: {}", e))
        })?;
        toml::from_str(&content)
            .map_err(|e| crate::VoxletError::Config(format!("Failed to parse config: {}", e)))
    }
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address to bind the REST API server
    pub address: String,
    /// Port for the REST API server
    pub port: u16,
    /// Enable CORS
    pub cors_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 8000,
            cors_enabled: true,
        }
    }
}

/// Volume cache configuration
///
/// The volume is externally owned, billed storage mounted at `root`. The cache
/// only ever adds artifacts under it; it never deletes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    /// Root directory for cached artifacts on the persistent volume
    pub root: PathBuf,
    /// Maximum download attempts per artifact before surfacing failure
    pub download_attempts: u32,
    /// Age after which a provisioning lock with a dead owner is reclaimed
    pub lock_stale_secs: u64,
    /// Poll interval while waiting on another caller's provisioning lock
    pub lock_poll_ms: u64,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/data/models"),
            download_attempts: 4,
            lock_stale_secs: 600,
            lock_poll_ms: 500,
        }
    }
}

impl VolumeConfig {
    /// Lock staleness threshold as a [`Duration`]
    pub fn lock_stale(&self) -> Duration {
        Duration::from_secs(self.lock_stale_secs)
    }

    /// Lock poll interval as a [`Duration`]
    pub fn lock_poll(&self) -> Duration {
        Duration::from_millis(self.lock_poll_ms)
    }
}

/// Remote node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Base URL of the compute provider API
    pub provider_url: String,
    /// Bearer token for the provider API
    pub api_token: String,
    /// Persistent volume identity to attach to every launched node
    pub volume_id: String,
    /// Overall budget for a node to go from requested to ready
    pub provisioning_timeout_secs: u64,
    /// Interval between remote health polls while a node boots
    pub boot_poll_secs: u64,
    /// How long a node may sit idle before it is stopped
    pub idle_timeout_secs: u64,
    /// Interval of the idle sweep task
    pub idle_sweep_secs: u64,
    /// Cap on simultaneously provisioning/ready/busy nodes
    pub max_nodes: u32,
    /// Launch attempts against the provider before surfacing failure
    pub launch_attempts: u32,
    /// Advertised cost rate, dollars per hour (informational)
    pub cost_per_hour: f64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            provider_url: "https://console.vast.ai/api/v0".to_string(),
            api_token: String::new(),
            volume_id: String::new(),
            provisioning_timeout_secs: 900,
            boot_poll_secs: 5,
            idle_timeout_secs: 600,
            idle_sweep_secs: 60,
            max_nodes: 1,
            launch_attempts: 3,
            cost_per_hour: 0.0,
        }
    }
}

impl NodeConfig {
    /// Provisioning budget as a [`Duration`]
    pub fn provisioning_timeout(&self) -> Duration {
        Duration::from_secs(self.provisioning_timeout_secs)
    }

    /// Boot poll interval as a [`Duration`]
    pub fn boot_poll(&self) -> Duration {
        Duration::from_secs(self.boot_poll_secs)
    }

    /// Idle timeout as a [`Duration`]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Idle sweep interval as a [`Duration`]
    pub fn idle_sweep(&self) -> Duration {
        Duration::from_secs(self.idle_sweep_secs)
    }
}

/// Job dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Default per-job wall-clock budget
    pub job_timeout_secs: u64,
    /// Maximum attempts per job, counting the first
    pub max_attempts: u32,
    /// Number of dispatch workers consuming the queue
    pub workers: u32,
    /// How long a job may wait for the execution slot
    pub slot_wait_secs: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            job_timeout_secs: 300,
            max_attempts: 3,
            workers: 4,
            slot_wait_secs: 120,
        }
    }
}

impl JobConfig {
    /// Default per-job timeout as a [`Duration`]
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// Slot wait budget as a [`Duration`]
    pub fn slot_wait(&self) -> Duration {
        Duration::from_secs(self.slot_wait_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_daemon_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.api.port, 8000);
        assert_eq!(config.node.max_nodes, 1);
        assert_eq!(config.volume.download_attempts, 4);
        assert_eq!(config.jobs.max_attempts, 3);
    }

    #[test]
    fn test_config_parse() {
        let toml_str = r#"
[volume]
root = "/mnt/artifacts"
download_attempts = 2

[node]
volume_id = "vol-123"
idle_timeout_secs = 120
max_nodes = 2

[jobs]
job_timeout_secs = 60
"#;
        let config: DaemonConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.volume.root, PathBuf::from("/mnt/artifacts"));
        assert_eq!(config.volume.download_attempts, 2);
        assert_eq!(config.node.volume_id, "vol-123");
        assert_eq!(config.node.idle_timeout(), Duration::from_secs(120));
        assert_eq!(config.jobs.job_timeout(), Duration::from_secs(60));
        // Unspecified sections fall back to defaults
        assert_eq!(config.api.port, 8000);
    }
}
