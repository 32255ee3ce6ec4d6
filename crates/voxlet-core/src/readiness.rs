//! Readiness state and the externally observable health report

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Startup state of a node process. Exactly one instance per process lifetime.
///
/// Transitions are monotonic: `Uninitialized -> Provisioning -> Loading ->
/// Ready`. The failure states are terminal for the process; recovery is an
/// external restart, which is idempotent because artifacts already on the
/// volume short-circuit provisioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessState {
    /// Process started, nothing provisioned yet
    Uninitialized,
    /// Artifacts are being ensured onto the volume
    Provisioning,
    /// Engines are loading from provisioned artifacts
    Loading,
    /// All artifacts present and all engines loaded
    Ready,
    /// An artifact could not be provisioned; terminal
    ProvisioningFailed,
    /// An engine failed to load; terminal
    LoadFailed,
}

impl ReadinessState {
    /// Whether this state is terminal for the process lifetime
    pub fn is_terminal_failure(&self) -> bool {
        matches!(
            self,
            ReadinessState::ProvisioningFailed | ReadinessState::LoadFailed
        )
    }
}

impl std::fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadinessState::Uninitialized => write!(f, "Uninitialized"),
            ReadinessState::Provisioning => write!(f, "Provisioning"),
            ReadinessState::Loading => write!(f, "Loading"),
            ReadinessState::Ready => write!(f, "Ready"),
            ReadinessState::ProvisioningFailed => write!(f, "ProvisioningFailed"),
            ReadinessState::LoadFailed => write!(f, "LoadFailed"),
        }
    }
}

/// Idempotent, side-effect-free health report served to callers and polled by
/// the lifecycle coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Overall readiness state
    pub status: ReadinessState,
    /// Per-artifact readiness: name to marker-verified presence
    pub artifacts: BTreeMap<String, bool>,
    /// Accelerator device description, when known
    #[serde(default)]
    pub device: Option<String>,
}

impl HealthReport {
    /// Whether the node may accept inference traffic
    pub fn is_ready(&self) -> bool {
        self.status == ReadinessState::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_failures() {
        assert!(ReadinessState::ProvisioningFailed.is_terminal_failure());
        assert!(ReadinessState::LoadFailed.is_terminal_failure());
        assert!(!ReadinessState::Ready.is_terminal_failure());
        assert!(!ReadinessState::Provisioning.is_terminal_failure());
    }

    #[test]
    fn test_report_roundtrip() {
        let mut artifacts = BTreeMap::new();
        artifacts.insert("chatterbox-tts".to_string(), true);
        artifacts.insert("whisper-large-v3".to_string(), false);
        let report = HealthReport {
            status: ReadinessState::Loading,
            artifacts,
            device: Some("cuda".to_string()),
        };
        let json = serde_json::to_string(&report).unwrap();
        let back: HealthReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status, ReadinessState::Loading);
        assert!(!back.is_ready());
        assert_eq!(back.artifacts["chatterbox-tts"], true);
    }
}
