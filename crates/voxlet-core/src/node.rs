//! Node and endpoint type definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An ephemeral, billed remote compute node hosting one accelerator.
///
/// Node state is mutated exclusively by the lifecycle coordinator; every other
/// component treats it as read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier
    pub id: Uuid,
    /// Provider-side instance identifier
    pub instance_id: String,
    /// Current status
    pub status: NodeStatus,
    /// Persistent volume attached to this node
    pub volume_id: String,
    /// Network endpoint of the node's health/inference API
    pub endpoint: Endpoint,
    /// When the node last became idle, if it is idle
    pub idle_since: Option<DateTime<Utc>>,
    /// Billed cost rate in dollars per hour
    pub cost_per_hour: f64,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Node {
    /// Create a node record in the `Requested` state
    pub fn new(volume_id: String, cost_per_hour: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            instance_id: String::new(),
            status: NodeStatus::Requested,
            volume_id,
            endpoint: Endpoint::new("127.0.0.1".to_string(), 0),
            idle_since: None,
            cost_per_hour,
            created_at: Utc::now(),
        }
    }

    /// Whether the node can serve a job without a new remote provisioning call
    pub fn is_usable(&self) -> bool {
        matches!(
            self.status,
            NodeStatus::Ready | NodeStatus::Busy | NodeStatus::Idle
        )
    }

    /// Whether the node counts against the admission cap
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            NodeStatus::Requested
                | NodeStatus::Provisioning
                | NodeStatus::Booting
                | NodeStatus::Ready
                | NodeStatus::Busy
                | NodeStatus::Idle
        )
    }
}

/// Node status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Node has been requested but not yet submitted to the provider
    Requested,
    /// Provider is allocating the instance
    Provisioning,
    /// Instance exists and is booting, health not yet confirmed
    Booting,
    /// Node reports ready and holds no lease
    Ready,
    /// Node is executing a leased job
    Busy,
    /// Node is ready but has been without a lease since `idle_since`
    Idle,
    /// Stop has been issued to the provider
    Stopping,
    /// Node is stopped; the volume and its artifacts persist
    Stopped,
    /// Node failed provisioning or was reported unhealthy
    Errored,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Requested => write!(f, "Requested"),
            NodeStatus::Provisioning => write!(f, "Provisioning"),
            NodeStatus::Booting => write!(f, "Booting"),
            NodeStatus::Ready => write!(f, "Ready"),
            NodeStatus::Busy => write!(f, "Busy"),
            NodeStatus::Idle => write!(f, "Idle"),
            NodeStatus::Stopping => write!(f, "Stopping"),
            NodeStatus::Stopped => write!(f, "Stopped"),
            NodeStatus::Errored => write!(f, "Errored"),
        }
    }
}

/// Network endpoint for a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Whether TLS is enabled
    pub tls: bool,
}

impl Endpoint {
    /// Create a new endpoint
    pub fn new(host: String, port: u16) -> Self {
        Self {
            host,
            port,
            tls: false,
        }
    }

    /// Get the URL for this endpoint
    pub fn url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}
