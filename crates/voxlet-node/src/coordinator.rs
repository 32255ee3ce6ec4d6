//! Node lifecycle coordination
//!
//! Owns every node state transition: acquisition with reuse, bounded
//! provisioning against the remote provider, idle tracking, and stop on idle
//! timeout. Stopping a node never touches the attached volume, so cached
//! artifacts survive for the next acquisition.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;
use voxlet_core::{
    retry_with_backoff, Endpoint, Lease, Node, NodeConfig, NodeStatus, RetryConfig, VoxletError,
    VoxletResult,
};

use crate::health::NodeHealth;
use crate::provider::NodeProvider;
use crate::slot::ExecutionSlot;

/// Handle to a usable node, carrying its exclusive execution slot
#[derive(Debug, Clone)]
pub struct NodeHandle {
    /// Node identifier
    pub node_id: Uuid,
    /// Endpoint of the node's health and inference API
    pub endpoint: Endpoint,
    /// The node's single-holder execution slot
    pub slot: Arc<ExecutionSlot>,
}

/// Lifecycle coordinator for the remote, billed compute node.
///
/// Exactly one component transitions node state; everything else reads it.
pub struct NodeCoordinator {
    config: NodeConfig,
    provider: Arc<dyn NodeProvider>,
    health: Arc<dyn NodeHealth>,
    nodes: RwLock<HashMap<Uuid, Node>>,
    slots: RwLock<HashMap<Uuid, Arc<ExecutionSlot>>>,
    // Serializes provisioning so concurrent acquires reuse one launch
    provision_gate: Mutex<()>,
}

impl NodeCoordinator {
    /// Create a coordinator over the given provider and health poller
    pub fn new(config: NodeConfig, provider: Arc<dyn NodeProvider>, health: Arc<dyn NodeHealth>) -> Self {
        Self {
            config,
            provider,
            health,
            nodes: RwLock::new(HashMap::new()),
            slots: RwLock::new(HashMap::new()),
            provision_gate: Mutex::new(()),
        }
    }

    /// Acquire a usable node, reusing a live one before provisioning.
    ///
    /// Requests beyond the admission cap queue on the provisioning gate
    /// rather than launching additional nodes.
    pub async fn acquire(&self) -> VoxletResult<NodeHandle> {
        let start = Instant::now();

        loop {
            if let Some(handle) = self.usable_handle().await {
                return Ok(handle);
            }

            let gate = self.provision_gate.lock().await;

            // A concurrent acquire may have finished provisioning while we
            // waited on the gate
            if let Some(handle) = self.usable_handle().await {
                return Ok(handle);
            }

            if self.active_count().await < self.config.max_nodes as usize {
                return self.provision_node().await;
            }

            drop(gate);

            if start.elapsed() >= self.config.provisioning_timeout() {
                return Err(VoxletError::ResourceExhausted(
                    "node admission cap reached".to_string(),
                ));
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    async fn usable_handle(&self) -> Option<NodeHandle> {
        let nodes = self.nodes.read().await;
        let node = nodes.values().find(|n| n.is_usable())?;
        let slot = self.slots.read().await.get(&node.id)?.clone();
        Some(NodeHandle {
            node_id: node.id,
            endpoint: node.endpoint.clone(),
            slot,
        })
    }

    async fn active_count(&self) -> usize {
        let nodes = self.nodes.read().await;
        nodes.values().filter(|n| n.is_active()).count()
    }

    async fn update_node<F>(&self, id: Uuid, f: F)
    where
        F: FnOnce(&mut Node),
    {
        let mut nodes = self.nodes.write().await;
        if let Some(node) = nodes.get_mut(&id) {
            f(node);
        }
    }

    async fn set_status(&self, id: Uuid, status: NodeStatus) {
        self.update_node(id, |n| {
            debug!(node_id = %id, from = %n.status, to = %status, "Node transition");
            n.status = status;
        })
        .await;
    }

    /// Provision a new node bound to the configured persistent volume.
    ///
    /// Caller holds the provisioning gate.
    async fn provision_node(&self) -> VoxletResult<NodeHandle> {
        let node = Node::new(self.config.volume_id.clone(), self.config.cost_per_hour);
        let id = node.id;
        self.nodes.write().await.insert(id, node);

        info!(
            node_id = %id,
            volume_id = %self.config.volume_id,
            "Provisioning node"
        );
        self.set_status(id, NodeStatus::Provisioning).await;

        let retry = RetryConfig::with_max_attempts(self.config.launch_attempts);
        let launched = retry_with_backoff(&retry, "node_launch", VoxletError::is_transient, || {
            self.provider.launch(&self.config.volume_id)
        })
        .await;

        let launched = match launched {
            Ok(l) => l,
            Err(e) => {
                warn!(node_id = %id, error = %e, "Node launch failed");
                self.set_status(id, NodeStatus::Errored).await;
                return Err(e);
            }
        };

        self.update_node(id, |n| {
            n.instance_id = launched.instance_id.clone();
            n.endpoint = launched.endpoint.clone();
            n.status = NodeStatus::Booting;
        })
        .await;

        if let Err(e) = self.wait_remote_ready(&launched.endpoint).await {
            warn!(node_id = %id, error = %e, "Node failed to become ready");
            self.set_status(id, NodeStatus::Errored).await;
            // Best-effort stop so the errored instance does not keep billing
            if let Err(stop_err) = self.provider.stop(&launched.instance_id).await {
                warn!(node_id = %id, error = %stop_err, "Failed to stop errored node");
            }
            return Err(e);
        }

        self.update_node(id, |n| {
            n.status = NodeStatus::Ready;
            n.idle_since = Some(chrono::Utc::now());
        })
        .await;

        let slot = Arc::new(ExecutionSlot::new(id));
        self.slots.write().await.insert(id, slot.clone());

        info!(node_id = %id, instance_id = %launched.instance_id, "Node ready");

        Ok(NodeHandle {
            node_id: id,
            endpoint: launched.endpoint,
            slot,
        })
    }

    /// Poll the remote health contract until it reports ready, bounded by the
    /// provisioning timeout. Transport errors count as "still booting".
    async fn wait_remote_ready(&self, endpoint: &Endpoint) -> VoxletResult<()> {
        let deadline = Instant::now() + self.config.provisioning_timeout();

        loop {
            match self.health.check(endpoint).await {
                Ok(report) if report.is_ready() => return Ok(()),
                Ok(report) if report.status.is_terminal_failure() => {
                    return Err(VoxletError::NodeProvisioning(format!(
                        "node reported {}",
                        report.status
                    )));
                }
                Ok(report) => {
                    debug!(endpoint = %endpoint.url(), status = %report.status, "Node booting");
                }
                Err(e) => {
                    debug!(endpoint = %endpoint.url(), error = %e, "Node not reachable yet");
                }
            }

            if Instant::now() >= deadline {
                return Err(VoxletError::NodeProvisioning(format!(
                    "node not ready within {:?}",
                    self.config.provisioning_timeout()
                )));
            }
            tokio::time::sleep(self.config.boot_poll()).await;
        }
    }

    /// Record that a lease was granted on the node
    pub async fn mark_busy(&self, node_id: Uuid) {
        self.update_node(node_id, |n| {
            if n.is_usable() {
                n.status = NodeStatus::Busy;
                n.idle_since = None;
            }
        })
        .await;
    }

    /// Record that the last lease on the node was released.
    ///
    /// Checks the slot under the node lock, so a racing acquire on another
    /// worker cannot end up with a busy node stamped `Idle`.
    pub async fn mark_idle(&self, node_id: Uuid) {
        let mut nodes = self.nodes.write().await;
        let slots = self.slots.read().await;
        if let Some(slot) = slots.get(&node_id) {
            if !slot.is_free() {
                return;
            }
        }
        if let Some(n) = nodes.get_mut(&node_id) {
            if n.is_usable() {
                n.status = NodeStatus::Idle;
                n.idle_since = Some(chrono::Utc::now());
            }
        }
    }

    /// Stop nodes idle past the idle timeout. Invoked periodically, not per
    /// job. Returns the ids of nodes stopped by this sweep.
    pub async fn sweep_idle(&self) -> Vec<Uuid> {
        let idle_timeout = chrono::Duration::from_std(self.config.idle_timeout())
            .unwrap_or_else(|_| chrono::Duration::seconds(600));
        let now = chrono::Utc::now();

        let candidates: Vec<(Uuid, String)> = {
            let nodes = self.nodes.read().await;
            let slots = self.slots.read().await;
            nodes
                .values()
                .filter(|n| {
                    n.is_usable()
                        && n.status != NodeStatus::Busy
                        && n.idle_since
                            .map(|t| now.signed_duration_since(t) > idle_timeout)
                            .unwrap_or(false)
                        && slots.get(&n.id).map(|s| s.is_free()).unwrap_or(true)
                })
                .map(|n| (n.id, n.instance_id.clone()))
                .collect()
        };

        let mut stopped = Vec::new();
        for (id, instance_id) in candidates {
            info!(node_id = %id, instance_id = %instance_id, "Stopping idle node");
            self.set_status(id, NodeStatus::Stopping).await;

            // Only the compute instance stops; the volume and its cached
            // artifacts persist for the next acquisition
            match self.provider.stop(&instance_id).await {
                Ok(()) => {
                    self.set_status(id, NodeStatus::Stopped).await;
                    self.slots.write().await.remove(&id);
                    stopped.push(id);
                }
                Err(e) => {
                    warn!(node_id = %id, error = %e, "Failed to stop idle node");
                    self.set_status(id, NodeStatus::Errored).await;
                }
            }
        }

        stopped
    }

    /// Force-release expired leases on every node. Returns the evicted
    /// leases so the dispatcher can fail their jobs.
    pub async fn sweep_leases(&self) -> Vec<Lease> {
        let slots: Vec<Arc<ExecutionSlot>> = self.slots.read().await.values().cloned().collect();

        let mut evicted = Vec::new();
        for slot in slots {
            if let Some(lease) = slot.sweep_expired() {
                self.mark_idle(slot.node_id()).await;
                evicted.push(lease);
            }
        }
        evicted
    }

    /// Stop every active node (explicit shutdown)
    pub async fn shutdown(&self) {
        let active: Vec<(Uuid, String)> = {
            let nodes = self.nodes.read().await;
            nodes
                .values()
                .filter(|n| n.is_usable())
                .map(|n| (n.id, n.instance_id.clone()))
                .collect()
        };

        for (id, instance_id) in active {
            self.set_status(id, NodeStatus::Stopping).await;
            if let Err(e) = self.provider.stop(&instance_id).await {
                warn!(node_id = %id, error = %e, "Failed to stop node during shutdown");
            }
            self.set_status(id, NodeStatus::Stopped).await;
            self.slots.write().await.remove(&id);
        }
    }

    /// Get a node snapshot
    pub async fn get(&self, id: Uuid) -> Option<Node> {
        self.nodes.read().await.get(&id).cloned()
    }

    /// List all node records, including stopped and errored ones
    pub async fn list(&self) -> Vec<Node> {
        self.nodes.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;
    use voxlet_core::{HealthReport, ReadinessState};

    use crate::provider::LaunchedInstance;

    /// Provider recording launch and stop calls
    struct MockProvider {
        launches: AtomicU32,
        stops: StdMutex<Vec<String>>,
        fail_launches: u32,
    }

    impl MockProvider {
        fn new() -> Self {
            Self {
                launches: AtomicU32::new(0),
                stops: StdMutex::new(Vec::new()),
                fail_launches: 0,
            }
        }

        fn failing(failures: u32) -> Self {
            Self {
                fail_launches: failures,
                ..Self::new()
            }
        }

        fn launches(&self) -> u32 {
            self.launches.load(Ordering::SeqCst)
        }

        fn stops(&self) -> Vec<String> {
            self.stops.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NodeProvider for MockProvider {
        async fn launch(&self, _volume_id: &str) -> VoxletResult<LaunchedInstance> {
            let n = self.launches.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_launches {
                return Err(VoxletError::NodeProvisioning("no capacity".into()));
            }
            Ok(LaunchedInstance {
                instance_id: format!("inst-{}", n),
                endpoint: Endpoint::new("127.0.0.1".to_string(), 9000),
            })
        }

        async fn stop(&self, instance_id: &str) -> VoxletResult<()> {
            self.stops.lock().unwrap().push(instance_id.to_string());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "mock"
        }
    }

    /// Health poller reporting booting for the first N checks
    struct MockHealth {
        checks: AtomicU32,
        booting_checks: u32,
    }

    impl MockHealth {
        fn ready() -> Self {
            Self {
                checks: AtomicU32::new(0),
                booting_checks: 0,
            }
        }

        fn booting_for(checks: u32) -> Self {
            Self {
                checks: AtomicU32::new(0),
                booting_checks: checks,
            }
        }
    }

    #[async_trait]
    impl NodeHealth for MockHealth {
        async fn check(&self, _endpoint: &Endpoint) -> VoxletResult<HealthReport> {
            let n = self.checks.fetch_add(1, Ordering::SeqCst);
            let status = if n < self.booting_checks {
                ReadinessState::Loading
            } else {
                ReadinessState::Ready
            };
            Ok(HealthReport {
                status,
                artifacts: BTreeMap::new(),
                device: None,
            })
        }
    }

    fn test_config() -> NodeConfig {
        NodeConfig {
            volume_id: "vol-test".to_string(),
            provisioning_timeout_secs: 5,
            boot_poll_secs: 0,
            idle_timeout_secs: 600,
            launch_attempts: 3,
            max_nodes: 1,
            ..NodeConfig::default()
        }
    }

    #[tokio::test]
    async fn test_acquire_provisions_then_reuses() {
        let provider = Arc::new(MockProvider::new());
        let coordinator = NodeCoordinator::new(
            test_config(),
            provider.clone(),
            Arc::new(MockHealth::booting_for(2)),
        );

        let first = coordinator.acquire().await.unwrap();
        let node = coordinator.get(first.node_id).await.unwrap();
        assert_eq!(node.status, NodeStatus::Ready);
        assert_eq!(node.volume_id, "vol-test");

        // Second acquire returns the same node without a new launch
        let second = coordinator.acquire().await.unwrap();
        assert_eq!(second.node_id, first.node_id);
        assert_eq!(provider.launches(), 1);
    }

    #[tokio::test]
    async fn test_launch_retries_then_errors() {
        let provider = Arc::new(MockProvider::failing(99));
        let coordinator =
            NodeCoordinator::new(test_config(), provider.clone(), Arc::new(MockHealth::ready()));

        let err = coordinator.acquire().await.unwrap_err();
        assert!(matches!(err, VoxletError::NodeProvisioning(_)));
        assert_eq!(provider.launches(), 3);

        let nodes = coordinator.list().await;
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].status, NodeStatus::Errored);
    }

    #[tokio::test]
    async fn test_transient_launch_failure_recovers() {
        let provider = Arc::new(MockProvider::failing(2));
        let coordinator =
            NodeCoordinator::new(test_config(), provider.clone(), Arc::new(MockHealth::ready()));

        let handle = coordinator.acquire().await.unwrap();
        assert_eq!(provider.launches(), 3);
        let node = coordinator.get(handle.node_id).await.unwrap();
        assert_eq!(node.status, NodeStatus::Ready);
    }

    #[tokio::test]
    async fn test_busy_idle_tracking() {
        let coordinator = NodeCoordinator::new(
            test_config(),
            Arc::new(MockProvider::new()),
            Arc::new(MockHealth::ready()),
        );

        let handle = coordinator.acquire().await.unwrap();
        coordinator.mark_busy(handle.node_id).await;
        let node = coordinator.get(handle.node_id).await.unwrap();
        assert_eq!(node.status, NodeStatus::Busy);
        assert!(node.idle_since.is_none());

        coordinator.mark_idle(handle.node_id).await;
        let node = coordinator.get(handle.node_id).await.unwrap();
        assert_eq!(node.status, NodeStatus::Idle);
        assert!(node.idle_since.is_some());
    }

    #[tokio::test]
    async fn test_mark_idle_skips_node_with_held_slot() {
        let coordinator = NodeCoordinator::new(
            test_config(),
            Arc::new(MockProvider::new()),
            Arc::new(MockHealth::ready()),
        );

        let handle = coordinator.acquire().await.unwrap();
        let lease = handle
            .slot
            .acquire(
                Uuid::new_v4(),
                voxlet_core::JobKind::Synthesis,
                Duration::from_secs(1),
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        coordinator.mark_busy(handle.node_id).await;

        // A stale release path cannot stamp a node whose slot is held
        coordinator.mark_idle(handle.node_id).await;
        let node = coordinator.get(handle.node_id).await.unwrap();
        assert_eq!(node.status, NodeStatus::Busy);

        handle.slot.release(&lease);
        coordinator.mark_idle(handle.node_id).await;
        let node = coordinator.get(handle.node_id).await.unwrap();
        assert_eq!(node.status, NodeStatus::Idle);
    }

    #[tokio::test]
    async fn test_shutdown_stops_active_nodes() {
        let provider = Arc::new(MockProvider::new());
        let coordinator =
            NodeCoordinator::new(test_config(), provider.clone(), Arc::new(MockHealth::ready()));

        let handle = coordinator.acquire().await.unwrap();
        coordinator.shutdown().await;

        let node = coordinator.get(handle.node_id).await.unwrap();
        assert_eq!(node.status, NodeStatus::Stopped);
        assert_eq!(provider.stops(), vec!["inst-0".to_string()]);

        // Stopped nodes are not stopped a second time
        coordinator.shutdown().await;
        assert_eq!(provider.stops().len(), 1);
    }

    #[tokio::test]
    async fn test_idle_sweep_stops_node_keeps_volume() {
        let provider = Arc::new(MockProvider::new());
        let config = NodeConfig {
            idle_timeout_secs: 0,
            ..test_config()
        };
        let coordinator =
            NodeCoordinator::new(config, provider.clone(), Arc::new(MockHealth::ready()));

        let handle = coordinator.acquire().await.unwrap();
        coordinator.mark_idle(handle.node_id).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        let stopped = coordinator.sweep_idle().await;
        assert_eq!(stopped, vec![handle.node_id]);

        let node = coordinator.get(handle.node_id).await.unwrap();
        assert_eq!(node.status, NodeStatus::Stopped);
        // The volume binding survives the stop
        assert_eq!(node.volume_id, "vol-test");
        assert_eq!(provider.stops(), vec!["inst-0".to_string()]);

        // The next acquire provisions a fresh node against the same volume
        let next = coordinator.acquire().await.unwrap();
        assert_ne!(next.node_id, handle.node_id);
        assert_eq!(
            coordinator.get(next.node_id).await.unwrap().volume_id,
            "vol-test"
        );
    }

    #[tokio::test]
    async fn test_idle_sweep_skips_busy_and_fresh_nodes() {
        let provider = Arc::new(MockProvider::new());
        let coordinator =
            NodeCoordinator::new(test_config(), provider.clone(), Arc::new(MockHealth::ready()));

        let handle = coordinator.acquire().await.unwrap();

        // Fresh Ready node: idle_since is recent, sweep leaves it alone
        assert!(coordinator.sweep_idle().await.is_empty());

        coordinator.mark_busy(handle.node_id).await;
        assert!(coordinator.sweep_idle().await.is_empty());
        assert!(provider.stops().is_empty());
    }

    #[tokio::test]
    async fn test_lease_sweep_marks_idle() {
        let coordinator = NodeCoordinator::new(
            test_config(),
            Arc::new(MockProvider::new()),
            Arc::new(MockHealth::ready()),
        );

        let handle = coordinator.acquire().await.unwrap();
        let _lease = handle
            .slot
            .acquire(
                Uuid::new_v4(),
                voxlet_core::JobKind::Synthesis,
                Duration::from_secs(1),
                Duration::from_millis(10),
            )
            .await
            .unwrap();
        coordinator.mark_busy(handle.node_id).await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        let evicted = coordinator.sweep_leases().await;
        assert_eq!(evicted.len(), 1);

        let node = coordinator.get(handle.node_id).await.unwrap();
        assert_eq!(node.status, NodeStatus::Idle);
        assert!(handle.slot.is_free());
    }

    #[tokio::test]
    async fn test_concurrent_acquire_single_launch() {
        let provider = Arc::new(MockProvider::new());
        let coordinator = Arc::new(NodeCoordinator::new(
            test_config(),
            provider.clone(),
            Arc::new(MockHealth::booting_for(1)),
        ));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let c = coordinator.clone();
            handles.push(tokio::spawn(async move { c.acquire().await }));
        }

        let mut node_ids = Vec::new();
        for h in handles {
            node_ids.push(h.await.unwrap().unwrap().node_id);
        }

        assert_eq!(provider.launches(), 1);
        assert!(node_ids.windows(2).all(|w| w[0] == w[1]));
    }
}
