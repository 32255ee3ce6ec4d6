//! Exclusive execution slot
//!
//! One physical accelerator per node means capacity exactly 1, regardless of
//! job kind: a synthesis job and a transcription job can never run
//! concurrently on the same node. Leases are identified by their own id, so a
//! racing release against a timeout-driven forced release stays a no-op.

use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};
use uuid::Uuid;
use voxlet_core::{JobKind, Lease, VoxletError, VoxletResult};

#[derive(Debug)]
struct HeldLease {
    lease: Lease,
    _permit: OwnedSemaphorePermit,
}

/// Single-holder mutual-exclusion gate over a node's accelerator
#[derive(Debug)]
pub struct ExecutionSlot {
    node_id: Uuid,
    semaphore: Arc<Semaphore>,
    held: Mutex<Option<HeldLease>>,
}

impl ExecutionSlot {
    /// Create the slot for one node
    pub fn new(node_id: Uuid) -> Self {
        Self {
            node_id,
            semaphore: Arc::new(Semaphore::new(1)),
            held: Mutex::new(None),
        }
    }

    /// Node this slot guards
    pub fn node_id(&self) -> Uuid {
        self.node_id
    }

    /// Acquire the slot, suspending until it is free or `wait` elapses.
    ///
    /// On timeout returns `SlotTimeout` with no side effects. The granted
    /// lease carries a hard deadline of `hold` from now; the sweep forcibly
    /// releases it past that point.
    pub async fn acquire(&self, job_id: Uuid, kind: JobKind, wait: Duration, hold: Duration) -> VoxletResult<Lease> {
        let permit = tokio::time::timeout(wait, self.semaphore.clone().acquire_owned())
            .await
            .map_err(|_| {
                VoxletError::SlotTimeout(format!(
                    "slot on node {} not free within {:?}",
                    self.node_id, wait
                ))
            })?
            .map_err(|_| VoxletError::Internal("execution slot closed".to_string()))?;

        let now = Utc::now();
        let hold = chrono::Duration::from_std(hold)
            .map_err(|e| VoxletError::Internal(format!("invalid lease hold: {}", e)))?;
        let lease = Lease {
            id: Uuid::new_v4(),
            job_id,
            node_id: self.node_id,
            acquired_at: now,
            deadline: now + hold,
        };

        debug!(
            lease_id = %lease.id,
            job_id = %job_id,
            kind = %kind,
            node_id = %self.node_id,
            "Lease acquired"
        );

        *self.held.lock().unwrap() = Some(HeldLease {
            lease: lease.clone(),
            _permit: permit,
        });

        Ok(lease)
    }

    /// Release the given lease. Idempotent: releasing a lease that has
    /// already been released or force-released is a no-op.
    ///
    /// Returns whether this call actually freed the slot.
    pub fn release(&self, lease: &Lease) -> bool {
        let mut held = self.held.lock().unwrap();
        match held.as_ref() {
            Some(h) if h.lease.id == lease.id => {
                debug!(lease_id = %lease.id, node_id = %self.node_id, "Lease released");
                *held = None;
                true
            }
            _ => false,
        }
    }

    /// Force-release the current lease if its deadline has elapsed.
    ///
    /// Returns the evicted lease so the caller can fail the owning job.
    pub fn sweep_expired(&self) -> Option<Lease> {
        let mut held = self.held.lock().unwrap();
        if let Some(h) = held.as_ref() {
            if h.lease.is_expired() {
                let lease = h.lease.clone();
                warn!(
                    lease_id = %lease.id,
                    job_id = %lease.job_id,
                    node_id = %self.node_id,
                    "Force-releasing expired lease"
                );
                *held = None;
                return Some(lease);
            }
        }
        None
    }

    /// Whether no lease is currently held
    pub fn is_free(&self) -> bool {
        self.held.lock().unwrap().is_none()
    }

    /// The currently held lease, if any
    pub fn current(&self) -> Option<Lease> {
        self.held.lock().unwrap().as_ref().map(|h| h.lease.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_secs(1);
    const HOLD: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_acquire_and_release() {
        let slot = ExecutionSlot::new(Uuid::new_v4());
        assert!(slot.is_free());

        let lease = slot
            .acquire(Uuid::new_v4(), JobKind::Synthesis, WAIT, HOLD)
            .await
            .unwrap();
        assert!(!slot.is_free());
        assert_eq!(slot.current().unwrap().id, lease.id);

        assert!(slot.release(&lease));
        assert!(slot.is_free());
    }

    #[tokio::test]
    async fn test_second_acquire_times_out() {
        let slot = ExecutionSlot::new(Uuid::new_v4());
        let _lease = slot
            .acquire(Uuid::new_v4(), JobKind::Synthesis, WAIT, HOLD)
            .await
            .unwrap();

        let err = slot
            .acquire(
                Uuid::new_v4(),
                JobKind::Transcription,
                Duration::from_millis(50),
                HOLD,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VoxletError::SlotTimeout(_)));
        // The timed-out caller left no side effects
        assert!(!slot.is_free());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let slot = ExecutionSlot::new(Uuid::new_v4());
        let lease = slot
            .acquire(Uuid::new_v4(), JobKind::Synthesis, WAIT, HOLD)
            .await
            .unwrap();

        assert!(slot.release(&lease));
        assert!(!slot.release(&lease));
        assert!(slot.is_free());
    }

    #[tokio::test]
    async fn test_expired_lease_is_force_released() {
        let slot = ExecutionSlot::new(Uuid::new_v4());
        let lease = slot
            .acquire(
                Uuid::new_v4(),
                JobKind::Synthesis,
                WAIT,
                Duration::from_millis(20),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        let evicted = slot.sweep_expired().unwrap();
        assert_eq!(evicted.id, lease.id);
        assert!(slot.is_free());

        // A different job can now acquire without manual intervention
        let next = slot
            .acquire(Uuid::new_v4(), JobKind::Transcription, WAIT, HOLD)
            .await
            .unwrap();

        // The original holder's late release matches on lease identity
        // and is a no-op, not a theft of the new lease
        assert!(!slot.release(&lease));
        assert_eq!(slot.current().unwrap().id, next.id);
    }

    #[tokio::test]
    async fn test_sweep_ignores_live_lease() {
        let slot = ExecutionSlot::new(Uuid::new_v4());
        let _lease = slot
            .acquire(Uuid::new_v4(), JobKind::Synthesis, WAIT, HOLD)
            .await
            .unwrap();
        assert!(slot.sweep_expired().is_none());
        assert!(!slot.is_free());
    }

    #[tokio::test]
    async fn test_waiter_proceeds_after_release() {
        let slot = Arc::new(ExecutionSlot::new(Uuid::new_v4()));
        let lease = slot
            .acquire(Uuid::new_v4(), JobKind::Synthesis, WAIT, HOLD)
            .await
            .unwrap();

        let waiter = {
            let slot = slot.clone();
            tokio::spawn(async move {
                slot.acquire(Uuid::new_v4(), JobKind::Transcription, Duration::from_secs(5), HOLD)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(slot.release(&lease));

        let granted = waiter.await.unwrap().unwrap();
        assert_ne!(granted.id, lease.id);
    }
}
