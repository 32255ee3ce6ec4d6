//! Job dispatch
//!
//! A small pool of workers consumes the inbound queue in arrival order. Each
//! job is bound to a node and its execution slot, invoked with a wall-clock
//! budget, and retried with backoff on transient failures up to the attempt
//! ceiling. A timed-out execution force-releases its lease; the node itself
//! stays up for the next job.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;
use voxlet_core::{Job, JobConfig, JobOutput, JobPayload, JobStatus, VoxletError, VoxletResult};
use voxlet_node::{InferenceClient, NodeCoordinator};

use crate::registry::JobRegistry;

const QUEUE_CAPACITY: usize = 256;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(10);

struct QueuedJob {
    job_id: Uuid,
    done: oneshot::Sender<VoxletResult<JobOutput>>,
}

/// Caller-side handle to a submitted job
pub struct JobHandle {
    /// Job identifier, usable for registry lookups
    pub job_id: Uuid,
    done: oneshot::Receiver<VoxletResult<JobOutput>>,
}

impl JobHandle {
    /// Wait for the job to reach a terminal state and return its outcome
    pub async fn wait(self) -> VoxletResult<JobOutput> {
        self.done
            .await
            .map_err(|_| VoxletError::Internal("dispatcher shut down".to_string()))?
    }
}

/// Dispatches jobs from an inbound queue onto nodes
pub struct JobDispatcher {
    config: JobConfig,
    registry: Arc<JobRegistry>,
    coordinator: Arc<NodeCoordinator>,
    client: Arc<dyn InferenceClient>,
    queue: mpsc::Sender<QueuedJob>,
}

impl JobDispatcher {
    /// Create a dispatcher and spawn its worker pool
    pub fn start(
        config: JobConfig,
        registry: Arc<JobRegistry>,
        coordinator: Arc<NodeCoordinator>,
        client: Arc<dyn InferenceClient>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);

        let dispatcher = Arc::new(Self {
            config,
            registry,
            coordinator,
            client,
            queue: tx,
        });

        let rx = Arc::new(Mutex::new(rx));
        for worker_id in 0..dispatcher.config.workers {
            let dispatcher = dispatcher.clone();
            let rx = rx.clone();
            tokio::spawn(async move {
                dispatcher.worker_loop(worker_id, rx).await;
            });
        }

        info!(workers = dispatcher.config.workers, "Job dispatcher started");
        dispatcher
    }

    /// Submit a job for execution.
    ///
    /// `timeout_secs` overrides the configured per-job budget when given.
    pub async fn submit(
        &self,
        payload: JobPayload,
        timeout_secs: Option<u64>,
    ) -> VoxletResult<JobHandle> {
        let job = Job::new(payload, timeout_secs);
        let job_id = job.id;

        info!(job_id = %job_id, kind = %job.kind, "Job submitted");
        self.registry.insert(job).await;

        let (done_tx, done_rx) = oneshot::channel();
        self.queue
            .send(QueuedJob {
                job_id,
                done: done_tx,
            })
            .await
            .map_err(|_| VoxletError::ResourceExhausted("job queue closed".to_string()))?;

        Ok(JobHandle {
            job_id,
            done: done_rx,
        })
    }

    async fn worker_loop(self: Arc<Self>, worker_id: u32, rx: Arc<Mutex<mpsc::Receiver<QueuedJob>>>) {
        debug!(worker_id = worker_id, "Dispatch worker started");

        loop {
            let queued = { rx.lock().await.recv().await };
            let Some(queued) = queued else {
                break;
            };

            let result = self.process(queued.job_id).await;
            // A dropped handle just means the caller stopped waiting
            let _ = queued.done.send(result);
        }

        debug!(worker_id = worker_id, "Dispatch worker stopped");
    }

    async fn process(&self, job_id: Uuid) -> VoxletResult<JobOutput> {
        let job = self.registry.get(job_id).await?;
        self.registry.set_status(job_id, JobStatus::Dispatched).await;

        let mut delay = RETRY_BASE_DELAY;
        let mut attempt = 0u32;

        let result = loop {
            attempt += 1;
            self.registry.update(job_id, |j| j.attempts = attempt).await;

            match self.run_attempt(&job, attempt).await {
                Ok(output) => break Ok(output),
                Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
                    warn!(
                        job_id = %job_id,
                        attempt = attempt,
                        error = %e,
                        "Job attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(RETRY_MAX_DELAY);
                }
                Err(e) => break Err(e),
            }
        };

        match &result {
            Ok(_) => {
                info!(job_id = %job_id, attempts = attempt, "Job completed");
                self.registry.set_status(job_id, JobStatus::Completed).await;
            }
            Err(e) => {
                warn!(job_id = %job_id, attempts = attempt, error = %e, "Job failed");
                let failure = e.to_string();
                self.registry
                    .update(job_id, |j| {
                        j.status = JobStatus::Failed;
                        j.failure = Some(failure);
                    })
                    .await;
            }
        }

        result
    }

    /// One execution attempt: node, slot, bounded inference call
    async fn run_attempt(&self, job: &Job, attempt: u32) -> VoxletResult<JobOutput> {
        let node = self.coordinator.acquire().await?;

        let budget_secs = job.timeout_secs.unwrap_or(self.config.job_timeout_secs);
        let budget = Duration::from_secs(budget_secs);
        let lease = node
            .slot
            .acquire(job.id, job.kind, self.config.slot_wait(), budget)
            .await?;

        self.coordinator.mark_busy(node.node_id).await;
        self.registry
            .update(job.id, |j| {
                j.status = JobStatus::Running;
                j.assigned_node = Some(node.node_id);
            })
            .await;

        let outcome = tokio::time::timeout(budget, self.client.infer(&node.endpoint, &job.payload)).await;

        // Release whether we finished, failed, or timed out; a lease already
        // swept by the coordinator makes this a no-op. The coordinator
        // re-checks the slot itself, so a concurrent acquire keeps the node
        // marked busy.
        node.slot.release(&lease);
        self.coordinator.mark_idle(node.node_id).await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(VoxletError::JobTimeout {
                reason: format!("execution exceeded {}s", budget_secs),
                attempts: attempt,
            }),
        }
    }
}
