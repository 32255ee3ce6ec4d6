//! In-memory job registry

use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;
use voxlet_core::{Job, JobStatus, VoxletError, VoxletResult};

type JobsMap = HashMap<Uuid, Job>;

/// Jobs indexed by id; the dispatcher writes, the API surface reads
pub struct JobRegistry {
    jobs: RwLock<JobsMap>,
}

impl JobRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Record a newly submitted job
    pub async fn insert(&self, job: Job) {
        self.jobs.write().await.insert(job.id, job);
    }

    /// Get a job snapshot
    pub async fn get(&self, id: Uuid) -> VoxletResult<Job> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| VoxletError::JobNotFound(id.to_string()))
    }

    /// List all job records
    pub async fn list(&self) -> Vec<Job> {
        self.jobs.read().await.values().cloned().collect()
    }

    /// Update a job's status
    pub async fn set_status(&self, id: Uuid, status: JobStatus) {
        self.update(id, |job| job.status = status).await;
    }

    /// Apply a mutation to a job record, ignoring unknown ids
    pub async fn update<F>(&self, id: Uuid, f: F)
    where
        F: FnOnce(&mut Job),
    {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(&id) {
            f(job);
        }
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxlet_core::{JobPayload, SynthesisRequest};

    fn test_job() -> Job {
        Job::new(
            JobPayload::Synthesis(SynthesisRequest {
                text: "hi".to_string(),
                ..SynthesisRequest::default()
            }),
            Some(300),
        )
    }

    #[tokio::test]
    async fn test_insert_get_update() {
        let registry = JobRegistry::new();
        let job = test_job();
        let id = job.id;

        registry.insert(job).await;
        assert_eq!(registry.get(id).await.unwrap().status, JobStatus::Queued);

        registry.set_status(id, JobStatus::Running).await;
        assert_eq!(registry.get(id).await.unwrap().status, JobStatus::Running);

        registry.update(id, |j| j.attempts = 2).await;
        assert_eq!(registry.get(id).await.unwrap().attempts, 2);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let registry = JobRegistry::new();
        let result = registry.get(Uuid::new_v4()).await;
        assert!(matches!(result, Err(VoxletError::JobNotFound(_))));
    }
}
