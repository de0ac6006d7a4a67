//! In-memory job repository.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

use super::JobRepository;
use crate::core::{CloudProvider, Job, JobKind, JobStatus, Severity};
use crate::errors::StoreError;

/// Process-local job repository.
///
/// A concurrent map of per-job mutexes: writers to different jobs never
/// contend, and readers only hold a job's lock long enough to clone it.
/// Jobs live until the process exits.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: DashMap<Uuid, Arc<Mutex<Job>>>,
}

impl InMemoryJobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn with_job<T>(&self, job_id: Uuid, f: impl FnOnce(&mut Job) -> Result<T, StoreError>) -> Result<T, StoreError> {
        // Clone the Arc so the shard lock is released before locking the job.
        let entry = self
            .jobs
            .get(&job_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or(StoreError::NotFound(job_id))?;
        let mut job = entry.lock();
        f(&mut job)
    }
}

#[async_trait]
impl JobRepository for InMemoryJobStore {
    async fn create(
        &self,
        kind: JobKind,
        workspace_id: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<Job, StoreError> {
        let job = Job::new(kind, workspace_id, metadata);
        self.jobs.insert(job.id, Arc::new(Mutex::new(job.clone())));
        Ok(job)
    }

    async fn get(&self, job_id: Uuid) -> Option<Job> {
        let entry = self.jobs.get(&job_id).map(|e| Arc::clone(e.value()))?;
        let job = entry.lock().clone();
        Some(job)
    }

    async fn append_log(&self, job_id: Uuid, severity: Severity, message: String) -> Result<(), StoreError> {
        self.with_job(job_id, |job| {
            job.push_log(severity, message);
            Ok(())
        })
    }

    async fn set_stage(&self, job_id: Uuid, stage: &str) -> Result<(), StoreError> {
        self.with_job(job_id, |job| job.enter_stage(stage))
    }

    async fn set_status(&self, job_id: Uuid, status: JobStatus) -> Result<(), StoreError> {
        self.with_job(job_id, |job| job.transition(status))
    }

    async fn compare_and_set_status(&self, job_id: Uuid, from: JobStatus, to: JobStatus) -> Result<(), StoreError> {
        self.with_job(job_id, |job| {
            if job.status != from {
                return Err(StoreError::InvalidTransition {
                    job_id,
                    from: job.status,
                    to,
                });
            }
            job.transition(to)
        })
    }

    async fn set_provider(&self, job_id: Uuid, provider: CloudProvider) -> Result<(), StoreError> {
        self.with_job(job_id, |job| {
            job.provider = Some(provider);
            Ok(())
        })
    }

    async fn set_error(&self, job_id: Uuid, error: String) -> Result<(), StoreError> {
        self.with_job(job_id, |job| {
            job.error = Some(error);
            Ok(())
        })
    }

    async fn set_outputs(&self, job_id: Uuid, outputs: BTreeMap<String, String>) -> Result<(), StoreError> {
        self.with_job(job_id, |job| {
            job.outputs = outputs;
            Ok(())
        })
    }

    async fn list(&self) -> Vec<Job> {
        let entries: Vec<Arc<Mutex<Job>>> = self.jobs.iter().map(|e| Arc::clone(e.value())).collect();
        let mut jobs: Vec<Job> = entries.iter().map(|e| e.lock().clone()).collect();
        jobs.sort_by_key(|job| job.start_time);
        jobs
    }
}
