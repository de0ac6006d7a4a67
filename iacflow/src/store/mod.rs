//! Job repository.
//!
//! Pipelines write to the repository one stage at a time while status
//! pollers read from arbitrary tasks, so every implementation must be safe
//! for concurrent use. Reads return snapshots.

mod logger;
mod memory;

#[cfg(test)]
mod store_tests;

pub use logger::JobLogger;
pub use memory::InMemoryJobStore;

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::core::{CloudProvider, Job, JobKind, JobStatus, Severity};
use crate::errors::StoreError;

/// Storage for job records.
///
/// Implementations enforce the job invariants: logs are append-only with
/// strictly increasing timestamps, stages never repeat and statuses only
/// move forward.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Creates a job in the `Init` status.
    async fn create(
        &self,
        kind: JobKind,
        workspace_id: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<Job, StoreError>;

    /// Returns a snapshot of a job.
    async fn get(&self, job_id: Uuid) -> Option<Job>;

    /// Appends a log entry.
    async fn append_log(&self, job_id: Uuid, severity: Severity, message: String) -> Result<(), StoreError>;

    /// Enters a new stage.
    async fn set_stage(&self, job_id: Uuid, stage: &str) -> Result<(), StoreError>;

    /// Moves the job to a new status.
    async fn set_status(&self, job_id: Uuid, status: JobStatus) -> Result<(), StoreError>;

    /// Moves the job from `from` to `to` in one step.
    ///
    /// Fails with `InvalidTransition` when the job is not currently in
    /// `from`, so of several concurrent callers exactly one succeeds.
    async fn compare_and_set_status(&self, job_id: Uuid, from: JobStatus, to: JobStatus) -> Result<(), StoreError>;

    /// Records the target provider.
    async fn set_provider(&self, job_id: Uuid, provider: CloudProvider) -> Result<(), StoreError>;

    /// Records the failure reason.
    async fn set_error(&self, job_id: Uuid, error: String) -> Result<(), StoreError>;

    /// Records the flattened tool outputs.
    async fn set_outputs(&self, job_id: Uuid, outputs: BTreeMap<String, String>) -> Result<(), StoreError>;

    /// Returns snapshots of every job, oldest first.
    async fn list(&self) -> Vec<Job>;
}
