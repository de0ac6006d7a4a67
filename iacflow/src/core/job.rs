//! The job record and its append-only log.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use super::{CloudProvider, JobKind, JobStatus, Severity};
use crate::errors::StoreError;

/// A single line in a job's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// When the entry was appended.
    pub timestamp: DateTime<Utc>,
    /// The (already redacted) message.
    pub message: String,
    /// Entry severity.
    pub severity: Severity,
}

/// One tracked execution of a pipeline for a workspace.
///
/// A `Job` returned from a repository is a snapshot; mutating it does not
/// affect the stored record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier.
    pub id: Uuid,
    /// Infrastructure or application job.
    pub kind: JobKind,
    /// Owning workspace (opaque to the engine).
    pub workspace_id: String,
    /// Lifecycle status.
    pub status: JobStatus,
    /// Label of the current pipeline stage.
    pub stage: String,
    /// Every stage the job has entered, in order.
    #[serde(default)]
    pub stage_history: Vec<String>,
    /// Append-only log.
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    /// Target provider, once a pipeline has been started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<CloudProvider>,
    /// When the job was created.
    pub start_time: DateTime<Utc>,
    /// When the job reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Human-readable failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Flattened IaC outputs captured after a successful apply.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, String>,
    /// Free-form caller context (purpose tag, working directory, ...).
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Stage label of a job that no pipeline has picked up yet.
pub const CREATED_STAGE: &str = "created";

impl Job {
    /// Creates a new job in the `Init` status.
    #[must_use]
    pub fn new(
        kind: JobKind,
        workspace_id: impl Into<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            workspace_id: workspace_id.into(),
            status: JobStatus::Init,
            stage: CREATED_STAGE.to_string(),
            stage_history: Vec::new(),
            logs: Vec::new(),
            provider: None,
            start_time: Utc::now(),
            end_time: None,
            error: None,
            outputs: BTreeMap::new(),
            metadata,
        }
    }

    /// Appends a log entry, returning a reference to it.
    ///
    /// Timestamps are strictly increasing within a job: when the clock has
    /// not advanced past the previous entry the new one is placed one
    /// microsecond after it.
    pub fn push_log(&mut self, severity: Severity, message: impl Into<String>) -> &LogEntry {
        let now = Utc::now();
        let timestamp = match self.logs.last() {
            Some(last) if now <= last.timestamp => last.timestamp + Duration::microseconds(1),
            _ => now,
        };

        self.logs.push(LogEntry {
            timestamp,
            message: message.into(),
            severity,
        });
        &self.logs[self.logs.len() - 1]
    }

    /// Moves the job to a new status.
    pub fn transition(&mut self, next: JobStatus) -> Result<(), StoreError> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                job_id: self.id,
                from: self.status,
                to: next,
            });
        }

        self.status = next;
        if next.is_terminal() {
            self.end_time = Some(Utc::now());
        }
        Ok(())
    }

    /// Enters a new pipeline stage.
    ///
    /// A stage that was already entered can not be entered again, which
    /// keeps the stage label moving strictly forward.
    pub fn enter_stage(&mut self, stage: impl Into<String>) -> Result<(), StoreError> {
        let stage = stage.into();
        if self.stage_history.iter().any(|s| s == &stage) {
            return Err(StoreError::StageRegression {
                job_id: self.id,
                current: self.stage.clone(),
                requested: stage,
            });
        }

        self.stage_history.push(stage.clone());
        self.stage = stage;
        Ok(())
    }

    /// Returns the messages of all log entries with the given severity.
    #[must_use]
    pub fn messages_with(&self, severity: Severity) -> Vec<&str> {
        self.logs
            .iter()
            .filter(|entry| entry.severity == severity)
            .map(|entry| entry.message.as_str())
            .collect()
    }

    /// Returns true if any log message contains `needle`.
    #[must_use]
    pub fn log_contains(&self, needle: &str) -> bool {
        self.logs.iter().any(|entry| entry.message.contains(needle))
    }
}
