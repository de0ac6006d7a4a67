//! Job status, job kind and log severity enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// An IaC apply or destroy run.
    Infrastructure,
    /// A simulated application deployment.
    Application,
}

impl Default for JobKind {
    fn default() -> Self {
        Self::Infrastructure
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Application => write!(f, "application"),
        }
    }
}

/// The lifecycle status of a job.
///
/// Transitions only move forward: `Init → Running → Completed | Failed`.
/// A job that fails before it starts may go straight from `Init` to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created but not started.
    Init,
    /// A pipeline is executing.
    Running,
    /// The pipeline finished successfully.
    Completed,
    /// The pipeline halted on a failure.
    Failed,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Init
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl JobStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true if moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Init, Self::Running)
                | (Self::Init, Self::Failed)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
        )
    }
}

/// Severity of a job log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// The command line being executed.
    Cmd,
    /// Regular progress output.
    Info,
    /// Something worth a look that did not stop the job.
    Warn,
    /// A failure.
    Error,
    /// A stage or job finished successfully.
    Success,
    /// Engine bookkeeping (stage transitions, cleanup).
    System,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cmd => write!(f, "CMD"),
            Self::Info => write!(f, "INFO"),
            Self::Warn => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Success => write!(f, "SUCCESS"),
            Self::System => write!(f, "SYSTEM"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_display() {
        assert_eq!(JobStatus::Init.to_string(), "init");
        assert_eq!(JobStatus::Running.to_string(), "running");
        assert_eq!(JobStatus::Completed.to_string(), "completed");
        assert_eq!(JobStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_job_status_transitions() {
        assert!(JobStatus::Init.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Init.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Failed));

        assert!(!JobStatus::Running.can_transition_to(JobStatus::Init));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Init.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn test_job_status_is_terminal() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Init.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn test_severity_serialize() {
        let json = serde_json::to_string(&Severity::Success).unwrap();
        assert_eq!(json, r#""SUCCESS""#);

        let deserialized: Severity = serde_json::from_str(r#""CMD""#).unwrap();
        assert_eq!(deserialized, Severity::Cmd);
    }

    #[test]
    fn test_job_kind_serialize() {
        let json = serde_json::to_string(&JobKind::Application).unwrap();
        assert_eq!(json, r#""application""#);
    }
}
