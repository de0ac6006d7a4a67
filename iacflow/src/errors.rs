//! Error types for the iacflow engine.
//!
//! Every stage failure is converted into one of these errors, logged to the
//! job and turned into a `Failed` status. Only [`OutputParseError`] and
//! [`PersistenceError`] are downgraded and never fail a job.

use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

use crate::core::{CloudProvider, JobStatus};

/// The main error type for iacflow operations.
#[derive(Debug, Error)]
pub enum IacflowError {
    /// No usable credential material.
    #[error("{0}")]
    Credential(#[from] CredentialError),

    /// A structural input check failed before any external call.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// The IaC tool exited non-zero, timed out or was cancelled.
    #[error("{0}")]
    Command(#[from] CommandError),

    /// A provider account sanity check failed.
    #[error("{0}")]
    Preflight(#[from] PreflightError),

    /// The tool's structured output could not be parsed.
    #[error("{0}")]
    OutputParse(#[from] OutputParseError),

    /// The persistence bridge failed.
    #[error("{0}")]
    Persistence(#[from] PersistenceError),

    /// The job repository rejected an operation.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// The job was cancelled.
    #[error("Job cancelled: {0}")]
    Cancelled(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IacflowError {
    /// Returns a short machine-friendly category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Credential(_) => "credential",
            Self::Validation(_) => "validation",
            Self::Command(_) => "command",
            Self::Preflight(_) => "preflight",
            Self::OutputParse(_) => "output_parse",
            Self::Persistence(_) => "persistence",
            Self::Store(_) => "store",
            Self::Cancelled(_) => "cancelled",
            Self::Io(_) => "io",
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!(self.category()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// Errors raised while resolving cloud credentials.
#[derive(Debug, Clone, Error)]
pub enum CredentialError {
    /// A required connection field is absent or empty.
    #[error("{provider} connection is missing required field '{field}'")]
    MissingField {
        /// The provider being resolved.
        provider: CloudProvider,
        /// The missing field.
        field: String,
    },

    /// The connection record does not match the requested provider.
    #[error("Connection record is for {actual}, but {expected} credentials were requested")]
    ProviderMismatch {
        /// The requested provider.
        expected: CloudProvider,
        /// The provider the record belongs to.
        actual: CloudProvider,
    },

    /// The stored connection record could not be decoded.
    #[error("Invalid {provider} connection record: {reason}")]
    InvalidConnection {
        /// The provider being resolved.
        provider: CloudProvider,
        /// Why decoding failed.
        reason: String,
    },

    /// AWS STS refused or failed the AssumeRole call.
    #[error("AssumeRole for {role_arn} failed: {reason}")]
    AssumeRole {
        /// The role that was assumed.
        role_arn: String,
        /// The failure reason.
        reason: String,
    },

    /// An OAuth refresh-token exchange failed.
    #[error("{provider} token refresh failed: {reason}")]
    TokenRefresh {
        /// The provider being resolved.
        provider: CloudProvider,
        /// The failure reason.
        reason: String,
    },

    /// Every strategy was exhausted.
    #[error("No usable {provider} credentials: {hint}")]
    NoUsableCredentials {
        /// The provider being resolved.
        provider: CloudProvider,
        /// What the caller should do next.
        hint: String,
    },

    /// Writing a short-lived credential file failed.
    #[error("Failed to write credential file {path}: {reason}")]
    CredentialFile {
        /// The file being written.
        path: PathBuf,
        /// The failure reason.
        reason: String,
    },
}

impl CredentialError {
    /// Creates a missing field error.
    #[must_use]
    pub fn missing_field(provider: CloudProvider, field: impl Into<String>) -> Self {
        Self::MissingField {
            provider,
            field: field.into(),
        }
    }

    /// Creates the error returned when the user must reconnect their account.
    #[must_use]
    pub fn reconnect_required(provider: CloudProvider) -> Self {
        Self::NoUsableCredentials {
            provider,
            hint: format!(
                "no user credentials are stored for this {provider} connection; \
                 please reconnect your cloud account"
            ),
        }
    }
}

/// Errors raised by structural input checks.
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    /// A region string does not look like a cloud region.
    #[error("Invalid region '{0}': expected a value like 'us-east-1'")]
    MalformedRegion(String),

    /// A file-map key is not a safe relative path.
    #[error("Unsafe file path '{0}': paths must be relative and stay inside the working directory")]
    UnsafePath(String),

    /// A workspace identifier can not be used as a directory name.
    #[error("Invalid workspace id '{0}'")]
    InvalidWorkspaceId(String),

    /// A provider name was not recognised.
    #[error("Unknown cloud provider '{0}'")]
    UnknownProvider(String),

    /// Destroy was requested but no prior apply state exists.
    #[error(
        "No deployment state found for workspace '{workspace_id}' on {provider}; \
         the infrastructure may already be destroyed"
    )]
    StateNotFound {
        /// The workspace.
        workspace_id: String,
        /// The provider.
        provider: CloudProvider,
    },
}

/// Error raised when the IaC tool does not succeed.
#[derive(Debug, Clone, Error)]
#[error("{tool} {command} {}", describe_outcome(.exit_code, .timed_out, .cancelled))]
pub struct CommandError {
    /// Display name of the tool (e.g. "Terraform").
    pub tool: String,
    /// The tool sub-command (e.g. "plan").
    pub command: String,
    /// The exit code, `-1` for spawn failures, timeouts and cancellation.
    pub exit_code: i32,
    /// Whether the command hit the timeout.
    pub timed_out: bool,
    /// Whether the command was cancelled.
    pub cancelled: bool,
}

impl CommandError {
    /// Creates a command error for a non-zero exit.
    #[must_use]
    pub fn new(tool: impl Into<String>, command: impl Into<String>, exit_code: i32) -> Self {
        Self {
            tool: tool.into(),
            command: command.into(),
            exit_code,
            timed_out: false,
            cancelled: false,
        }
    }

    /// Marks the error as a timeout.
    #[must_use]
    pub fn with_timed_out(mut self, timed_out: bool) -> Self {
        self.timed_out = timed_out;
        self
    }

    /// Marks the error as a cancellation.
    #[must_use]
    pub fn with_cancelled(mut self, cancelled: bool) -> Self {
        self.cancelled = cancelled;
        self
    }
}

fn describe_outcome(exit_code: &i32, timed_out: &bool, cancelled: &bool) -> String {
    if *cancelled {
        "was cancelled".to_string()
    } else if *timed_out {
        "timed out".to_string()
    } else {
        format!("failed with exit code {exit_code}")
    }
}

/// Error raised when a provider account sanity check fails.
#[derive(Debug, Clone, Error)]
pub enum PreflightError {
    /// Billing is disabled for the target GCP project.
    #[error("Billing is not enabled for GCP project '{project_id}'. Enable billing and retry")]
    BillingDisabled {
        /// The project.
        project_id: String,
    },

    /// The check itself could not be completed.
    #[error("Preflight check for {provider} failed: {reason}")]
    CheckFailed {
        /// The provider.
        provider: CloudProvider,
        /// The failure reason.
        reason: String,
    },
}

/// Error raised when the tool's output can not be parsed.
#[derive(Debug, Clone, Error)]
#[error("Failed to parse tool outputs: {reason}")]
pub struct OutputParseError {
    /// The failure reason.
    pub reason: String,
}

impl OutputParseError {
    /// Creates a new output parse error.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Error raised when the persistence bridge fails.
#[derive(Debug, Clone, Error)]
#[error("Failed to persist state for workspace '{workspace_id}': {reason}")]
pub struct PersistenceError {
    /// The workspace.
    pub workspace_id: String,
    /// The failure reason.
    pub reason: String,
}

impl PersistenceError {
    /// Creates a new persistence error.
    #[must_use]
    pub fn new(workspace_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by job repositories.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// No job with the given id.
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    /// The status change would move a job backwards.
    #[error("Job {job_id}: invalid status transition {from} -> {to}")]
    InvalidTransition {
        /// The job.
        job_id: Uuid,
        /// The current status.
        from: JobStatus,
        /// The requested status.
        to: JobStatus,
    },

    /// The stage was already entered.
    #[error("Job {job_id}: stage '{requested}' can not follow '{current}'")]
    StageRegression {
        /// The job.
        job_id: Uuid,
        /// The current stage.
        current: String,
        /// The requested stage.
        requested: String,
    },

    /// A backing store failed.
    #[error("Job store backend error: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_error_message_embeds_stage_and_exit_code() {
        let err = CommandError::new("Terraform", "plan", 1);
        assert_eq!(err.to_string(), "Terraform plan failed with exit code 1");
    }

    #[test]
    fn test_command_error_timeout_message() {
        let err = CommandError::new("Terraform", "apply", -1).with_timed_out(true);
        assert_eq!(err.to_string(), "Terraform apply timed out");
    }

    #[test]
    fn test_command_error_cancelled_message() {
        let err = CommandError::new("Terraform", "apply", -1).with_cancelled(true);
        assert_eq!(err.to_string(), "Terraform apply was cancelled");
    }

    #[test]
    fn test_state_not_found_mentions_already_destroyed() {
        let err = ValidationError::StateNotFound {
            workspace_id: "ws-1".to_string(),
            provider: CloudProvider::Aws,
        };
        assert!(err.to_string().contains("already destroyed"));
    }

    #[test]
    fn test_reconnect_required_hint() {
        let err = CredentialError::reconnect_required(CloudProvider::Azure);
        assert!(err.to_string().contains("reconnect"));
        assert!(err.to_string().contains("azure"));
    }

    #[test]
    fn test_error_to_dict() {
        let err: IacflowError = CredentialError::missing_field(CloudProvider::Aws, "role_arn").into();
        let dict = err.to_dict();

        assert_eq!(dict.get("type").unwrap(), "credential");
        assert!(dict.get("message").unwrap().as_str().unwrap().contains("role_arn"));
    }
}
