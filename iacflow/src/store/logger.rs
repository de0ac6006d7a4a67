//! Per-job log writer.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::JobRepository;
use crate::core::Severity;
use crate::credentials::RedactionRegistry;

/// Appends redacted entries to one job's log.
///
/// Cloning a logger shares its redaction registry, so secrets registered
/// after credential resolution are hidden from every clone. Append failures
/// are reported to `tracing` and otherwise ignored.
#[derive(Clone)]
pub struct JobLogger {
    store: Arc<dyn JobRepository>,
    job_id: Uuid,
    redaction: Arc<RwLock<RedactionRegistry>>,
}

impl JobLogger {
    /// Creates a logger for `job_id`.
    #[must_use]
    pub fn new(store: Arc<dyn JobRepository>, job_id: Uuid) -> Self {
        Self {
            store,
            job_id,
            redaction: Arc::new(RwLock::new(RedactionRegistry::new())),
        }
    }

    /// The job this logger writes to.
    #[must_use]
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Hides the sensitive values of `env_vars` from all later entries.
    pub fn register_secrets(&self, env_vars: &HashMap<String, String>) {
        self.redaction.write().register_env_vars(env_vars);
    }

    /// Redacts registered secrets from `message`.
    #[must_use]
    pub fn redact(&self, message: &str) -> String {
        self.redaction.read().redact(message)
    }

    /// Appends an entry.
    pub async fn log(&self, severity: Severity, message: impl AsRef<str>) {
        let message = self.redact(message.as_ref());
        debug!(job_id = %self.job_id, severity = %severity, "{}", message);
        if let Err(e) = self.store.append_log(self.job_id, severity, message).await {
            warn!(job_id = %self.job_id, error = %e, "failed to append job log entry");
        }
    }

    /// Appends a `CMD` entry.
    pub async fn cmd(&self, message: impl AsRef<str>) {
        self.log(Severity::Cmd, message).await;
    }

    /// Appends an `INFO` entry.
    pub async fn info(&self, message: impl AsRef<str>) {
        self.log(Severity::Info, message).await;
    }

    /// Appends a `WARN` entry.
    pub async fn warn(&self, message: impl AsRef<str>) {
        self.log(Severity::Warn, message).await;
    }

    /// Appends an `ERROR` entry.
    pub async fn error(&self, message: impl AsRef<str>) {
        self.log(Severity::Error, message).await;
    }

    /// Appends a `SUCCESS` entry.
    pub async fn success(&self, message: impl AsRef<str>) {
        self.log(Severity::Success, message).await;
    }

    /// Appends a `SYSTEM` entry.
    pub async fn system(&self, message: impl AsRef<str>) {
        self.log(Severity::System, message).await;
    }
}

impl std::fmt::Debug for JobLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobLogger")
            .field("job_id", &self.job_id)
            .field("redacted_secrets", &self.redaction.read().len())
            .finish_non_exhaustive()
    }
}
