//! Command request and result types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cancellation::CancellationToken;

/// One tool invocation.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    /// Tool sub-command (`init`, `plan`, `apply`, `destroy`, `output`).
    pub command: String,
    /// Arguments after the sub-command.
    pub args: Vec<String>,
    /// Working directory.
    pub work_dir: PathBuf,
    /// Job-specific environment, overriding the inherited environment.
    pub env_vars: HashMap<String, String>,
    /// Buffer stdout into the result instead of logging it line by line.
    pub capture_stdout: bool,
    /// Kills the process when triggered.
    pub cancel: Option<Arc<CancellationToken>>,
}

impl CommandRequest {
    /// Creates a request with no arguments.
    #[must_use]
    pub fn new(command: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            work_dir: work_dir.into(),
            env_vars: HashMap::new(),
            capture_stdout: false,
            cancel: None,
        }
    }

    /// Sets the arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the job environment.
    #[must_use]
    pub fn with_env(mut self, env_vars: HashMap<String, String>) -> Self {
        self.env_vars = env_vars;
        self
    }

    /// Captures stdout into [`CommandResult::stdout`].
    #[must_use]
    pub fn capturing_stdout(mut self) -> Self {
        self.capture_stdout = true;
        self
    }

    /// Attaches a cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel = Some(token);
        self
    }

    /// The command line as shown in job logs.
    #[must_use]
    pub fn display_line(&self, binary: &str) -> String {
        let mut parts = vec![binary.to_string(), self.command.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Outcome of one tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    /// True only for exit code 0.
    pub success: bool,
    /// Process exit code, `-1` when there is none.
    pub exit_code: i32,
    /// The hard timeout fired.
    pub timed_out: bool,
    /// The job was cancelled while the command ran.
    pub cancelled: bool,
    /// Captured stdout, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
}

impl CommandResult {
    /// A process that exited with `exit_code`.
    #[must_use]
    pub fn exited(exit_code: i32) -> Self {
        Self {
            success: exit_code == 0,
            exit_code,
            ..Self::default()
        }
    }

    /// A successful run.
    #[must_use]
    pub fn ok() -> Self {
        Self::exited(0)
    }

    /// A command that never ran or produced no exit code.
    #[must_use]
    pub fn not_run() -> Self {
        Self::exited(-1)
    }

    /// A command killed by the timeout.
    #[must_use]
    pub fn timed_out() -> Self {
        Self {
            timed_out: true,
            ..Self::not_run()
        }
    }

    /// A command killed by cancellation.
    #[must_use]
    pub fn cancelled() -> Self {
        Self {
            cancelled: true,
            ..Self::not_run()
        }
    }

    /// Attaches captured stdout.
    #[must_use]
    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = Some(stdout.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_mapping() {
        assert!(CommandResult::exited(0).success);
        assert!(!CommandResult::exited(1).success);
        assert_eq!(CommandResult::timed_out().exit_code, -1);
        assert!(CommandResult::timed_out().timed_out);
        assert!(!CommandResult::cancelled().success);
    }

    #[test]
    fn test_display_line() {
        let request = CommandRequest::new("plan", "/tmp").with_args(["-input=false", "-no-color"]);
        assert_eq!(request.display_line("terraform"), "terraform plan -input=false -no-color");
    }
}
