//! Child-process command runner.

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{CommandRequest, CommandResult, CommandRunner};
use crate::config::OrchestratorConfig;
use crate::credentials::{is_valid_aws_region, RedactionRegistry};
use crate::errors::ValidationError;
use crate::store::JobLogger;

/// Variables that stop the tool from reading ambient local cloud config.
pub const HARDENING_ENV: &[(&str, &str)] = &[
    ("AWS_CONFIG_FILE", "/dev/null"),
    ("AWS_SHARED_CREDENTIALS_FILE", "/dev/null"),
];

/// How long to wait for output readers after the process has exited.
const IO_CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);

const REGION_KEYS: &[&str] = &["AWS_REGION", "AWS_DEFAULT_REGION"];

/// Runs the IaC tool as a child process.
///
/// Output is streamed into the job log as it arrives: stdout lines at
/// `INFO`, stderr lines at `ERROR` when they mention an error and `WARN`
/// otherwise. Every line is redacted first.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    binary: String,
    display_name: String,
    timeout: Duration,
}

enum Outcome {
    Exited(Option<i32>),
    WaitFailed(std::io::Error),
    TimedOut,
    Cancelled,
}

impl ProcessRunner {
    /// Creates a runner for `binary` with a hard timeout.
    #[must_use]
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        let binary = binary.into();
        Self {
            display_name: binary.clone(),
            binary,
            timeout,
        }
    }

    /// Creates a runner from the orchestrator configuration.
    #[must_use]
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(config.tool_binary.clone(), config.command_timeout())
            .with_display_name(config.tool_display_name.clone())
    }

    /// Sets the name used in log messages.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// The binary this runner spawns.
    #[must_use]
    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn check_regions(request: &CommandRequest) -> Result<(), ValidationError> {
        for key in REGION_KEYS {
            if let Some(region) = request.env_vars.get(*key) {
                if !is_valid_aws_region(region) {
                    return Err(ValidationError::MalformedRegion(region.clone()));
                }
            }
        }
        Ok(())
    }

    fn build_command(&self, request: &CommandRequest) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(&request.command)
            .args(&request.args)
            .current_dir(&request.work_dir)
            .envs(&request.env_vars)
            .envs(HARDENING_ENV.iter().copied())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn wait(&self, child: &mut Child, log: &JobLogger, request: &CommandRequest) -> Outcome {
        let cancelled = async {
            match &request.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            result = child.wait() => match result {
                Ok(status) => Outcome::Exited(status.code()),
                Err(e) => Outcome::WaitFailed(e),
            },
            () = tokio::time::sleep(self.timeout) => {
                log.error(format!(
                    "{} {} timed out after {} seconds; terminating process",
                    self.display_name,
                    request.command,
                    self.timeout.as_secs()
                ))
                .await;
                self.terminate(child, log).await;
                Outcome::TimedOut
            }
            () = cancelled => {
                let reason = request
                    .cancel
                    .as_ref()
                    .and_then(|t| t.reason())
                    .unwrap_or_else(|| "cancelled".to_string());
                log.warn(format!(
                    "{} {} cancelled ({reason}); terminating process",
                    self.display_name, request.command
                ))
                .await;
                self.terminate(child, log).await;
                Outcome::Cancelled
            }
        }
    }

    async fn terminate(&self, child: &mut Child, log: &JobLogger) {
        if let Err(e) = child.kill().await {
            warn!(job_id = %log.job_id(), error = %e, "failed to kill process");
            log.error(format!("Failed to terminate {} process: {e}", self.display_name))
                .await;
        }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, log: &JobLogger, request: CommandRequest) -> CommandResult {
        if let Err(e) = Self::check_regions(&request) {
            log.error(format!(
                "{e}. Refusing to run {} {}",
                self.display_name, request.command
            ))
            .await;
            return CommandResult::not_run();
        }
        if request.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            log.warn(format!("{} {} skipped: job cancelled", self.display_name, request.command))
                .await;
            return CommandResult::cancelled();
        }

        let redaction = Arc::new(RedactionRegistry::from_env_vars(&request.env_vars));
        log.cmd(redaction.redact(&request.display_line(&self.binary))).await;

        let mut child = match self.build_command(&request).spawn() {
            Ok(child) => child,
            Err(e) => {
                log.error(format!("Failed to start {}: {e}", self.binary)).await;
                return CommandResult::not_run();
            }
        };
        info!(
            job_id = %log.job_id(),
            command = %request.command,
            pid = ?child.id(),
            "spawned IaC tool"
        );

        let stdout_task = child.stdout.take().map(|out| {
            tokio::spawn(pump_stdout(out, log.clone(), Arc::clone(&redaction), request.capture_stdout))
        });
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(pump_stderr(err, log.clone(), Arc::clone(&redaction))));

        let outcome = self.wait(&mut child, log, &request).await;

        let captured = drain(stdout_task, IO_CAPTURE_TIMEOUT).await.flatten();
        drain(stderr_task, IO_CAPTURE_TIMEOUT).await;

        let result = match outcome {
            Outcome::Exited(Some(code)) => CommandResult::exited(code),
            Outcome::Exited(None) => {
                log.error(format!("{} {} was terminated by a signal", self.display_name, request.command))
                    .await;
                CommandResult::not_run()
            }
            Outcome::WaitFailed(e) => {
                log.error(format!("Failed to wait for {}: {e}", self.binary)).await;
                CommandResult::not_run()
            }
            Outcome::TimedOut => CommandResult::timed_out(),
            Outcome::Cancelled => CommandResult::cancelled(),
        };
        debug!(job_id = %log.job_id(), command = %request.command, exit_code = result.exit_code, "IaC tool finished");

        match captured {
            Some(stdout) => result.with_stdout(stdout),
            None => result,
        }
    }
}

async fn pump_stdout<R>(
    reader: R,
    log: JobLogger,
    redaction: Arc<RedactionRegistry>,
    capture: bool,
) -> Option<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut captured = capture.then(String::new);
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                match captured.as_mut() {
                    Some(out) => out.push_str(&line),
                    None => {
                        let line = line.trim_end_matches(['\r', '\n']);
                        log.info(redaction.redact(line)).await;
                    }
                }
            }
            Err(e) => {
                warn!(job_id = %log.job_id(), error = %e, "stdout read failed");
                break;
            }
        }
    }
    captured
}

async fn pump_stderr<R>(reader: R, log: JobLogger, redaction: Arc<RedactionRegistry>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let raw = String::from_utf8_lossy(&buf);
                let line = redaction.redact(raw.trim_end_matches(['\r', '\n']));
                if line.to_ascii_lowercase().contains("error") {
                    log.error(line).await;
                } else {
                    log.warn(line).await;
                }
            }
            Err(e) => {
                warn!(job_id = %log.job_id(), error = %e, "stderr read failed");
                break;
            }
        }
    }
}

/// Waits up to `limit` for a reader task. A reader still running after
/// that is aborted so nothing more reaches the job log.
async fn drain<T>(task: Option<JoinHandle<T>>, limit: Duration) -> Option<T> {
    let mut task = task?;
    match timeout(limit, &mut task).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            warn!(error = %e, "output reader task failed");
            None
        }
        Err(_) => {
            task.abort();
            warn!("output capture timed out; reader aborted");
            None
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::cancellation::CancellationToken;
    use crate::core::{Job, JobKind, Severity};
    use crate::store::{InMemoryJobStore, JobRepository};
    use std::collections::HashMap;
    use std::path::Path;

    async fn setup() -> (Arc<dyn JobRepository>, JobLogger) {
        let store: Arc<dyn JobRepository> = Arc::new(InMemoryJobStore::new());
        let job = store.create(JobKind::Infrastructure, "ws", HashMap::new()).await.unwrap();
        let log = JobLogger::new(Arc::clone(&store), job.id);
        (store, log)
    }

    async fn job(store: &Arc<dyn JobRepository>, log: &JobLogger) -> Job {
        store.get(log.job_id()).await.unwrap()
    }

    fn shell(script: &str, dir: &Path) -> CommandRequest {
        CommandRequest::new("-c", dir).with_args([script])
    }

    fn runner() -> ProcessRunner {
        ProcessRunner::new("sh", Duration::from_secs(20)).with_display_name("Shell")
    }

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_malformed_region_never_spawns() {
        let (store, log) = setup().await;
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("spawned");

        for region in ["us-east1", "US-EAST-1", "useast1", "us-east-1; rm -rf /"] {
            let request = shell(&format!("touch {}", marker.display()), dir.path())
                .with_env(env(&[("AWS_REGION", region)]));
            let result = runner().run(&log, request).await;

            assert!(!result.success);
            assert_eq!(result.exit_code, -1);
            assert!(!marker.exists(), "spawned for {region}");
        }

        let job = job(&store, &log).await;
        assert!(job.messages_with(Severity::Error)[0].contains("Invalid region 'us-east1'"));
        assert!(job.messages_with(Severity::Cmd).is_empty());
    }

    #[tokio::test]
    async fn test_valid_region_spawns() {
        let (_store, log) = setup().await;
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("spawned");

        let request = shell(&format!("touch {}", marker.display()), dir.path())
            .with_env(env(&[("AWS_REGION", "us-east-1"), ("AWS_DEFAULT_REGION", "us-east-1")]));
        let result = runner().run(&log, request).await;

        assert!(result.success);
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn test_streams_are_classified() {
        let (store, log) = setup().await;
        let dir = tempfile::tempdir().unwrap();

        let request = shell(
            "echo 'Initializing'; echo 'Error: no valid credential' >&2; echo 'deprecated flag' >&2; exit 3",
            dir.path(),
        );
        let result = runner().run(&log, request).await;

        assert!(!result.success);
        assert_eq!(result.exit_code, 3);
        let job = job(&store, &log).await;
        assert_eq!(job.messages_with(Severity::Info), vec!["Initializing"]);
        assert_eq!(job.messages_with(Severity::Error), vec!["Error: no valid credential"]);
        assert_eq!(job.messages_with(Severity::Warn), vec!["deprecated flag"]);
        assert!(job.messages_with(Severity::Cmd)[0].starts_with("sh -c"));
    }

    #[tokio::test]
    async fn test_output_is_redacted() {
        let (store, log) = setup().await;
        let dir = tempfile::tempdir().unwrap();

        let request = shell("echo \"key=$AWS_SECRET_ACCESS_KEY\"; echo \"error $AWS_SECRET_ACCESS_KEY\" >&2", dir.path())
            .with_env(env(&[("AWS_SECRET_ACCESS_KEY", "wJalr/secret+key")]));
        runner().run(&log, request).await;

        let job = job(&store, &log).await;
        assert!(!job.log_contains("wJalr/secret+key"));
        assert_eq!(job.messages_with(Severity::Info), vec!["key=[REDACTED]"]);
        assert_eq!(job.messages_with(Severity::Error), vec!["error [REDACTED]"]);
    }

    #[tokio::test]
    async fn test_job_env_overrides_inherited_and_hardening_is_applied() {
        let (store, log) = setup().await;
        let dir = tempfile::tempdir().unwrap();

        let request = shell("echo \"$HOME|$AWS_CONFIG_FILE|$AWS_SHARED_CREDENTIALS_FILE\"", dir.path())
            .with_env(env(&[("HOME", "/job-home")]));
        runner().run(&log, request).await;

        let job = job(&store, &log).await;
        assert_eq!(job.messages_with(Severity::Info), vec!["/job-home|/dev/null|/dev/null"]);
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let (store, log) = setup().await;
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new("sh", Duration::from_millis(200)).with_display_name("Shell");

        let started = std::time::Instant::now();
        let result = runner.run(&log, shell("exec sleep 30", dir.path())).await;

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!result.success);
        assert!(result.timed_out);
        assert_eq!(result.exit_code, -1);
        let job = job(&store, &log).await;
        assert!(job.messages_with(Severity::Error).iter().any(|m| m.contains("timed out")));
    }

    #[tokio::test]
    async fn test_cancellation_kills_process() {
        let (store, log) = setup().await;
        let dir = tempfile::tempdir().unwrap();
        let token = Arc::new(CancellationToken::new());

        let trigger = Arc::clone(&token);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel("user request");
        });

        let request = shell("exec sleep 30", dir.path()).with_cancellation(token);
        let result = runner().run(&log, request).await;

        assert!(result.cancelled);
        assert!(!result.success);
        let job = job(&store, &log).await;
        assert!(job.log_contains("user request"));
    }

    #[tokio::test]
    async fn test_already_cancelled_never_spawns() {
        let (_store, log) = setup().await;
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("spawned");
        let token = Arc::new(CancellationToken::new());
        token.cancel("stop");

        let request = shell(&format!("touch {}", marker.display()), dir.path()).with_cancellation(token);
        let result = runner().run(&log, request).await;

        assert!(result.cancelled);
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_missing_binary_is_failure() {
        let (store, log) = setup().await;
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new("/nonexistent/iac-tool", Duration::from_secs(5));

        let result = runner.run(&log, CommandRequest::new("init", dir.path())).await;

        assert_eq!(result, CommandResult::not_run());
        let job = job(&store, &log).await;
        assert!(job.messages_with(Severity::Error)[0].starts_with("Failed to start"));
    }

    #[tokio::test]
    async fn test_capture_stdout_is_not_logged() {
        let (store, log) = setup().await;
        let dir = tempfile::tempdir().unwrap();

        let request = shell(r#"printf '{"url":{"value":"https://x"}}\n'"#, dir.path()).capturing_stdout();
        let result = runner().run(&log, request).await;

        assert!(result.success);
        assert_eq!(result.stdout.as_deref(), Some("{\"url\":{\"value\":\"https://x\"}}\n"));
        let job = job(&store, &log).await;
        assert!(job.messages_with(Severity::Info).is_empty());
    }

    #[tokio::test]
    async fn test_drain_returns_finished_reader_value() {
        let reader = tokio::spawn(async { Some("captured".to_string()) });
        let value = drain(Some(reader), Duration::from_secs(1)).await.flatten();
        assert_eq!(value.as_deref(), Some("captured"));
        assert!(drain::<()>(None, Duration::from_secs(1)).await.is_none());
    }

    #[tokio::test]
    async fn test_drain_aborts_reader_after_timeout() {
        let (store, log) = setup().await;
        let (held, released) = tokio::sync::oneshot::channel::<()>();
        let late = log.clone();
        let reader = tokio::spawn(async move {
            let _held = held;
            tokio::time::sleep(Duration::from_millis(300)).await;
            late.info("late line from a grandchild").await;
        });

        assert!(drain(Some(reader), Duration::from_millis(20)).await.is_none());
        assert!(released.await.is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!job(&store, &log).await.log_contains("late line"));
    }
}
