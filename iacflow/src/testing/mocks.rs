//! Test doubles for the orchestrator's collaborators.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::core::CloudProvider;
use crate::credentials::{
    AssumeRoleRequest, ConnectionData, CredentialBundle, RefreshedToken, RoleAssumer, TemporaryCredentials,
    TokenRefresher,
};
use crate::errors::{CredentialError, PreflightError};
use crate::pipeline::{InfrastructureStatus, PreflightCheck, PreflightOutcome, StatePersistence};
use crate::runner::{CommandRequest, CommandResult, CommandRunner};
use crate::store::JobLogger;

/// A command runner that never spawns a process.
///
/// Every request is recorded. Commands succeed unless a result was
/// scripted for them; `output` returns `{}` by default.
#[derive(Debug, Default)]
pub struct ScriptedCommandRunner {
    results: Mutex<HashMap<String, CommandResult>>,
    blocking: Mutex<HashSet<String>>,
    invocations: Mutex<Vec<CommandRequest>>,
}

impl ScriptedCommandRunner {
    /// Creates a runner where every command succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the result of `command`.
    #[must_use]
    pub fn with_result(self, command: &str, result: CommandResult) -> Self {
        self.results.lock().insert(command.to_string(), result);
        self
    }

    /// Makes `command` exit with `exit_code`.
    #[must_use]
    pub fn failing(self, command: &str, exit_code: i32) -> Self {
        self.with_result(command, CommandResult::exited(exit_code))
    }

    /// Makes `output` print `json`.
    #[must_use]
    pub fn with_outputs(self, json: &str) -> Self {
        self.with_result("output", CommandResult::ok().with_stdout(json))
    }

    /// Makes `command` hang until its job is cancelled.
    #[must_use]
    pub fn blocking_until_cancelled(self, command: &str) -> Self {
        self.blocking.lock().insert(command.to_string());
        self
    }

    /// Every recorded request, in order.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandRequest> {
        self.invocations.lock().clone()
    }

    /// The sub-commands invoked, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.invocations.lock().iter().map(|r| r.command.clone()).collect()
    }

    /// Returns true if `command` was invoked at least once.
    #[must_use]
    pub fn was_invoked(&self, command: &str) -> bool {
        self.invocations.lock().iter().any(|r| r.command == command)
    }

    /// Number of recorded requests.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.invocations.lock().len()
    }
}

#[async_trait]
impl CommandRunner for ScriptedCommandRunner {
    async fn run(&self, log: &JobLogger, request: CommandRequest) -> CommandResult {
        self.invocations.lock().push(request.clone());
        log.cmd(request.display_line("terraform")).await;

        let blocks = self.blocking.lock().contains(&request.command);
        if blocks {
            if let Some(token) = &request.cancel {
                token.cancelled().await;
                log.warn(format!("{} cancelled", request.command)).await;
                return CommandResult::cancelled();
            }
        }

        let scripted = self.results.lock().get(&request.command).cloned();
        let result = scripted.unwrap_or_else(|| {
            if request.command == "output" {
                CommandResult::ok().with_stdout("{}")
            } else {
                CommandResult::ok()
            }
        });
        if !result.success {
            log.error(format!("Error: scripted {} failure", request.command)).await;
        }
        result
    }
}

/// One call to [`RecordingPersistence`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedState {
    /// Workspace passed to the bridge.
    pub workspace_id: String,
    /// Provider passed to the bridge.
    pub provider: CloudProvider,
    /// Outputs passed to the bridge.
    pub outputs: BTreeMap<String, String>,
    /// Status passed to the bridge.
    pub status: InfrastructureStatus,
}

/// A persistence bridge that records every save.
#[derive(Debug, Default)]
pub struct RecordingPersistence {
    saves: Mutex<Vec<PersistedState>>,
    fail: bool,
}

impl RecordingPersistence {
    /// Creates a bridge whose saves succeed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bridge whose saves are recorded and then fail.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            saves: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Every recorded save, in order.
    #[must_use]
    pub fn saves(&self) -> Vec<PersistedState> {
        self.saves.lock().clone()
    }
}

#[async_trait]
impl StatePersistence for RecordingPersistence {
    async fn save(
        &self,
        workspace_id: &str,
        provider: CloudProvider,
        outputs: &BTreeMap<String, String>,
        status: InfrastructureStatus,
    ) -> anyhow::Result<()> {
        self.saves.lock().push(PersistedState {
            workspace_id: workspace_id.to_string(),
            provider,
            outputs: outputs.clone(),
            status,
        });
        if self.fail {
            anyhow::bail!("database unavailable");
        }
        Ok(())
    }
}

/// A role assumer that returns fixed credentials and counts calls.
#[derive(Debug, Default)]
pub struct StaticRoleAssumer {
    calls: AtomicUsize,
    requests: Mutex<Vec<AssumeRoleRequest>>,
}

impl StaticRoleAssumer {
    /// Access key id of the returned credentials.
    pub const ACCESS_KEY_ID: &'static str = "ASIASTATICTESTKEY";
    /// Secret of the returned credentials.
    pub const SECRET_ACCESS_KEY: &'static str = "static-secret-access-key";
    /// Session token of the returned credentials.
    pub const SESSION_TOKEN: &'static str = "static-session-token";

    /// Creates the assumer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `AssumeRole` calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request received.
    #[must_use]
    pub fn requests(&self) -> Vec<AssumeRoleRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl RoleAssumer for StaticRoleAssumer {
    async fn assume_role(&self, request: &AssumeRoleRequest) -> Result<TemporaryCredentials, CredentialError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        Ok(TemporaryCredentials {
            access_key_id: Self::ACCESS_KEY_ID.to_string(),
            secret_access_key: Self::SECRET_ACCESS_KEY.to_string(),
            session_token: Self::SESSION_TOKEN.to_string(),
            expiration: None,
        })
    }
}

/// A token refresher that always returns the same access token, or always fails.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenRefresher {
    access_token: Option<String>,
}

impl StaticTokenRefresher {
    /// Creates a refresher that returns `access_token`.
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
        }
    }

    /// Creates a refresher whose exchanges fail.
    #[must_use]
    pub fn failing() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenRefresher for StaticTokenRefresher {
    async fn refresh(&self, _tenant_id: &str, _refresh_token: &str) -> Result<RefreshedToken, CredentialError> {
        self.access_token
            .clone()
            .map(|access_token| RefreshedToken {
                access_token,
                refresh_token: None,
                expires_in: Some(3600),
            })
            .ok_or_else(|| CredentialError::TokenRefresh {
                provider: CloudProvider::Azure,
                reason: "invalid_grant".to_string(),
            })
    }
}

/// A preflight check with a fixed outcome.
#[derive(Debug, Clone)]
pub struct StaticPreflight {
    outcome: Result<PreflightOutcome, PreflightError>,
}

impl StaticPreflight {
    /// Always skips.
    #[must_use]
    pub fn skipping() -> Self {
        Self {
            outcome: Ok(PreflightOutcome::Skipped("No preflight checks configured".to_string())),
        }
    }

    /// Always fails with `error`.
    #[must_use]
    pub fn failing(error: PreflightError) -> Self {
        Self { outcome: Err(error) }
    }
}

#[async_trait]
impl PreflightCheck for StaticPreflight {
    async fn check(
        &self,
        _provider: CloudProvider,
        _connection: &ConnectionData,
        _credentials: &CredentialBundle,
    ) -> Result<PreflightOutcome, PreflightError> {
        self.outcome.clone()
    }
}
