//! Connection records, file sets and a wired-up orchestrator for tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::mocks::{RecordingPersistence, ScriptedCommandRunner, StaticPreflight, StaticRoleAssumer, StaticTokenRefresher};
use crate::config::OrchestratorConfig;
use crate::credentials::{
    AwsConnection, AzureConnection, CachedAwsCredentials, ConnectionData, CredentialProvider, GcpConnection,
    OAuthTokens, ServicePrincipal,
};
use crate::events::CollectingEventSink;
use crate::pipeline::PreflightCheck;
use crate::store::JobRepository;
use crate::Orchestrator;

/// A `terraform output -json` document with one string and one number.
pub const SAMPLE_OUTPUTS_JSON: &str = r#"{
  "bucket_name": {"sensitive": false, "type": "string", "value": "site-assets"},
  "instance_count": {"sensitive": false, "type": "number", "value": 2}
}"#;

/// A minimal IaC file set.
#[must_use]
pub fn sample_files() -> HashMap<String, String> {
    HashMap::from([
        (
            "main.tf".to_string(),
            "resource \"null_resource\" \"example\" {}\n".to_string(),
        ),
        (
            "modules/network/main.tf".to_string(),
            "variable \"region\" {}\n".to_string(),
        ),
    ])
}

/// AWS record with cached temporary credentials and no role.
#[must_use]
pub fn aws_cached_connection() -> ConnectionData {
    AwsConnection {
        region: Some("us-west-2".to_string()),
        credentials: Some(CachedAwsCredentials {
            access_key_id: "ASIACACHEDKEY".to_string(),
            secret_access_key: "cached-secret-access-key".to_string(),
            session_token: Some("cached-session-token".to_string()),
            expiration: None,
        }),
        ..AwsConnection::default()
    }
    .into()
}

/// AWS record that must go through AssumeRole.
#[must_use]
pub fn aws_role_connection() -> ConnectionData {
    AwsConnection {
        role_arn: Some("arn:aws:iam::111122223333:role/old-name".to_string()),
        external_id: Some("ext-123".to_string()),
        account_id: Some("111122223333".to_string()),
        region: Some("ap-south1".to_string()),
        credentials: None,
    }
    .into()
}

/// GCP record, optionally with a refresh token.
#[must_use]
pub fn gcp_connection(with_refresh_token: bool) -> ConnectionData {
    GcpConnection {
        tokens: OAuthTokens {
            access_token: Some("ya29.gcp-access-token".to_string()),
            refresh_token: with_refresh_token.then(|| "1//gcp-refresh-token".to_string()),
        },
        project_id: Some("demo-project".to_string()),
        region: Some("europe-west1".to_string()),
    }
    .into()
}

/// Azure record with a stored Service Principal.
#[must_use]
pub fn azure_service_principal_connection() -> ConnectionData {
    AzureConnection {
        tenant_id: Some("tenant-1".to_string()),
        subscription_id: Some("sub-1".to_string()),
        credentials: Some(ServicePrincipal {
            client_id: Some("client-1".to_string()),
            client_secret: Some("sp-client-secret".to_string()),
        }),
        tokens: OAuthTokens::default(),
    }
    .into()
}

/// A configuration rooted at `work_root` with no application step delay
/// and a configured GCP OAuth client.
#[must_use]
pub fn test_config(work_root: impl Into<PathBuf>) -> OrchestratorConfig {
    let mut config = OrchestratorConfig::new()
        .with_work_root(work_root)
        .with_app_step_delay_ms(0);
    config.gcp.oauth_client_id = Some("test-client.apps.googleusercontent.com".to_string());
    config.gcp.oauth_client_secret = Some("test-oauth-client-secret".to_string());
    config
}

/// An orchestrator wired to test doubles, with handles to each of them.
pub struct TestHarness {
    /// The orchestrator under test.
    pub orchestrator: Arc<Orchestrator>,
    /// The command runner.
    pub runner: Arc<ScriptedCommandRunner>,
    /// The persistence bridge.
    pub persistence: Arc<RecordingPersistence>,
    /// Lifecycle events.
    pub events: Arc<CollectingEventSink>,
    /// The AWS role assumer.
    pub role_assumer: Arc<StaticRoleAssumer>,
}

impl TestHarness {
    /// Builds a harness with a skipping preflight and succeeding persistence.
    #[must_use]
    pub fn new(work_root: impl Into<PathBuf>, runner: ScriptedCommandRunner) -> Self {
        Self::build(
            work_root.into(),
            runner,
            RecordingPersistence::new(),
            Arc::new(StaticPreflight::skipping()),
        )
    }

    /// Builds a harness backed by `store` instead of the in-memory one.
    #[must_use]
    pub fn with_store(
        work_root: impl Into<PathBuf>,
        runner: ScriptedCommandRunner,
        store: Arc<dyn JobRepository>,
    ) -> Self {
        Self::assemble(
            work_root.into(),
            runner,
            RecordingPersistence::new(),
            Arc::new(StaticPreflight::skipping()),
            Some(store),
        )
    }

    /// Builds a harness with explicit persistence and preflight doubles.
    #[must_use]
    pub fn build(
        work_root: PathBuf,
        runner: ScriptedCommandRunner,
        persistence: RecordingPersistence,
        preflight: Arc<dyn PreflightCheck>,
    ) -> Self {
        Self::assemble(work_root, runner, persistence, preflight, None)
    }

    fn assemble(
        work_root: PathBuf,
        runner: ScriptedCommandRunner,
        persistence: RecordingPersistence,
        preflight: Arc<dyn PreflightCheck>,
        store: Option<Arc<dyn JobRepository>>,
    ) -> Self {
        let config = test_config(work_root);
        let runner = Arc::new(runner);
        let persistence = Arc::new(persistence);
        let events = Arc::new(CollectingEventSink::new());
        let role_assumer = Arc::new(StaticRoleAssumer::new());

        let credentials = CredentialProvider::with_clients(
            &config,
            role_assumer.clone(),
            Arc::new(StaticTokenRefresher::new("refreshed-azure-token")),
        );
        let mut orchestrator = Orchestrator::new(config, persistence.clone())
            .with_runner(runner.clone())
            .with_credentials(credentials)
            .with_preflight(preflight)
            .with_event_sink(events.clone());
        if let Some(store) = store {
            orchestrator = orchestrator.with_store(store);
        }

        Self {
            orchestrator: Arc::new(orchestrator),
            runner,
            persistence,
            events,
            role_assumer,
        }
    }
}

impl std::fmt::Debug for TestHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestHarness")
            .field("orchestrator", &self.orchestrator)
            .field("commands", &self.runner.commands())
            .finish_non_exhaustive()
    }
}
