//! Orchestrator configuration.
//!
//! Every field has a default, so `OrchestratorConfig::default()` is usable
//! as-is. [`OrchestratorConfig::from_env`] overlays `IACFLOW_*` variables
//! (optionally from a `.env` file) on top of the defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::CloudProvider;

/// Top-level configuration for the deployment engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Root under which per-(workspace, provider) working directories live.
    #[serde(default = "default_work_root")]
    pub work_root: PathBuf,
    /// IaC binary to invoke.
    #[serde(default = "default_tool_binary")]
    pub tool_binary: String,
    /// Name used in user-facing messages ("Terraform plan failed ...").
    #[serde(default = "default_tool_display_name")]
    pub tool_display_name: String,
    /// Hard wall-clock ceiling for one tool invocation.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    /// Delay between simulated application deployment steps.
    #[serde(default = "default_app_step_delay_ms")]
    pub app_step_delay_ms: u64,
    /// AWS settings.
    #[serde(default)]
    pub aws: AwsSettings,
    /// GCP settings.
    #[serde(default)]
    pub gcp: GcpSettings,
    /// Azure settings.
    #[serde(default)]
    pub azure: AzureSettings,
}

fn default_work_root() -> PathBuf {
    std::env::temp_dir().join("iacflow-workspaces")
}

fn default_tool_binary() -> String {
    "terraform".to_string()
}

fn default_tool_display_name() -> String {
    "Terraform".to_string()
}

fn default_command_timeout_secs() -> u64 {
    30 * 60
}

fn default_app_step_delay_ms() -> u64 {
    1000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            work_root: default_work_root(),
            tool_binary: default_tool_binary(),
            tool_display_name: default_tool_display_name(),
            command_timeout_secs: default_command_timeout_secs(),
            app_step_delay_ms: default_app_step_delay_ms(),
            aws: AwsSettings::default(),
            gcp: GcpSettings::default(),
            azure: AzureSettings::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `.env` (if present) and overlays `IACFLOW_*` variables.
    #[must_use]
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup.
    ///
    /// Unset or unparseable values keep their defaults.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(root) = get("IACFLOW_WORK_ROOT") {
            config.work_root = PathBuf::from(root);
        }
        if let Some(binary) = get("IACFLOW_TOOL_BINARY") {
            config.tool_binary = binary;
        }
        if let Some(secs) = get("IACFLOW_COMMAND_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.command_timeout_secs = secs;
        }
        if let Some(role) = get("IACFLOW_AWS_TRUSTED_ROLE_NAME") {
            config.aws.trusted_role_name = role;
        }
        config.aws.platform_access_key_id =
            get("IACFLOW_AWS_ACCESS_KEY_ID").or_else(|| get("AWS_ACCESS_KEY_ID"));
        config.aws.platform_secret_access_key =
            get("IACFLOW_AWS_SECRET_ACCESS_KEY").or_else(|| get("AWS_SECRET_ACCESS_KEY"));
        config.aws.platform_session_token =
            get("IACFLOW_AWS_SESSION_TOKEN").or_else(|| get("AWS_SESSION_TOKEN"));
        config.gcp.oauth_client_id = get("IACFLOW_GCP_OAUTH_CLIENT_ID");
        config.gcp.oauth_client_secret = get("IACFLOW_GCP_OAUTH_CLIENT_SECRET");
        config.azure.client_id = get("IACFLOW_AZURE_CLIENT_ID");
        config.azure.client_secret = get("IACFLOW_AZURE_CLIENT_SECRET");

        config
    }

    /// Sets the working directory root.
    #[must_use]
    pub fn with_work_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.work_root = root.into();
        self
    }

    /// Sets the IaC binary.
    #[must_use]
    pub fn with_tool_binary(mut self, binary: impl Into<String>) -> Self {
        self.tool_binary = binary.into();
        self
    }

    /// Sets the command timeout in seconds.
    #[must_use]
    pub fn with_command_timeout_secs(mut self, secs: u64) -> Self {
        self.command_timeout_secs = secs;
        self
    }

    /// Sets the simulated application step delay.
    #[must_use]
    pub fn with_app_step_delay_ms(mut self, ms: u64) -> Self {
        self.app_step_delay_ms = ms;
        self
    }

    /// The command timeout as a [`Duration`].
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// The working directory for one (workspace, provider) pair.
    ///
    /// The workspace id must already have been validated as a single safe
    /// path segment.
    #[must_use]
    pub fn work_dir(&self, workspace_id: &str, provider: CloudProvider) -> PathBuf {
        self.work_root.join(workspace_id).join(provider.as_str())
    }

    /// Returns the working directory root.
    #[must_use]
    pub fn work_root(&self) -> &Path {
        &self.work_root
    }
}

/// AWS credential settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsSettings {
    /// Role name every cross-account ARN is rebuilt with.
    #[serde(default = "default_trusted_role_name")]
    pub trusted_role_name: String,
    /// AssumeRole session lifetime.
    #[serde(default = "default_session_duration_secs")]
    pub session_duration_secs: u32,
    /// STS endpoint.
    #[serde(default = "default_sts_endpoint")]
    pub sts_endpoint: String,
    /// Region used when a connection record has none.
    #[serde(default = "default_aws_region")]
    pub default_region: String,
    /// Platform access key used to sign AssumeRole requests.
    #[serde(default, skip_serializing)]
    pub platform_access_key_id: Option<String>,
    /// Platform secret key used to sign AssumeRole requests.
    #[serde(default, skip_serializing)]
    pub platform_secret_access_key: Option<String>,
    /// Platform session token, when the platform itself runs on temporary credentials.
    #[serde(default, skip_serializing)]
    pub platform_session_token: Option<String>,
}

fn default_trusted_role_name() -> String {
    "IacflowDeploymentRole".to_string()
}

fn default_session_duration_secs() -> u32 {
    3600
}

fn default_sts_endpoint() -> String {
    "https://sts.amazonaws.com".to_string()
}

fn default_aws_region() -> String {
    "us-east-1".to_string()
}

impl Default for AwsSettings {
    fn default() -> Self {
        Self {
            trusted_role_name: default_trusted_role_name(),
            session_duration_secs: default_session_duration_secs(),
            sts_endpoint: default_sts_endpoint(),
            default_region: default_aws_region(),
            platform_access_key_id: None,
            platform_secret_access_key: None,
            platform_session_token: None,
        }
    }
}

/// GCP credential settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcpSettings {
    /// OAuth client id written into authorized-user credential files.
    #[serde(default)]
    pub oauth_client_id: Option<String>,
    /// OAuth client secret written into authorized-user credential files.
    #[serde(default, skip_serializing)]
    pub oauth_client_secret: Option<String>,
    /// Region used when a connection record has none.
    #[serde(default = "default_gcp_region")]
    pub default_region: String,
    /// Base URL of the Cloud Billing API.
    #[serde(default = "default_billing_api_base")]
    pub billing_api_base: String,
}

fn default_gcp_region() -> String {
    "us-central1".to_string()
}

fn default_billing_api_base() -> String {
    "https://cloudbilling.googleapis.com/v1".to_string()
}

impl Default for GcpSettings {
    fn default() -> Self {
        Self {
            oauth_client_id: None,
            oauth_client_secret: None,
            default_region: default_gcp_region(),
            billing_api_base: default_billing_api_base(),
        }
    }
}

/// Azure credential settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureSettings {
    /// Identity provider host.
    #[serde(default = "default_authority_host")]
    pub authority_host: String,
    /// OAuth client id used for refresh-token exchanges.
    #[serde(default)]
    pub client_id: Option<String>,
    /// OAuth client secret used for refresh-token exchanges.
    #[serde(default, skip_serializing)]
    pub client_secret: Option<String>,
    /// Scope requested when refreshing a token.
    #[serde(default = "default_azure_scope")]
    pub scope: String,
}

fn default_authority_host() -> String {
    "https://login.microsoftonline.com".to_string()
}

fn default_azure_scope() -> String {
    "https://management.azure.com/.default offline_access".to_string()
}

impl Default for AzureSettings {
    fn default() -> Self {
        Self {
            authority_host: default_authority_host(),
            client_id: None,
            client_secret: None,
            scope: default_azure_scope(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.tool_binary, "terraform");
        assert_eq!(config.tool_display_name, "Terraform");
        assert_eq!(config.command_timeout(), Duration::from_secs(1800));
        assert_eq!(config.aws.session_duration_secs, 3600);
        assert_eq!(config.aws.default_region, "us-east-1");
        assert_eq!(config.gcp.default_region, "us-central1");
        assert!(config.work_root.ends_with("iacflow-workspaces"));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = OrchestratorConfig::from_lookup(lookup(&[
            ("IACFLOW_WORK_ROOT", "/srv/iac"),
            ("IACFLOW_TOOL_BINARY", "tofu"),
            ("IACFLOW_COMMAND_TIMEOUT_SECS", "60"),
            ("IACFLOW_AWS_TRUSTED_ROLE_NAME", "DeployRole"),
            ("AWS_ACCESS_KEY_ID", "AKIAFALLBACK"),
            ("IACFLOW_AWS_ACCESS_KEY_ID", "AKIAPRIMARY"),
        ]));

        assert_eq!(config.work_root, PathBuf::from("/srv/iac"));
        assert_eq!(config.tool_binary, "tofu");
        assert_eq!(config.command_timeout_secs, 60);
        assert_eq!(config.aws.trusted_role_name, "DeployRole");
        assert_eq!(config.aws.platform_access_key_id.as_deref(), Some("AKIAPRIMARY"));
    }

    #[test]
    fn test_from_lookup_ignores_bad_values() {
        let config = OrchestratorConfig::from_lookup(lookup(&[
            ("IACFLOW_COMMAND_TIMEOUT_SECS", "soon"),
            ("IACFLOW_TOOL_BINARY", "  "),
        ]));
        assert_eq!(config.command_timeout_secs, 1800);
        assert_eq!(config.tool_binary, "terraform");
    }

    #[test]
    fn test_work_dir_is_keyed_by_workspace_and_provider() {
        let config = OrchestratorConfig::new().with_work_root("/tmp/root");
        assert_eq!(
            config.work_dir("ws-1", CloudProvider::Gcp),
            PathBuf::from("/tmp/root/ws-1/gcp")
        );
        assert_ne!(
            config.work_dir("ws-1", CloudProvider::Gcp),
            config.work_dir("ws-1", CloudProvider::Aws)
        );
    }

    #[test]
    fn test_deserialize_partial() {
        let config: OrchestratorConfig =
            serde_json::from_str(r#"{"tool_binary": "tofu", "aws": {"default_region": "eu-west-1"}}"#)
                .unwrap();
        assert_eq!(config.tool_binary, "tofu");
        assert_eq!(config.aws.default_region, "eu-west-1");
        assert_eq!(config.aws.trusted_role_name, "IacflowDeploymentRole");
    }
}
