//! Cloud credential resolution.
//!
//! [`CredentialProvider::resolve`] turns a stored [`ConnectionData`] record
//! into a [`CredentialBundle`]: the environment variables the IaC tool
//! needs, plus any short-lived credential files written along the way.
//! Files belong to the job that created them and must be removed with
//! [`cleanup_credential_files`] (or a [`crate::cancellation::CredentialFilesGuard`])
//! once the job ends.

mod aws;
mod azure;
mod connection;
mod gcp;
mod redaction;
mod region;
mod sts;

pub use aws::{account_from_arn, trusted_role_arn};
pub use azure::{
    AccessTokenStrategy, AzureResolver, AzureTokenClient, CredentialStrategy, RefreshTokenStrategy,
    RefreshedToken, ServicePrincipalStrategy, TokenRefresher,
};
pub use connection::{
    AwsConnection, AzureConnection, CachedAwsCredentials, ConnectionData, GcpConnection, OAuthTokens,
    ServicePrincipal,
};
pub use redaction::{sanitize_log, RedactionRegistry, REDACTION_MARKER, SENSITIVE_ENV_KEYS};
pub use region::{is_valid_aws_region, normalize_aws_region};
pub use sts::{AssumeRoleRequest, RoleAssumer, StsClient, TemporaryCredentials};

#[cfg(test)]
pub use azure::MockTokenRefresher;
#[cfg(test)]
pub use sts::MockRoleAssumer;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::cancellation::CredentialFilesGuard;
use crate::config::{AwsSettings, GcpSettings, OrchestratorConfig};
use crate::core::CloudProvider;
use crate::errors::CredentialError;

/// Resolved credentials for one job.
#[derive(Clone, Default)]
pub struct CredentialBundle {
    /// Environment variables handed to the IaC tool.
    pub env_vars: HashMap<String, String>,
    /// Files written during resolution, owned by the resolving job.
    pub credential_files: Vec<PathBuf>,
    /// Which mechanism produced the bundle (e.g. `service-principal`).
    pub source: Option<String>,
}

impl CredentialBundle {
    /// Creates an empty bundle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a variable.
    #[must_use]
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Sets a variable.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env_vars.insert(key.into(), value.into());
    }

    /// Removes a variable.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.env_vars.remove(key)
    }

    /// Returns a variable.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.env_vars.get(key).map(String::as_str)
    }

    /// Returns true if the variable is set.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.env_vars.contains_key(key)
    }

    /// Variable names, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.env_vars.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Copies non-secret identifiers into the `TF_VAR_*` names the
    /// generated templates declare.
    pub fn project_template_vars(&mut self, provider: CloudProvider) {
        let projections: &[(&str, &str)] = match provider {
            CloudProvider::Aws => &[],
            CloudProvider::Gcp => &[
                ("GOOGLE_PROJECT", "TF_VAR_project_id"),
                ("GOOGLE_REGION", "TF_VAR_region"),
            ],
            CloudProvider::Azure => &[
                ("ARM_SUBSCRIPTION_ID", "TF_VAR_subscription_id"),
                ("ARM_TENANT_ID", "TF_VAR_tenant_id"),
            ],
        };
        for (from, to) in projections {
            if let Some(value) = self.env_vars.get(*from).cloned() {
                self.env_vars.entry((*to).to_string()).or_insert(value);
            }
        }
    }
}

impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("env_vars", &self.keys())
            .field("credential_files", &self.credential_files)
            .field("source", &self.source)
            .finish()
    }
}

/// Resolves credentials for all supported providers.
pub struct CredentialProvider {
    aws: AwsSettings,
    gcp: GcpSettings,
    role_assumer: Arc<dyn RoleAssumer>,
    azure: AzureResolver,
}

impl CredentialProvider {
    /// Creates a provider with the real STS and Azure token clients.
    #[must_use]
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self::with_clients(
            config,
            Arc::new(StsClient::new(&config.aws)),
            Arc::new(AzureTokenClient::new(&config.azure)),
        )
    }

    /// Creates a provider with injected network clients.
    #[must_use]
    pub fn with_clients(
        config: &OrchestratorConfig,
        role_assumer: Arc<dyn RoleAssumer>,
        token_refresher: Arc<dyn TokenRefresher>,
    ) -> Self {
        Self {
            aws: config.aws.clone(),
            gcp: config.gcp.clone(),
            role_assumer,
            azure: AzureResolver::standard(token_refresher),
        }
    }

    /// Replaces the Azure strategy chain.
    #[must_use]
    pub fn with_azure_resolver(mut self, resolver: AzureResolver) -> Self {
        self.azure = resolver;
        self
    }

    /// Resolves credentials for `provider` from `connection`.
    ///
    /// Credential files, if any, are written to `work_dir`.
    pub async fn resolve(
        &self,
        provider: CloudProvider,
        connection: &ConnectionData,
        work_dir: &Path,
    ) -> Result<CredentialBundle, CredentialError> {
        let bundle = match (provider, connection) {
            (CloudProvider::Aws, ConnectionData::Aws(conn)) => {
                aws::resolve(conn, &self.aws, self.role_assumer.as_ref()).await?
            }
            (CloudProvider::Gcp, ConnectionData::Gcp(conn)) => gcp::resolve(conn, &self.gcp, work_dir).await?,
            (CloudProvider::Azure, ConnectionData::Azure(conn)) => self.azure.resolve(conn).await?,
            (expected, other) => {
                return Err(CredentialError::ProviderMismatch {
                    expected,
                    actual: other.provider(),
                })
            }
        };

        info!(
            provider = %provider,
            vars = bundle.env_vars.len(),
            files = bundle.credential_files.len(),
            "resolved credentials"
        );
        Ok(bundle)
    }
}

/// Deletes credential files. Failures are logged, never raised.
///
/// Returns the files that could not be removed.
pub async fn cleanup_credential_files(files: &[PathBuf]) -> Vec<PathBuf> {
    let mut guard = CredentialFilesGuard::new();
    guard.track(files.iter().cloned());
    guard
        .release()
        .await
        .into_iter()
        .map(|(path, e)| {
            warn!(path = %path.display(), error = %e, "failed to remove credential file");
            path
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_template_projection_azure() {
        let mut bundle = CredentialBundle::new()
            .with_var("ARM_SUBSCRIPTION_ID", "sub")
            .with_var("ARM_TENANT_ID", "tenant")
            .with_var("ARM_CLIENT_SECRET", "secret");
        bundle.project_template_vars(CloudProvider::Azure);

        assert_eq!(bundle.get("TF_VAR_subscription_id"), Some("sub"));
        assert_eq!(bundle.get("TF_VAR_tenant_id"), Some("tenant"));
        assert!(bundle
            .env_vars
            .iter()
            .filter(|(k, _)| k.starts_with("TF_VAR_"))
            .all(|(_, v)| v != "secret"));
    }

    #[test]
    fn test_template_projection_gcp_keeps_existing_values() {
        let mut bundle = CredentialBundle::new()
            .with_var("GOOGLE_PROJECT", "p")
            .with_var("GOOGLE_REGION", "us-central1")
            .with_var("TF_VAR_region", "europe-west1");
        bundle.project_template_vars(CloudProvider::Gcp);

        assert_eq!(bundle.get("TF_VAR_project_id"), Some("p"));
        assert_eq!(bundle.get("TF_VAR_region"), Some("europe-west1"));
    }

    #[test]
    fn test_debug_lists_keys_only() {
        let bundle = CredentialBundle::new().with_var("AWS_SECRET_ACCESS_KEY", "hunter2");
        let debug = format!("{bundle:?}");
        assert!(debug.contains("AWS_SECRET_ACCESS_KEY"));
        assert!(!debug.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_provider_mismatch() {
        let config = OrchestratorConfig::default();
        let provider = CredentialProvider::with_clients(
            &config,
            Arc::new(MockRoleAssumer::new()),
            Arc::new(MockTokenRefresher::new()),
        );
        let dir = tempfile::tempdir().unwrap();

        let err = provider
            .resolve(CloudProvider::Aws, &ConnectionData::Gcp(GcpConnection::default()), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CredentialError::ProviderMismatch {
                expected: CloudProvider::Aws,
                actual: CloudProvider::Gcp
            }
        ));
    }

    #[tokio::test]
    async fn test_cleanup_removes_files_and_reports_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds.json");
        std::fs::write(&path, "{}").unwrap();

        let failed = cleanup_credential_files(&[path.clone(), dir.path().join("missing.json")]).await;
        assert!(failed.is_empty());
        assert!(!path.exists());
    }
}
