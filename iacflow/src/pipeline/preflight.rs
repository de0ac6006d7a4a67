//! Provider account sanity checks run before any mutating command.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::GcpSettings;
use crate::core::CloudProvider;
use crate::credentials::{ConnectionData, CredentialBundle};
use crate::errors::PreflightError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(20);

/// Result of a preflight check that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreflightOutcome {
    /// The check ran and passed.
    Passed(String),
    /// No check applies to this provider or connection.
    Skipped(String),
}

/// A check that must pass before `init`.
#[async_trait]
pub trait PreflightCheck: Send + Sync {
    /// Runs the check with freshly resolved credentials.
    async fn check(
        &self,
        provider: CloudProvider,
        connection: &ConnectionData,
        credentials: &CredentialBundle,
    ) -> Result<PreflightOutcome, PreflightError>;
}

/// Reads a project's billing status.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BillingClient: Send + Sync {
    /// Returns whether billing is enabled for `project_id`.
    async fn billing_enabled(&self, project_id: &str, access_token: &str) -> Result<bool, PreflightError>;
}

/// `BillingClient` backed by the Cloud Billing API.
pub struct GcpBillingClient {
    http: reqwest::Client,
    api_base: String,
}

impl GcpBillingClient {
    /// Creates a client from the GCP settings.
    #[must_use]
    pub fn new(settings: &GcpSettings) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_base: settings.billing_api_base.trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BillingInfo {
    #[serde(default)]
    billing_enabled: Option<bool>,
}

#[async_trait]
impl BillingClient for GcpBillingClient {
    async fn billing_enabled(&self, project_id: &str, access_token: &str) -> Result<bool, PreflightError> {
        let fail = |reason: String| PreflightError::CheckFailed {
            provider: CloudProvider::Gcp,
            reason,
        };
        let url = format!("{}/projects/{project_id}/billingInfo", self.api_base);
        debug!(project_id, "checking GCP billing status");

        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| fail(format!("billing API request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(fail(format!("billing API returned {status} for project '{project_id}'")));
        }

        let info: BillingInfo = response
            .json()
            .await
            .map_err(|e| fail(format!("unexpected billing API response: {e}")))?;
        Ok(info.billing_enabled == Some(true))
    }
}

/// Fails GCP deployments whose project has billing disabled.
pub struct BillingPreflight {
    client: Arc<dyn BillingClient>,
}

impl BillingPreflight {
    /// Creates the check with the real Cloud Billing client.
    #[must_use]
    pub fn new(settings: &GcpSettings) -> Self {
        Self::with_client(Arc::new(GcpBillingClient::new(settings)))
    }

    /// Creates the check with an injected client.
    #[must_use]
    pub fn with_client(client: Arc<dyn BillingClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PreflightCheck for BillingPreflight {
    async fn check(
        &self,
        provider: CloudProvider,
        connection: &ConnectionData,
        credentials: &CredentialBundle,
    ) -> Result<PreflightOutcome, PreflightError> {
        if provider != CloudProvider::Gcp {
            return Ok(PreflightOutcome::Skipped(format!(
                "no billing preflight for {provider}"
            )));
        }

        let project_id = match connection {
            ConnectionData::Gcp(gcp) => gcp.project_id.clone(),
            _ => None,
        }
        .filter(|p| !p.trim().is_empty())
        .or_else(|| credentials.get("GOOGLE_PROJECT").map(str::to_string));
        let Some(project_id) = project_id else {
            return Ok(PreflightOutcome::Skipped(
                "no GCP project id on the connection; billing check skipped".to_string(),
            ));
        };
        let access_token = credentials
            .get("GOOGLE_OAUTH_ACCESS_TOKEN")
            .ok_or_else(|| PreflightError::CheckFailed {
                provider,
                reason: "no access token available for the billing check".to_string(),
            })?;

        if self.client.billing_enabled(&project_id, access_token).await? {
            Ok(PreflightOutcome::Passed(format!(
                "Billing is enabled for GCP project '{project_id}'"
            )))
        } else {
            Err(PreflightError::BillingDisabled { project_id })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{AwsConnection, GcpConnection};

    fn gcp_connection(project: Option<&str>) -> ConnectionData {
        ConnectionData::Gcp(GcpConnection {
            project_id: project.map(str::to_string),
            ..GcpConnection::default()
        })
    }

    fn gcp_bundle() -> CredentialBundle {
        CredentialBundle::new().with_var("GOOGLE_OAUTH_ACCESS_TOKEN", "ya29.t")
    }

    #[tokio::test]
    async fn test_billing_enabled_passes() {
        let mut client = MockBillingClient::new();
        client
            .expect_billing_enabled()
            .withf(|project, token| project == "proj-1" && token == "ya29.t")
            .times(1)
            .returning(|_, _| Ok(true));
        let check = BillingPreflight::with_client(Arc::new(client));

        let outcome = check
            .check(CloudProvider::Gcp, &gcp_connection(Some("proj-1")), &gcp_bundle())
            .await
            .unwrap();
        assert!(matches!(outcome, PreflightOutcome::Passed(_)));
    }

    #[tokio::test]
    async fn test_billing_disabled_is_fatal() {
        let mut client = MockBillingClient::new();
        client.expect_billing_enabled().returning(|_, _| Ok(false));
        let check = BillingPreflight::with_client(Arc::new(client));

        let err = check
            .check(CloudProvider::Gcp, &gcp_connection(Some("proj-1")), &gcp_bundle())
            .await
            .unwrap_err();
        assert!(matches!(err, PreflightError::BillingDisabled { ref project_id } if project_id == "proj-1"));
    }

    #[tokio::test]
    async fn test_other_providers_skip() {
        let mut client = MockBillingClient::new();
        client.expect_billing_enabled().never();
        let check = BillingPreflight::with_client(Arc::new(client));

        let outcome = check
            .check(
                CloudProvider::Aws,
                &ConnectionData::Aws(AwsConnection::default()),
                &CredentialBundle::new(),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, PreflightOutcome::Skipped(_)));
    }

    #[tokio::test]
    async fn test_missing_project_skips() {
        let mut client = MockBillingClient::new();
        client.expect_billing_enabled().never();
        let check = BillingPreflight::with_client(Arc::new(client));

        let outcome = check
            .check(CloudProvider::Gcp, &gcp_connection(None), &gcp_bundle())
            .await
            .unwrap();
        assert!(matches!(outcome, PreflightOutcome::Skipped(_)));
    }

    #[tokio::test]
    async fn test_api_failure_propagates() {
        let mut client = MockBillingClient::new();
        client.expect_billing_enabled().returning(|_, _| {
            Err(PreflightError::CheckFailed {
                provider: CloudProvider::Gcp,
                reason: "403".to_string(),
            })
        });
        let check = BillingPreflight::with_client(Arc::new(client));

        assert!(check
            .check(CloudProvider::Gcp, &gcp_connection(Some("p")), &gcp_bundle())
            .await
            .is_err());
    }
}
