//! Stored cloud connection records.
//!
//! Records come from an external workspace-connection store as JSON. Field
//! names are accepted in both `snake_case` and `camelCase`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::CloudProvider;
use crate::errors::CredentialError;

/// A per-provider connection record.
#[derive(Debug, Clone)]
pub enum ConnectionData {
    /// AWS cross-account role connection.
    Aws(AwsConnection),
    /// GCP OAuth connection.
    Gcp(GcpConnection),
    /// Azure tenant/subscription connection.
    Azure(AzureConnection),
}

impl ConnectionData {
    /// Decodes a stored record for `provider`.
    pub fn from_value(provider: CloudProvider, value: serde_json::Value) -> Result<Self, CredentialError> {
        let invalid = |e: serde_json::Error| CredentialError::InvalidConnection {
            provider,
            reason: e.to_string(),
        };
        Ok(match provider {
            CloudProvider::Aws => Self::Aws(serde_json::from_value(value).map_err(invalid)?),
            CloudProvider::Gcp => Self::Gcp(serde_json::from_value(value).map_err(invalid)?),
            CloudProvider::Azure => Self::Azure(serde_json::from_value(value).map_err(invalid)?),
        })
    }

    /// The provider this record belongs to.
    #[must_use]
    pub const fn provider(&self) -> CloudProvider {
        match self {
            Self::Aws(_) => CloudProvider::Aws,
            Self::Gcp(_) => CloudProvider::Gcp,
            Self::Azure(_) => CloudProvider::Azure,
        }
    }
}

impl From<AwsConnection> for ConnectionData {
    fn from(value: AwsConnection) -> Self {
        Self::Aws(value)
    }
}

impl From<GcpConnection> for ConnectionData {
    fn from(value: GcpConnection) -> Self {
        Self::Gcp(value)
    }
}

impl From<AzureConnection> for ConnectionData {
    fn from(value: AzureConnection) -> Self {
        Self::Azure(value)
    }
}

/// Returns the trimmed value if it is present and non-empty.
pub(crate) fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

/// AWS connection record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AwsConnection {
    /// Stored role ARN. Only its account id is trusted.
    #[serde(default, alias = "roleArn")]
    pub role_arn: Option<String>,
    /// External id required by the role's trust policy.
    #[serde(default, alias = "externalId")]
    pub external_id: Option<String>,
    /// Twelve-digit account id.
    #[serde(default, alias = "accountId")]
    pub account_id: Option<String>,
    /// Deployment region, possibly malformed.
    #[serde(default)]
    pub region: Option<String>,
    /// Cached temporary credentials.
    #[serde(default, alias = "cachedCredentials", alias = "cached_credentials")]
    pub credentials: Option<CachedAwsCredentials>,
}

/// Temporary AWS credentials cached on the connection record.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct CachedAwsCredentials {
    /// Access key id.
    #[serde(alias = "accessKeyId", alias = "AccessKeyId")]
    pub access_key_id: String,
    /// Secret access key.
    #[serde(alias = "secretAccessKey", alias = "SecretAccessKey")]
    pub secret_access_key: String,
    /// Session token.
    #[serde(default, alias = "sessionToken", alias = "SessionToken")]
    pub session_token: Option<String>,
    /// RFC 3339 expiry, if known.
    #[serde(default, alias = "Expiration")]
    pub expiration: Option<String>,
}

impl fmt::Debug for CachedAwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedAwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

/// GCP connection record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GcpConnection {
    /// OAuth tokens granted by the user.
    #[serde(default)]
    pub tokens: OAuthTokens,
    /// Target project.
    #[serde(default, alias = "projectId")]
    pub project_id: Option<String>,
    /// Target region.
    #[serde(default)]
    pub region: Option<String>,
}

/// Azure connection record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AzureConnection {
    /// Directory (tenant) id.
    #[serde(default, alias = "tenantId")]
    pub tenant_id: Option<String>,
    /// Subscription id.
    #[serde(default, alias = "subscriptionId")]
    pub subscription_id: Option<String>,
    /// Stored Service Principal.
    #[serde(default)]
    pub credentials: Option<ServicePrincipal>,
    /// OAuth tokens granted by the user.
    #[serde(default)]
    pub tokens: OAuthTokens,
}

/// An Azure Service Principal.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ServicePrincipal {
    /// Application (client) id.
    #[serde(default, alias = "clientId")]
    pub client_id: Option<String>,
    /// Client secret.
    #[serde(default, alias = "clientSecret")]
    pub client_secret: Option<String>,
}

impl fmt::Debug for ServicePrincipal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServicePrincipal")
            .field("client_id", &self.client_id)
            .field("has_client_secret", &self.client_secret.is_some())
            .finish()
    }
}

/// OAuth tokens stored on a connection.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct OAuthTokens {
    /// Access token.
    #[serde(default, alias = "accessToken")]
    pub access_token: Option<String>,
    /// Refresh token.
    #[serde(default, alias = "refreshToken")]
    pub refresh_token: Option<String>,
}

impl fmt::Debug for OAuthTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthTokens")
            .field("has_access_token", &self.access_token.is_some())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish()
    }
}
