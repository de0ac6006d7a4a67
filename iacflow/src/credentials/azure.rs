//! Azure credential resolution.
//!
//! Azure credentials come from an ordered chain of strategies. The first
//! strategy that produces a bundle wins:
//!
//! 1. a stored Service Principal,
//! 2. a refresh token exchanged for a fresh access token (falling back to
//!    the stored access token if the exchange fails),
//! 3. a bare stored access token.
//!
//! When no strategy succeeds the user must reconnect their account. The
//! platform's own identity is never substituted for a user's subscription.

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::connection::{non_empty, AzureConnection};
use super::CredentialBundle;
use crate::config::AzureSettings;
use crate::core::CloudProvider;
use crate::errors::CredentialError;

const CLIENT_SECRET_VAR: &str = "ARM_CLIENT_SECRET";
const ACCESS_TOKEN_VAR: &str = "ARM_ACCESS_TOKEN";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// A token obtained from a refresh-token exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshedToken {
    /// New access token.
    pub access_token: String,
    /// Rotated refresh token, if the identity provider issued one.
    pub refresh_token: Option<String>,
    /// Lifetime of the access token in seconds.
    pub expires_in: Option<u64>,
}

impl fmt::Debug for RefreshedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshedToken")
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

/// Exchanges a refresh token for an access token.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Refreshes against the given tenant.
    async fn refresh(&self, tenant_id: &str, refresh_token: &str) -> Result<RefreshedToken, CredentialError>;
}

/// `TokenRefresher` backed by the Microsoft identity platform.
pub struct AzureTokenClient {
    http: reqwest::Client,
    settings: AzureSettings,
}

impl AzureTokenClient {
    /// Creates a client from the Azure settings.
    #[must_use]
    pub fn new(settings: &AzureSettings) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            settings: settings.clone(),
        }
    }

    fn token_url(&self, tenant_id: &str) -> String {
        format!(
            "{}/{tenant_id}/oauth2/v2.0/token",
            self.settings.authority_host.trim_end_matches('/')
        )
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[async_trait]
impl TokenRefresher for AzureTokenClient {
    async fn refresh(&self, tenant_id: &str, refresh_token: &str) -> Result<RefreshedToken, CredentialError> {
        let fail = |reason: String| CredentialError::TokenRefresh {
            provider: CloudProvider::Azure,
            reason,
        };
        let client_id = non_empty(self.settings.client_id.as_ref())
            .ok_or_else(|| fail("Azure OAuth client id is not configured".to_string()))?;

        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("client_id", client_id),
            ("refresh_token", refresh_token),
            ("scope", self.settings.scope.as_str()),
        ];
        if let Some(secret) = non_empty(self.settings.client_secret.as_ref()) {
            form.push(("client_secret", secret));
        }

        let response = self
            .http
            .post(self.token_url(tenant_id))
            .form(&form)
            .send()
            .await
            .map_err(|e| fail(format!("request failed: {e}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| fail(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            let reason = serde_json::from_str::<TokenErrorResponse>(&body).map_or_else(
                |_| format!("token endpoint returned {status}"),
                |e| format!("{}: {}", e.error, e.error_description.unwrap_or_default()),
            );
            return Err(fail(reason));
        }

        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|e| fail(format!("unexpected token response: {e}")))?;
        Ok(RefreshedToken {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_in: token.expires_in,
        })
    }
}

/// One way of authenticating against a user's Azure subscription.
#[async_trait]
pub trait CredentialStrategy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Builds on `base` (tenant/subscription variables) or returns `None`
    /// when this strategy does not apply.
    async fn try_resolve(&self, connection: &AzureConnection, base: &CredentialBundle) -> Option<CredentialBundle>;
}

/// Uses a stored Service Principal.
#[derive(Debug, Default)]
pub struct ServicePrincipalStrategy;

#[async_trait]
impl CredentialStrategy for ServicePrincipalStrategy {
    fn name(&self) -> &'static str {
        "service-principal"
    }

    async fn try_resolve(&self, connection: &AzureConnection, base: &CredentialBundle) -> Option<CredentialBundle> {
        let sp = connection.credentials.as_ref()?;
        let client_id = non_empty(sp.client_id.as_ref())?;
        let client_secret = non_empty(sp.client_secret.as_ref())?;

        let mut bundle = base.clone();
        bundle.set("ARM_CLIENT_ID", client_id);
        bundle.set(CLIENT_SECRET_VAR, client_secret);
        bundle.remove(ACCESS_TOKEN_VAR);
        Some(bundle)
    }
}

/// Exchanges a stored refresh token for a fresh access token.
pub struct RefreshTokenStrategy {
    refresher: Arc<dyn TokenRefresher>,
}

impl RefreshTokenStrategy {
    /// Creates the strategy.
    #[must_use]
    pub fn new(refresher: Arc<dyn TokenRefresher>) -> Self {
        Self { refresher }
    }
}

#[async_trait]
impl CredentialStrategy for RefreshTokenStrategy {
    fn name(&self) -> &'static str {
        "refresh-token"
    }

    async fn try_resolve(&self, connection: &AzureConnection, base: &CredentialBundle) -> Option<CredentialBundle> {
        let refresh_token = non_empty(connection.tokens.refresh_token.as_ref())?;
        let tenant_id = non_empty(connection.tenant_id.as_ref())?;

        let access_token = match self.refresher.refresh(tenant_id, refresh_token).await {
            Ok(token) => token.access_token,
            Err(e) => {
                // A near-expiry token is still better than failing outright.
                let stored = non_empty(connection.tokens.access_token.as_ref())?;
                warn!(error = %e, "Azure token refresh failed; using stored access token");
                stored.to_string()
            }
        };
        Some(token_bundle(base, &access_token))
    }
}

/// Uses a stored access token as-is.
#[derive(Debug, Default)]
pub struct AccessTokenStrategy;

#[async_trait]
impl CredentialStrategy for AccessTokenStrategy {
    fn name(&self) -> &'static str {
        "access-token"
    }

    async fn try_resolve(&self, connection: &AzureConnection, base: &CredentialBundle) -> Option<CredentialBundle> {
        let access_token = non_empty(connection.tokens.access_token.as_ref())?;
        Some(token_bundle(base, access_token))
    }
}

fn token_bundle(base: &CredentialBundle, access_token: &str) -> CredentialBundle {
    let mut bundle = base.clone();
    bundle.set(ACCESS_TOKEN_VAR, access_token);
    bundle.remove(CLIENT_SECRET_VAR);
    bundle
}

/// Runs the Azure strategy chain.
pub struct AzureResolver {
    strategies: Vec<Box<dyn CredentialStrategy>>,
}

impl AzureResolver {
    /// The standard chain: Service Principal, refresh token, access token.
    #[must_use]
    pub fn standard(refresher: Arc<dyn TokenRefresher>) -> Self {
        Self::with_strategies(vec![
            Box::new(ServicePrincipalStrategy),
            Box::new(RefreshTokenStrategy::new(refresher)),
            Box::new(AccessTokenStrategy),
        ])
    }

    /// A custom chain, tried in order.
    #[must_use]
    pub fn with_strategies(strategies: Vec<Box<dyn CredentialStrategy>>) -> Self {
        Self { strategies }
    }

    /// Names of the strategies, in order.
    #[must_use]
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Resolves credentials for a connection.
    pub async fn resolve(&self, connection: &AzureConnection) -> Result<CredentialBundle, CredentialError> {
        let tenant_id = non_empty(connection.tenant_id.as_ref())
            .ok_or_else(|| CredentialError::missing_field(CloudProvider::Azure, "tenant_id"))?;
        let subscription_id = non_empty(connection.subscription_id.as_ref())
            .ok_or_else(|| CredentialError::missing_field(CloudProvider::Azure, "subscription_id"))?;

        let base = CredentialBundle::new()
            .with_var("ARM_TENANT_ID", tenant_id)
            .with_var("ARM_SUBSCRIPTION_ID", subscription_id);

        for strategy in &self.strategies {
            if let Some(mut bundle) = strategy.try_resolve(connection, &base).await {
                debug!(strategy = strategy.name(), "resolved Azure credentials");
                bundle.source = Some(strategy.name().to_string());
                return Ok(bundle);
            }
        }
        Err(CredentialError::reconnect_required(CloudProvider::Azure))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::connection::{OAuthTokens, ServicePrincipal};

    fn connection(sp: bool, access: Option<&str>, refresh: Option<&str>) -> AzureConnection {
        AzureConnection {
            tenant_id: Some("tenant".to_string()),
            subscription_id: Some("sub".to_string()),
            credentials: sp.then(|| ServicePrincipal {
                client_id: Some("app-id".to_string()),
                client_secret: Some("sp-secret".to_string()),
            }),
            tokens: OAuthTokens {
                access_token: access.map(str::to_string),
                refresh_token: refresh.map(str::to_string),
            },
        }
    }

    fn refreshed(token: &str) -> RefreshedToken {
        RefreshedToken {
            access_token: token.to_string(),
            refresh_token: None,
            expires_in: Some(3600),
        }
    }

    fn assert_single_mode(bundle: &CredentialBundle) {
        assert!(bundle.has(CLIENT_SECRET_VAR) ^ bundle.has(ACCESS_TOKEN_VAR));
    }

    #[tokio::test]
    async fn test_service_principal_wins_over_tokens() {
        let mut refresher = MockTokenRefresher::new();
        refresher.expect_refresh().never();
        let resolver = AzureResolver::standard(Arc::new(refresher));

        let bundle = resolver
            .resolve(&connection(true, Some("old"), Some("refresh")))
            .await
            .unwrap();

        assert_eq!(bundle.get("ARM_CLIENT_ID"), Some("app-id"));
        assert_eq!(bundle.get(CLIENT_SECRET_VAR), Some("sp-secret"));
        assert_eq!(bundle.get("ARM_TENANT_ID"), Some("tenant"));
        assert_eq!(bundle.get("ARM_SUBSCRIPTION_ID"), Some("sub"));
        assert_eq!(bundle.source.as_deref(), Some("service-principal"));
        assert_single_mode(&bundle);
    }

    #[tokio::test]
    async fn test_refresh_token_exchange() {
        let mut refresher = MockTokenRefresher::new();
        refresher
            .expect_refresh()
            .withf(|tenant, token| tenant == "tenant" && token == "refresh")
            .times(1)
            .returning(|_, _| Ok(refreshed("fresh")));
        let resolver = AzureResolver::standard(Arc::new(refresher));

        let bundle = resolver
            .resolve(&connection(false, Some("old"), Some("refresh")))
            .await
            .unwrap();

        assert_eq!(bundle.get(ACCESS_TOKEN_VAR), Some("fresh"));
        assert_eq!(bundle.source.as_deref(), Some("refresh-token"));
        assert_single_mode(&bundle);
    }

    #[tokio::test]
    async fn test_refresh_failure_falls_back_to_stored_token() {
        let mut refresher = MockTokenRefresher::new();
        refresher.expect_refresh().returning(|_, _| {
            Err(CredentialError::TokenRefresh {
                provider: CloudProvider::Azure,
                reason: "invalid_grant".to_string(),
            })
        });
        let resolver = AzureResolver::standard(Arc::new(refresher));

        let bundle = resolver
            .resolve(&connection(false, Some("old"), Some("refresh")))
            .await
            .unwrap();
        assert_eq!(bundle.get(ACCESS_TOKEN_VAR), Some("old"));
    }

    #[tokio::test]
    async fn test_refresh_failure_without_stored_token_requires_reconnect() {
        let mut refresher = MockTokenRefresher::new();
        refresher.expect_refresh().returning(|_, _| {
            Err(CredentialError::TokenRefresh {
                provider: CloudProvider::Azure,
                reason: "invalid_grant".to_string(),
            })
        });
        let resolver = AzureResolver::standard(Arc::new(refresher));

        let err = resolver
            .resolve(&connection(false, None, Some("refresh")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("reconnect"));
    }

    #[tokio::test]
    async fn test_bare_access_token() {
        let mut refresher = MockTokenRefresher::new();
        refresher.expect_refresh().never();
        let resolver = AzureResolver::standard(Arc::new(refresher));

        let bundle = resolver.resolve(&connection(false, Some("only"), None)).await.unwrap();
        assert_eq!(bundle.get(ACCESS_TOKEN_VAR), Some("only"));
        assert_eq!(bundle.source.as_deref(), Some("access-token"));
    }

    #[tokio::test]
    async fn test_nothing_usable_never_uses_platform_identity() {
        let resolver = AzureResolver::standard(Arc::new(MockTokenRefresher::new()));
        let err = resolver.resolve(&connection(false, None, None)).await.unwrap_err();

        assert!(matches!(err, CredentialError::NoUsableCredentials { .. }));
    }

    #[tokio::test]
    async fn test_service_principal_and_refresh_token_always_single_mode() {
        for (sp, access, refresh) in [
            (true, Some("a"), Some("r")),
            (true, None, Some("r")),
            (false, Some("a"), Some("r")),
            (true, Some("a"), None),
        ] {
            let mut refresher = MockTokenRefresher::new();
            refresher.expect_refresh().returning(|_, _| Ok(refreshed("fresh")));
            let resolver = AzureResolver::standard(Arc::new(refresher));

            let bundle = resolver.resolve(&connection(sp, access, refresh)).await.unwrap();
            assert_single_mode(&bundle);
        }
    }

    #[tokio::test]
    async fn test_missing_subscription_is_fatal() {
        let resolver = AzureResolver::standard(Arc::new(MockTokenRefresher::new()));
        let mut conn = connection(true, None, None);
        conn.subscription_id = None;

        let err = resolver.resolve(&conn).await.unwrap_err();
        assert!(err.to_string().contains("subscription_id"));
    }

    #[test]
    fn test_standard_chain_order() {
        let resolver = AzureResolver::standard(Arc::new(MockTokenRefresher::new()));
        assert_eq!(
            resolver.strategy_names(),
            vec!["service-principal", "refresh-token", "access-token"]
        );
    }

    #[test]
    fn test_token_url() {
        let client = AzureTokenClient::new(&AzureSettings::default());
        assert_eq!(
            client.token_url("contoso"),
            "https://login.microsoftonline.com/contoso/oauth2/v2.0/token"
        );
    }
}
