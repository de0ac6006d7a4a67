//! AWS credential resolution.

use tracing::{debug, info};

use super::connection::{non_empty, AwsConnection, CachedAwsCredentials};
use super::region::normalize_aws_region;
use super::sts::{AssumeRoleRequest, RoleAssumer};
use super::CredentialBundle;
use crate::config::AwsSettings;
use crate::core::CloudProvider;
use crate::errors::CredentialError;
use crate::utils::{is_expired, session_suffix};

/// Resolves AWS credentials for one job.
///
/// Cached temporary credentials on the record are returned without a
/// network call unless they have expired. Otherwise a fresh session is
/// obtained through `AssumeRole` against the platform's trusted role in the
/// customer account.
pub(crate) async fn resolve(
    connection: &AwsConnection,
    settings: &AwsSettings,
    assumer: &dyn RoleAssumer,
) -> Result<CredentialBundle, CredentialError> {
    let region = normalize_aws_region(connection.region.as_deref(), &settings.default_region);

    if let Some(cached) = usable_cached_credentials(connection) {
        debug!(region = %region, "using cached AWS credentials");
        let mut bundle = bundle_from_keys(
            &cached.access_key_id,
            &cached.secret_access_key,
            non_empty(cached.session_token.as_ref()),
            &region,
        );
        bundle.source = Some("cached".to_string());
        return Ok(bundle);
    }

    let stored_arn = non_empty(connection.role_arn.as_ref())
        .ok_or_else(|| CredentialError::missing_field(CloudProvider::Aws, "role_arn"))?;
    let external_id = non_empty(connection.external_id.as_ref())
        .ok_or_else(|| CredentialError::missing_field(CloudProvider::Aws, "external_id"))?;
    let account_id = non_empty(connection.account_id.as_ref())
        .map(str::to_string)
        .or_else(|| account_from_arn(stored_arn))
        .ok_or_else(|| CredentialError::missing_field(CloudProvider::Aws, "account_id"))?;

    let role_arn = trusted_role_arn(&account_id, &settings.trusted_role_name);
    if role_arn != stored_arn {
        info!(stored = %stored_arn, resolved = %role_arn, "rewrote stored role ARN to the trusted role");
    }

    let request = AssumeRoleRequest {
        role_arn: role_arn.clone(),
        external_id: external_id.to_string(),
        session_name: format!("iacflow-{}", session_suffix()),
        duration_secs: settings.session_duration_secs,
    };
    let creds = assumer.assume_role(&request).await?;

    let mut bundle = bundle_from_keys(
        &creds.access_key_id,
        &creds.secret_access_key,
        Some(&creds.session_token),
        &region,
    );
    bundle.set("TF_VAR_aws_role_arn", role_arn);
    bundle.set("TF_VAR_aws_external_id", external_id);
    bundle.set("TF_VAR_aws_region", region);
    bundle.source = Some("assume-role".to_string());
    Ok(bundle)
}

fn usable_cached_credentials(connection: &AwsConnection) -> Option<&CachedAwsCredentials> {
    let cached = connection.credentials.as_ref()?;
    if cached.access_key_id.trim().is_empty() || cached.secret_access_key.trim().is_empty() {
        return None;
    }
    if cached.expiration.as_deref().is_some_and(is_expired) {
        debug!("cached AWS credentials have expired");
        return None;
    }
    Some(cached)
}

fn bundle_from_keys(access_key_id: &str, secret: &str, session_token: Option<&str>, region: &str) -> CredentialBundle {
    let mut bundle = CredentialBundle::new()
        .with_var("AWS_ACCESS_KEY_ID", access_key_id)
        .with_var("AWS_SECRET_ACCESS_KEY", secret)
        .with_var("AWS_REGION", region)
        .with_var("AWS_DEFAULT_REGION", region);
    if let Some(token) = session_token {
        bundle.set("AWS_SESSION_TOKEN", token);
    }
    bundle
}

/// Builds `arn:aws:iam::<account>:role/<role>`.
#[must_use]
pub fn trusted_role_arn(account_id: &str, role_name: &str) -> String {
    format!("arn:aws:iam::{account_id}:role/{role_name}")
}

/// Extracts the account id from an IAM role ARN.
#[must_use]
pub fn account_from_arn(arn: &str) -> Option<String> {
    let mut parts = arn.split(':');
    if parts.next()? != "arn" {
        return None;
    }
    let account = parts.nth(3)?;
    (!account.is_empty() && account.bytes().all(|b| b.is_ascii_digit())).then(|| account.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::sts::{MockRoleAssumer, TemporaryCredentials};
    use mockall::predicate::function;

    fn temporary() -> TemporaryCredentials {
        TemporaryCredentials {
            access_key_id: "ASIATEMP".to_string(),
            secret_access_key: "temp-secret".to_string(),
            session_token: "temp-token".to_string(),
            expiration: None,
        }
    }

    #[tokio::test]
    async fn test_cached_credentials_skip_assume_role() {
        let mut assumer = MockRoleAssumer::new();
        assumer.expect_assume_role().never();

        let connection = AwsConnection {
            region: Some("eu-west-1".to_string()),
            credentials: Some(CachedAwsCredentials {
                access_key_id: "AKIACACHED".to_string(),
                secret_access_key: "cached-secret".to_string(),
                session_token: Some("cached-token".to_string()),
                expiration: None,
            }),
            ..AwsConnection::default()
        };

        let bundle = resolve(&connection, &AwsSettings::default(), &assumer).await.unwrap();
        assert_eq!(bundle.get("AWS_ACCESS_KEY_ID"), Some("AKIACACHED"));
        assert_eq!(bundle.get("AWS_SECRET_ACCESS_KEY"), Some("cached-secret"));
        assert_eq!(bundle.get("AWS_SESSION_TOKEN"), Some("cached-token"));
        assert_eq!(bundle.get("AWS_REGION"), Some("eu-west-1"));
        assert!(bundle.credential_files.is_empty());
    }

    #[tokio::test]
    async fn test_expired_cached_credentials_fall_through_to_assume_role() {
        let mut assumer = MockRoleAssumer::new();
        assumer.expect_assume_role().times(1).returning(|_| Ok(temporary()));

        let connection = AwsConnection {
            role_arn: Some("arn:aws:iam::111122223333:role/any".to_string()),
            external_id: Some("ext".to_string()),
            credentials: Some(CachedAwsCredentials {
                access_key_id: "AKIAOLD".to_string(),
                secret_access_key: "old".to_string(),
                session_token: None,
                expiration: Some("2001-01-01T00:00:00Z".to_string()),
            }),
            ..AwsConnection::default()
        };

        let bundle = resolve(&connection, &AwsSettings::default(), &assumer).await.unwrap();
        assert_eq!(bundle.get("AWS_ACCESS_KEY_ID"), Some("ASIATEMP"));
    }

    #[tokio::test]
    async fn test_role_arn_is_rebuilt_with_trusted_role_name() {
        let mut assumer = MockRoleAssumer::new();
        assumer
            .expect_assume_role()
            .with(function(|req: &AssumeRoleRequest| {
                req.role_arn == "arn:aws:iam::111122223333:role/IacflowDeploymentRole"
                    && req.external_id == "ext-123"
                    && req.duration_secs == 3600
                    && req.session_name.starts_with("iacflow-")
            }))
            .times(1)
            .returning(|_| Ok(temporary()));

        let connection = AwsConnection {
            role_arn: Some("arn:aws:iam::111122223333:role/old-name".to_string()),
            external_id: Some("ext-123".to_string()),
            account_id: Some("111122223333".to_string()),
            region: Some("ap-south1".to_string()),
            credentials: None,
        };

        let bundle = resolve(&connection, &AwsSettings::default(), &assumer).await.unwrap();
        assert_eq!(
            bundle.get("TF_VAR_aws_role_arn"),
            Some("arn:aws:iam::111122223333:role/IacflowDeploymentRole")
        );
        assert!(!bundle.get("TF_VAR_aws_role_arn").unwrap().contains("old-name"));
        assert_eq!(bundle.get("AWS_REGION"), Some("ap-south-1"));
        assert_eq!(bundle.get("AWS_DEFAULT_REGION"), Some("ap-south-1"));
        assert_eq!(bundle.get("TF_VAR_aws_external_id"), Some("ext-123"));
        assert_eq!(bundle.get("AWS_SESSION_TOKEN"), Some("temp-token"));
    }

    #[tokio::test]
    async fn test_account_is_derived_from_arn_when_missing() {
        let mut assumer = MockRoleAssumer::new();
        assumer
            .expect_assume_role()
            .with(function(|req: &AssumeRoleRequest| req.role_arn.contains("::444455556666:")))
            .returning(|_| Ok(temporary()));

        let connection = AwsConnection {
            role_arn: Some("arn:aws:iam::444455556666:role/whatever".to_string()),
            external_id: Some("ext".to_string()),
            ..AwsConnection::default()
        };
        assert!(resolve(&connection, &AwsSettings::default(), &assumer).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_external_id_is_fatal() {
        let mut assumer = MockRoleAssumer::new();
        assumer.expect_assume_role().never();

        let connection = AwsConnection {
            role_arn: Some("arn:aws:iam::111122223333:role/x".to_string()),
            ..AwsConnection::default()
        };
        let err = resolve(&connection, &AwsSettings::default(), &assumer).await.unwrap_err();
        assert!(matches!(err, CredentialError::MissingField { ref field, .. } if field == "external_id"));
    }

    #[tokio::test]
    async fn test_missing_role_arn_is_fatal() {
        let assumer = MockRoleAssumer::new();
        let err = resolve(&AwsConnection::default(), &AwsSettings::default(), &assumer)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("role_arn"));
    }

    #[test]
    fn test_account_from_arn() {
        assert_eq!(
            account_from_arn("arn:aws:iam::111122223333:role/x").as_deref(),
            Some("111122223333")
        );
        assert_eq!(account_from_arn("not-an-arn"), None);
        assert_eq!(account_from_arn("arn:aws:iam:::role/x"), None);
    }
}
