//! GCP credential resolution.

use serde_json::json;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use super::connection::{non_empty, GcpConnection};
use super::CredentialBundle;
use crate::config::GcpSettings;
use crate::core::CloudProvider;
use crate::errors::CredentialError;

/// Resolves GCP credentials for one job.
///
/// The OAuth access token is always exported. When the record also holds
/// a refresh token, an `authorized_user` credential file is written to
/// `work_dir` so the tool can outlive a single access-token lifetime.
pub(crate) async fn resolve(
    connection: &GcpConnection,
    settings: &GcpSettings,
    work_dir: &Path,
) -> Result<CredentialBundle, CredentialError> {
    let access_token = non_empty(connection.tokens.access_token.as_ref())
        .ok_or_else(|| CredentialError::missing_field(CloudProvider::Gcp, "tokens.access_token"))?;
    let region = non_empty(connection.region.as_ref()).unwrap_or(&settings.default_region);

    let mut bundle = CredentialBundle::new()
        .with_var("GOOGLE_OAUTH_ACCESS_TOKEN", access_token)
        .with_var("GOOGLE_REGION", region)
        .with_var("GOOGLE_ZONE", format!("{region}-a"));
    bundle.source = Some("access-token".to_string());
    if let Some(project) = non_empty(connection.project_id.as_ref()) {
        bundle.set("GOOGLE_PROJECT", project);
        bundle.set("GOOGLE_CLOUD_PROJECT", project);
    }

    let Some(refresh_token) = non_empty(connection.tokens.refresh_token.as_ref()) else {
        return Ok(bundle);
    };
    let (Some(client_id), Some(client_secret)) = (
        non_empty(settings.oauth_client_id.as_ref()),
        non_empty(settings.oauth_client_secret.as_ref()),
    ) else {
        warn!("GCP OAuth client is not configured; skipping authorized_user credential file");
        return Ok(bundle);
    };

    let path = write_authorized_user_file(work_dir, client_id, client_secret, refresh_token).await?;
    debug!(path = %path.display(), "wrote GCP authorized_user credential file");
    bundle.set("GOOGLE_APPLICATION_CREDENTIALS", path.to_string_lossy());
    bundle.credential_files.push(path);
    bundle.source = Some("authorized-user".to_string());
    Ok(bundle)
}

async fn write_authorized_user_file(
    work_dir: &Path,
    client_id: &str,
    client_secret: &str,
    refresh_token: &str,
) -> Result<PathBuf, CredentialError> {
    let path = work_dir.join(format!(".iacflow-gcp-credentials-{}.json", Uuid::new_v4().simple()));
    let fail = |e: std::io::Error| CredentialError::CredentialFile {
        path: path.clone(),
        reason: e.to_string(),
    };

    let contents = json!({
        "type": "authorized_user",
        "client_id": client_id,
        "client_secret": client_secret,
        "refresh_token": refresh_token,
    })
    .to_string();

    tokio::fs::create_dir_all(work_dir).await.map_err(fail)?;
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(&path).await.map_err(fail)?;
    file.write_all(contents.as_bytes()).await.map_err(fail)?;
    file.flush().await.map_err(fail)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::connection::OAuthTokens;

    fn settings() -> GcpSettings {
        GcpSettings {
            oauth_client_id: Some("client-id".to_string()),
            oauth_client_secret: Some("client-secret".to_string()),
            ..GcpSettings::default()
        }
    }

    fn connection(refresh: Option<&str>) -> GcpConnection {
        GcpConnection {
            tokens: OAuthTokens {
                access_token: Some("ya29.access".to_string()),
                refresh_token: refresh.map(str::to_string),
            },
            project_id: Some("my-project".to_string()),
            region: None,
        }
    }

    #[tokio::test]
    async fn test_access_token_only_writes_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = resolve(&connection(None), &settings(), dir.path()).await.unwrap();

        assert!(bundle.credential_files.is_empty());
        assert_eq!(bundle.get("GOOGLE_OAUTH_ACCESS_TOKEN"), Some("ya29.access"));
        assert_eq!(bundle.get("GOOGLE_REGION"), Some("us-central1"));
        assert_eq!(bundle.get("GOOGLE_ZONE"), Some("us-central1-a"));
        assert_eq!(bundle.get("GOOGLE_PROJECT"), Some("my-project"));
        assert!(bundle.get("GOOGLE_APPLICATION_CREDENTIALS").is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_refresh_token_writes_authorized_user_file() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = resolve(&connection(Some("1//refresh")), &settings(), dir.path())
            .await
            .unwrap();

        assert_eq!(bundle.credential_files.len(), 1);
        let path = &bundle.credential_files[0];
        assert_eq!(
            bundle.get("GOOGLE_APPLICATION_CREDENTIALS"),
            Some(path.to_string_lossy().as_ref())
        );

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written["type"], "authorized_user");
        assert_eq!(written["refresh_token"], "1//refresh");
        assert_eq!(written["client_id"], "client-id");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_credential_file_names_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let a = resolve(&connection(Some("r")), &settings(), dir.path()).await.unwrap();
        let b = resolve(&connection(Some("r")), &settings(), dir.path()).await.unwrap();
        assert_ne!(a.credential_files[0], b.credential_files[0]);
    }

    #[tokio::test]
    async fn test_missing_access_token_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve(&GcpConnection::default(), &settings(), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::MissingField { .. }));
    }

    #[tokio::test]
    async fn test_explicit_region() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = connection(None);
        conn.region = Some("europe-west4".to_string());
        let bundle = resolve(&conn, &settings(), dir.path()).await.unwrap();
        assert_eq!(bundle.get("GOOGLE_ZONE"), Some("europe-west4-a"));
    }
}
