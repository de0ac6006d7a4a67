//! AWS STS `AssumeRole` client.
//!
//! Requests are signed with AWS Signature Version 4 using the platform's
//! own credentials and ask STS for a JSON response.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::config::AwsSettings;
use crate::errors::CredentialError;

type HmacSha256 = Hmac<Sha256>;

const STS_API_VERSION: &str = "2011-06-15";
const STS_SIGNING_REGION: &str = "us-east-1";
const STS_SERVICE: &str = "sts";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Parameters of one `AssumeRole` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssumeRoleRequest {
    /// Role to assume.
    pub role_arn: String,
    /// External id required by the role's trust policy.
    pub external_id: String,
    /// Session name shown in CloudTrail.
    pub session_name: String,
    /// Session lifetime.
    pub duration_secs: u32,
}

/// Temporary credentials returned by STS.
#[derive(Clone, PartialEq, Eq)]
pub struct TemporaryCredentials {
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Session token.
    pub session_token: String,
    /// RFC 3339 expiry.
    pub expiration: Option<String>,
}

impl fmt::Debug for TemporaryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemporaryCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

/// Obtains temporary credentials for a cross-account role.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoleAssumer: Send + Sync {
    /// Assumes `request.role_arn`.
    async fn assume_role(&self, request: &AssumeRoleRequest) -> Result<TemporaryCredentials, CredentialError>;
}

/// `RoleAssumer` backed by the STS HTTPS API.
pub struct StsClient {
    http: reqwest::Client,
    endpoint: String,
    access_key_id: Option<String>,
    secret_access_key: Option<String>,
    session_token: Option<String>,
}

impl StsClient {
    /// Creates a client from the AWS settings.
    #[must_use]
    pub fn new(settings: &AwsSettings) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            endpoint: settings.sts_endpoint.clone(),
            access_key_id: settings.platform_access_key_id.clone(),
            secret_access_key: settings.platform_secret_access_key.clone(),
            session_token: settings.platform_session_token.clone(),
        }
    }
}

#[async_trait]
impl RoleAssumer for StsClient {
    async fn assume_role(&self, request: &AssumeRoleRequest) -> Result<TemporaryCredentials, CredentialError> {
        let fail = |reason: String| CredentialError::AssumeRole {
            role_arn: request.role_arn.clone(),
            reason,
        };
        let (Some(access_key_id), Some(secret_access_key)) =
            (self.access_key_id.as_deref(), self.secret_access_key.as_deref())
        else {
            return Err(fail("platform AWS signing credentials are not configured".to_string()));
        };

        let url = reqwest::Url::parse(&self.endpoint).map_err(|e| fail(format!("invalid STS endpoint: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| fail("STS endpoint has no host".to_string()))?
            .to_string();

        let duration = request.duration_secs.to_string();
        let body = form_encode(&[
            ("Action", "AssumeRole"),
            ("Version", STS_API_VERSION),
            ("RoleArn", &request.role_arn),
            ("RoleSessionName", &request.session_name),
            ("ExternalId", &request.external_id),
            ("DurationSeconds", &duration),
        ]);

        let signed = sign_request(&SigningInput {
            host: &host,
            body: &body,
            access_key_id,
            secret_access_key,
            session_token: self.session_token.as_deref(),
            now: Utc::now(),
        })
        .map_err(fail)?;

        debug!(role_arn = %request.role_arn, session = %request.session_name, "calling sts:AssumeRole");

        let mut builder = self
            .http
            .post(url)
            .header("Accept", "application/json")
            .header("Content-Type", FORM_CONTENT_TYPE)
            .header("X-Amz-Date", &signed.amz_date)
            .header("Authorization", &signed.authorization);
        if let Some(token) = &self.session_token {
            builder = builder.header("X-Amz-Security-Token", token);
        }

        let response = builder
            .body(body)
            .send()
            .await
            .map_err(|e| fail(format!("request failed: {e}")))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| fail(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(fail(describe_sts_error(status.as_u16(), &text)));
        }
        parse_assume_role_response(&text).map_err(fail)
    }
}

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

struct SigningInput<'a> {
    host: &'a str,
    body: &'a str,
    access_key_id: &'a str,
    secret_access_key: &'a str,
    session_token: Option<&'a str>,
    now: DateTime<Utc>,
}

struct SignedHeaders {
    amz_date: String,
    authorization: String,
}

fn sign_request(input: &SigningInput<'_>) -> Result<SignedHeaders, String> {
    let amz_date = input.now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = input.now.format("%Y%m%d").to_string();

    let mut headers = vec![
        ("content-type", FORM_CONTENT_TYPE.to_string()),
        ("host", input.host.to_string()),
        ("x-amz-date", amz_date.clone()),
    ];
    if let Some(token) = input.session_token {
        headers.push(("x-amz-security-token", token.to_string()));
    }
    let canonical_headers: String = headers.iter().map(|(k, v)| format!("{k}:{}\n", v.trim())).collect();
    let signed_headers = headers.iter().map(|(k, _)| *k).collect::<Vec<_>>().join(";");

    let canonical_request = format!(
        "POST\n/\n\n{canonical_headers}\n{signed_headers}\n{}",
        hex::encode(Sha256::digest(input.body.as_bytes()))
    );
    let scope = format!("{date}/{STS_SIGNING_REGION}/{STS_SERVICE}/aws4_request");
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let key = signing_key(input.secret_access_key, &date, STS_SIGNING_REGION, STS_SERVICE)?;
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?);

    Ok(SignedHeaders {
        authorization: format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            input.access_key_id
        ),
        amz_date,
    })
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, String> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| format!("hmac key error: {e}"))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Derives the SigV4 signing key for one day, region and service.
fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Result<Vec<u8>, String> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

fn form_encode(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Percent-encodes everything except RFC 3986 unreserved characters.
fn uri_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(char::from(byte)),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[derive(Deserialize)]
struct AssumeRoleEnvelope {
    #[serde(rename = "AssumeRoleResponse")]
    response: AssumeRoleResponse,
}

#[derive(Deserialize)]
struct AssumeRoleResponse {
    #[serde(rename = "AssumeRoleResult")]
    result: AssumeRoleResult,
}

#[derive(Deserialize)]
struct AssumeRoleResult {
    #[serde(rename = "Credentials")]
    credentials: StsCredentials,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
    #[serde(default)]
    expiration: Option<serde_json::Value>,
}

fn parse_assume_role_response(body: &str) -> Result<TemporaryCredentials, String> {
    let envelope: AssumeRoleEnvelope =
        serde_json::from_str(body).map_err(|e| format!("unexpected STS response: {e}"))?;
    let creds = envelope.response.result.credentials;

    // The JSON protocol reports expiry as epoch seconds; accept strings too.
    let expiration = match creds.expiration {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => n
            .as_f64()
            .and_then(|secs| {
                #[allow(clippy::cast_possible_truncation)]
                Utc.timestamp_opt(secs as i64, 0).single()
            })
            .map(|dt| dt.to_rfc3339()),
        _ => None,
    };

    Ok(TemporaryCredentials {
        access_key_id: creds.access_key_id,
        secret_access_key: creds.secret_access_key,
        session_token: creds.session_token,
        expiration,
    })
}

fn describe_sts_error(status: u16, body: &str) -> String {
    let message = serde_json::from_str::<serde_json::Value>(body).ok().and_then(|v| {
        let error = v.get("Error")?;
        let code = error.get("Code").and_then(serde_json::Value::as_str).unwrap_or("Unknown");
        let message = error.get("Message").and_then(serde_json::Value::as_str).unwrap_or("");
        Some(format!("{code}: {message}"))
    });
    match message {
        Some(m) => format!("STS returned {status} ({m})"),
        None => format!("STS returned {status}"),
    }
}
