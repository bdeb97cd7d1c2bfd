//! Credential providers backed by container and instance metadata endpoints.
//!
//! Credentials from these endpoints are temporary. They are not refreshed
//! automatically; call [`CredentialResolver::refresh`](crate::CredentialResolver::refresh)
//! to fetch a new set.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::credential::{CredentialProvider, Credentials};
use crate::error::{MAX_ERROR_BODY_CHARS, Result, S3Error, truncate_str};

const CONTAINER_BASE_URL: &str = "http://169.254.170.2";
const INSTANCE_BASE_URL: &str = "http://169.254.169.254";
const TOKEN_TTL_HEADER: &str = "x-aws-ec2-metadata-token-ttl-seconds";
const TOKEN_HEADER: &str = "x-aws-ec2-metadata-token";
const CREDENTIALS_PATH: &str = "/latest/meta-data/iam/security-credentials/";

/// Credential document served by both metadata endpoints.
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MetadataCredentials {
    access_key_id: String,
    secret_access_key: String,
    token: Option<String>,
    expiration: Option<String>,
}

impl MetadataCredentials {
    fn into_credentials(self) -> Result<Credentials> {
        if self.access_key_id.is_empty() || self.secret_access_key.is_empty() {
            return Err(S3Error::Credential(
                "metadata endpoint returned empty keys".into(),
            ));
        }
        if let Some(expiration) = &self.expiration {
            debug!(expiration, "metadata credentials expire");
        }
        let mut credentials = Credentials::new(self.access_key_id, self.secret_access_key);
        credentials.session_token = self.token.filter(|t| !t.is_empty());
        Ok(credentials)
    }
}

fn metadata_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(S3Error::from)
}

async fn read_body(response: reqwest::Response, what: &str) -> Result<String> {
    let status = response.status();
    let text = response.text().await?;
    if status.is_success() {
        Ok(text)
    } else {
        Err(S3Error::Credential(format!(
            "{} returned HTTP {}: {}",
            what,
            status,
            truncate_str(&text, MAX_ERROR_BODY_CHARS)
        )))
    }
}

/// Provides credentials from the container credentials endpoint.
///
/// Uses `AWS_CONTAINER_CREDENTIALS_RELATIVE_URI` (relative to
/// `http://169.254.170.2`) or `AWS_CONTAINER_CREDENTIALS_FULL_URI`, sending
/// `AWS_CONTAINER_AUTHORIZATION_TOKEN` as the `Authorization` header when set.
pub struct ContainerProvider {
    endpoint: Option<String>,
    auth_token: Option<String>,
    timeout: Duration,
}

impl Default for ContainerProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerProvider {
    /// Creates a provider configured from the environment at resolve time.
    pub fn new() -> Self {
        Self {
            endpoint: None,
            auth_token: None,
            timeout: Duration::from_secs(2),
        }
    }

    /// Uses a fixed credentials URL instead of the environment.
    pub fn with_endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint = Some(url.into());
        self
    }

    /// Sends a fixed authorization token instead of the environment's.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    fn endpoint(&self) -> Result<String> {
        if let Some(endpoint) = &self.endpoint {
            return Ok(endpoint.clone());
        }
        if let Ok(relative) = env::var("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI")
            && !relative.is_empty()
        {
            return Ok(format!("{}{}", CONTAINER_BASE_URL, relative));
        }
        match env::var("AWS_CONTAINER_CREDENTIALS_FULL_URI") {
            Ok(full) if !full.is_empty() => Ok(full),
            _ => Err(S3Error::Credential(
                "container credentials endpoint not configured".into(),
            )),
        }
    }

    fn auth_token(&self) -> Option<String> {
        self.auth_token.clone().or_else(|| {
            env::var("AWS_CONTAINER_AUTHORIZATION_TOKEN")
                .ok()
                .filter(|t| !t.is_empty())
        })
    }
}

#[async_trait]
impl CredentialProvider for ContainerProvider {
    async fn resolve(&self) -> Result<Credentials> {
        let endpoint = self.endpoint()?;
        let http = metadata_client(self.timeout)?;

        let mut request = http.get(&endpoint);
        if let Some(token) = self.auth_token() {
            request = request.header("Authorization", token);
        }
        let body = read_body(request.send().await?, "container credentials endpoint").await?;

        serde_json::from_str::<MetadataCredentials>(&body)?.into_credentials()
    }

    fn name(&self) -> &'static str {
        "container"
    }
}

/// Provides credentials from the EC2 instance metadata service.
///
/// Requests an IMDSv2 session token first and falls back to unauthenticated
/// IMDSv1 requests when the token endpoint is unavailable. Disabled when
/// `AWS_EC2_METADATA_DISABLED=true`.
pub struct InstanceMetadataProvider {
    base_url: String,
    timeout: Duration,
}

impl Default for InstanceMetadataProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceMetadataProvider {
    pub fn new() -> Self {
        Self {
            base_url: INSTANCE_BASE_URL.to_string(),
            timeout: Duration::from_secs(1),
        }
    }

    /// Points the provider at a different metadata service.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn disabled() -> bool {
        env::var("AWS_EC2_METADATA_DISABLED")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    async fn session_token(&self, http: &reqwest::Client) -> Option<String> {
        let response = http
            .put(format!("{}/latest/api/token", self.base_url))
            .header(TOKEN_TTL_HEADER, "21600")
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            debug!(status = %response.status(), "IMDSv2 token unavailable, using IMDSv1");
            return None;
        }
        response.text().await.ok().filter(|t| !t.is_empty())
    }

    async fn get(
        &self,
        http: &reqwest::Client,
        path: &str,
        token: Option<&str>,
    ) -> Result<String> {
        let mut request = http.get(format!("{}{}", self.base_url, path));
        if let Some(token) = token {
            request = request.header(TOKEN_HEADER, token);
        }
        read_body(request.send().await?, "instance metadata service").await
    }
}

#[async_trait]
impl CredentialProvider for InstanceMetadataProvider {
    async fn resolve(&self) -> Result<Credentials> {
        if Self::disabled() {
            return Err(S3Error::Credential("instance metadata disabled".into()));
        }
        let http = metadata_client(self.timeout)?;
        let token = self.session_token(&http).await;

        let roles = self.get(&http, CREDENTIALS_PATH, token.as_deref()).await?;
        let role = roles
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or_else(|| S3Error::Credential("no instance profile role attached".into()))?
            .to_string();

        let body = self
            .get(
                &http,
                &format!("{}{}", CREDENTIALS_PATH, role),
                token.as_deref(),
            )
            .await?;

        serde_json::from_str::<MetadataCredentials>(&body)?.into_credentials()
    }

    fn name(&self) -> &'static str {
        "instance-metadata"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_metadata_document() {
        let body = r#"{
            "Code": "Success",
            "LastUpdated": "2024-01-01T00:00:00Z",
            "Type": "AWS-HMAC",
            "AccessKeyId": "ASIAEXAMPLE",
            "SecretAccessKey": "secret",
            "Token": "session",
            "Expiration": "2024-01-01T06:00:00Z"
        }"#;
        let creds = serde_json::from_str::<MetadataCredentials>(body)
            .unwrap()
            .into_credentials()
            .unwrap();
        assert_eq!(creds.access_key, "ASIAEXAMPLE");
        assert_eq!(creds.secret_key, "secret");
        assert_eq!(creds.session_token.as_deref(), Some("session"));
    }

    #[test]
    fn rejects_empty_keys() {
        let body = r#"{"AccessKeyId": "", "SecretAccessKey": "secret"}"#;
        let result = serde_json::from_str::<MetadataCredentials>(body)
            .unwrap()
            .into_credentials();
        assert!(matches!(result, Err(S3Error::Credential(_))));
    }

    #[test]
    fn explicit_container_endpoint_wins() {
        let provider = ContainerProvider::new().with_endpoint("http://127.0.0.1:1/creds");
        assert_eq!(provider.endpoint().unwrap(), "http://127.0.0.1:1/creds");
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let provider = InstanceMetadataProvider::new().with_base_url("http://127.0.0.1:9/");
        assert_eq!(provider.base_url, "http://127.0.0.1:9");
    }
}
