use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Result, S3Error};
use crate::metadata::{ContainerProvider, InstanceMetadataProvider};

/// AWS access key credentials.
///
/// The `Debug` implementation redacts `secret_key` and `session_token` to
/// prevent accidental leakage in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    /// Creates a long-term key pair without a session token.
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            session_token: None,
        }
    }

    /// Attaches a session token, as issued with temporary credentials.
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn has_session_token(&self) -> bool {
        self.session_token.is_some()
    }

    /// Builds credentials from optional parts; both keys must be non-empty.
    fn from_parts(
        access_key: Option<String>,
        secret_key: Option<String>,
        session_token: Option<String>,
    ) -> Option<Self> {
        match (access_key, secret_key) {
            (Some(access_key), Some(secret_key))
                if !access_key.is_empty() && !secret_key.is_empty() =>
            {
                Some(Self {
                    access_key,
                    secret_key,
                    session_token: session_token.filter(|t| !t.is_empty()),
                })
            }
            _ => None,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"****")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "****"),
            )
            .finish()
    }
}

/// Resolves [`Credentials`] from a specific source.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Attempt to resolve credentials from this provider.
    async fn resolve(&self) -> Result<Credentials>;

    /// Short name used in log lines.
    fn name(&self) -> &'static str;
}

/// Provides credentials from explicitly specified values.
pub struct StaticProvider {
    credentials: Credentials,
}

impl StaticProvider {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            credentials: Credentials::new(access_key, secret_key),
        }
    }

    pub fn from_credentials(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl CredentialProvider for StaticProvider {
    async fn resolve(&self) -> Result<Credentials> {
        if self.credentials.access_key.is_empty() || self.credentials.secret_key.is_empty() {
            return Err(S3Error::Credential("explicit credentials are empty".into()));
        }
        Ok(self.credentials.clone())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Provides credentials from environment variables.
///
/// Reads `AWS_ACCESS_KEY_ID` (or `AWS_ACCESS_KEY`), `AWS_SECRET_ACCESS_KEY`
/// (or `AWS_SECRET_KEY`) and the optional `AWS_SESSION_TOKEN`.
pub struct EnvProvider;

impl EnvProvider {
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Credentials> {
        let access_key = lookup("AWS_ACCESS_KEY_ID").or_else(|| lookup("AWS_ACCESS_KEY"));
        let secret_key = lookup("AWS_SECRET_ACCESS_KEY").or_else(|| lookup("AWS_SECRET_KEY"));
        let session_token = lookup("AWS_SESSION_TOKEN");

        Credentials::from_parts(access_key, secret_key, session_token).ok_or_else(|| {
            S3Error::Credential(
                "AWS_ACCESS_KEY_ID or AWS_SECRET_ACCESS_KEY not set or empty".into(),
            )
        })
    }
}

#[async_trait]
impl CredentialProvider for EnvProvider {
    async fn resolve(&self) -> Result<Credentials> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn name(&self) -> &'static str {
        "environment"
    }
}

static PROPERTIES: OnceLock<RwLock<HashMap<String, String>>> = OnceLock::new();

fn properties() -> &'static RwLock<HashMap<String, String>> {
    PROPERTIES.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Sets a process-wide property, visible to [`PropertiesProvider`].
pub fn set_property(name: impl Into<String>, value: impl Into<String>) {
    properties()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(name.into(), value.into());
}

/// Removes a process-wide property.
pub fn clear_property(name: &str) {
    properties()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(name);
}

/// Reads a process-wide property.
pub fn property(name: &str) -> Option<String> {
    properties()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
        .cloned()
}

/// Provides credentials from process-wide properties.
///
/// Reads `aws.accessKeyId`, `aws.secretKey` (or `aws.secretAccessKey`) and
/// the optional `aws.sessionToken`, as set with [`set_property`].
pub struct PropertiesProvider;

impl PropertiesProvider {
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Credentials> {
        let access_key = lookup("aws.accessKeyId");
        let secret_key = lookup("aws.secretKey").or_else(|| lookup("aws.secretAccessKey"));
        let session_token = lookup("aws.sessionToken");

        Credentials::from_parts(access_key, secret_key, session_token).ok_or_else(|| {
            S3Error::Credential("aws.accessKeyId or aws.secretKey property not set".into())
        })
    }
}

#[async_trait]
impl CredentialProvider for PropertiesProvider {
    async fn resolve(&self) -> Result<Credentials> {
        Self::from_lookup(property)
    }

    fn name(&self) -> &'static str {
        "properties"
    }
}

/// Provides credentials from the shared AWS credentials file.
///
/// Reads `~/.aws/credentials` (or `AWS_SHARED_CREDENTIALS_FILE`) in INI
/// format. The profile is `AWS_PROFILE` when set, otherwise `default`.
pub struct ProfileProvider {
    profile_name: Option<String>,
    file_path: Option<PathBuf>,
}

impl Default for ProfileProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileProvider {
    /// Creates a provider for the profile named by `AWS_PROFILE`, or `default`.
    pub fn new() -> Self {
        Self {
            profile_name: None,
            file_path: None,
        }
    }

    /// Specifies a custom profile name.
    pub fn with_profile(mut self, name: impl Into<String>) -> Self {
        self.profile_name = Some(name.into());
        self
    }

    /// Specifies a custom file path instead of the default location.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    fn profile(&self) -> String {
        self.profile_name
            .clone()
            .or_else(|| env::var("AWS_PROFILE").ok().filter(|p| !p.is_empty()))
            .unwrap_or_else(|| "default".to_string())
    }

    fn default_path() -> Result<PathBuf> {
        if let Ok(path) = env::var("AWS_SHARED_CREDENTIALS_FILE")
            && !path.is_empty()
        {
            return Ok(PathBuf::from(path));
        }
        let home = env::var("HOME")
            .or_else(|_| env::var("USERPROFILE"))
            .map_err(|_| S3Error::Config("cannot determine home directory".into()))?;
        Ok(PathBuf::from(home).join(".aws").join("credentials"))
    }

    fn parse_ini(content: &str, profile: &str) -> Result<Credentials> {
        let mut in_section = false;
        let mut access_key = None;
        let mut secret_key = None;
        let mut session_token = None;

        for line in content.lines() {
            let line = line.trim();
            if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let section = section.trim();
                let name = section.strip_prefix("profile ").unwrap_or(section).trim();
                in_section = name == profile;
                continue;
            }
            if !in_section || line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let value = value.trim().to_string();
                match key.trim() {
                    "aws_access_key_id" => access_key = Some(value),
                    "aws_secret_access_key" => secret_key = Some(value),
                    "aws_session_token" => session_token = Some(value),
                    _ => {}
                }
            }
        }

        Credentials::from_parts(access_key, secret_key, session_token).ok_or_else(|| {
            S3Error::Config(format!(
                "profile '{}' missing aws_access_key_id or aws_secret_access_key",
                profile
            ))
        })
    }
}

#[async_trait]
impl CredentialProvider for ProfileProvider {
    async fn resolve(&self) -> Result<Credentials> {
        let path = match &self.file_path {
            Some(p) => p.clone(),
            None => Self::default_path()?,
        };
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            S3Error::Config(format!(
                "cannot read credentials file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse_ini(&content, &self.profile())
    }

    fn name(&self) -> &'static str {
        "profile"
    }
}

/// Tries multiple credential providers in order and returns the first success.
///
/// Providers after the first success are not consulted.
pub struct ChainProvider {
    providers: Vec<Box<dyn CredentialProvider>>,
}

impl ChainProvider {
    /// Creates a chain with the given providers.
    pub fn new(providers: Vec<Box<dyn CredentialProvider>>) -> Self {
        Self { providers }
    }

    /// Creates the default credential chain:
    /// explicit → env → properties → profile → container → instance metadata.
    pub fn default_chain(explicit: Option<Credentials>) -> Self {
        let mut providers: Vec<Box<dyn CredentialProvider>> = Vec::with_capacity(6);
        if let Some(credentials) = explicit {
            providers.push(Box::new(StaticProvider::from_credentials(credentials)));
        }
        providers.push(Box::new(EnvProvider));
        providers.push(Box::new(PropertiesProvider));
        providers.push(Box::new(ProfileProvider::new()));
        providers.push(Box::new(ContainerProvider::new()));
        providers.push(Box::new(InstanceMetadataProvider::new()));
        Self { providers }
    }
}

#[async_trait]
impl CredentialProvider for ChainProvider {
    async fn resolve(&self) -> Result<Credentials> {
        let mut last_err = S3Error::Credential("no credential providers configured".into());
        for provider in &self.providers {
            match provider.resolve().await {
                Ok(credentials) => {
                    debug!(provider = provider.name(), "resolved credentials");
                    return Ok(credentials);
                }
                Err(e) => {
                    debug!(provider = provider.name(), error = %e, "credential provider missed");
                    last_err = e;
                }
            }
        }
        Err(S3Error::NoCredentialsFound(format!(
            "all credential providers failed, last error: {}",
            last_err
        )))
    }

    fn name(&self) -> &'static str {
        "chain"
    }
}

/// Lazily resolves and caches credentials from a provider.
///
/// The cached value is shared as an `Arc`, so [`refresh`](Self::refresh)
/// can swap in new credentials while earlier requests keep signing with the
/// ones they already hold. Concurrent first uses share one resolution.
pub struct CredentialResolver {
    provider: Box<dyn CredentialProvider>,
    cached: RwLock<Option<Arc<Credentials>>>,
    resolving: tokio::sync::Mutex<()>,
}

impl CredentialResolver {
    /// Creates a resolver that consults `provider` on first use.
    pub fn new(provider: impl CredentialProvider + 'static) -> Self {
        Self {
            provider: Box::new(provider),
            cached: RwLock::new(None),
            resolving: tokio::sync::Mutex::new(()),
        }
    }

    /// Creates a resolver that always yields the given credentials.
    pub fn pinned(credentials: Credentials) -> Self {
        let cached = Arc::new(credentials.clone());
        Self {
            provider: Box::new(StaticProvider::from_credentials(credentials)),
            cached: RwLock::new(Some(cached)),
            resolving: tokio::sync::Mutex::new(()),
        }
    }

    /// Creates a resolver over [`ChainProvider::default_chain`].
    pub fn default_chain() -> Self {
        Self::new(ChainProvider::default_chain(None))
    }

    /// Returns the cached credentials, resolving them on first use.
    pub async fn credentials(&self) -> Result<Arc<Credentials>> {
        if let Some(credentials) = self.cached() {
            return Ok(credentials);
        }
        let _guard = self.resolving.lock().await;
        // Another caller may have resolved while we waited.
        if let Some(credentials) = self.cached() {
            return Ok(credentials);
        }
        self.resolve_and_store().await
    }

    /// Forces re-resolution and replaces the cached credentials.
    ///
    /// On failure the previously cached credentials stay in place.
    pub async fn refresh(&self) -> Result<Arc<Credentials>> {
        let _guard = self.resolving.lock().await;
        self.resolve_and_store().await
    }

    fn cached(&self) -> Option<Arc<Credentials>> {
        self.cached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn resolve_and_store(&self) -> Result<Arc<Credentials>> {
        let credentials = Arc::new(self.provider.resolve().await?);
        *self.cached.write().unwrap_or_else(PoisonError::into_inner) = Some(credentials.clone());
        Ok(credentials)
    }
}

impl std::fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialResolver")
            .field("provider", &self.provider.name())
            .finish_non_exhaustive()
    }
}
