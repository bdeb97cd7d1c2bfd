use std::env;
use std::fmt;
use std::time::Duration;

use url::Url;

use crate::error::{Result, S3Error};
use crate::sign::SignatureScheme;

/// Endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "https://s3.amazonaws.com";

/// Region used when none is configured.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Scheme, host and port of an S3-compatible service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    ssl: bool,
    host: String,
    port: u16,
}

impl Endpoint {
    /// Parses an endpoint URL such as `https://s3.amazonaws.com` or
    /// `http://localhost:9000`.
    ///
    /// The port defaults to 443 for `https` and 80 for `http`; an explicit
    /// port always wins. Any path component is ignored.
    pub fn parse(endpoint: &str) -> Result<Self> {
        let url = Url::parse(endpoint)
            .map_err(|e| S3Error::MalformedEndpoint(format!("{}: {}", endpoint, e)))?;

        let ssl = match url.scheme() {
            "https" => true,
            "http" => false,
            other => {
                return Err(S3Error::MalformedEndpoint(format!(
                    "{}: unsupported scheme '{}'",
                    endpoint, other
                )));
            }
        };

        let host = url
            .host_str()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| S3Error::MalformedEndpoint(format!("{}: missing host", endpoint)))?
            .to_string();

        let port = url.port().unwrap_or(if ssl { 443 } else { 80 });

        Ok(Self { ssl, host, port })
    }

    /// Returns `true` when requests go over TLS.
    pub fn ssl(&self) -> bool {
        self.ssl
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn default_port(&self) -> u16 {
        if self.ssl { 443 } else { 80 }
    }

    /// Value of the `Host` header: the port is omitted when it is the scheme default.
    pub fn host_header(&self) -> String {
        if self.port == self.default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Base URL without a trailing slash, e.g. `http://localhost:9000`.
    pub fn base_url(&self) -> String {
        let scheme = if self.ssl { "https" } else { "http" };
        format!("{}://{}", scheme, self.host_header())
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            ssl: true,
            host: "s3.amazonaws.com".to_string(),
            port: 443,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base_url())
    }
}

/// Configuration for the S3 client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Service endpoint.
    pub endpoint: Endpoint,

    /// Region used in the credential scope of current-scheme signatures.
    pub region: String,

    /// Signature algorithm applied to every request.
    pub signature_scheme: SignatureScheme,

    /// HTTP request timeout.
    pub timeout: Duration,

    /// Sign the payload hash as `UNSIGNED-PAYLOAD` instead of hashing bodies.
    pub unsigned_payload: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            region: DEFAULT_REGION.to_string(),
            signature_scheme: SignatureScheme::Current,
            timeout: Duration::from_secs(30),
            unsigned_payload: false,
        }
    }
}

impl ClientConfig {
    /// Builds a configuration from the standard AWS environment variables.
    ///
    /// Reads `AWS_REGION` (falling back to `AWS_DEFAULT_REGION`) and
    /// `AWS_ENDPOINT_URL_S3` (falling back to `AWS_ENDPOINT_URL`).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok().filter(|v| !v.is_empty()))
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(region) = lookup("AWS_REGION").or_else(|| lookup("AWS_DEFAULT_REGION")) {
            config.region = region;
        }
        if let Some(endpoint) = lookup("AWS_ENDPOINT_URL_S3").or_else(|| lookup("AWS_ENDPOINT_URL"))
        {
            config = config.with_endpoint(&endpoint)?;
        }
        Ok(config)
    }

    /// Sets a custom endpoint URL.
    pub fn with_endpoint(mut self, endpoint: &str) -> Result<Self> {
        self.endpoint = Endpoint::parse(endpoint)?;
        Ok(self)
    }

    /// Sets the signing region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Selects the signature algorithm.
    pub fn with_signature_scheme(mut self, scheme: SignatureScheme) -> Self {
        self.signature_scheme = scheme;
        self
    }

    /// Sets the HTTP request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enables or disables unsigned-payload mode.
    pub fn with_unsigned_payload(mut self, unsigned: bool) -> Self {
        self.unsigned_payload = unsigned;
        self
    }
}
