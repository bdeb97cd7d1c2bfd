//! Request construction and signing.
//!
//! An [`S3Request`] accepts header, query and metadata mutations only while
//! it is [`RequestState::Building`]. [`S3Request::finalize`] computes the
//! signature and freezes it; [`S3Request::dispatch`] hands the signed request
//! to a [`Transport`].

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use tracing::debug;

use crate::config::Endpoint;
use crate::credential::Credentials;
use crate::error::{Result, S3Error};
use crate::response::S3Response;
use crate::sign::{PayloadHash, SignableRequest, SignatureScheme, SigningContext, sign, uri_encode};
use crate::transport::Transport;

/// Prefix that turns a user metadata name into a header name.
pub const USER_METADATA_PREFIX: &str = "x-amz-meta-";

/// HTTP methods used against S3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive header multimap.
///
/// Names are stored lowercase and iterate in sorted order, which is the
/// order both signature schemes canonicalize them in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: BTreeMap<String, Vec<String>>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces all values of `name`.
    pub fn set(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .insert(name.as_ref().to_ascii_lowercase(), vec![value.into()]);
    }

    /// Appends a value to `name`.
    pub fn add(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .entry(name.as_ref().to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// First value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    pub fn get_all(&self, name: &str) -> &[String] {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.entries.remove(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates `(lowercase name, values)` sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }
}

/// Caller-supplied object metadata, sent as `x-amz-meta-*` headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserMetadata {
    entries: BTreeMap<String, String>,
}

impl UserMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Adds an entry; names are lowercased and an existing `x-amz-meta-` prefix is dropped.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        let name = name.as_ref().to_ascii_lowercase();
        let name = name
            .strip_prefix(USER_METADATA_PREFIX)
            .map(str::to_string)
            .unwrap_or(name);
        self.entries.insert(name, value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Collects the `x-amz-meta-*` entries of a header set.
    pub fn from_headers(headers: &Headers) -> Self {
        let mut metadata = Self::new();
        for (name, values) in headers.iter() {
            if let Some(short) = name.strip_prefix(USER_METADATA_PREFIX) {
                metadata.insert(short, values.join(","));
            }
        }
        metadata
    }
}

/// Observable lifecycle of an [`S3Request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Building,
    Signed,
    Dispatched,
    Failed,
}

enum State {
    Building,
    Signed(SignedRequest),
    Dispatched,
    Failed,
}

/// A finalized request: headers include `authorization` and nothing may change.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: Headers,
    body: Bytes,
}

impl SignedRequest {
    pub fn method(&self) -> Method {
        self.method
    }

    /// URI-encoded path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw query parameters in insertion order.
    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// Encoded query string without the leading `?`.
    pub fn query_string(&self) -> String {
        self.query
            .iter()
            .map(|(name, value)| {
                if value.is_empty() {
                    uri_encode(name, true)
                } else {
                    format!("{}={}", uri_encode(name, true), uri_encode(value, true))
                }
            })
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Path plus query, as it appears on the request line.
    pub fn uri(&self) -> String {
        if self.query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query_string())
        }
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn authorization(&self) -> Option<&str> {
        self.headers.get("authorization")
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

/// One outgoing S3 request, mutable until signed.
pub struct S3Request {
    method: Method,
    bucket: String,
    key: String,
    path: String,
    query: Vec<(String, String)>,
    headers: Headers,
    metadata: UserMetadata,
    scheme: SignatureScheme,
    unsigned_payload: bool,
    state: State,
}

impl S3Request {
    /// Creates a request for `/{bucket}/{key}`; an empty key addresses the bucket itself.
    pub fn new(
        method: Method,
        endpoint: &Endpoint,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        let bucket = bucket.into();
        let key = key.into();
        let path = format!("/{}/{}", uri_encode(&bucket, true), uri_encode(&key, false));

        let mut headers = Headers::new();
        headers.set("host", endpoint.host_header());

        Self {
            method,
            bucket,
            key,
            path,
            query: Vec::new(),
            headers,
            metadata: UserMetadata::new(),
            scheme: SignatureScheme::default(),
            unsigned_payload: false,
            state: State::Building,
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn signature_scheme(&self) -> SignatureScheme {
        self.scheme
    }

    pub fn state(&self) -> RequestState {
        match self.state {
            State::Building => RequestState::Building,
            State::Signed(_) => RequestState::Signed,
            State::Dispatched => RequestState::Dispatched,
            State::Failed => RequestState::Failed,
        }
    }

    /// The signed request, while it is waiting to be dispatched.
    pub fn signed(&self) -> Option<&SignedRequest> {
        match &self.state {
            State::Signed(signed) => Some(signed),
            _ => None,
        }
    }

    /// Rejects bucket names and keys that HTTP URL handling would rewrite.
    ///
    /// `.` and `..` path segments are collapsed by URL normalization, so the
    /// object addressed on the wire would differ from the one signed.
    pub fn validate_path(&self) -> Result<()> {
        if self.bucket.is_empty() || self.bucket == "." || self.bucket == ".." {
            return Err(S3Error::InvalidKey(format!(
                "bucket name '{}' is not addressable",
                self.bucket
            )));
        }
        if self.key.split('/').any(|segment| segment == "." || segment == "..") {
            return Err(S3Error::InvalidKey(format!(
                "key '{}' contains a '.' or '..' path segment",
                self.key
            )));
        }
        Ok(())
    }

    fn ensure_building(&self) -> Result<()> {
        match self.state {
            State::Building => Ok(()),
            _ => Err(S3Error::AlreadySigned),
        }
    }

    /// Replaces all values of a header.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) -> Result<()> {
        self.ensure_building()?;
        self.headers.set(name, value);
        Ok(())
    }

    /// Appends a header value.
    pub fn add_header(&mut self, name: &str, value: impl Into<String>) -> Result<()> {
        self.ensure_building()?;
        self.headers.add(name, value);
        Ok(())
    }

    /// Sets a query parameter, replacing an earlier one of the same name.
    /// An empty value renders as a bare parameter name.
    pub fn set_query(&mut self, name: impl Into<String>, value: impl Into<String>) -> Result<()> {
        self.ensure_building()?;
        let name = name.into();
        let value = value.into();
        match self.query.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.query.push((name, value)),
        }
        Ok(())
    }

    /// Replaces the user metadata sent with the request.
    pub fn set_user_metadata(&mut self, metadata: UserMetadata) -> Result<()> {
        self.ensure_building()?;
        self.metadata = metadata;
        Ok(())
    }

    /// Adds one user metadata entry.
    pub fn add_user_metadata(&mut self, name: &str, value: impl Into<String>) -> Result<()> {
        self.ensure_building()?;
        self.metadata.insert(name, value);
        Ok(())
    }

    pub fn set_signature_scheme(&mut self, scheme: SignatureScheme) -> Result<()> {
        self.ensure_building()?;
        self.scheme = scheme;
        Ok(())
    }

    /// Signs the payload hash as `UNSIGNED-PAYLOAD` (current scheme only).
    pub fn set_unsigned_payload(&mut self, unsigned: bool) -> Result<()> {
        self.ensure_building()?;
        self.unsigned_payload = unsigned;
        Ok(())
    }

    /// Marks the request as failed; it can no longer be signed or dispatched.
    pub fn fail(&mut self) {
        self.state = State::Failed;
    }

    /// Computes the signature and freezes the request.
    ///
    /// Installs `content-length`, metadata headers, the timestamp header,
    /// `x-amz-content-sha256` (current scheme), `x-amz-security-token` when
    /// the credentials carry one, and finally `authorization`.
    pub fn finalize(
        &mut self,
        payload: Bytes,
        credentials: &Credentials,
        context: &SigningContext,
    ) -> Result<&SignedRequest> {
        self.ensure_building()?;
        if let Err(e) = self.validate_path() {
            self.state = State::Failed;
            return Err(e);
        }

        for (name, value) in self.metadata.iter() {
            self.headers
                .set(format!("{}{}", USER_METADATA_PREFIX, name), value);
        }
        if !payload.is_empty() || self.method == Method::Put {
            self.headers.set("content-length", payload.len().to_string());
        }

        let payload_hash = if self.unsigned_payload {
            PayloadHash::Unsigned
        } else {
            PayloadHash::Bytes(&payload)
        };

        match self.scheme {
            SignatureScheme::Legacy => {
                self.headers.set("x-amz-date", context.http_date());
            }
            SignatureScheme::Current => {
                self.headers.set("x-amz-date", context.amz_date());
                self.headers.set("x-amz-content-sha256", payload_hash.to_hex());
                if let Some(token) = &credentials.session_token {
                    self.headers.set("x-amz-security-token", token.as_str());
                }
            }
        }

        let signable = SignableRequest {
            method: self.method.as_str(),
            path: &self.path,
            query: &self.query,
            headers: &self.headers,
            payload: payload_hash,
        };
        let authorization = match sign(self.scheme, credentials, context, &signable) {
            Ok(authorization) => authorization,
            Err(e) => {
                self.state = State::Failed;
                return Err(e);
            }
        };

        // Legacy signatures carry the token alongside, outside the signed material.
        if self.scheme.is_legacy()
            && let Some(token) = &credentials.session_token
        {
            self.headers.set("x-amz-security-token", token.as_str());
        }
        self.headers.set("authorization", authorization);

        debug!(
            method = %self.method,
            path = %self.path,
            scheme = ?self.scheme,
            "request signed"
        );

        self.state = State::Signed(SignedRequest {
            method: self.method,
            path: self.path.clone(),
            query: self.query.clone(),
            headers: std::mem::take(&mut self.headers),
            body: payload,
        });
        self.signed()
            .ok_or_else(|| S3Error::Signing("signed request missing after finalize".into()))
    }

    /// Sends the signed request.
    ///
    /// Moves to `Dispatched` once the transport produced a response and to
    /// `Failed` on a transport error.
    pub async fn dispatch(
        &mut self,
        transport: &dyn Transport,
        endpoint: &Endpoint,
    ) -> Result<S3Response> {
        let signed = match std::mem::replace(&mut self.state, State::Failed) {
            State::Signed(signed) => signed,
            State::Building => {
                self.state = State::Building;
                return Err(S3Error::Signing(
                    "request must be finalized before dispatch".into(),
                ));
            }
            other => {
                self.state = other;
                return Err(S3Error::Signing("request was already dispatched".into()));
            }
        };

        match transport.send(endpoint, signed).await {
            Ok(response) => {
                self.state = State::Dispatched;
                Ok(response)
            }
            Err(e) => {
                self.state = State::Failed;
                Err(e)
            }
        }
    }
}

impl fmt::Debug for S3Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Request")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("scheme", &self.scheme)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
