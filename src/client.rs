use std::fmt;
use std::future::{Future, IntoFuture};
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::ClientConfig;
use crate::credential::{ChainProvider, CredentialResolver, Credentials, ProfileProvider};
use crate::error::{Result, S3Error};
use crate::exec::{FailureHandler, LogFailure};
use crate::request::{Method, S3Request, UserMetadata};
use crate::response::S3Response;
use crate::sign::{SignatureScheme, SigningContext};
use crate::transport::{ReqwestTransport, Transport};
use crate::upload::{ByteStream, StreamingUploader, file_stream};

/// Query that selects the version 2 object listing.
const LIST_TYPE: (&str, &str) = ("list-type", "2");

/// Async S3 client.
///
/// Cloning is cheap; clones share the transport, the credential cache and
/// the failure handler.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    credentials: Arc<CredentialResolver>,
    config: Arc<ClientConfig>,
    failure_handler: Arc<dyn FailureHandler>,
}

impl Client {
    /// Creates a client for the default endpoint.
    ///
    /// `credentials` head the default provider chain, so incomplete values
    /// fall through to the environment and the other providers.
    pub fn new(credentials: Credentials) -> Result<Self> {
        Self::with_config(credentials, ClientConfig::default())
    }

    /// Creates a client with explicit credentials and custom configuration.
    pub fn with_config(credentials: Credentials, config: ClientConfig) -> Result<Self> {
        let resolver = CredentialResolver::new(ChainProvider::default_chain(Some(credentials)));
        let transport = ReqwestTransport::new(config.timeout)?;
        Ok(Self::with_transport(resolver, config, transport))
    }

    /// Creates a client from the environment: configuration from `AWS_*`
    /// variables and credentials from the default chain.
    pub fn from_env() -> Result<Self> {
        let config = ClientConfig::from_env()?;
        let transport = ReqwestTransport::new(config.timeout)?;
        Ok(Self::with_transport(
            CredentialResolver::default_chain(),
            config,
            transport,
        ))
    }

    /// Creates a client using a named profile from the shared credentials file.
    pub fn from_profile(profile: &str, config: ClientConfig) -> Result<Self> {
        let resolver = CredentialResolver::new(ProfileProvider::new().with_profile(profile));
        let transport = ReqwestTransport::new(config.timeout)?;
        Ok(Self::with_transport(resolver, config, transport))
    }

    /// Creates a client over a caller-supplied transport.
    pub fn with_transport(
        credentials: CredentialResolver,
        config: ClientConfig,
        transport: impl Transport + 'static,
    ) -> Self {
        Self {
            transport: Arc::new(transport),
            credentials: Arc::new(credentials),
            config: Arc::new(config),
            failure_handler: Arc::new(LogFailure),
        }
    }

    /// Replaces the handler that receives errors of dispatched operations
    /// without their own failure callback.
    pub fn with_failure_handler(mut self, handler: impl FailureHandler + 'static) -> Self {
        self.failure_handler = Arc::new(handler);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn signature_scheme(&self) -> SignatureScheme {
        self.config.signature_scheme
    }

    /// Re-resolves credentials. Requests already signed keep their signature.
    pub async fn refresh_credentials(&self) -> Result<()> {
        self.credentials.refresh().await.map(|_| ())
    }

    /// Closes the transport. In-flight and later operations fail.
    pub fn close(&self) {
        self.transport.close();
    }

    /// Starts an arbitrary request against `/{bucket}/{key}`.
    pub fn request(&self, method: Method, bucket: &str, key: &str) -> Operation {
        Operation::new(self.clone(), method, bucket, key)
    }

    /// Fetches object metadata.
    pub fn head(&self, bucket: &str, key: &str) -> Operation {
        self.request(Method::Head, bucket, key)
    }

    /// Fetches an object.
    pub fn get(&self, bucket: &str, key: &str) -> Operation {
        self.request(Method::Get, bucket, key)
    }

    /// Lists the objects of a bucket.
    pub fn list(&self, bucket: &str) -> Operation {
        self.request(Method::Get, bucket, "")
            .query(LIST_TYPE.0, LIST_TYPE.1)
    }

    /// Lists the objects of a bucket whose keys start with `prefix`.
    pub fn list_with_prefix(&self, bucket: &str, prefix: &str) -> Operation {
        self.list(bucket).query("prefix", prefix)
    }

    /// Uploads an in-memory object.
    pub fn put(&self, bucket: &str, key: &str, body: impl Into<Bytes>) -> Operation {
        self.request(Method::Put, bucket, key)
            .body(Body::Bytes(body.into()))
    }

    /// Uploads an object read from a byte stream.
    ///
    /// The stream is drained before signing; its total length becomes the
    /// `Content-Length` of a single PUT.
    pub fn put_stream<S>(&self, bucket: &str, key: &str, stream: S) -> Operation
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        self.request(Method::Put, bucket, key)
            .body(Body::Stream(Box::pin(stream)))
    }

    /// Uploads a file.
    pub fn put_file(&self, bucket: &str, key: &str, path: impl Into<PathBuf>) -> Operation {
        self.request(Method::Put, bucket, key)
            .body(Body::File(path.into()))
    }

    /// Deletes an object.
    pub fn delete(&self, bucket: &str, key: &str) -> Operation {
        self.request(Method::Delete, bucket, key)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

enum Body {
    Empty,
    Bytes(Bytes),
    Stream(ByteStream),
    File(PathBuf),
}

type SuccessCallback = Box<dyn FnOnce(S3Response) + Send>;
type FailureCallback = Box<dyn FnOnce(S3Error) + Send>;

/// A pending S3 operation.
///
/// Customise it with [`header`](Self::header), [`query`](Self::query) and
/// [`metadata`](Self::metadata), then either `.await` it or attach callbacks
/// and [`dispatch`](Self::dispatch) it. Builder errors, such as an object key
/// with `.` or `..` segments, are reported when the operation runs, before any
/// body is read.
///
/// Non-2xx responses complete successfully; see
/// [`S3Response::error_for_status`].
pub struct Operation {
    client: Client,
    request: S3Request,
    body: Body,
    error: Option<S3Error>,
    on_success: Option<SuccessCallback>,
    on_failure: Option<FailureCallback>,
}

impl Operation {
    fn new(client: Client, method: Method, bucket: &str, key: &str) -> Self {
        let request = S3Request::new(method, &client.config.endpoint, bucket, key);
        let scheme = client.config.signature_scheme;
        let unsigned = client.config.unsigned_payload;
        Self {
            client,
            request,
            body: Body::Empty,
            error: None,
            on_success: None,
            on_failure: None,
        }
        .apply(|r| r.validate_path())
        .apply(|r| r.set_signature_scheme(scheme))
        .apply(|r| r.set_unsigned_payload(unsigned))
    }

    fn apply(mut self, f: impl FnOnce(&mut S3Request) -> Result<()>) -> Self {
        if self.error.is_none()
            && let Err(e) = f(&mut self.request)
        {
            self.error = Some(e);
        }
        self
    }

    fn body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// Sets a request header, replacing earlier values.
    pub fn header(self, name: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        self.apply(|r| r.set_header(name, value))
    }

    /// Adds a query parameter. An empty value sends a bare name.
    pub fn query(self, name: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        self.apply(|r| r.set_query(name, value))
    }

    /// Adds one `x-amz-meta-*` entry.
    pub fn metadata(self, name: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        self.apply(|r| r.add_user_metadata(name, value))
    }

    /// Replaces all user metadata.
    pub fn user_metadata(self, metadata: UserMetadata) -> Self {
        self.apply(|r| r.set_user_metadata(metadata))
    }

    /// Overrides the client's signature scheme for this operation.
    pub fn signature_scheme(self, scheme: SignatureScheme) -> Self {
        self.apply(|r| r.set_signature_scheme(scheme))
    }

    /// Callback for a completed response, used by [`dispatch`](Self::dispatch).
    pub fn on_success(mut self, callback: impl FnOnce(S3Response) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(callback));
        self
    }

    /// Callback for a failed operation, used by [`dispatch`](Self::dispatch).
    /// Without one, the client's failure handler receives the error.
    pub fn on_failure(mut self, callback: impl FnOnce(S3Error) + Send + 'static) -> Self {
        self.on_failure = Some(Box::new(callback));
        self
    }

    /// Runs the operation and returns its response.
    pub async fn send(self) -> Result<S3Response> {
        let Operation {
            client,
            mut request,
            body,
            error,
            ..
        } = self;
        if let Some(e) = error {
            return Err(e);
        }

        let payload = match body {
            Body::Empty => Bytes::new(),
            Body::Bytes(bytes) => bytes,
            Body::Stream(stream) => StreamingUploader::new(stream).drain_into(&mut request).await?,
            Body::File(path) => {
                let stream = match file_stream(&path).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        request.fail();
                        return Err(e);
                    }
                };
                StreamingUploader::new(stream).drain_into(&mut request).await?
            }
        };

        let credentials = match client.credentials.credentials().await {
            Ok(credentials) => credentials,
            Err(e) => {
                request.fail();
                return Err(e);
            }
        };
        let context = SigningContext::now(client.config.region.as_str());
        request.finalize(payload, &credentials, &context)?;

        debug!(method = %request.method(), path = %request.path(), "dispatching request");
        let response = request
            .dispatch(client.transport.as_ref(), &client.config.endpoint)
            .await?;
        debug!(
            method = %request.method(),
            path = %request.path(),
            status = response.status(),
            "request completed"
        );
        Ok(response)
    }

    /// Runs the operation on the tokio runtime and reports through the
    /// callbacks. Completions of sibling operations may arrive in any order.
    pub fn dispatch(mut self) -> JoinHandle<()> {
        let on_success = self.on_success.take();
        let on_failure = self.on_failure.take();
        let failure_handler = self.client.failure_handler.clone();

        tokio::spawn(async move {
            match self.send().await {
                Ok(response) => {
                    if let Some(callback) = on_success {
                        callback(response);
                    }
                }
                Err(e) => match on_failure {
                    Some(callback) => callback(e),
                    None => failure_handler.handle(e),
                },
            }
        })
    }
}

impl IntoFuture for Operation {
    type Output = Result<S3Response>;
    type IntoFuture = Pin<Box<dyn Future<Output = Result<S3Response>> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.send())
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("request", &self.request)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}
