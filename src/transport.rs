//! HTTP transport boundary.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::Endpoint;
use crate::error::{Result, S3Error};
use crate::request::{Headers, Method, SignedRequest};
use crate::response::S3Response;

/// Sends signed requests and collects responses.
///
/// Implementations must be safe to share across tasks; requests issued
/// concurrently may complete in any order.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one request and reads the whole response body.
    async fn send(&self, endpoint: &Endpoint, request: SignedRequest) -> Result<S3Response>;

    /// Terminates open connections. Later sends fail.
    fn close(&self) {}
}

/// Where a request is about to connect, passed to the connection hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
    pub ssl: bool,
}

type ConnectionHook = Arc<dyn Fn(&ConnectionInfo) + Send + Sync>;

/// [`Transport`] backed by a pooled `reqwest` client.
pub struct ReqwestTransport {
    http: reqwest::Client,
    closed: CancellationToken,
    on_connect: Option<ConnectionHook>,
}

impl ReqwestTransport {
    /// Creates a transport whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            closed: CancellationToken::new(),
            on_connect: None,
        })
    }

    /// Installs a hook invoked before each request opens its connection.
    pub fn with_connection_handler(
        mut self,
        handler: impl Fn(&ConnectionInfo) + Send + Sync + 'static,
    ) -> Self {
        self.on_connect = Some(Arc::new(handler));
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    async fn exchange(&self, endpoint: &Endpoint, request: SignedRequest) -> Result<S3Response> {
        let method = match request.method() {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };
        let url = format!("{}{}", endpoint.base_url(), request.uri());

        let mut builder = self.http.request(method, &url);
        for (name, values) in request.headers().iter() {
            // reqwest derives Host from the URL.
            if name == "host" {
                continue;
            }
            for value in values {
                builder = builder.header(name, value.as_str());
            }
        }
        let response = builder.body(request.body().clone()).send().await?;

        let status = response.status().as_u16();
        let mut headers = Headers::new();
        for (name, value) in response.headers() {
            headers.add(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
        }
        let body = response.bytes().await?;

        debug!(%url, status, bytes = body.len(), "response received");
        Ok(S3Response::new(status, headers, body))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, endpoint: &Endpoint, request: SignedRequest) -> Result<S3Response> {
        if self.closed.is_cancelled() {
            return Err(S3Error::Transport("transport closed".into()));
        }
        if let Some(hook) = &self.on_connect {
            hook(&ConnectionInfo {
                host: endpoint.host().to_string(),
                port: endpoint.port(),
                ssl: endpoint.ssl(),
            });
        }

        tokio::select! {
            _ = self.closed.cancelled() => Err(S3Error::Transport("transport closed".into())),
            result = self.exchange(endpoint, request) => result,
        }
    }

    fn close(&self) {
        debug!("closing transport");
        self.closed.cancel();
    }
}

impl fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("closed", &self.closed.is_cancelled())
            .field("connection_handler", &self.on_connect.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;

    use super::*;
    use crate::credential::Credentials;
    use crate::request::S3Request;
    use crate::sign::SigningContext;

    fn signed(endpoint: &Endpoint) -> SignedRequest {
        let mut request = S3Request::new(Method::Get, endpoint, "b", "k");
        request
            .finalize(
                Bytes::new(),
                &Credentials::new("id", "secret"),
                &SigningContext::now("us-east-1"),
            )
            .unwrap()
            .clone()
    }

    #[tokio::test]
    async fn closed_transport_rejects_sends() {
        let endpoint = Endpoint::parse("http://127.0.0.1:9").unwrap();
        let transport = ReqwestTransport::new(Duration::from_secs(1)).unwrap();
        transport.close();
        assert!(transport.is_closed());

        let err = transport.send(&endpoint, signed(&endpoint)).await.unwrap_err();
        assert!(matches!(err, S3Error::Transport(ref m) if m == "transport closed"));
    }

    #[tokio::test]
    async fn connection_handler_sees_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("GET", "/b/k").with_status(200).create_async().await;

        let endpoint = Endpoint::parse(&server.url()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let transport = ReqwestTransport::new(Duration::from_secs(5))
            .unwrap()
            .with_connection_handler(move |info| sink.lock().unwrap().push(info.clone()));

        let response = transport.send(&endpoint, signed(&endpoint)).await.unwrap();
        assert_eq!(response.status(), 200);
        mock.assert_async().await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].host, endpoint.host());
        assert_eq!(seen[0].port, endpoint.port());
        assert!(!seen[0].ssl);
    }
}
