//! Streaming uploads.
//!
//! S3 needs the body length before the request is signed, so a streamed body
//! is accumulated in memory first and then sent as one signed PUT.

use std::io;
use std::path::Path;
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::error::{Result, S3Error};
use crate::request::S3Request;

/// Boxed byte source accepted by streaming uploads.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Drains a byte source into a single payload for one request.
pub struct StreamingUploader<S> {
    source: S,
}

impl<S> StreamingUploader<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Reads the source to its end and sets `content-length` on `request`.
    ///
    /// On a read error the request is marked failed and never signed.
    pub async fn drain_into(mut self, request: &mut S3Request) -> Result<Bytes> {
        let mut buffer = BytesMut::new();
        let mut chunks = 0usize;

        while let Some(chunk) = self.source.next().await {
            match chunk {
                Ok(chunk) => {
                    chunks += 1;
                    buffer.extend_from_slice(&chunk);
                }
                Err(e) => {
                    warn!(path = %request.path(), error = %e, "upload source failed");
                    request.fail();
                    return Err(S3Error::UploadStream(e));
                }
            }
        }

        request.set_header("content-length", buffer.len().to_string())?;
        debug!(path = %request.path(), chunks, bytes = buffer.len(), "upload source drained");
        Ok(buffer.freeze())
    }
}

/// Opens a file as a [`ByteStream`].
pub async fn file_stream(path: impl AsRef<Path>) -> Result<ByteStream> {
    let file = tokio::fs::File::open(path.as_ref())
        .await
        .map_err(S3Error::UploadStream)?;
    Ok(Box::pin(ReaderStream::new(file)))
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;
    use crate::config::Endpoint;
    use crate::request::{Method, RequestState};

    fn request() -> S3Request {
        S3Request::new(Method::Put, &Endpoint::default(), "b", "k")
    }

    #[tokio::test]
    async fn accumulates_chunks() {
        let chunks = [100usize, 250, 50]
            .into_iter()
            .map(|n| Ok::<_, io::Error>(Bytes::from(vec![7u8; n])));
        let mut request = request();

        let payload = StreamingUploader::new(stream::iter(chunks))
            .drain_into(&mut request)
            .await
            .unwrap();

        assert_eq!(payload.len(), 400);
        assert_eq!(request.headers().get("content-length"), Some("400"));
        assert_eq!(request.state(), RequestState::Building);
    }

    #[tokio::test]
    async fn empty_source_yields_empty_payload() {
        let mut request = request();
        let payload = StreamingUploader::new(stream::empty::<io::Result<Bytes>>())
            .drain_into(&mut request)
            .await
            .unwrap();
        assert!(payload.is_empty());
        assert_eq!(request.headers().get("content-length"), Some("0"));
    }

    #[tokio::test]
    async fn read_error_fails_request() {
        let chunks = vec![
            Ok(Bytes::from_static(b"abc")),
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "source went away")),
            Ok(Bytes::from_static(b"never read")),
        ];
        let mut request = request();

        let err = StreamingUploader::new(stream::iter(chunks))
            .drain_into(&mut request)
            .await
            .unwrap_err();

        assert!(matches!(err, S3Error::UploadStream(_)));
        assert_eq!(request.state(), RequestState::Failed);
    }

    #[tokio::test]
    async fn reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("object.bin");
        std::fs::write(&path, vec![1u8; 20_000]).unwrap();

        let mut request = request();
        let payload = StreamingUploader::new(file_stream(&path).await.unwrap())
            .drain_into(&mut request)
            .await
            .unwrap();
        assert_eq!(payload.len(), 20_000);
    }

    #[tokio::test]
    async fn missing_file_is_stream_error() {
        let result = file_stream("/nonexistent/definitely/missing").await;
        assert!(matches!(result, Err(S3Error::UploadStream(_))));
    }
}
