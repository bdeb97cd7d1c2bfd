use bytes::Bytes;

use crate::error::{MAX_ERROR_BODY_CHARS, Result, S3Error, truncate_str};
use crate::request::{Headers, UserMetadata};

/// Response to an S3 request, with the body fully read.
///
/// Non-success statuses are delivered as responses; use
/// [`error_for_status`](Self::error_for_status) to turn them into errors.
#[derive(Debug, Clone)]
pub struct S3Response {
    status: u16,
    headers: Headers,
    body: Bytes,
}

impl S3Response {
    pub fn new(status: u16, headers: Headers, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Returns the HTTP status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// First value of a response header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parsed `Content-Length` header.
    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length")?.trim().parse().ok()
    }

    /// `ETag` header with surrounding quotes removed.
    pub fn etag(&self) -> Option<&str> {
        self.header("etag").map(|e| e.trim_matches('"'))
    }

    /// Object metadata returned as `x-amz-meta-*` headers.
    pub fn user_metadata(&self) -> UserMetadata {
        UserMetadata::from_headers(&self.headers)
    }

    /// Converts a non-success response into [`S3Error::Status`].
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let text = self.text();
        Err(S3Error::Status {
            status: self.status,
            body: truncate_str(&text, MAX_ERROR_BODY_CHARS).to_string(),
        })
    }
}
