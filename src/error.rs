use thiserror::Error;

/// Maximum characters to include in error message body for debugging.
pub(crate) const MAX_ERROR_BODY_CHARS: usize = 200;

/// Errors that can occur when using the S3 client.
#[derive(Debug, Error)]
pub enum S3Error {
    /// No provider in the credential chain yielded a usable key pair.
    #[error("no credentials found: {0}")]
    NoCredentialsFound(String),

    /// A single credential provider could not supply credentials.
    #[error("credential error: {0}")]
    Credential(String),

    /// The endpoint URL could not be parsed into scheme, host and port.
    #[error("malformed endpoint: {0}")]
    MalformedEndpoint(String),

    /// The bucket or object key cannot be sent unchanged on the request line.
    #[error("invalid object path: {0}")]
    InvalidKey(String),

    /// Canonicalization or key derivation failed.
    #[error("signature error: {0}")]
    Signing(String),

    /// The byte source feeding an upload failed before end-of-stream.
    #[error("upload stream error: {0}")]
    UploadStream(#[source] std::io::Error),

    /// HTTP/network layer error from reqwest.
    #[error("HTTP request failed: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Transport-level failure not originating in reqwest (closed client, mock transports).
    #[error("transport error: {0}")]
    Transport(String),

    /// The request was mutated after its signature had been computed.
    #[error("request has already been signed")]
    AlreadySigned,

    /// S3 answered with a non-success status.
    #[error("HTTP {status} with body: {body}")]
    Status { status: u16, body: String },

    /// Credential payload deserialization error.
    #[error("deserialization error: {0}")]
    Deserialize(#[from] serde_json::Error),

    /// Credentials file parse error.
    #[error("config error: {0}")]
    Config(String),
}

impl S3Error {
    /// Returns `true` if the error is potentially recoverable by retrying.
    ///
    /// The client never retries on its own; this is a hint for callers that
    /// implement their own retry policy.
    pub fn is_retryable(&self) -> bool {
        match self {
            S3Error::HttpClient(e) => e.is_timeout() || e.is_connect(),
            S3Error::Transport(_) => true,
            S3Error::Status { status, .. } => *status == 429 || (500..600).contains(status),

            S3Error::NoCredentialsFound(_)
            | S3Error::Credential(_)
            | S3Error::MalformedEndpoint(_)
            | S3Error::InvalidKey(_)
            | S3Error::Signing(_)
            | S3Error::UploadStream(_)
            | S3Error::AlreadySigned
            | S3Error::Deserialize(_)
            | S3Error::Config(_) => false,
        }
    }

    /// Returns `true` for network or connection level failures.
    pub fn is_transport(&self) -> bool {
        matches!(self, S3Error::HttpClient(_) | S3Error::Transport(_))
    }

    /// Returns the HTTP status if this error was built from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            S3Error::Status { status, .. } => Some(*status),
            S3Error::HttpClient(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// A specialized Result type for S3 operations.
pub type Result<T> = std::result::Result<T, S3Error>;

/// Truncates a string to at most `max_chars` characters on a valid UTF-8 boundary.
pub(crate) fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
