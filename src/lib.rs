//! Non-blocking client for S3-compatible object storage.
//!
//! Requests are signed with either the current AWS signature scheme
//! (HMAC-SHA256 with a derived, scoped key) or the legacy HMAC-SHA1 scheme.
//! Credentials come from an ordered provider chain: explicit values, the
//! environment, process properties, the shared credentials file, then the
//! container and instance metadata endpoints.
//!
//! - [`Client::put`], [`Client::put_stream`], [`Client::put_file`]: upload an object
//! - [`Client::get`] / [`Client::head`]: fetch an object or its metadata
//! - [`Client::list`] / [`Client::list_with_prefix`]: list a bucket
//! - [`Client::delete`]: delete an object
//!
//! # Quick Start
//!
//! ```no_run
//! use rs_s3_client::{Client, ClientConfig, Credentials};
//!
//! # async fn example() -> rs_s3_client::Result<()> {
//! let config = ClientConfig::default().with_endpoint("http://localhost:9000")?;
//! let client = Client::with_config(Credentials::new("access-key", "secret-key"), config)?;
//!
//! client
//!     .put("bucket", "hello.txt", "hello")
//!     .metadata("author", "me")
//!     .await?
//!     .error_for_status()?;
//!
//! let object = client.get("bucket", "hello.txt").await?.error_for_status()?;
//! println!("{}", object.text());
//! # Ok(())
//! # }
//! ```
//!
//! # Callback style
//!
//! ```no_run
//! # use rs_s3_client::Client;
//! # fn example(client: &Client) {
//! client
//!     .delete("bucket", "hello.txt")
//!     .on_success(|resp| println!("deleted: {}", resp.status()))
//!     .on_failure(|err| eprintln!("delete failed: {err}"))
//!     .dispatch();
//! # }
//! ```

pub mod client;
pub mod config;
pub mod credential;
pub mod error;
pub mod exec;
pub mod metadata;
pub mod request;
pub mod response;
pub mod sign;
pub mod transport;
pub mod upload;

pub use client::{Client, Operation};
pub use config::{ClientConfig, Endpoint};
pub use credential::{
    ChainProvider, CredentialProvider, CredentialResolver, Credentials, EnvProvider,
    ProfileProvider, PropertiesProvider, StaticProvider, clear_property, property, set_property,
};
pub use error::{Result, S3Error};
pub use exec::{FailureHandler, LogFailure};
pub use metadata::{ContainerProvider, InstanceMetadataProvider};
pub use request::{Headers, Method, RequestState, S3Request, SignedRequest, UserMetadata};
pub use response::S3Response;
pub use sign::{SignatureScheme, SigningContext};
pub use transport::{ConnectionInfo, ReqwestTransport, Transport};
pub use upload::StreamingUploader;

// Compile-time assertions: key types must be Send + Sync for use across threads.
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    let _ = assert_send_sync::<Client>;
    let _ = assert_send_sync::<S3Error>;
    let _ = assert_send_sync::<Credentials>;
    let _ = assert_send_sync::<CredentialResolver>;
};
