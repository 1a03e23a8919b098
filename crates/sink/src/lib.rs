//! Upload sinks and the retrying upload client.
//!
//! A [`Sink`] accepts one named payload and either confirms it or fails
//! with a [`SinkError`] that says whether retrying can help. The
//! [`Uploader`] wraps a sink with per-attempt timeouts and a pluggable
//! [`BackoffPolicy`], and never touches progress state itself.

pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod github;
pub mod http;
pub mod telegram;

#[cfg(test)]
pub(crate) mod mock_http;

use std::future::Future;
use std::pin::Pin;

pub use backoff::{BackoffPolicy, ExponentialBackoff, FixedBackoff};
pub use client::{RetryCallback, RetryNotice, Uploader};
pub use config::{BuildError, EnvSecrets, SecretSource, SinkConfig, StaticSecrets};
pub use error::{SinkError, UploadError};
pub use github::GithubSink;
pub use http::HttpPutSink;
pub use telegram::TelegramSink;

/// Proof that a payload was accepted by a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    /// Destination name the payload was stored under.
    pub destination: String,
    /// Server-assigned identifier (blob SHA, message id, ETag, ...).
    pub id: String,
}

/// A remote destination for packed batches.
///
/// Implementations classify every failure as transient or permanent; they do
/// not retry on their own.
pub trait Sink: Send + Sync {
    /// Stores `bytes` under `destination`.
    fn put<'a>(
        &'a self,
        destination: &'a str,
        bytes: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<Confirmation, SinkError>> + Send + 'a>>;

    /// Short name of the sink kind, for logs.
    fn kind(&self) -> &'static str;
}
