//! Delivery of sealed buffers to a destination.
//!
//! A [`Forwarder`] takes one buffer at a time and tries to deliver it.
//! Failures are reported to diagnostics and never returned, so the
//! forwarding loop keeps draining no matter what the destination does.

use std::future::Future;

use bytes::Bytes;
use reqwest::StatusCode;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::{Config, DestinationKind};
use crate::diagnostics::SharedDiagnostics;

pub mod file;
pub mod http;
pub mod stdout;

pub use file::FileForwarder;
pub use http::{HttpConfig, HttpForwarder, RetryPolicy};
pub use stdout::StdoutForwarder;

/// Errors raised while building or driving a forwarder.
///
/// Construction errors are returned to the caller. Delivery errors only
/// surface through diagnostics, or from [`HttpForwarder::send`].
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    /// HTTP forwarding needs a credential
    #[error("API key required")]
    MissingApiKey,

    /// File forwarding needs a path
    #[error("file path required")]
    MissingPath,

    /// The HTTP client could not be built
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// The destination file could not be opened or created
    #[error("failed to open {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The destination answered outside the success range
    #[error("unexpected response (status code {})", .0.as_u16())]
    UnexpectedStatus(StatusCode),

    /// The request could not be completed
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Every attempt hit a retryable failure
    #[error("giving up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

/// A destination for sealed buffers.
pub trait Forwarder: Send + Sync {
    /// Deliver one buffer. Failures are reported, not returned.
    fn deliver(&self, buffer: Bytes) -> impl Future<Output = ()> + Send;
}

/// The forwarder chosen at runtime.
pub enum Destination {
    Http(HttpForwarder),
    File(FileForwarder),
    Stdout(StdoutForwarder),
}

impl Destination {
    /// Build the destination selected by `config`.
    pub fn from_config(
        config: &Config,
        diagnostics: SharedDiagnostics,
    ) -> Result<Self, ForwardError> {
        match config.destination {
            DestinationKind::Http => {
                let api_key = config.api_key.clone().unwrap_or_default();
                let http_config = config.http_config().with_diagnostics(diagnostics);
                HttpForwarder::new(api_key, http_config).map(Destination::Http)
            }
            DestinationKind::File => {
                let path = config.file_path.as_ref().ok_or(ForwardError::MissingPath)?;
                FileForwarder::new(path, Some(diagnostics)).map(Destination::File)
            }
            DestinationKind::Stdout => {
                Ok(Destination::Stdout(StdoutForwarder::new(Some(diagnostics))))
            }
        }
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Destination::Http(_) => "http",
            Destination::File(_) => "file",
            Destination::Stdout(_) => "stdout",
        }
    }
}

impl Forwarder for Destination {
    async fn deliver(&self, buffer: Bytes) {
        match self {
            Destination::Http(forwarder) => forwarder.deliver(buffer).await,
            Destination::File(forwarder) => forwarder.deliver(buffer).await,
            Destination::Stdout(forwarder) => forwarder.deliver(buffer).await,
        }
    }
}

/// The forwarding loop.
///
/// Delivers every buffer from `buffers` in order, one at a time, and
/// returns the number of buffers handed to `forwarder` once the channel
/// is closed.
pub async fn forward<F: Forwarder>(mut buffers: mpsc::Receiver<Bytes>, forwarder: &F) -> usize {
    let mut delivered = 0;

    while let Some(buffer) = buffers.recv().await {
        debug!(len = buffer.len(), "Forwarding buffer");
        forwarder.deliver(buffer).await;
        delivered += 1;
    }

    info!(buffers = delivered, "Forwarding loop finished");
    delivered
}
