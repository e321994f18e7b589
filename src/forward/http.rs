//! HTTP forwarder with retry and exponential backoff.
//!
//! Each buffer is POSTed as plain text to the configured endpoint. Transient
//! failures are retried inside [`HttpForwarder::send`]:
//! - connection errors, timeouts and other request errors
//! - 5xx responses, except 501 Not Implemented
//!
//! Every other status of 300 and up is final. Once retries run out, or on a
//! final failure, the buffer is dropped and the failure goes to diagnostics.

use std::fmt;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use super::{ForwardError, Forwarder};
use crate::diagnostics::{default_diagnostics, Diagnostic, SharedDiagnostics};

/// Default log intake endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://logs.timber.io/frames";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Header carrying the serialized metadata override.
pub const METADATA_OVERRIDE_HEADER: &str = "Timber-Metadata-Override";

/// Default user agent, `log-forwarder/<version>`.
pub fn default_user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

/// Bounded retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Delay before the first retry, doubled on each following one
    pub wait_min: Duration,

    /// Upper bound for a single delay
    pub wait_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            wait_min: Duration::from_secs(1),
            wait_max: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Retry immediately, `max_retries` times.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            wait_min: Duration::ZERO,
            wait_max: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (starting at 1).
    ///
    /// delay = min(wait_min * 2^(retry - 1) + jitter, wait_max), jitter up to 25%
    pub fn backoff(&self, retry: u32) -> Duration {
        let base = self.wait_min.as_millis() as u64;
        if base == 0 {
            return Duration::ZERO;
        }

        let exponential = base.saturating_mul(1 << retry.saturating_sub(1).min(10));
        let jitter = rand::random::<u64>() % (exponential / 4 + 1);
        let max = self.wait_max.as_millis() as u64;

        Duration::from_millis(exponential.saturating_add(jitter).min(max))
    }
}

/// Settings for [`HttpForwarder`].
#[derive(Clone)]
pub struct HttpConfig {
    /// URL buffers are POSTed to
    pub endpoint: String,

    /// Value of the metadata override header, omitted when `None`
    pub metadata: Option<String>,

    pub user_agent: String,

    /// Timeout for a single request
    pub timeout: Duration,

    pub retry: RetryPolicy,

    pub diagnostics: Option<SharedDiagnostics>,
}

impl fmt::Debug for HttpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConfig")
            .field("endpoint", &self.endpoint)
            .field("metadata", &self.metadata)
            .field("user_agent", &self.user_agent)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            metadata: None,
            user_agent: default_user_agent(),
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            diagnostics: Some(default_diagnostics()),
        }
    }
}

impl HttpConfig {
    /// Config posting to `endpoint`, defaults elsewhere.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: SharedDiagnostics) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Replace empty strings, a zero timeout and missing diagnostics with
    /// the defaults. `metadata` and `retry` are taken as given.
    pub fn with_defaults(self) -> Self {
        let defaults = Self::default();
        Self {
            endpoint: if self.endpoint.is_empty() {
                defaults.endpoint
            } else {
                self.endpoint
            },
            metadata: self.metadata,
            user_agent: if self.user_agent.is_empty() {
                defaults.user_agent
            } else {
                self.user_agent
            },
            timeout: if self.timeout.is_zero() {
                defaults.timeout
            } else {
                self.timeout
            },
            retry: self.retry,
            diagnostics: self.diagnostics.or(defaults.diagnostics),
        }
    }
}

/// Forwards buffers to a remote HTTP endpoint.
pub struct HttpForwarder {
    /// Reused across requests for connection pooling
    client: Client,

    /// Precomputed `Basic <base64(api_key)>`
    authorization: String,

    config: HttpConfig,

    diagnostics: SharedDiagnostics,
}

impl HttpForwarder {
    /// Build a forwarder. Fails right away on an empty API key.
    pub fn new(api_key: impl AsRef<str>, config: HttpConfig) -> Result<Self, ForwardError> {
        let api_key = api_key.as_ref();
        if api_key.is_empty() {
            return Err(ForwardError::MissingApiKey);
        }

        let config = config.with_defaults();
        let diagnostics = config
            .diagnostics
            .clone()
            .unwrap_or_else(default_diagnostics);

        let client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(ForwardError::Client)?;

        Ok(Self {
            client,
            authorization: format!("Basic {}", STANDARD.encode(api_key)),
            config,
            diagnostics,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// POST `body`, retrying transient failures.
    ///
    /// Returns the final status when it is below 300.
    pub async fn send(&self, body: Bytes) -> Result<StatusCode, ForwardError> {
        let retry = self.config.retry;
        let mut attempt: u32 = 0;

        loop {
            if attempt > 0 {
                let delay = retry.backoff(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }

            let failure = match self.request(body.clone()).await {
                Ok(status) if status.as_u16() < 300 => return Ok(status),
                Ok(status) if is_retryable_status(status) => {
                    format!("status code {}", status.as_u16())
                }
                Ok(status) => return Err(ForwardError::UnexpectedStatus(status)),
                Err(e) if is_retryable_error(&e) => e.to_string(),
                Err(e) => return Err(ForwardError::Transport(e)),
            };

            if attempt >= retry.max_retries {
                return Err(ForwardError::RetriesExhausted {
                    attempts: attempt + 1,
                    last_error: failure,
                });
            }

            attempt += 1;
            warn!(
                error = %failure,
                attempt = attempt,
                max_retries = retry.max_retries,
                "Request failed, will retry"
            );
        }
    }

    /// A single POST without retries.
    async fn request(&self, body: Bytes) -> Result<StatusCode, reqwest::Error> {
        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header(CONTENT_TYPE, "text/plain")
            .header(AUTHORIZATION, &self.authorization)
            .header(USER_AGENT, &self.config.user_agent);

        if let Some(metadata) = &self.config.metadata {
            request = request.header(METADATA_OVERRIDE_HEADER, metadata);
        }

        let response = request.body(body).send().await?;
        Ok(response.status())
    }
}

impl Forwarder for HttpForwarder {
    async fn deliver(&self, buffer: Bytes) {
        let len = buffer.len();
        match self.send(buffer).await {
            Ok(status) => {
                debug!(len = len, status = status.as_u16(), "Delivered buffer");
            }
            Err(ForwardError::UnexpectedStatus(status)) => {
                self.diagnostics.report(Diagnostic::UnexpectedResponse {
                    status: status.as_u16(),
                });
            }
            Err(e) => {
                self.diagnostics.report(Diagnostic::DeliveryFailed {
                    destination: self.config.endpoint.clone(),
                    error: e.to_string(),
                });
            }
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() && status != StatusCode::NOT_IMPLEMENTED
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout() || error.is_request()
}
