//! Client for the AWS EC2 instance metadata service.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::info;

use super::{AwsEc2Context, LogEvent};
use crate::diagnostics::{default_diagnostics, Diagnostic, SharedDiagnostics};

/// Link-local address of the metadata service.
pub const DEFAULT_BASE_ENDPOINT: &str = "http://169.254.169.254";

/// Kept short, off EC2 the address does not answer at all.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

const METADATA_PATH: &str = "/latest/meta-data/";

/// Errors from a metadata lookup.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("metadata request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("did not receive a valid response for EC2 metadata (status code {})", .0.as_u16())]
    Status(StatusCode),
}

/// Settings for [`Ec2Client`]. A zero timeout means the default.
#[derive(Clone, Default)]
pub struct Ec2Config {
    pub timeout: Duration,
    pub diagnostics: Option<SharedDiagnostics>,
}

/// Looks up instance metadata.
pub struct Ec2Client {
    base_endpoint: String,
    client: Client,
    diagnostics: SharedDiagnostics,
}

impl Ec2Client {
    pub fn new(config: Ec2Config) -> Result<Self, MetadataError> {
        Self::with_base_endpoint(DEFAULT_BASE_ENDPOINT, config)
    }

    /// Client for a metadata service at `base_endpoint`.
    pub fn with_base_endpoint(
        base_endpoint: impl Into<String>,
        config: Ec2Config,
    ) -> Result<Self, MetadataError> {
        let timeout = if config.timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            config.timeout
        };

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(MetadataError::Client)?;

        Ok(Self {
            base_endpoint: base_endpoint.into().trim_end_matches('/').to_string(),
            client,
            diagnostics: config.diagnostics.unwrap_or_else(default_diagnostics),
        })
    }

    /// Whether the metadata service answers with a success status.
    pub async fn available(&self) -> bool {
        let url = format!("{}{}", self.base_endpoint, METADATA_PATH);
        match self.client.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Fetch a single metadata field, e.g. `instance-id`.
    pub async fn get_metadata(&self, field: &str) -> Result<String, MetadataError> {
        let url = format!("{}{}{}", self.base_endpoint, METADATA_PATH, field);
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(MetadataError::Status(status));
        }

        Ok(response.text().await?)
    }

    /// Fill `event` with the instance identity.
    ///
    /// Leaves the event untouched when the service is unavailable. Fields
    /// that fail to load are reported and left unset.
    pub async fn add_ec2_metadata(&self, event: &mut LogEvent) {
        if !self.available().await {
            info!("Agent is not running on an EC2 instance");
            return;
        }
        info!("Agent is running on an EC2 instance");

        let context = AwsEc2Context {
            ami_id: self.lookup("ami-id").await,
            hostname: self.lookup("hostname").await,
            instance_id: self.lookup("instance-id").await,
            instance_type: self.lookup("instance-type").await,
            public_hostname: self.lookup("public-hostname").await,
        };

        event.add_ec2_context(context);
    }

    async fn lookup(&self, field: &str) -> Option<String> {
        match self.get_metadata(field).await {
            Ok(value) => {
                info!(field = field, value = %value, "Discovered value from AWS EC2 metadata");
                Some(value)
            }
            Err(e) => {
                self.diagnostics.report(Diagnostic::MetadataUnavailable {
                    field: field.to_string(),
                    error: e.to_string(),
                });
                None
            }
        }
    }
}
