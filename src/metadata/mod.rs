//! Structured log-event metadata.
//!
//! A [`LogEvent`] describes where logs come from (host, cloud platform,
//! source file) using the Timber log-event JSON schema. The forwarder sends
//! it serialized as the metadata override header. It can also be pushed
//! through the pipeline as a unit of its own.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub mod ec2;

pub use ec2::{Ec2Client, Ec2Config, MetadataError};

/// Schema every event declares.
pub const SCHEMA_URL: &str =
    "https://raw.githubusercontent.com/timberio/log-event-json-schema/v3.0.8/schema.json";

/// A log event carrying only context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    #[serde(rename = "$schema")]
    pub schema: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemContext>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<PlatformContext>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceContext>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_ec2: Option<AwsEc2Context>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// Instance identity as reported by the EC2 metadata service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsEc2Context {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ami_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_hostname: Option<String>,
}

impl Default for LogEvent {
    fn default() -> Self {
        Self::new()
    }
}

impl LogEvent {
    /// An event with the schema set and no context.
    pub fn new() -> Self {
        Self {
            schema: SCHEMA_URL.to_string(),
            context: None,
        }
    }

    fn context_mut(&mut self) -> &mut Context {
        self.context.get_or_insert_with(Context::default)
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.context_mut().system = Some(SystemContext {
            hostname: Some(hostname.into()),
        });
        self
    }

    pub fn with_source_file(mut self, file_name: impl Into<String>) -> Self {
        self.context_mut().source = Some(SourceContext {
            file_name: Some(file_name.into()),
        });
        self
    }

    /// Attach EC2 instance identity.
    pub fn add_ec2_context(&mut self, ec2: AwsEc2Context) {
        self.context_mut().platform = Some(PlatformContext { aws_ec2: Some(ec2) });
    }

    /// The EC2 context, if one was attached.
    pub fn ec2_context(&self) -> Option<&AwsEc2Context> {
        self.context
            .as_ref()
            .and_then(|c| c.platform.as_ref())
            .and_then(|p| p.aws_ec2.as_ref())
    }

    /// Serialize as compact JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize as a single unit for the batcher.
    pub fn to_unit(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}
