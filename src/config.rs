//! Configuration module for the log forwarder.
//!
//! Settings are read from `LOG_FORWARDER_*` environment variables and turned
//! into the batcher and forwarder configs. Required settings for the chosen
//! destination are checked at load time.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::batch::{BatchConfig, DEFAULT_CAPACITY, DEFAULT_PERIOD};
use crate::forward::http::{
    default_user_agent, HttpConfig, RetryPolicy, DEFAULT_ENDPOINT, DEFAULT_TIMEOUT,
};

/// Maximum buffer capacity, the intake API refuses payloads over 1MB.
const MAX_CAPACITY: usize = 1_000_000;

/// Maximum batching period to ensure reasonable data freshness.
const MAX_PERIOD_SECS: u64 = 300;

/// Maximum number of retries for a single buffer.
const MAX_RETRIES: u32 = 20;

/// Where sealed buffers go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DestinationKind {
    Http,
    File,
    #[default]
    Stdout,
}

impl FromStr for DestinationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(DestinationKind::Http),
            "file" => Ok(DestinationKind::File),
            "stdout" => Ok(DestinationKind::Stdout),
            other => Err(format!(
                "'{}' is not a valid destination (expected http, file or stdout)",
                other
            )),
        }
    }
}

/// Configuration for the log forwarder.
///
/// All settings can be configured via environment variables:
/// - `LOG_FORWARDER_DESTINATION`: `http`, `file` or `stdout` (default: stdout)
/// - `LOG_FORWARDER_API_KEY`: credential for the HTTP destination
/// - `LOG_FORWARDER_ENDPOINT`: intake URL (default: https://logs.timber.io/frames)
/// - `LOG_FORWARDER_METADATA`: metadata override header value
/// - `LOG_FORWARDER_USER_AGENT`: user agent (default: log-forwarder/<version>)
/// - `LOG_FORWARDER_FILE_PATH`: target file for the file destination
/// - `LOG_FORWARDER_PERIOD_SECS`: seconds before a partial buffer is sealed (default: 3)
/// - `LOG_FORWARDER_CAPACITY`: buffer capacity in bytes (default: 990000)
/// - `LOG_FORWARDER_REQUEST_TIMEOUT_SECS`: HTTP request timeout (default: 10)
/// - `LOG_FORWARDER_MAX_RETRIES`: HTTP retry attempts (default: 4)
/// - `LOG_FORWARDER_HOSTNAME`: hostname reported in metadata (default: `HOSTNAME`)
/// - `LOG_FORWARDER_EC2_METADATA`: look up EC2 instance metadata (default: false)
#[derive(Debug, Clone)]
pub struct Config {
    pub destination: DestinationKind,

    /// Credential for the HTTP destination
    pub api_key: Option<String>,

    pub endpoint: String,

    /// Metadata override sent with every HTTP request
    pub metadata: Option<String>,

    pub user_agent: String,

    /// Target file for the file destination
    pub file_path: Option<PathBuf>,

    /// Maximum time a non-empty buffer stays unsealed
    pub period: Duration,

    /// Maximum buffer size in bytes
    pub capacity: usize,

    pub request_timeout: Duration,

    pub max_retries: u32,

    pub hostname: Option<String>,

    /// Whether to query the EC2 metadata service at startup
    pub ec2_metadata: bool,
}

/// Error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
#[error("Configuration error for {env_var}: {message}")]
pub struct ConfigError {
    pub message: String,
    pub env_var: String,
}

impl ConfigError {
    fn new(env_var: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            env_var: env_var.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a value does not parse, is out of range, or a
    /// setting required by the chosen destination is missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Empty values count as unset
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let destination = match get("LOG_FORWARDER_DESTINATION") {
            Some(value) => value
                .parse::<DestinationKind>()
                .map_err(|e| ConfigError::new("LOG_FORWARDER_DESTINATION", e))?,
            None => DestinationKind::default(),
        };

        let api_key = get("LOG_FORWARDER_API_KEY");
        if destination == DestinationKind::Http && api_key.is_none() {
            return Err(ConfigError::new(
                "LOG_FORWARDER_API_KEY",
                "required for the http destination",
            ));
        }

        let file_path = get("LOG_FORWARDER_FILE_PATH").map(PathBuf::from);
        if destination == DestinationKind::File && file_path.is_none() {
            return Err(ConfigError::new(
                "LOG_FORWARDER_FILE_PATH",
                "required for the file destination",
            ));
        }

        let endpoint =
            get("LOG_FORWARDER_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let user_agent = get("LOG_FORWARDER_USER_AGENT").unwrap_or_else(default_user_agent);

        let period_secs = parse_number(&get, "LOG_FORWARDER_PERIOD_SECS")?
            .filter(|&secs: &u64| secs > 0)
            .unwrap_or(DEFAULT_PERIOD.as_secs());
        if period_secs > MAX_PERIOD_SECS {
            return Err(ConfigError::new(
                "LOG_FORWARDER_PERIOD_SECS",
                format!(
                    "period {} exceeds maximum ({}s)",
                    period_secs, MAX_PERIOD_SECS
                ),
            ));
        }

        let capacity = parse_number(&get, "LOG_FORWARDER_CAPACITY")?
            .filter(|&capacity: &usize| capacity > 0)
            .unwrap_or(DEFAULT_CAPACITY);
        if capacity > MAX_CAPACITY {
            return Err(ConfigError::new(
                "LOG_FORWARDER_CAPACITY",
                format!(
                    "capacity {} exceeds maximum allowed ({})",
                    capacity, MAX_CAPACITY
                ),
            ));
        }

        let timeout_secs = parse_number(&get, "LOG_FORWARDER_REQUEST_TIMEOUT_SECS")?
            .filter(|&secs: &u64| secs > 0)
            .unwrap_or(DEFAULT_TIMEOUT.as_secs());

        let max_retries = parse_number(&get, "LOG_FORWARDER_MAX_RETRIES")?
            .unwrap_or(RetryPolicy::default().max_retries);
        if max_retries > MAX_RETRIES {
            return Err(ConfigError::new(
                "LOG_FORWARDER_MAX_RETRIES",
                format!(
                    "max retries {} exceeds maximum ({})",
                    max_retries, MAX_RETRIES
                ),
            ));
        }

        let hostname = get("LOG_FORWARDER_HOSTNAME").or_else(|| get("HOSTNAME"));

        let ec2_metadata = match get("LOG_FORWARDER_EC2_METADATA") {
            Some(value) => parse_bool(&value).ok_or_else(|| {
                ConfigError::new(
                    "LOG_FORWARDER_EC2_METADATA",
                    format!("'{}' is not a valid boolean", value),
                )
            })?,
            None => false,
        };

        Ok(Self {
            destination,
            api_key,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            metadata: get("LOG_FORWARDER_METADATA"),
            user_agent,
            file_path,
            period: Duration::from_secs(period_secs),
            capacity,
            request_timeout: Duration::from_secs(timeout_secs),
            max_retries,
            hostname,
            ec2_metadata,
        })
    }

    /// Batching policy for this configuration.
    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig::new(self.period, self.capacity)
    }

    /// HTTP forwarder settings for this configuration.
    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            endpoint: self.endpoint.clone(),
            metadata: self.metadata.clone(),
            user_agent: self.user_agent.clone(),
            timeout: self.request_timeout,
            retry: RetryPolicy {
                max_retries: self.max_retries,
                ..RetryPolicy::default()
            },
            diagnostics: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            destination: DestinationKind::default(),
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            metadata: None,
            user_agent: default_user_agent(),
            file_path: None,
            period: DEFAULT_PERIOD,
            capacity: DEFAULT_CAPACITY,
            request_timeout: DEFAULT_TIMEOUT,
            max_retries: RetryPolicy::default().max_retries,
            hostname: None,
            ec2_metadata: false,
        }
    }
}

fn parse_number<T, G>(get: &G, env_var: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(env_var) {
        Some(value) => value.trim().parse().map(Some).map_err(|_| {
            ConfigError::new(env_var, format!("'{}' is not a valid number", value))
        }),
        None => Ok(None),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.destination, DestinationKind::Stdout);
        assert_eq!(config.endpoint, "https://logs.timber.io/frames");
        assert_eq!(config.capacity, 990_000);
        assert_eq!(config.period, Duration::from_secs(3));
        assert_eq!(config.max_retries, 4);
    }

    #[test]
    fn test_config_with_defaults() {
        let config = load(&[]).expect("Should load with defaults");
        assert_eq!(config.destination, DestinationKind::Stdout);
        assert_eq!(config.capacity, DEFAULT_CAPACITY);
        assert_eq!(config.period, DEFAULT_PERIOD);
        assert_eq!(config.request_timeout, DEFAULT_TIMEOUT);
        assert!(config.user_agent.starts_with("log-forwarder/"));
        assert!(!config.ec2_metadata);
    }

    #[test]
    fn test_config_custom_values() {
        let config = load(&[
            ("LOG_FORWARDER_DESTINATION", "HTTP"),
            ("LOG_FORWARDER_API_KEY", "secret"),
            ("LOG_FORWARDER_ENDPOINT", "http://custom:9000/frames/"),
            ("LOG_FORWARDER_METADATA", "{\"context\":{}}"),
            ("LOG_FORWARDER_PERIOD_SECS", "10"),
            ("LOG_FORWARDER_CAPACITY", "4096"),
            ("LOG_FORWARDER_MAX_RETRIES", "2"),
            ("LOG_FORWARDER_EC2_METADATA", "true"),
            ("HOSTNAME", "web-1"),
        ])
        .expect("Should load custom values");

        assert_eq!(config.destination, DestinationKind::Http);
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.endpoint, "http://custom:9000/frames"); // Trailing slash removed
        assert_eq!(config.period, Duration::from_secs(10));
        assert_eq!(config.capacity, 4096);
        assert_eq!(config.hostname.as_deref(), Some("web-1"));
        assert!(config.ec2_metadata);

        let http = config.http_config();
        assert_eq!(http.endpoint, "http://custom:9000/frames");
        assert_eq!(http.metadata.as_deref(), Some("{\"context\":{}}"));
        assert_eq!(http.retry.max_retries, 2);

        let batch = config.batch_config();
        assert_eq!(batch.period, Duration::from_secs(10));
        assert_eq!(batch.capacity, 4096);
    }

    #[test]
    fn test_zero_values_fall_back_to_defaults() {
        let config = load(&[
            ("LOG_FORWARDER_PERIOD_SECS", "0"),
            ("LOG_FORWARDER_CAPACITY", "0"),
            ("LOG_FORWARDER_REQUEST_TIMEOUT_SECS", "0"),
        ])
        .unwrap();

        assert_eq!(config.period, DEFAULT_PERIOD);
        assert_eq!(config.capacity, DEFAULT_CAPACITY);
        assert_eq!(config.request_timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_http_requires_api_key() {
        let err = load(&[("LOG_FORWARDER_DESTINATION", "http")]).unwrap_err();
        assert_eq!(err.env_var, "LOG_FORWARDER_API_KEY");
        assert!(err.message.contains("required"));
    }

    #[test]
    fn test_file_requires_path() {
        let err = load(&[("LOG_FORWARDER_DESTINATION", "file")]).unwrap_err();
        assert_eq!(err.env_var, "LOG_FORWARDER_FILE_PATH");

        let config = load(&[
            ("LOG_FORWARDER_DESTINATION", "file"),
            ("LOG_FORWARDER_FILE_PATH", "/var/log/app/out.log"),
        ])
        .unwrap();
        assert_eq!(config.file_path, Some(PathBuf::from("/var/log/app/out.log")));
    }

    #[test]
    fn test_invalid_destination() {
        let err = load(&[("LOG_FORWARDER_DESTINATION", "kafka")]).unwrap_err();
        assert!(err.message.contains("not a valid destination"));
    }

    #[test]
    fn test_invalid_capacity() {
        let err = load(&[("LOG_FORWARDER_CAPACITY", "not_a_number")]).unwrap_err();
        assert!(err.message.contains("not a valid number"));

        let err = load(&[("LOG_FORWARDER_CAPACITY", "2000000")]).unwrap_err();
        assert!(err.message.contains("exceeds maximum"));
    }

    #[test]
    fn test_period_exceeds_max() {
        let err = load(&[("LOG_FORWARDER_PERIOD_SECS", "999")]).unwrap_err();
        assert!(err.message.contains("exceeds maximum"));
    }

    #[test]
    fn test_invalid_boolean() {
        let err = load(&[("LOG_FORWARDER_EC2_METADATA", "maybe")]).unwrap_err();
        assert_eq!(err.env_var, "LOG_FORWARDER_EC2_METADATA");
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::new("TEST_VAR", "test error");
        assert_eq!(
            format!("{}", error),
            "Configuration error for TEST_VAR: test error"
        );
    }
}
