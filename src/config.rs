//! Configuration for the exam telemetry logger and its CLI.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Logger configuration. Immutable once the logger is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggerConfig {
    /// Telemetry endpoint receiving `{"events": [...]}`
    pub endpoint: String,

    /// Minimum time between time-triggered flushes
    #[serde(rename = "sendIntervalMs", with = "duration_ms")]
    pub send_interval: Duration,

    /// Upper bound on events per request
    pub max_batch_size: usize,

    /// Keep a feed of recent events for on-screen debugging
    pub include_debug_widget: bool,

    /// Identifier stamped on every event from this page load
    pub page_id: String,

    /// Test instance the telemetry belongs to
    pub instance_id: Option<String>,

    /// Log every recorded event
    pub debug: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            send_interval: Duration::from_millis(5000),
            max_batch_size: 50,
            include_debug_widget: false,
            page_id: uuid::Uuid::new_v4().to_string(),
            instance_id: None,
            debug: false,
        }
    }
}

impl LoggerConfig {
    /// Configuration posting to an explicit endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Configuration for a test instance on the given API.
    pub fn for_instance(api_url: &str, instance_id: &str) -> Self {
        Self {
            endpoint: telemetry_endpoint(api_url, instance_id),
            instance_id: Some(instance_id.to_string()),
            ..Self::default()
        }
    }

    pub fn with_send_interval(mut self, interval: Duration) -> Self {
        self.send_interval = interval;
        self
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    pub fn with_page_id(mut self, page_id: impl Into<String>) -> Self {
        self.page_id = page_id.into();
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_debug_widget(mut self, include: bool) -> Self {
        self.include_debug_widget = include;
        self
    }

    /// Reject configurations the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("endpoint must not be empty".to_string()));
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "maxBatchSize must be at least 1".to_string(),
            ));
        }
        if self.send_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "sendIntervalMs must be positive".to_string(),
            ));
        }
        if self.page_id.is_empty() {
            return Err(ConfigError::Invalid("pageId must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Telemetry endpoint for a test instance.
pub fn telemetry_endpoint(api_url: &str, instance_id: &str) -> String {
    format!(
        "{}/api/v2/tests/{}/telemetry",
        api_url.trim_end_matches('/'),
        instance_id
    )
}

/// Client settings used by the CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Base URL of the exam API
    pub api_url: Option<String>,
    /// Bearer token from the last login
    pub access_token: Option<String>,
    /// Role sent with each request
    pub role: Option<String>,
}

impl ClientConfig {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::Io(e.to_string()))?;
            let config: ClientConfig =
                serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::Io(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("exam-telemetry")
            .join("config.json")
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Serialize error: {0}")]
    Serialize(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde support for Duration as whole milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
