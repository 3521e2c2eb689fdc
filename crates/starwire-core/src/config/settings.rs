use crate::Result;
use crate::dispatch::DEFAULT_TIMESTAMP_FORMAT;
use serde::{Deserialize, Serialize};
use starwire_proto::{BlobPolicy, DEFAULT_MAX_ELEMENT_SIZE, PROTOCOL_VERSION};
use std::path::Path;
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub protocol: ProtocolConfig,

    #[serde(default)]
    pub messages: MessageConfig,
}

impl Config {
    /// Load config from file, or return defaults if the file doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        super::validation::warn_unknown_fields(&content, "config.json");
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save config to file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Local server process settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_binary")]
    pub binary: String,

    #[serde(default = "default_verbose")]
    pub verbose: bool,
}

fn default_binary() -> String {
    "indiserver".to_string()
}
fn default_verbose() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            verbose: default_verbose(),
        }
    }
}

/// Where to connect and how hard to try
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_attempts")]
    pub attempts: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    7624
}
fn default_attempts() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    100
}
fn default_timeout() -> u64 {
    1000
}

impl ConnectionConfig {
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            attempts: default_attempts(),
            retry_delay_ms: default_retry_delay(),
            timeout_ms: default_timeout(),
        }
    }
}

/// Wire protocol settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolConfig {
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub blob_policy: BlobPolicy,

    #[serde(default = "default_max_element_bytes")]
    pub max_element_bytes: usize,
}

fn default_version() -> String {
    PROTOCOL_VERSION.to_string()
}
fn default_max_element_bytes() -> usize {
    DEFAULT_MAX_ELEMENT_SIZE
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            blob_policy: BlobPolicy::default(),
            max_element_bytes: default_max_element_bytes(),
        }
    }
}

/// Driver message settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageConfig {
    /// strftime format for messages that arrive without a timestamp
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,
}

fn default_timestamp_format() -> String {
    DEFAULT_TIMESTAMP_FORMAT.to_string()
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            timestamp_format: default_timestamp_format(),
        }
    }
}
