//! Configuration for the MCP session server.
//!
//! TOML-backed configuration covering server identity, session liveness,
//! transport, logging, and the advertised feature groups.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{McpError, Result};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server identity and session settings
    pub server: ServerConfig,

    /// Transport configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Feature group enablement
    #[serde(default)]
    pub features: FeatureConfig,

    /// Custom server-specific settings
    #[serde(default)]
    pub custom: HashMap<String, serde_json::Value>,
}

/// Server identity and session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server name advertised in the handshake
    pub name: String,

    /// Server version advertised in the handshake
    pub version: String,

    /// Optional instructions surfaced in the initialize result
    pub instructions: Option<String>,

    /// Seconds between liveness pings
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a ping response before declaring the client gone
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_secs: u64,
}

impl ServerConfig {
    /// Ping cadence as a duration
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Ping timeout as a duration
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }
}

/// Transport layer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Transport type
    #[serde(default)]
    pub transport_type: TransportType,

    /// STDIO-specific configuration
    #[serde(default)]
    pub stdio: StdioConfig,
}

/// Transport type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    #[default]
    Stdio,
}

/// STDIO transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StdioConfig {
    /// Read buffer size in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format
    #[serde(default)]
    pub format: LogFormat,
}

/// Log format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
    Compact,
}

/// Feature group enablement, mapped onto the advertised capabilities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Tools feature
    #[serde(default)]
    pub tools: ToolsFeature,

    /// Resources feature
    #[serde(default)]
    pub resources: ResourcesFeature,

    /// Prompts feature
    #[serde(default)]
    pub prompts: PromptsFeature,

    /// Logging feature (client-directed log forwarding)
    #[serde(default = "default_true")]
    pub logging: bool,
}

/// Tools feature flags
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsFeature {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub list_changed: bool,
}

/// Resources feature flags
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesFeature {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub subscribe: bool,

    #[serde(default = "default_true")]
    pub list_changed: bool,
}

/// Prompts feature flags
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptsFeature {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub list_changed: bool,
}

fn default_ping_interval() -> u64 {
    30
}
fn default_ping_timeout() -> u64 {
    10
}
fn default_buffer_size() -> usize {
    8192
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: crate::SERVER_NAME.to_string(),
            version: crate::SERVER_VERSION.to_string(),
            instructions: None,
            ping_interval_secs: default_ping_interval(),
            ping_timeout_secs: default_ping_timeout(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            transport_type: TransportType::Stdio,
            stdio: StdioConfig::default(),
        }
    }
}

impl Default for StdioConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Pretty,
        }
    }
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            tools: ToolsFeature::default(),
            resources: ResourcesFeature::default(),
            prompts: PromptsFeature::default(),
            logging: true,
        }
    }
}

impl Default for ToolsFeature {
    fn default() -> Self {
        Self {
            enabled: true,
            list_changed: true,
        }
    }
}

impl Default for ResourcesFeature {
    fn default() -> Self {
        Self {
            enabled: true,
            subscribe: true,
            list_changed: true,
        }
    }
}

impl Default for PromptsFeature {
    fn default() -> Self {
        Self {
            enabled: true,
            list_changed: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            transport: TransportConfig::default(),
            logging: LoggingConfig::default(),
            features: FeatureConfig::default(),
            custom: HashMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| McpError::Config(format!("failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| McpError::Config(format!("failed to parse config file: {}", e)))?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| McpError::Config(format!("failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| McpError::Config(format!("failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.name.is_empty() {
            return Err(McpError::Config("server name must not be empty".to_string()));
        }

        if self.server.ping_interval_secs == 0 {
            return Err(McpError::Config(
                "ping interval must be at least one second".to_string(),
            ));
        }

        if self.transport.stdio.buffer_size == 0 {
            return Err(McpError::Config(
                "stdio buffer size must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}
