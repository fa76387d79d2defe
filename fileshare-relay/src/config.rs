//! Configuration loading for fileshare-relay.
//!
//! Configuration is loaded from a TOML file (default: `relay.toml`). Every
//! section and field is optional; missing values fall back to defaults.

use serde::Deserialize;
use std::path::PathBuf;

/// Root configuration for fileshare-relay.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Message size, queue and rate limiting configuration.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Cleanup task configuration.
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP/WebSocket listener (default: 0.0.0.0:8000).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Path clients open their WebSocket on (default: /ws/socket-server/).
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
}

/// Message size, queue and rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Largest WebSocket message accepted from a client, in bytes (default: 16 MiB).
    /// A client exceeding it is disconnected.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Messages buffered per connection before the peer counts as stalled
    /// and is disconnected (default: 32).
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
    /// Maximum concurrent registered connections (default: 10000).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// New connections allowed per remote IP per minute (default: 30).
    ///
    /// Keyed on the TCP peer address. Behind a TLS-terminating proxy every
    /// client shares the proxy's address, so raise this to cover the whole
    /// client population of that proxy.
    #[serde(default = "default_connections_per_ip")]
    pub connections_per_ip: u32,
    /// Client frames allowed per connection per minute (default: 120).
    #[serde(default = "default_messages_per_minute")]
    pub messages_per_minute: u32,
}

/// Cleanup task configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    /// Cleanup interval in seconds (default: 300).
    #[serde(default = "default_cleanup_interval")]
    pub interval_secs: u64,
    /// Enable cleanup task (default: true).
    #[serde(default = "default_cleanup_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_ws_path() -> String {
    "/ws/socket-server/".to_string()
}

fn default_max_message_size() -> usize {
    16 * 1024 * 1024 // 16 MiB
}

fn default_outbound_queue_capacity() -> usize {
    32
}

fn default_max_connections() -> usize {
    10_000
}

fn default_connections_per_ip() -> u32 {
    30
}

fn default_messages_per_minute() -> u32 {
    120
}

fn default_cleanup_interval() -> u64 {
    300 // 5 minutes
}

fn default_cleanup_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            ws_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            max_connections: default_max_connections(),
            connections_per_ip: default_connections_per_ip(),
            messages_per_minute: default_messages_per_minute(),
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_cleanup_interval(),
            enabled: default_cleanup_enabled(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Check values that would make the relay unusable.
    ///
    /// The outbound queue must hold at least the two greeting messages
    /// (`user_id` and `connected_users`) a connection receives before its
    /// writer starts draining.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.server.ws_path.starts_with('/') {
            return Err(invalid("server.ws_path", "must start with '/'"));
        }
        if self.limits.max_message_size == 0 {
            return Err(invalid("limits.max_message_size", "must be > 0"));
        }
        if self.limits.outbound_queue_capacity < 2 {
            return Err(invalid("limits.outbound_queue_capacity", "must be >= 2"));
        }
        if self.limits.max_connections == 0 {
            return Err(invalid("limits.max_connections", "must be > 0"));
        }
        if self.limits.connections_per_ip == 0 {
            return Err(invalid("limits.connections_per_ip", "must be > 0"));
        }
        if self.limits.messages_per_minute == 0 {
            return Err(invalid("limits.messages_per_minute", "must be > 0"));
        }
        if self.cleanup.enabled && self.cleanup.interval_secs == 0 {
            return Err(invalid("cleanup.interval_secs", "must be > 0 when cleanup is enabled"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &'static str) -> ConfigError {
    ConfigError::Invalid { field, reason }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid config value {field}: {reason}")]
    Invalid {
        /// Dotted name of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}
