//! Configuration types
//!
//! This module contains the main configuration types used throughout the application.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use log::debug;

use crate::config::defaults;

/// Source of a configuration value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueSource {
    /// Default value
    Default,
    /// From configuration file
    File,
    /// From environment variable
    Environment,
    /// From command line argument
    CommandLine,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::Default => write!(f, "default"),
            ValueSource::File => write!(f, "file"),
            ValueSource::Environment => write!(f, "environment"),
            ValueSource::CommandLine => write!(f, "command line"),
        }
    }
}

/// Configuration values
///
/// Every field is optional so that partial layers (file, environment,
/// command line) can be merged on top of each other.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigValues {
    // --- Network settings ---

    /// IP address to listen on
    #[serde(default)]
    pub listen_ip: Option<IpAddr>,

    /// Port to listen on
    #[serde(default)]
    pub port: Option<u16>,

    /// Destination (`host:port`) used when the client sends no `X-Real-Host`
    #[serde(default, alias = "target")]
    pub default_destination: Option<String>,

    // --- Tunnel settings ---

    /// Shared password expected in `X-Pass`; empty disables the check
    #[serde(default)]
    pub password: Option<String>,

    /// Timeout in seconds for each phase before bridging
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Relay buffer size in bytes
    #[serde(default)]
    pub buffer_size: Option<usize>,

    /// Maximum size of the request head in bytes
    #[serde(default)]
    pub max_header_bytes: Option<usize>,

    /// TCP keepalive idle time in seconds; 0 disables keepalive
    #[serde(default)]
    pub tcp_keepalive: Option<u64>,

    // --- General settings ---

    /// Log level (error, warn, info, debug, trace)
    #[serde(default)]
    pub log_level: Option<String>,
}

/// Relay configuration
///
/// Immutable once built; shared between connection tasks through `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Configuration values
    pub values: ConfigValues,

    /// Configuration file path
    pub config_file: Option<PathBuf>,

    /// Source tracking for configuration values
    pub sources: HashMap<String, ValueSource>,
}

impl Deref for RelayConfig {
    type Target = ConfigValues;

    fn deref(&self) -> &Self::Target {
        &self.values
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        let mut config = Self::empty();
        config.set_default_values();
        config
    }
}

impl RelayConfig {
    /// Configuration with no values set, used as a merge base and by partial sources
    pub fn empty() -> Self {
        Self {
            values: ConfigValues::default(),
            config_file: None,
            sources: HashMap::new(),
        }
    }

    /// Create a configuration from explicit values, filling the gaps with defaults
    pub fn from_values(values: ConfigValues) -> Self {
        let mut config = Self {
            values,
            config_file: None,
            sources: HashMap::new(),
        };
        config.set_default_values();
        config
    }

    /// Set default values for all configuration options that are still unset
    pub fn set_default_values(&mut self) {
        macro_rules! default_field {
            ($name:ident, $value:expr) => {
                if self.values.$name.is_none() {
                    self.values.$name = Some($value);
                    self.sources.insert(stringify!($name).to_string(), ValueSource::Default);
                }
            };
        }

        default_field!(listen_ip, defaults::LISTEN_IP);
        default_field!(port, defaults::PORT);
        default_field!(default_destination, defaults::DEFAULT_DESTINATION.to_string());
        default_field!(timeout, defaults::TIMEOUT_SECS);
        default_field!(buffer_size, defaults::BUFFER_SIZE);
        default_field!(max_header_bytes, defaults::MAX_HEADER_BYTES);
        default_field!(log_level, defaults::LOG_LEVEL_STR.to_string());
    }

    /// Get the source of a configuration value
    pub fn source(&self, name: &str) -> String {
        self.sources
            .get(name)
            .map(ToString::to_string)
            .unwrap_or_else(|| "unset".to_string())
    }

    /// Get the listen address
    pub fn listen(&self) -> SocketAddr {
        SocketAddr::new(
            self.values.listen_ip.unwrap_or(defaults::LISTEN_IP),
            self.values.port.unwrap_or(defaults::PORT),
        )
    }

    /// Get the default destination
    pub fn default_destination(&self) -> &str {
        self.values.default_destination.as_deref().unwrap_or(defaults::DEFAULT_DESTINATION)
    }

    /// Get the password, if the password gate is enabled
    pub fn password(&self) -> Option<&str> {
        self.values.password.as_deref().filter(|p| !p.is_empty())
    }

    /// Get the per-phase timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.values.timeout.unwrap_or(defaults::TIMEOUT_SECS))
    }

    /// Get the relay buffer size
    pub fn buffer_size(&self) -> usize {
        self.values.buffer_size.unwrap_or(defaults::BUFFER_SIZE)
    }

    /// Get the request head budget
    pub fn max_header_bytes(&self) -> usize {
        self.values.max_header_bytes.unwrap_or(defaults::MAX_HEADER_BYTES)
    }

    /// Get the TCP keepalive idle time, if enabled
    pub fn tcp_keepalive(&self) -> Option<Duration> {
        self.values.tcp_keepalive
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Get the log level
    pub fn log_level(&self) -> &str {
        self.values.log_level.as_deref().unwrap_or(defaults::LOG_LEVEL_STR)
    }

    /// Get the configuration file path
    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    /// Merge two configurations, values present in `other` win
    pub fn merge(&self, other: &RelayConfig, source: ValueSource) -> Self {
        let mut result = self.clone();

        macro_rules! merge_field {
            ($name:ident) => {
                if other.values.$name.is_some() {
                    result.values.$name = other.values.$name.clone();
                    result.sources.insert(stringify!($name).to_string(), source);
                }
            };
        }

        merge_field!(listen_ip);
        merge_field!(port);
        merge_field!(default_destination);
        merge_field!(password);
        merge_field!(timeout);
        merge_field!(buffer_size);
        merge_field!(max_header_bytes);
        merge_field!(tcp_keepalive);
        merge_field!(log_level);

        if let Some(path) = &other.config_file {
            result.config_file = Some(path.clone());
        }

        result
    }

    /// Log the configuration
    pub fn log(&self) {
        debug!("=== Configuration ===");
        debug!("  Listen address: {} (from {}/{})", self.listen(), self.source("listen_ip"), self.source("port"));
        debug!("  Default destination: {} (from {})", self.default_destination(), self.source("default_destination"));
        debug!("  Password: {} (from {})", if self.password().is_some() { "enabled" } else { "disabled" }, self.source("password"));
        debug!("  Timeout: {:?} (from {})", self.timeout(), self.source("timeout"));
        debug!("  Buffer size: {} bytes (from {})", self.buffer_size(), self.source("buffer_size"));
        debug!("  Max header bytes: {} (from {})", self.max_header_bytes(), self.source("max_header_bytes"));
        match self.tcp_keepalive() {
            Some(idle) => debug!("  TCP keepalive: {:?} (from {})", idle, self.source("tcp_keepalive")),
            None => debug!("  TCP keepalive: disabled"),
        }
        debug!("  Log level: {} (from {})", self.log_level(), self.source("log_level"));

        if let Some(file) = self.config_file() {
            debug!("  Configuration file: {}", file.display());
        }

        debug!("=====================");
    }
}
