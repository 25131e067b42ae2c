//! Configuration sources
//!
//! This module defines traits and implementations for loading configuration
//! from different sources.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use log::{debug, warn};

use crate::config::types::{RelayConfig, ConfigValues, ValueSource};
use crate::config::error::{ConfigError, Result};

/// Configuration source trait
pub trait ConfigSource {
    /// Load configuration from this source
    fn load(&self) -> Result<RelayConfig>;

    /// Get the source type
    fn source_type(&self) -> ValueSource;
}

/// Record which fields a partial layer set
fn track_sources(config: &mut RelayConfig, source: ValueSource) {
    let v = &config.values;
    let present = [
        ("listen_ip", v.listen_ip.is_some()),
        ("port", v.port.is_some()),
        ("default_destination", v.default_destination.is_some()),
        ("password", v.password.is_some()),
        ("timeout", v.timeout.is_some()),
        ("buffer_size", v.buffer_size.is_some()),
        ("max_header_bytes", v.max_header_bytes.is_some()),
        ("tcp_keepalive", v.tcp_keepalive.is_some()),
        ("log_level", v.log_level.is_some()),
    ];

    for (name, is_set) in present {
        if is_set {
            config.sources.insert(name.to_string(), source);
        }
    }
}

/// Default configuration source
pub struct DefaultSource;

impl ConfigSource for DefaultSource {
    fn load(&self) -> Result<RelayConfig> {
        debug!("Loading default configuration");
        Ok(RelayConfig::default())
    }

    fn source_type(&self) -> ValueSource {
        ValueSource::Default
    }
}

/// JSON file configuration source
pub struct FileSource {
    pub path: PathBuf,
    /// Whether a missing file is an error
    pub required: bool,
}

impl FileSource {
    /// Create a source for a file that must exist
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            required: true,
        }
    }

    /// Create a source for a file that is skipped when absent
    pub fn optional<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            required: false,
        }
    }
}

impl ConfigSource for FileSource {
    fn load(&self) -> Result<RelayConfig> {
        if !self.path.exists() {
            if self.required {
                return Err(ConfigError::FileReadError(self.path.clone(), "file not found".to_string()));
            }
            debug!("Optional configuration file not found: {}", self.path.display());
            return Ok(RelayConfig::empty());
        }

        debug!("Loading configuration from file: {}", self.path.display());

        let contents = fs::read_to_string(&self.path).map_err(|e| {
            warn!("Failed to read configuration file {}: {}", self.path.display(), e);
            ConfigError::FileReadError(self.path.clone(), e.to_string())
        })?;

        let values: ConfigValues = serde_json::from_str(&contents).map_err(|e| {
            ConfigError::ParseError(format!("Error parsing {}: {}", self.path.display(), e))
        })?;

        let mut config = RelayConfig {
            values,
            config_file: Some(self.path.clone()),
            ..RelayConfig::empty()
        };
        track_sources(&mut config, self.source_type());

        Ok(config)
    }

    fn source_type(&self) -> ValueSource {
        ValueSource::File
    }
}

/// Environment variable configuration source
pub struct EnvSource {
    pub prefix: String,
}

impl EnvSource {
    /// Create a new environment source
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    fn var(&self, name: &str) -> Option<String> {
        let full_name = format!("{}{}", self.prefix, name);
        let value = env::var(&full_name).ok()?;
        debug!("Found environment variable {}", full_name);
        Some(value)
    }

    /// Read and parse a variable, warning about values that do not parse
    fn parsed<T: FromStr>(&self, name: &str) -> Option<T> {
        let value = self.var(name)?;
        match value.trim().parse::<T>() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                warn!("Invalid {}{} in environment: {}", self.prefix, name, value);
                None
            }
        }
    }
}

impl ConfigSource for EnvSource {
    fn load(&self) -> Result<RelayConfig> {
        debug!("Loading configuration from environment variables with prefix: {}", self.prefix);

        let values = ConfigValues {
            listen_ip: self.parsed("LISTEN_IP"),
            port: self.parsed("PORT"),
            default_destination: self.var("DEFAULT_DESTINATION").or_else(|| self.var("TARGET")),
            password: self.var("PASSWORD"),
            timeout: self.parsed("TIMEOUT"),
            buffer_size: self.parsed("BUFFER_SIZE"),
            max_header_bytes: self.parsed("MAX_HEADER_BYTES"),
            tcp_keepalive: self.parsed("TCP_KEEPALIVE"),
            log_level: self.var("LOG_LEVEL"),
        };

        let mut config = RelayConfig {
            values,
            ..RelayConfig::empty()
        };
        track_sources(&mut config, self.source_type());

        Ok(config)
    }

    fn source_type(&self) -> ValueSource {
        ValueSource::Environment
    }
}

/// Command line configuration source
///
/// Argument parsing itself happens in the binary; this source only carries
/// the values it produced into the merge.
pub struct CliSource {
    pub values: ConfigValues,
}

impl CliSource {
    /// Create a new command line source
    pub fn new(values: ConfigValues) -> Self {
        Self { values }
    }
}

impl ConfigSource for CliSource {
    fn load(&self) -> Result<RelayConfig> {
        debug!("Loading configuration from command line arguments");

        let mut config = RelayConfig {
            values: self.values.clone(),
            ..RelayConfig::empty()
        };
        track_sources(&mut config, self.source_type());

        Ok(config)
    }

    fn source_type(&self) -> ValueSource {
        ValueSource::CommandLine
    }
}
