//! Configuration builder
//!
//! This module provides a builder pattern for constructing configuration.

use std::path::Path;
use log::debug;

use crate::config::types::{RelayConfig, ConfigValues};
use crate::config::source::{ConfigSource, DefaultSource, FileSource, EnvSource, CliSource};
use crate::config::validator::validate_config;
use crate::config::error::Result;
use crate::config::{ENV_PREFIX, DEFAULT_CONFIG_FILE};

/// Configuration builder
///
/// Provides a fluent API for building configuration from multiple sources.
/// Sources are applied in the order they were added, later ones win.
pub struct ConfigBuilder {
    sources: Vec<Box<dyn ConfigSource>>,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    /// Add default source
    pub fn with_defaults(mut self) -> Self {
        debug!("Adding default configuration source");
        self.sources.push(Box::new(DefaultSource));
        self
    }

    /// Add a file source that must exist
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        debug!("Adding file configuration source: {}", path.as_ref().display());
        self.sources.push(Box::new(FileSource::new(path)));
        self
    }

    /// Add a file source that is skipped when the file is absent
    pub fn with_optional_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        debug!("Adding optional file configuration source: {}", path.as_ref().display());
        self.sources.push(Box::new(FileSource::optional(path)));
        self
    }

    /// Add environment source
    pub fn with_env(mut self, prefix: &str) -> Self {
        debug!("Adding environment configuration source with prefix: {}", prefix);
        self.sources.push(Box::new(EnvSource::new(prefix)));
        self
    }

    /// Add command line source
    pub fn with_cli(mut self, values: ConfigValues) -> Self {
        debug!("Adding command line configuration source");
        self.sources.push(Box::new(CliSource::new(values)));
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<RelayConfig> {
        let mut config = RelayConfig::empty();

        debug!("Building configuration from {} sources", self.sources.len());

        for source in self.sources {
            let source_type = source.source_type();
            debug!("Loading configuration from source: {:?}", source_type);

            let source_config = source.load()?;
            config = config.merge(&source_config, source_type);
        }

        // Anything no source provided falls back to defaults
        config.set_default_values();

        debug!("Validating configuration");
        validate_config(&config)?;

        config.log();

        Ok(config)
    }
}

/// Load configuration with the standard layering
///
/// Priority, lowest to highest:
/// 1. Default values
/// 2. Configuration file (`config_file` if given, else `relay.json` when present)
/// 3. Environment variables
/// 4. Command line arguments
pub fn load_config(config_file: Option<&Path>, cli: ConfigValues) -> Result<RelayConfig> {
    let builder = ConfigBuilder::new().with_defaults();

    let builder = match config_file {
        Some(path) => builder.with_file(path),
        None => builder.with_optional_file(DEFAULT_CONFIG_FILE),
    };

    builder
        .with_env(ENV_PREFIX)
        .with_cli(cli)
        .build()
}
