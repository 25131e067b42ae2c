//! Configuration validator
//!
//! This module provides functionality for validating configuration.

use log::warn;

use crate::config::types::RelayConfig;
use crate::config::error::{ConfigError, Result};
use crate::config::defaults::FALLBACK_PORT;
use crate::protocol::Destination;

/// Validate the configuration
pub fn validate_config(config: &RelayConfig) -> Result<()> {
    validate_network_settings(config)?;
    validate_general_settings(config)?;

    for warning in check_warnings(config) {
        warn!("{}", warning);
    }

    Ok(())
}

/// Validate network settings
fn validate_network_settings(config: &RelayConfig) -> Result<()> {
    let destination = Destination::parse(config.default_destination(), FALLBACK_PORT);
    if destination.host.is_empty() {
        return Err(ConfigError::InvalidValue(
            "default_destination".to_string(),
            format!("Destination must name a host: '{}'", config.default_destination()),
        ));
    }

    Ok(())
}

/// Validate general settings
fn validate_general_settings(config: &RelayConfig) -> Result<()> {
    if config.buffer_size() == 0 {
        return Err(ConfigError::InvalidValue(
            "buffer_size".to_string(),
            "Buffer size must be greater than 0".to_string()
        ));
    }

    if config.timeout().is_zero() {
        return Err(ConfigError::InvalidValue(
            "timeout".to_string(),
            "Timeout must be greater than 0".to_string()
        ));
    }

    // The blank-line delimiter alone is four bytes
    if config.max_header_bytes() < 4 {
        return Err(ConfigError::InvalidValue(
            "max_header_bytes".to_string(),
            "Header budget must be at least 4 bytes".to_string()
        ));
    }

    Ok(())
}

/// Check configuration for conditions worth a warning but not an error
pub fn check_warnings(config: &RelayConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    match config.log_level() {
        "error" | "warn" | "info" | "debug" | "trace" => {}
        level => warnings.push(format!("Unknown log level: {}", level)),
    }

    if config.buffer_size() < 1024 {
        warnings.push(format!(
            "Buffer size of {} bytes is very small and will cost throughput",
            config.buffer_size()
        ));
    }

    if config.password().is_none() && !config.listen().ip().is_loopback() {
        warnings.push("No password configured, any client may open tunnels".to_string());
    }

    warnings
}
