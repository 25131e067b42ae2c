//! Configuration module
//!
//! This module handles relay configuration, including loading from
//! different sources (files, environment variables, command line arguments)
//! and validating the result. The finished `RelayConfig` is read-only.

pub mod builder;
pub mod defaults;
pub mod error;
pub mod source;
pub mod types;
pub mod validator;

pub use builder::{ConfigBuilder, load_config};
pub use defaults::{ENV_PREFIX, DEFAULT_CONFIG_FILE};
pub use error::ConfigError;
pub use source::{ConfigSource, DefaultSource, FileSource, EnvSource, CliSource};
pub use types::{RelayConfig, ConfigValues, ValueSource};
pub use validator::{validate_config, check_warnings};
