//! Default configuration values
//!
//! This module is the single source of truth for defaults, so the
//! configuration layer and the protocol code never disagree.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Environment variable prefix for all configuration options
pub const ENV_PREFIX: &str = "HTTP_TUNNEL_RELAY_";

/// Configuration file loaded when it exists and no other file is given
pub const DEFAULT_CONFIG_FILE: &str = "relay.json";

/// Default listen IP
pub const LISTEN_IP: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// Default listen port
pub const PORT: u16 = 8080;

/// Destination used when the client sends no `X-Real-Host`
pub const DEFAULT_DESTINATION: &str = "0.0.0.0:1194";

/// Port used when `X-Real-Host` names a host without a usable port (OpenVPN)
pub const FALLBACK_PORT: u16 = 1194;

/// Per-phase timeout in seconds
pub const TIMEOUT_SECS: u64 = 60;

/// Relay chunk size (16 KiB)
pub const BUFFER_SIZE: usize = 16 * 1024;

/// Upper bound for the request head
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Default log level as string
pub const LOG_LEVEL_STR: &str = "info";

/// How long shutdown waits for in-flight connections before aborting them
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(30);
