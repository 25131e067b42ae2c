//! HTTP Tunnel Relay: TCP tunnelling behind an HTTP-looking handshake
//!
//! Clients open a connection and send something shaped like an HTTP request.
//! The relay reads the request head, picks a destination from the
//! `X-Real-Host` header (or the configured default), optionally checks an
//! `X-Pass` password, connects, answers `HTTP/1.1 200 SSHPLUS` and from then
//! on moves raw bytes in both directions until either side closes.
//!
//! # Main Features
//!
//! - Per-connection destination selection with a configurable default
//! - Optional shared password with a fixed rejection response
//! - `X-Split` support for clients that send padding before the payload
//! - Layered configuration (defaults, JSON file, environment, command line)
//! - Graceful shutdown with a bounded drain period
//!
//! # Example
//!
//! ```no_run
//! use http_tunnel_relay::{Proxy, Result};
//! use http_tunnel_relay::config::{load_config, ConfigValues};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Relay to a local SSH daemon unless the client asks otherwise
//!     let config = load_config(None, ConfigValues {
//!         port: Some(8080),
//!         default_destination: Some("127.0.0.1:22".to_string()),
//!         ..Default::default()
//!     })?;
//!
//!     let proxy = Proxy::bind(Arc::new(config)).await?;
//!     let (handle, server) = proxy.start();
//!
//!     tokio::signal::ctrl_c().await?;
//!     handle.shutdown().await?;
//!     server.await.map_err(|e| http_tunnel_relay::ProxyError::Other(e.to_string()))??;
//!
//!     Ok(())
//! }
//! ```

// Public modules
pub mod common;
pub mod config;
pub mod protocol;
pub mod proxy;

// Re-export commonly used structures and functions for convenience
pub use proxy::{Proxy, ProxyHandle};
pub use config::RelayConfig;
pub use common::{ProxyError, Result};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
