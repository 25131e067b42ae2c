//! Error handling module
//!
//! This module defines the error types and result type aliases used in the application.

use thiserror::Error;
use std::io;

/// Relay error type
#[derive(Error, Debug)]
pub enum ProxyError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Request head could not be read or parsed
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// A phase before bridging exceeded its time bound
    #[error("Timed out while {0}")]
    Timeout(&'static str),

    /// Missing or wrong `X-Pass` header
    #[error("Authentication failed: wrong or missing password")]
    AuthFailed,

    /// Destination could not be reached
    #[error("Failed to connect to {destination}: {source}")]
    DialFailed {
        /// Destination as `host:port`
        destination: String,
        /// Underlying connect error
        #[source]
        source: io::Error,
    },

    /// I/O failure while bridging
    #[error("Relay error: {0}")]
    Relay(#[source] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Other error
    #[error("Other error: {0}")]
    Other(String),
}

impl ProxyError {
    /// Short static label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::MalformedRequest(_) => "malformed_request",
            Self::Timeout(_) => "timeout",
            Self::AuthFailed => "auth_failed",
            Self::DialFailed { .. } => "dial_failed",
            Self::Relay(_) => "relay",
            Self::Config(_) => "config",
            Self::Other(_) => "other",
        }
    }
}

/// Whether an I/O error is an ordinary way for a tunnel to end
///
/// Resets and broken pipes show up whenever one side tears the connection down.
pub fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

/// Result type alias
///
/// This is a `Result` type alias that uses our custom `ProxyError`.
pub type Result<T> = std::result::Result<T, ProxyError>;
