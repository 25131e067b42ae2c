//! Destination resolution
//!
//! Decides where a tunnel goes from the client's headers, and enforces the
//! optional shared password.

use std::fmt;

use log::debug;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::common::{ProxyError, Result};
use crate::config::defaults::FALLBACK_PORT;
use crate::config::RelayConfig;
use super::headers::Headers;

/// Header naming the real destination as `host[:port]`
pub const HEADER_REAL_HOST: &str = "X-Real-Host";

/// Header whose presence asks the relay to drop one read of padding
pub const HEADER_SPLIT: &str = "X-Split";

/// Header carrying the shared password
pub const HEADER_PASS: &str = "X-Pass";

/// Tunnel destination
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub host: String,
    pub port: u16,
}

impl Destination {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host[:port]`
    ///
    /// `[v6]:port` is honoured. A bare value with several colons is taken as an
    /// IPv6 host without port. A missing or unparsable port becomes `fallback_port`.
    pub fn parse(value: &str, fallback_port: u16) -> Self {
        let value = value.trim();
        let port_or_fallback = |text: &str| text.trim().parse::<u16>().unwrap_or(fallback_port);

        if let Some(rest) = value.strip_prefix('[') {
            if let Some((host, tail)) = rest.split_once(']') {
                let port = tail.strip_prefix(':').map_or(fallback_port, port_or_fallback);
                return Self::new(host, port);
            }
        }

        match value.split_once(':') {
            Some((host, port)) if !port.contains(':') => Self::new(host.trim(), port_or_fallback(port)),
            _ => Self::new(value, fallback_port),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Per-relay destination policy
#[derive(Debug, Clone)]
pub struct DestinationResolver {
    default_destination: Destination,
    password: Option<String>,
    split_read_size: usize,
}

impl DestinationResolver {
    /// Build the policy from the relay configuration
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            default_destination: Destination::parse(config.default_destination(), FALLBACK_PORT),
            password: config.password().map(str::to_string),
            split_read_size: config.buffer_size(),
        }
    }

    /// Destination requested by the headers, or the configured default
    pub fn destination(&self, headers: &Headers) -> Destination {
        match headers.get(HEADER_REAL_HOST) {
            Some(value) if !value.is_empty() => Destination::parse(value, FALLBACK_PORT),
            _ => self.default_destination.clone(),
        }
    }

    /// Check `X-Pass` against the configured password
    pub fn authorize(&self, headers: &Headers) -> Result<()> {
        match &self.password {
            Some(expected) if headers.get_or(HEADER_PASS, "") != expected.as_str() => Err(ProxyError::AuthFailed),
            _ => Ok(()),
        }
    }

    /// Whether the client announced split padding
    pub fn wants_split(&self, headers: &Headers) -> bool {
        !headers.get_or(HEADER_SPLIT, "").is_empty()
    }

    /// Resolve the destination for one connection
    ///
    /// Drops the `X-Split` padding read first, then applies the password gate.
    /// Must run before anything is written back to the client.
    pub async fn resolve<R>(&self, headers: &Headers, client: &mut R) -> Result<Destination>
    where
        R: AsyncBufRead + Unpin,
    {
        if self.wants_split(headers) {
            let dropped = discard_one_read(client, self.split_read_size).await?;
            debug!("Discarded {} bytes of split padding", dropped);
        }

        self.authorize(headers)?;

        Ok(self.destination(headers))
    }
}

/// Drop the result of one bounded read
///
/// Bytes already buffered count as that read. Padding longer than `limit`
/// is left in the stream and will be relayed like payload.
pub async fn discard_one_read<R>(reader: &mut R, limit: usize) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let available = reader.fill_buf().await?.len();
    let dropped = available.min(limit);
    reader.consume(dropped);
    Ok(dropped)
}
