//! Data forwarding module
//!
//! This module relays bytes between the client and the destination once the
//! tunnel is established. Nothing is inspected or framed; each direction moves
//! one chunk at a time.

use std::fmt;

use log::{debug, info};
use metrics::counter;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::{is_disconnect, ProxyError};

/// Relay direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToTarget,
    TargetToClient,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Self::ClientToTarget => "upstream",
            Self::TargetToClient => "downstream",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientToTarget => write!(f, "client -> target"),
            Self::TargetToClient => write!(f, "target -> client"),
        }
    }
}

/// Bytes moved by a finished bridge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub client_to_target: u64,
    pub target_to_client: u64,
}

/// Forward data between two streams until both directions are done
///
/// Each direction shuts down its write side as soon as it stops, so the far
/// peer sees end-of-stream while the other direction keeps draining. Both
/// streams are closed when this returns, or when the future is dropped.
///
/// # Parameters
///
/// * `client` - Client side stream
/// * `target` - Destination side stream
/// * `buffer_size` - Chunk size for each read
pub async fn proxy_data<C, T>(client: C, target: T, buffer_size: usize) -> BridgeStats
where
    C: AsyncRead + AsyncWrite + Unpin,
    T: AsyncRead + AsyncWrite + Unpin,
{
    let (client_reader, client_writer) = tokio::io::split(client);
    let (target_reader, target_writer) = tokio::io::split(target);

    // Both directions live in the calling task, so cancelling it stops both
    let (client_to_target, target_to_client) = tokio::join!(
        relay(client_reader, target_writer, buffer_size, Direction::ClientToTarget),
        relay(target_reader, client_writer, buffer_size, Direction::TargetToClient),
    );

    BridgeStats {
        client_to_target,
        target_to_client,
    }
}

/// Copy one direction, returning the number of bytes written
async fn relay<R, W>(mut reader: R, mut writer: W, buffer_size: usize, direction: Direction) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; buffer_size];
    let mut total_bytes = 0u64;

    let outcome = loop {
        match reader.read(&mut buffer).await {
            Ok(0) => break None,
            Ok(n) => {
                if let Err(e) = writer.write_all(&buffer[..n]).await {
                    break Some(ProxyError::Relay(e));
                }
                total_bytes += n as u64;
            }
            Err(e) => break Some(ProxyError::Relay(e)),
        }
    };

    match outcome {
        None => debug!("{}: end of stream after {} bytes", direction, total_bytes),
        Some(ProxyError::Relay(e)) if is_disconnect(&e) => {
            debug!("{}: peer went away after {} bytes: {}", direction, total_bytes, e)
        }
        Some(e) => info!("{}: stopped after {} bytes: {}", direction, total_bytes, e),
    }

    // Half-close so the peer sees EOF; it may already be gone
    let _ = writer.shutdown().await;

    counter!("relay_bytes_total", "direction" => direction.label()).increment(total_bytes);

    total_bytes
}
