//! Network utility functions
//!
//! Socket tuning shared by accepted and dialed streams.

use std::io;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;

/// Apply socket options to an accepted or dialed stream
///
/// Disables Nagle so small interactive packets (SSH keystrokes) are not delayed,
/// and enables TCP keepalive when an idle time is given.
pub fn tune_stream(stream: &TcpStream, keepalive: Option<Duration>) -> io::Result<()> {
    stream.set_nodelay(true)?;

    if let Some(idle) = keepalive {
        let params = TcpKeepalive::new()
            .with_time(idle)
            .with_interval(idle);
        SockRef::from(stream).set_tcp_keepalive(&params)?;
    }

    Ok(())
}
