//! Connection handler module
//!
//! This module drives a single client connection from the first request byte
//! to the end of the tunnel.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, info, trace, warn};
use metrics::counter;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::common::{is_disconnect, tune_stream, ProxyError, Result};
use crate::config::RelayConfig;
use crate::protocol::{
    parse_request_head, read_request_head, Destination, DestinationResolver, RESPONSE_ESTABLISHED,
    RESPONSE_WRONG_PASS,
};
use super::forwarder::{proxy_data, BridgeStats};

/// Where a connection is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepted,
    ReadingHeaders,
    Resolving,
    Dialing,
    Handshaking,
    Bridging,
    Error,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Accepted => "accepted",
            Self::ReadingHeaders => "reading headers",
            Self::Resolving => "resolving",
            Self::Dialing => "dialing",
            Self::Handshaking => "handshaking",
            Self::Bridging => "bridging",
            Self::Error => "error",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Current state of one connection, traced on every transition
struct Lifecycle {
    client_addr: SocketAddr,
    state: ConnectionState,
}

impl Lifecycle {
    fn new(client_addr: SocketAddr) -> Self {
        Self {
            client_addr,
            state: ConnectionState::Accepted,
        }
    }

    fn advance(&mut self, next: ConnectionState) {
        trace!("{}: {} -> {}", self.client_addr, self.state, next);
        self.state = next;
    }
}

/// Handle a single client connection
///
/// Reads the request head, resolves the destination, dials it, answers with
/// the fake HTTP success line and then bridges the two streams. Every error is
/// logged here with the client address; the returned error only reports how
/// the connection ended. Both streams are closed on return.
///
/// # Parameters
///
/// * `client` - Client stream
/// * `client_addr` - Client address, for logging
/// * `config` - Relay configuration
/// * `resolver` - Destination policy
pub async fn handle_connection<S>(
    client: S,
    client_addr: SocketAddr,
    config: &RelayConfig,
    resolver: &DestinationResolver,
) -> Result<BridgeStats>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut lifecycle = Lifecycle::new(client_addr);

    let result = establish_and_bridge(&mut lifecycle, client, config, resolver).await;

    match &result {
        Ok(stats) => info!(
            "{}: tunnel closed, {} bytes up, {} bytes down",
            client_addr, stats.client_to_target, stats.target_to_client
        ),
        Err(e) => {
            log_failure(client_addr, lifecycle.state, e);
            lifecycle.advance(ConnectionState::Error);
            counter!("relay_failures_total", "kind" => e.kind()).increment(1);
        }
    }

    lifecycle.advance(ConnectionState::Closed);
    debug!("Closing connection from {}", client_addr);

    result
}

async fn establish_and_bridge<S>(
    lifecycle: &mut Lifecycle,
    client: S,
    config: &RelayConfig,
    resolver: &DestinationResolver,
) -> Result<BridgeStats>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let client_addr = lifecycle.client_addr;
    let phase_timeout = config.timeout();

    // Bytes the client sends past the head stay buffered here and reach the
    // destination first once bridging starts
    let mut client = BufReader::with_capacity(config.buffer_size(), client);

    lifecycle.advance(ConnectionState::ReadingHeaders);
    let raw = timeout(phase_timeout, read_request_head(&mut client, config.max_header_bytes()))
        .await
        .map_err(|_| ProxyError::Timeout("reading headers"))??;
    let head = parse_request_head(&raw)?;
    debug!("{}: {} ({} headers)", client_addr, head.request_line, head.headers.len());

    lifecycle.advance(ConnectionState::Resolving);
    let resolved = timeout(phase_timeout, resolver.resolve(&head.headers, &mut client))
        .await
        .map_err(|_| ProxyError::Timeout("resolving destination"))?;
    let destination = match resolved {
        Ok(destination) => destination,
        Err(ProxyError::AuthFailed) => {
            // Best effort: the client may already be gone
            let rejected = timeout(phase_timeout, async {
                client.write_all(RESPONSE_WRONG_PASS).await?;
                client.shutdown().await
            })
            .await;
            if let Ok(Err(e)) = rejected {
                debug!("{}: failed to send rejection: {}", client_addr, e);
            }
            return Err(ProxyError::AuthFailed);
        }
        Err(e) => return Err(e),
    };

    lifecycle.advance(ConnectionState::Dialing);
    info!("Connecting to {} for {}", destination, client_addr);
    let target = dial(&destination, phase_timeout).await?;
    if let Err(e) = tune_stream(&target, config.tcp_keepalive()) {
        debug!("{}: could not set socket options on {}: {}", client_addr, destination, e);
    }

    lifecycle.advance(ConnectionState::Handshaking);
    timeout(phase_timeout, async {
        client.write_all(RESPONSE_ESTABLISHED).await?;
        client.flush().await
    })
    .await
    .map_err(|_| ProxyError::Timeout("sending handshake"))??;

    lifecycle.advance(ConnectionState::Bridging);
    Ok(proxy_data(client, target, config.buffer_size()).await)
}

/// Connect to the destination within `limit`
async fn dial(destination: &Destination, limit: Duration) -> Result<TcpStream> {
    let connect = TcpStream::connect((destination.host.as_str(), destination.port));

    let source = match timeout(limit, connect).await {
        Ok(Ok(stream)) => return Ok(stream),
        Ok(Err(e)) => e,
        Err(_) => io::Error::new(io::ErrorKind::TimedOut, "connection timed out"),
    };

    Err(ProxyError::DialFailed {
        destination: destination.to_string(),
        source,
    })
}

/// Log how a connection failed, `state` being where it was at the time
fn log_failure(client_addr: SocketAddr, state: ConnectionState, err: &ProxyError) {
    match err {
        ProxyError::AuthFailed => info!("Forbidden: incorrect password from {}", client_addr),
        ProxyError::MalformedRequest(reason) => debug!("{}: dropped malformed request: {}", client_addr, reason),
        ProxyError::Timeout(_) => warn!("Timeout with connection {}: {}", client_addr, err),
        ProxyError::DialFailed { .. } => warn!("{}: {}", client_addr, err),
        ProxyError::Io(e) if is_disconnect(e) => debug!("{}: client went away while {}: {}", client_addr, state, e),
        _ => warn!("Error with connection {} while {}: {}", client_addr, state, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};
    use tokio::net::{TcpListener, TcpSocket};
    use tokio::task::JoinHandle;

    use crate::config::ConfigValues;

    fn client_addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn config(password: Option<&str>, timeout_secs: u64) -> Arc<RelayConfig> {
        Arc::new(RelayConfig::from_values(ConfigValues {
            password: password.map(str::to_string),
            timeout: Some(timeout_secs),
            ..Default::default()
        }))
    }

    /// Run a handler on one end of an in-memory pipe, returning the other end
    fn spawn_handler(config: Arc<RelayConfig>) -> (DuplexStream, JoinHandle<Result<BridgeStats>>) {
        let (client_app, client_side) = duplex(64 * 1024);
        let task = tokio::spawn(async move {
            let resolver = DestinationResolver::new(&config);
            handle_connection(client_side, client_addr(), &config, &resolver).await
        });
        (client_app, task)
    }

    #[tokio::test]
    async fn test_tunnel_established() {
        let destination = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = destination.local_addr().unwrap().port();
        let (mut client, task) = spawn_handler(config(None, 5));

        let request = format!("GET / HTTP/1.1\r\nX-Real-Host: 127.0.0.1:{}\r\n\r\n", port);
        client.write_all(request.as_bytes()).await.unwrap();

        let (mut upstream, _) = destination.accept().await.unwrap();
        let mut response = vec![0u8; RESPONSE_ESTABLISHED.len()];
        client.read_exact(&mut response).await.unwrap();
        assert_eq!(response, RESPONSE_ESTABLISHED);

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        upstream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        upstream.write_all(b"pong").await.unwrap();
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        drop(upstream);
        drop(client);
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats, BridgeStats { client_to_target: 4, target_to_client: 4 });
    }

    #[tokio::test]
    async fn test_wrong_password_rejected_without_dial() {
        let destination = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = destination.local_addr().unwrap().port();
        let (mut client, task) = spawn_handler(config(Some("secret"), 5));

        let request = format!("GET / HTTP/1.1\r\nX-Real-Host: 127.0.0.1:{}\r\nX-Pass: guess\r\n\r\n", port);
        client.write_all(request.as_bytes()).await.unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, RESPONSE_WRONG_PASS);
        assert!(matches!(task.await.unwrap(), Err(ProxyError::AuthFailed)));

        let dialed = timeout(Duration::from_millis(200), destination.accept()).await;
        assert!(dialed.is_err(), "no connection should reach the destination");
    }

    #[tokio::test]
    async fn test_incomplete_headers_time_out() {
        let (mut client, task) = spawn_handler(config(None, 1));

        client.write_all(b"GET / HTTP/1.1\r\nX-Real-Host: 127.0.0.1:1\r\n").await.unwrap();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(ProxyError::Timeout(_))));

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert!(response.is_empty());
    }

    #[tokio::test]
    async fn test_dial_failure_sends_nothing() {
        let closed_port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let (mut client, task) = spawn_handler(config(None, 5));

        let request = format!("GET / HTTP/1.1\r\nX-Real-Host: 127.0.0.1:{}\r\n\r\n", closed_port);
        client.write_all(request.as_bytes()).await.unwrap();

        assert!(matches!(task.await.unwrap(), Err(ProxyError::DialFailed { .. })));
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert!(response.is_empty());
    }

    /// Listener whose accept queue is full, so further connects hang unanswered
    async fn saturated_listener() -> (TcpListener, Vec<TcpStream>) {
        let socket = TcpSocket::new_v4().unwrap();
        socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let listener = socket.listen(0).unwrap();
        let addr = listener.local_addr().unwrap();

        let mut held = Vec::new();
        for _ in 0..16 {
            match timeout(Duration::from_millis(100), TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => held.push(stream),
                _ => break,
            }
        }
        (listener, held)
    }

    #[tokio::test]
    async fn test_dial_timeout() {
        let (listener, _held) = saturated_listener().await;
        let port = listener.local_addr().unwrap().port();

        let err = dial(&Destination::new("127.0.0.1", port), Duration::from_millis(200))
            .await
            .unwrap_err();
        match err {
            ProxyError::DialFailed { destination, source } => {
                assert_eq!(destination, format!("127.0.0.1:{}", port));
                assert_eq!(source.kind(), io::ErrorKind::TimedOut);
            }
            other => panic!("unexpected error: {}", other),
        }

        // Through the handler: the client is dropped without a single byte
        let (mut client, task) = spawn_handler(config(None, 1));
        let request = format!("GET / HTTP/1.1\r\nX-Real-Host: 127.0.0.1:{}\r\n\r\n", port);
        client.write_all(request.as_bytes()).await.unwrap();

        match task.await.unwrap() {
            Err(ProxyError::DialFailed { source, .. }) => assert_eq!(source.kind(), io::ErrorKind::TimedOut),
            other => panic!("unexpected result: {:?}", other),
        }
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert!(response.is_empty());
    }

    #[tokio::test]
    async fn test_split_padding_is_not_forwarded() {
        let destination = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = destination.local_addr().unwrap().port();
        let (mut client, task) = spawn_handler(config(None, 5));

        let request = format!("GET / HTTP/1.1\r\nX-Real-Host: 127.0.0.1:{}\r\nX-Split: 1\r\n\r\nPADDING", port);
        client.write_all(request.as_bytes()).await.unwrap();

        let (mut upstream, _) = destination.accept().await.unwrap();
        let mut response = vec![0u8; RESPONSE_ESTABLISHED.len()];
        client.read_exact(&mut response).await.unwrap();
        assert_eq!(response, RESPONSE_ESTABLISHED);

        client.write_all(b"data").await.unwrap();
        client.shutdown().await.unwrap();

        let mut received = Vec::new();
        upstream.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"data");

        drop(upstream);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_pipelined_payload_is_forwarded() {
        let destination = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = destination.local_addr().unwrap().port();
        let (mut client, task) = spawn_handler(config(None, 5));

        // Payload in the same write as the head, no X-Split
        let request = format!("GET / HTTP/1.1\r\nX-Real-Host: 127.0.0.1:{}\r\n\r\nearly", port);
        client.write_all(request.as_bytes()).await.unwrap();

        let (mut upstream, _) = destination.accept().await.unwrap();
        let mut buf = [0u8; 5];
        upstream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"early");

        drop(upstream);
        drop(client);
        task.await.unwrap().unwrap();
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::ReadingHeaders.to_string(), "reading headers");

        let mut lifecycle = Lifecycle::new(client_addr());
        lifecycle.advance(ConnectionState::Dialing);
        assert_eq!(lifecycle.state, ConnectionState::Dialing);
    }
}
