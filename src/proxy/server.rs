//! Proxy server module
//!
//! Owns the listening socket and runs one handler task per accepted
//! connection.

use log::{debug, error, info, warn};
use metrics::{counter, gauge};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::select;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{sleep, timeout};

use crate::common::{tune_stream, ProxyError, Result};
use crate::config::defaults::SHUTDOWN_GRACE_PERIOD;
use crate::config::{validate_config, RelayConfig};
use crate::protocol::DestinationResolver;
use super::forwarder::BridgeStats;
use super::handler::handle_connection;
use super::message::{create_channel, ProxyHandle, ProxyMessage};

/// Pause after a failed accept, so descriptor exhaustion does not spin the loop
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Decrements the active connection gauge when a handler task ends or is aborted
struct ActiveConnection;

impl ActiveConnection {
    fn open() -> Self {
        counter!("relay_connections_total").increment(1);
        gauge!("relay_connections_active").increment(1.0);
        Self
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        gauge!("relay_connections_active").decrement(1.0);
    }
}

/// Proxy server structure
///
/// Created by [`Proxy::bind`], run by [`Proxy::start`].
pub struct Proxy {
    /// Bound listening socket
    listener: TcpListener,
    /// Relay configuration (wrapped in Arc for sharing with handler tasks)
    config: Arc<RelayConfig>,
    /// Destination policy shared by all handlers
    resolver: Arc<DestinationResolver>,
    /// How long shutdown waits for in-flight connections
    grace_period: Duration,
}

impl Proxy {
    /// Bind the listening socket
    ///
    /// The configuration is validated first, since callers may build it
    /// without going through the configuration loader.
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::Config` for an invalid configuration, or an error
    /// if it cannot bind to the listen address.
    pub async fn bind(config: Arc<RelayConfig>) -> Result<Self> {
        validate_config(&config)?;

        let listen_addr = config.listen();
        let listener = TcpListener::bind(listen_addr).await.map_err(ProxyError::Io)?;
        let resolver = Arc::new(DestinationResolver::new(&config));

        Ok(Self {
            listener,
            config,
            resolver,
            grace_period: SHUTDOWN_GRACE_PERIOD,
        })
    }

    /// Override how long shutdown waits before aborting open tunnels
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Address actually bound, useful when the configured port is 0
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(ProxyError::Io)
    }

    /// Start the accept loop on the runtime
    ///
    /// Returns a handle to control the relay and the task running it. The
    /// task finishes after a shutdown has drained or aborted every connection.
    pub fn start(self) -> (ProxyHandle, JoinHandle<Result<()>>) {
        let (handle, rx) = create_channel();
        let task = tokio::spawn(self.serve(rx));
        (handle, task)
    }

    async fn serve(self, mut rx: mpsc::Receiver<ProxyMessage>) -> Result<()> {
        let Proxy { listener, config, resolver, grace_period } = self;

        info!("Relay started, listening on {}", listener.local_addr().map_err(ProxyError::Io)?);

        let mut tasks: JoinSet<Result<BridgeStats>> = JoinSet::new();

        loop {
            select! {
                accepted = listener.accept() => match accepted {
                    Ok((client_stream, client_addr)) => {
                        info!("New connection from {}", client_addr);

                        if let Err(e) = tune_stream(&client_stream, config.tcp_keepalive()) {
                            debug!("{}: could not set socket options: {}", client_addr, e);
                        }

                        let config = Arc::clone(&config);
                        let resolver = Arc::clone(&resolver);
                        tasks.spawn(async move {
                            let _active = ActiveConnection::open();
                            handle_connection(client_stream, client_addr, &config, &resolver).await
                        });
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        sleep(ACCEPT_BACKOFF).await;
                    }
                },

                message = rx.recv() => match message {
                    Some(ProxyMessage::ActiveConnections { reply }) => {
                        while let Some(result) = tasks.try_join_next() {
                            reap(result);
                        }
                        let _ = reply.send(tasks.len());
                    }
                    Some(ProxyMessage::Shutdown) => {
                        info!("Received shutdown message");
                        break;
                    }
                    None => {
                        info!("All relay handles dropped, shutting down");
                        break;
                    }
                },

                Some(result) = tasks.join_next() => reap(result),
            }
        }

        // Stop accepting before draining
        drop(listener);

        if !tasks.is_empty() {
            info!("Waiting up to {:?} for {} connections to finish", grace_period, tasks.len());
        }

        let drained = timeout(grace_period, async {
            while let Some(result) = tasks.join_next().await {
                reap(result);
            }
        })
        .await;

        if drained.is_err() {
            warn!("Shutdown grace period elapsed, closing {} connections", tasks.len());
            tasks.shutdown().await;
        }

        info!("Relay shutdown complete");
        Ok(())
    }
}

/// Log handler tasks that panicked; handler errors are logged by the handler
fn reap(result: std::result::Result<Result<BridgeStats>, JoinError>) {
    match result {
        Ok(_) => {}
        Err(e) if e.is_cancelled() => debug!("Connection task cancelled"),
        Err(e) => error!("Connection task failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigValues;

    fn loopback_config() -> Arc<RelayConfig> {
        Arc::new(RelayConfig::from_values(ConfigValues {
            listen_ip: Some("127.0.0.1".parse().unwrap()),
            port: Some(0),
            ..Default::default()
        }))
    }

    #[tokio::test]
    async fn test_bind_and_shutdown() {
        let proxy = Proxy::bind(loopback_config()).await.unwrap();
        let addr = proxy.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);

        let (handle, task) = proxy.start();
        assert_eq!(handle.active_connections().await.unwrap(), 0);

        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();

        // Listening socket is released
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
        assert!(handle.shutdown().await.is_err());
    }

    #[tokio::test]
    async fn test_dropping_handles_stops_relay() {
        let proxy = Proxy::bind(loopback_config()).await.unwrap();
        let (handle, task) = proxy.start();

        drop(handle);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let first = Proxy::bind(loopback_config()).await.unwrap();
        let taken = first.local_addr().unwrap();

        let config = Arc::new(RelayConfig::from_values(ConfigValues {
            listen_ip: Some(taken.ip()),
            port: Some(taken.port()),
            ..Default::default()
        }));
        assert!(matches!(Proxy::bind(config).await, Err(ProxyError::Io(_))));
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        for values in [
            ConfigValues { buffer_size: Some(0), ..Default::default() },
            ConfigValues { max_header_bytes: Some(0), ..Default::default() },
        ] {
            let config = Arc::new(RelayConfig::from_values(ConfigValues {
                listen_ip: Some("127.0.0.1".parse().unwrap()),
                port: Some(0),
                ..values
            }));
            assert!(matches!(Proxy::bind(config).await, Err(ProxyError::Config(_))));
        }
    }
}
