//! Proxy message types
//!
//! This module defines the messages that control a running relay. The accept
//! loop owns all of its state and only reacts to these messages, so no locks
//! are shared with the outside.

use tokio::sync::{mpsc, oneshot};

use crate::common::{ProxyError, Result};

/// Messages that can be sent to the accept loop
#[derive(Debug)]
pub enum ProxyMessage {
    /// Report the number of connections currently being handled
    ActiveConnections {
        /// Where to send the count
        reply: oneshot::Sender<usize>,
    },
    /// Stop accepting and drain in-flight connections
    Shutdown,
}

/// Proxy control handle
///
/// Cheap to clone. When every handle is dropped the relay shuts down as if
/// `shutdown` had been called.
#[derive(Debug, Clone)]
pub struct ProxyHandle {
    sender: mpsc::Sender<ProxyMessage>,
}

impl ProxyHandle {
    /// Create a new proxy handle
    pub fn new(sender: mpsc::Sender<ProxyMessage>) -> Self {
        Self { sender }
    }

    /// Send a message to the accept loop
    ///
    /// # Errors
    ///
    /// Fails once the relay has stopped.
    pub async fn send(&self, message: ProxyMessage) -> Result<()> {
        self.sender
            .send(message)
            .await
            .map_err(|_| ProxyError::Other("Relay is no longer running".to_string()))
    }

    /// Number of connections currently being handled
    pub async fn active_connections(&self) -> Result<usize> {
        let (reply, response) = oneshot::channel();
        self.send(ProxyMessage::ActiveConnections { reply }).await?;
        response
            .await
            .map_err(|_| ProxyError::Other("Relay stopped before answering".to_string()))
    }

    /// Ask the relay to shut down
    ///
    /// Returns once the request is queued; await the server task to know when
    /// the shutdown is complete.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(ProxyMessage::Shutdown).await
    }
}

/// Create a new proxy message channel
pub fn create_channel() -> (ProxyHandle, mpsc::Receiver<ProxyMessage>) {
    let (tx, rx) = mpsc::channel(16);
    (ProxyHandle::new(tx), rx)
}
