//! Proxy service module
//!
//! This module implements the relay itself: the accept loop, the
//! per-connection handler and the byte forwarding between client and
//! destination.
//!
//! The accept loop is message-driven. It owns its state and is controlled
//! through a [`ProxyHandle`], so nothing is locked across connections.

mod forwarder;
mod handler;
mod message;
pub mod server;

pub use forwarder::{proxy_data, BridgeStats, Direction};
pub use handler::{handle_connection, ConnectionState};
pub use message::{create_channel, ProxyHandle, ProxyMessage};
pub use server::Proxy;
