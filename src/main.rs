//! HTTP Tunnel Relay Command Line Tool
//!
//! This binary is the command-line interface for the relay.

use clap::Parser;
use log::info;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinError;

// Import our library
use http_tunnel_relay::{Proxy, VERSION, APP_NAME};
use http_tunnel_relay::common::{Result, init_logger, ProxyError};
use http_tunnel_relay::config::{load_config, ConfigValues};

/// HTTP Tunnel Relay: TCP tunnels behind an HTTP-looking handshake
#[derive(Parser, Debug)]
#[clap(author, version = VERSION, about, long_about = None)]
struct Args {
    /// Listen port
    port: Option<u16>,

    /// Listen IP address
    #[clap(long)]
    listen_ip: Option<IpAddr>,

    /// Destination used when a client sends no X-Real-Host header
    #[clap(short, long)]
    target: Option<String>,

    /// Password clients must send in X-Pass
    #[clap(short, long)]
    password: Option<String>,

    /// Per-phase timeout in seconds
    #[clap(long)]
    timeout: Option<u64>,

    /// Relay buffer size in bytes
    #[clap(long)]
    buffer_size: Option<usize>,

    /// Maximum request head size in bytes
    #[clap(long)]
    max_header_bytes: Option<usize>,

    /// TCP keepalive idle time in seconds (0 disables)
    #[clap(long)]
    keepalive: Option<u64>,

    /// Log level
    #[clap(long)]
    log_level: Option<String>,

    /// Load configuration from a file
    #[clap(long)]
    config_file: Option<PathBuf>,
}

impl Args {
    /// Values given on the command line, everything else left unset
    fn to_values(&self) -> ConfigValues {
        ConfigValues {
            listen_ip: self.listen_ip,
            port: self.port,
            default_destination: self.target.clone(),
            password: self.password.clone(),
            timeout: self.timeout,
            buffer_size: self.buffer_size,
            max_header_bytes: self.max_header_bytes,
            tcp_keepalive: self.keepalive,
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Configuration decides the log level, so load it before the logger exists
    let config = load_config(args.config_file.as_deref(), args.to_values())?;

    init_logger(config.log_level());

    info!("Starting {} v{}", APP_NAME, VERSION);
    config.log();

    info!("Listen address: {}", config.listen());
    info!("Default destination: {}", config.default_destination());
    if config.password().is_some() {
        info!("Password required (X-Pass)");
    }

    let proxy = Proxy::bind(Arc::new(config)).await?;
    let (handle, mut server) = proxy.start();

    info!("Relay ready, press Ctrl+C to stop");

    let finished_early = tokio::select! {
        result = shutdown_signal() => {
            result?;
            false
        }
        result = &mut server => {
            joined(result)?;
            true
        }
    };

    if !finished_early {
        info!("Shutdown signal received");
        handle.shutdown().await?;
        joined(server.await)?;
    }

    Ok(())
}

/// Flatten the relay task result
fn joined(result: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    result.map_err(|e| ProxyError::Other(format!("Relay task failed: {}", e)))?
}

/// Wait for Ctrl+C, or SIGTERM on unix
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok(())
    }
}
