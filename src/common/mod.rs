//! Common module
//!
//! This module contains shared errors and utility functions used throughout the application.

pub mod error;
pub mod log;
pub mod net;

// Re-export commonly used types and functions
pub use error::{is_disconnect, ProxyError, Result};
pub use log::init_logger;
pub use net::tune_stream;
