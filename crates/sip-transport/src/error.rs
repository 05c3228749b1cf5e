use std::io;
use std::net::SocketAddr;
use thiserror::Error;

use crate::transport::TransportType;

/// Result type for SIP transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for SIP transport operations
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to bind to the specified address
    #[error("Failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, io::Error),

    /// Failed to connect to the specified address
    #[error("Failed to connect to {0}: {1}")]
    ConnectFailed(SocketAddr, io::Error),

    /// Failed to send message to the specified address
    #[error("Failed to send message to {0}: {1}")]
    SendFailed(SocketAddr, io::Error),

    /// Failed to get local address
    #[error("Failed to get local address: {0}")]
    LocalAddrFailed(io::Error),

    /// Transport is closed
    #[error("Transport closed")]
    TransportClosed,

    /// TLS configuration or handshake error
    #[error("TLS error: {0}")]
    TlsError(String),

    /// Message too large for transport
    #[error("Message too large for transport ({0} bytes)")]
    MessageTooLarge(usize),

    /// No listening point for the requested transport
    #[error("Transport {0} is not available")]
    UnsupportedTransport(TransportType),

    /// Received bytes could not be turned into a SIP message
    #[error("Parse error: {0}")]
    Parse(#[from] rcs_sip_core::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
