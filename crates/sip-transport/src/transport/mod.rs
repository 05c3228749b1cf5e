use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use rcs_sip_core::Message;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub mod stream;
pub mod tcp;
#[cfg(feature = "tls")]
pub mod tls;
pub mod udp;

pub use stream::StreamTransport;
pub use udp::UdpTransport;

/// The transport protocol of a listening point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransportType {
    Udp,
    Tcp,
    Tls,
}

impl TransportType {
    /// Lower-case form used in URI `transport=` parameters
    pub fn as_param(&self) -> &'static str {
        match self {
            TransportType::Udp => "udp",
            TransportType::Tcp => "tcp",
            TransportType::Tls => "tls",
        }
    }

    /// Whether the transport guarantees delivery (no retransmissions needed)
    pub fn is_reliable(&self) -> bool {
        !matches!(self, TransportType::Udp)
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportType::Udp => write!(f, "UDP"),
            TransportType::Tcp => write!(f, "TCP"),
            TransportType::Tls => write!(f, "TLS"),
        }
    }
}

impl FromStr for TransportType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UDP" => Ok(TransportType::Udp),
            "TCP" => Ok(TransportType::Tcp),
            "TLS" => Ok(TransportType::Tls),
            other => Err(Error::Parse(rcs_sip_core::Error::InvalidFormat(format!(
                "unknown transport '{}'",
                other
            )))),
        }
    }
}

/// Events emitted by a transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A SIP message was received
    MessageReceived {
        message: Message,
        /// The remote address that sent the message
        source: SocketAddr,
        /// The local address that received the message
        destination: SocketAddr,
        transport: TransportType,
    },

    /// Error occurred in the transport
    Error { error: String },

    /// Transport has been closed
    Closed,
}

/// A SIP listening point.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Returns the local address this transport is bound to
    fn local_addr(&self) -> Result<SocketAddr>;

    fn transport_type(&self) -> TransportType;

    /// Sends a SIP message to the specified destination
    async fn send_message(&self, message: &Message, destination: SocketAddr) -> Result<()> {
        self.send_raw(&message.to_bytes(), destination).await
    }

    /// Sends raw bytes (used for CRLF keep-alives)
    async fn send_raw(&self, data: &[u8], destination: SocketAddr) -> Result<()>;

    /// Closes the transport
    async fn close(&self) -> Result<()>;

    /// Checks if the transport is closed
    fn is_closed(&self) -> bool;
}
