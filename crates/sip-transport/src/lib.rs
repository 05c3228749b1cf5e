//! # rcs-sip-transport
//!
//! Listening points for the RCS SIP engine.
//!
//! - [`UdpTransport`] for datagrams
//! - [`StreamTransport`] for TCP and TLS, with pooled connections and
//!   Content-Length framing
//! - [`TransportManager`], which opens the listening points a stack
//!   configuration needs and merges their events into one channel
//!
//! Incoming bytes are parsed with `rcs-sip-core`; bare CRLF keep-alives are
//! consumed silently.

pub mod error;
pub mod framing;
pub mod manager;
pub mod transport;

pub use error::{Error, Result};
pub use manager::{TransportManager, TransportManagerConfig, KEEP_ALIVE_PING};
#[cfg(feature = "tls")]
pub use transport::tls::TlsConfig;
pub use transport::{StreamTransport, Transport, TransportEvent, TransportType, UdpTransport};

/// Bind a UDP transport to the specified address
pub async fn bind_udp(
    addr: std::net::SocketAddr,
) -> Result<(UdpTransport, tokio::sync::mpsc::Receiver<TransportEvent>)> {
    UdpTransport::bind(addr, None).await
}
