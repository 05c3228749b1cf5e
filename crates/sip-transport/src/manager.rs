use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use rcs_sip_core::Message;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
#[cfg(feature = "tls")]
use crate::transport::tls::{bind_tls, TlsConfig};
use crate::transport::tcp::bind_tcp;
use crate::transport::{Transport, TransportEvent, TransportType, UdpTransport};

/// Double CRLF ping (RFC 5626 section 4.4.1)
pub const KEEP_ALIVE_PING: &[u8] = b"\r\n\r\n";

/// Configuration for the transport manager
#[derive(Clone, Debug)]
pub struct TransportManagerConfig {
    /// Address every listening point binds to; port 0 picks an ephemeral port
    pub bind_addr: SocketAddr,
    /// Transport used for requests unless fallback applies
    pub default_transport: TransportType,
    /// Whether a TCP listening point is opened next to UDP
    pub tcp_fallback: bool,
    /// Certificate material, required when the default transport is TLS
    #[cfg(feature = "tls")]
    pub tls: Option<TlsConfig>,
    /// Maximum number of events to buffer
    pub max_event_buffer: usize,
}

impl Default for TransportManagerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            default_transport: TransportType::Udp,
            tcp_fallback: true,
            #[cfg(feature = "tls")]
            tls: None,
            max_event_buffer: 1000,
        }
    }
}

/// Owns the listening points of the stack.
///
/// UDP is always opened. TCP shares its port and is opened when it is the
/// default transport or when UDP requests may fall back to it. TLS is opened
/// only when it is the default. All listening points report into one channel.
pub struct TransportManager {
    config: TransportManagerConfig,
    transports: HashMap<TransportType, Arc<dyn Transport>>,
}

impl TransportManager {
    /// Opens the listening points described by `config`
    pub async fn new(
        config: TransportManagerConfig,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let (events_tx, events_rx) = mpsc::channel(config.max_event_buffer);
        let mut transports: HashMap<TransportType, Arc<dyn Transport>> = HashMap::new();

        let udp = UdpTransport::bind_with_sender(config.bind_addr, events_tx.clone()).await?;
        // Every other listening point reuses the port UDP ended up on
        let bind_addr = udp.local_addr()?;
        transports.insert(TransportType::Udp, Arc::new(udp));

        let wants_tcp = match config.default_transport {
            TransportType::Tcp => true,
            TransportType::Udp => config.tcp_fallback,
            TransportType::Tls => false,
        };
        if wants_tcp {
            let tcp = bind_tcp(bind_addr, events_tx.clone()).await?;
            transports.insert(TransportType::Tcp, Arc::new(tcp));
        }

        if config.default_transport == TransportType::Tls {
            #[cfg(feature = "tls")]
            {
                let tls_config = config.tls.as_ref().ok_or_else(|| {
                    Error::TlsError("TLS is the default transport but no TLS config is set".into())
                })?;
                let tls = bind_tls(bind_addr, tls_config, events_tx.clone()).await?;
                transports.insert(TransportType::Tls, Arc::new(tls));
            }
            #[cfg(not(feature = "tls"))]
            {
                return Err(Error::UnsupportedTransport(TransportType::Tls));
            }
        }

        info!(
            "Transport manager started on {} ({} listening points, default {})",
            bind_addr,
            transports.len(),
            config.default_transport
        );
        Ok((Self { config, transports }, events_rx))
    }

    /// The transport requests use unless fallback applies
    pub fn default_transport_type(&self) -> TransportType {
        self.config.default_transport
    }

    pub fn has_transport(&self, transport_type: TransportType) -> bool {
        self.transports.contains_key(&transport_type)
    }

    /// Gets the listening point for a protocol
    pub fn transport(&self, transport_type: TransportType) -> Result<Arc<dyn Transport>> {
        self.transports
            .get(&transport_type)
            .cloned()
            .ok_or(Error::UnsupportedTransport(transport_type))
    }

    /// Local address of the listening point for a protocol
    pub fn local_addr(&self, transport_type: TransportType) -> Result<SocketAddr> {
        self.transport(transport_type)?.local_addr()
    }

    /// Sends a message over the given protocol
    pub async fn send_message(
        &self,
        message: &Message,
        destination: SocketAddr,
        transport_type: TransportType,
    ) -> Result<()> {
        debug!(
            "Sending {} over {} to {}",
            describe(message),
            transport_type,
            destination
        );
        self.transport(transport_type)?
            .send_message(message, destination)
            .await
    }

    /// Sends a CRLF keep-alive over the default transport
    pub async fn send_keep_alive(&self, destination: SocketAddr) -> Result<()> {
        self.transport(self.config.default_transport)?
            .send_raw(KEEP_ALIVE_PING, destination)
            .await
    }

    /// Closes every listening point
    pub async fn close(&self) -> Result<()> {
        for (transport_type, transport) in &self.transports {
            if let Err(e) = transport.close().await {
                warn!("Error closing {} transport: {}", transport_type, e);
            }
        }
        info!("Transport manager closed");
        Ok(())
    }
}

fn describe(message: &Message) -> String {
    match message {
        Message::Request(request) => request.method.to_string(),
        Message::Response(response) => format!("{} response", response.status.as_u16()),
    }
}

impl std::fmt::Debug for TransportManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportManager")
            .field("default_transport", &self.config.default_transport)
            .field("transports", &self.transports.keys().collect::<Vec<_>>())
            .finish()
    }
}
