use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportEvent, TransportType};

// Default channel capacity
const DEFAULT_CHANNEL_CAPACITY: usize = 100;

// Largest UDP payload
const MAX_DATAGRAM_SIZE: usize = 65535;

/// UDP transport for SIP messages
#[derive(Clone)]
pub struct UdpTransport {
    inner: Arc<UdpTransportInner>,
}

struct UdpTransportInner {
    socket: UdpSocket,
    local_addr: SocketAddr,
    closed: AtomicBool,
    events_tx: mpsc::Sender<TransportEvent>,
    shutdown_tx: watch::Sender<bool>,
}

impl UdpTransport {
    /// Creates a new UDP transport bound to the specified address
    pub async fn bind(
        addr: SocketAddr,
        channel_capacity: Option<usize>,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let capacity = channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(capacity);
        let transport = Self::bind_with_sender(addr, events_tx).await?;
        Ok((transport, events_rx))
    }

    /// Creates a UDP transport that reports into an existing event channel
    pub async fn bind_with_sender(
        addr: SocketAddr,
        events_tx: mpsc::Sender<TransportEvent>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| Error::BindFailed(addr, e))?;
        let local_addr = socket.local_addr().map_err(Error::LocalAddrFailed)?;
        info!("SIP UDP transport bound to {}", local_addr);

        let (shutdown_tx, _) = watch::channel(false);
        let transport = UdpTransport {
            inner: Arc::new(UdpTransportInner {
                socket,
                local_addr,
                closed: AtomicBool::new(false),
                events_tx,
                shutdown_tx,
            }),
        };

        transport.spawn_receive_loop();
        Ok(transport)
    }

    // Spawns a task to receive packets from the UDP socket
    fn spawn_receive_loop(&self) {
        let transport = self.clone();
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let inner = &transport.inner;
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

            while !inner.closed.load(Ordering::Relaxed) {
                let (len, src) = tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    result = inner.socket.recv_from(&mut buf) => match result {
                        Ok(r) => r,
                        Err(e) => {
                            if inner.closed.load(Ordering::Relaxed) {
                                break;
                            }
                            // ICMP port unreachable surfaces here on some platforms
                            warn!("Error receiving UDP packet: {}", e);
                            let _ = inner
                                .events_tx
                                .send(TransportEvent::Error { error: e.to_string() })
                                .await;
                            continue;
                        }
                    },
                };

                let packet = &buf[..len];
                if packet.iter().all(|b| matches!(b, b'\r' | b'\n' | b' ' | b'\t' | 0)) {
                    trace!("Keep-alive datagram from {}", src);
                    continue;
                }

                match rcs_sip_core::parse_message(packet) {
                    Ok(message) => {
                        debug!("Received SIP message from {}", src);
                        let event = TransportEvent::MessageReceived {
                            message,
                            source: src,
                            destination: inner.local_addr,
                            transport: TransportType::Udp,
                        };
                        if inner.events_tx.send(event).await.is_err() {
                            debug!("Event receiver dropped, stopping UDP receive loop");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Failed to parse SIP message from {}: {}", src, e);
                    }
                }
            }

            debug!("UDP receive loop on {} terminated", inner.local_addr);
        });
    }
}

#[async_trait::async_trait]
impl Transport for UdpTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr)
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Udp
    }

    async fn send_raw(&self, data: &[u8], destination: SocketAddr) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }
        if data.len() > MAX_DATAGRAM_SIZE {
            return Err(Error::MessageTooLarge(data.len()));
        }
        let sent = self
            .inner
            .socket
            .send_to(data, destination)
            .await
            .map_err(|e| Error::SendFailed(destination, e))?;
        trace!("Sent {} bytes over UDP to {}", sent, destination);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.inner.closed.swap(true, Ordering::Relaxed) {
            let _ = self.inner.shutdown_tx.send(true);
            let _ = self.inner.events_tx.send(TransportEvent::Closed).await;
            info!("SIP UDP transport {} closed", self.inner.local_addr);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UdpTransport({})", self.inner.local_addr)
    }
}
