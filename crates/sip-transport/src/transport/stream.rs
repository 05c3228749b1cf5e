//! Connection oriented listening points.
//!
//! TCP and TLS share one implementation: a listener that accepts inbound
//! connections plus a pool of established connections keyed by the remote
//! address. Outbound sends reuse a pooled connection or dial a new one.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::framing::{next_frame, Frame};
use crate::transport::{Transport, TransportEvent, TransportType};

const READ_BUFFER_SIZE: usize = 8192;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// How raw TCP streams are wrapped before use
#[derive(Clone)]
pub(crate) enum StreamSecurity {
    Plain,
    #[cfg(feature = "tls")]
    Tls {
        connector: tokio_rustls::TlsConnector,
        server_name: rustls::ServerName,
        acceptor: Option<tokio_rustls::TlsAcceptor>,
    },
}

impl StreamSecurity {
    fn transport_type(&self) -> TransportType {
        match self {
            StreamSecurity::Plain => TransportType::Tcp,
            #[cfg(feature = "tls")]
            StreamSecurity::Tls { .. } => TransportType::Tls,
        }
    }
}

/// One established connection
struct Connection {
    peer: SocketAddr,
    writer: Mutex<BoxedWriter>,
}

impl Connection {
    async fn write(&self, data: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(data).await?;
        writer.flush().await
    }

    async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            trace!("Error shutting down connection to {}: {}", self.peer, e);
        }
    }
}

/// A TCP or TLS listening point
#[derive(Clone)]
pub struct StreamTransport {
    inner: Arc<StreamInner>,
}

struct StreamInner {
    local_addr: SocketAddr,
    security: StreamSecurity,
    connections: Mutex<HashMap<SocketAddr, Arc<Connection>>>,
    closed: AtomicBool,
    events_tx: mpsc::Sender<TransportEvent>,
    shutdown_tx: watch::Sender<bool>,
}

impl StreamTransport {
    pub(crate) async fn bind_with_security(
        addr: SocketAddr,
        security: StreamSecurity,
        events_tx: mpsc::Sender<TransportEvent>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::BindFailed(addr, e))?;
        let local_addr = listener.local_addr().map_err(Error::LocalAddrFailed)?;
        info!(
            "SIP {} transport bound to {}",
            security.transport_type(),
            local_addr
        );

        let (shutdown_tx, _) = watch::channel(false);
        let transport = StreamTransport {
            inner: Arc::new(StreamInner {
                local_addr,
                security,
                connections: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                events_tx,
                shutdown_tx,
            }),
        };

        transport.spawn_accept_loop(listener);
        Ok(transport)
    }

    /// Number of pooled connections
    pub async fn connection_count(&self) -> usize {
        self.inner.connections.lock().await.len()
    }

    fn spawn_accept_loop(&self, listener: TcpListener) {
        let transport = self.clone();
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                let (stream, peer) = tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    accepted = listener.accept() => match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            if transport.is_closed() {
                                break;
                            }
                            warn!("Error accepting connection: {}", e);
                            continue;
                        }
                    },
                };
                debug!(
                    "Accepted {} connection from {}",
                    transport.transport_type(),
                    peer
                );

                let transport = transport.clone();
                tokio::spawn(async move {
                    if let Err(e) = transport.accept_stream(stream, peer).await {
                        warn!("Dropping inbound connection from {}: {}", peer, e);
                    }
                });
            }
            debug!("Accept loop on {} terminated", transport.inner.local_addr);
        });
    }

    async fn accept_stream(&self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        match &self.inner.security {
            StreamSecurity::Plain => {
                self.register(stream, peer).await;
                Ok(())
            }
            #[cfg(feature = "tls")]
            StreamSecurity::Tls { acceptor, .. } => {
                let acceptor = acceptor.as_ref().ok_or_else(|| {
                    Error::TlsError("no server certificate configured".to_string())
                })?;
                let tls = acceptor
                    .accept(stream)
                    .await
                    .map_err(|e| Error::TlsError(e.to_string()))?;
                self.register(tls, peer).await;
                Ok(())
            }
        }
    }

    async fn connect(&self, destination: SocketAddr) -> Result<Arc<Connection>> {
        let stream = TcpStream::connect(destination)
            .await
            .map_err(|e| Error::ConnectFailed(destination, e))?;
        let _ = stream.set_nodelay(true);
        debug!(
            "Opened {} connection to {}",
            self.transport_type(),
            destination
        );

        match &self.inner.security {
            StreamSecurity::Plain => Ok(self.register(stream, destination).await),
            #[cfg(feature = "tls")]
            StreamSecurity::Tls {
                connector,
                server_name,
                ..
            } => {
                let tls = connector
                    .connect(server_name.clone(), stream)
                    .await
                    .map_err(|e| Error::TlsError(e.to_string()))?;
                Ok(self.register(tls, destination).await)
            }
        }
    }

    // Splits the stream, pools the write half and spawns the reader
    async fn register<S>(&self, stream: S, peer: SocketAddr) -> Arc<Connection>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let connection = Arc::new(Connection {
            peer,
            writer: Mutex::new(Box::new(writer)),
        });

        let previous = self
            .inner
            .connections
            .lock()
            .await
            .insert(peer, connection.clone());
        if let Some(previous) = previous {
            previous.shutdown().await;
        }

        self.spawn_reader(reader, connection.clone());
        connection
    }

    fn spawn_reader<R>(&self, mut reader: R, connection: Arc<Connection>)
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let transport = self.clone();
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let inner = &transport.inner;
            let peer = connection.peer;
            let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

            'read: loop {
                let read = tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    read = reader.read_buf(&mut buf) => read,
                };
                match read {
                    Ok(0) => {
                        debug!("Connection to {} closed by peer", peer);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!("Read error on connection to {}: {}", peer, e);
                        break;
                    }
                }

                loop {
                    match next_frame(&mut buf) {
                        Ok(Some(Frame::KeepAlive)) => {
                            trace!("Keep-alive from {}", peer);
                        }
                        Ok(Some(Frame::Message(bytes))) => {
                            match rcs_sip_core::parse_message(&bytes) {
                                Ok(message) => {
                                    let event = TransportEvent::MessageReceived {
                                        message,
                                        source: peer,
                                        destination: inner.local_addr,
                                        transport: inner.security.transport_type(),
                                    };
                                    if inner.events_tx.send(event).await.is_err() {
                                        break 'read;
                                    }
                                }
                                Err(e) => {
                                    warn!("Failed to parse SIP message from {}: {}", peer, e)
                                }
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            error!("Unrecoverable framing error from {}: {}", peer, e);
                            break 'read;
                        }
                    }
                }
            }

            // Only evict the entry if it still refers to this connection
            let mut connections = inner.connections.lock().await;
            if let Some(current) = connections.get(&peer) {
                if Arc::ptr_eq(current, &connection) {
                    connections.remove(&peer);
                }
            }
        });
    }

    async fn connection_for(&self, destination: SocketAddr) -> Result<Arc<Connection>> {
        if let Some(existing) = self.inner.connections.lock().await.get(&destination) {
            return Ok(existing.clone());
        }
        self.connect(destination).await
    }
}

#[async_trait::async_trait]
impl Transport for StreamTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr)
    }

    fn transport_type(&self) -> TransportType {
        self.inner.security.transport_type()
    }

    async fn send_raw(&self, data: &[u8], destination: SocketAddr) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }

        let connection = self.connection_for(destination).await?;
        if let Err(e) = connection.write(data).await {
            // Stale pooled connection: redial once
            debug!("Write to {} failed ({}), reconnecting", destination, e);
            self.inner.connections.lock().await.remove(&destination);
            let connection = self.connect(destination).await?;
            connection
                .write(data)
                .await
                .map_err(|e| Error::SendFailed(destination, e))?;
        }
        trace!(
            "Sent {} bytes over {} to {}",
            data.len(),
            self.transport_type(),
            destination
        );
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::Relaxed) {
            return Ok(());
        }
        let _ = self.inner.shutdown_tx.send(true);

        let drained: Vec<_> = self.inner.connections.lock().await.drain().collect();
        for (_, connection) in drained {
            connection.shutdown().await;
        }
        let _ = self.inner.events_tx.send(TransportEvent::Closed).await;
        info!(
            "SIP {} transport {} closed",
            self.transport_type(),
            self.inner.local_addr
        );
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StreamTransport({} {})",
            self.transport_type(),
            self.inner.local_addr
        )
    }
}
