use std::net::SocketAddr;

use tokio::sync::mpsc;

use crate::error::Result;
use crate::transport::stream::{StreamSecurity, StreamTransport};
use crate::transport::TransportEvent;

/// Binds a plain TCP listening point reporting into `events_tx`
pub async fn bind_tcp(
    addr: SocketAddr,
    events_tx: mpsc::Sender<TransportEvent>,
) -> Result<StreamTransport> {
    StreamTransport::bind_with_security(addr, StreamSecurity::Plain, events_tx).await
}
