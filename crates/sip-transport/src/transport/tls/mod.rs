//! TLS listening point.
//!
//! Outbound connections verify the peer against an explicit CA bundle.
//! Inbound connections are only accepted when a certificate and key are
//! configured.

use std::net::SocketAddr;
use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::error::{Error, Result};
use crate::transport::stream::{StreamSecurity, StreamTransport};
use crate::transport::TransportEvent;

pub mod config;

/// Certificate material for a TLS listening point
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// PEM bundle of trusted CAs for outbound connections
    pub ca_file: PathBuf,
    /// PEM certificate chain presented to inbound peers
    pub cert_file: Option<PathBuf>,
    /// PEM private key matching `cert_file`
    pub key_file: Option<PathBuf>,
    /// Name verified against the outbound proxy certificate
    pub server_name: String,
}

/// Binds a TLS listening point reporting into `events_tx`
pub async fn bind_tls(
    addr: SocketAddr,
    tls: &TlsConfig,
    events_tx: mpsc::Sender<TransportEvent>,
) -> Result<StreamTransport> {
    let client_config = config::create_client_config(&tls.ca_file)?;
    let server_name = rustls::ServerName::try_from(tls.server_name.as_str())
        .map_err(|e| Error::TlsError(format!("invalid server name '{}': {}", tls.server_name, e)))?;

    let acceptor = match (&tls.cert_file, &tls.key_file) {
        (Some(cert), Some(key)) => Some(TlsAcceptor::from(config::create_server_config(
            cert, key,
        )?)),
        (None, None) => None,
        _ => {
            return Err(Error::TlsError(
                "cert_file and key_file must be configured together".to_string(),
            ));
        }
    };

    let security = StreamSecurity::Tls {
        connector: TlsConnector::from(client_config),
        server_name,
        acceptor,
    };
    StreamTransport::bind_with_security(addr, security, events_tx).await
}
