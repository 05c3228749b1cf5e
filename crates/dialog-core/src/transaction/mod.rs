//! # Stack transactions and dialogs
//!
//! The RFC 3261 transaction layer the engine sits on. It corresponds to the
//! part of a SIP stack that an application normally never sees:
//!
//! - [`ClientTransaction`] and [`ServerTransaction`] run one tokio task each,
//!   fed through a command channel. The task owns the retransmission and
//!   timeout timers ([`timer::TimerSettings`]).
//! - [`StackDialog`] keeps the dialog state learned from INVITE
//!   transactions and builds in-dialog requests.
//! - [`TransactionManager`] matches incoming messages to transactions and
//!   reports what the application must see as [`StackEvent`]s.
//!
//! ```text
//!   transport events ──▶ TransactionManager ──▶ client / server tasks
//!                                 │                     │
//!                                 └──── StackEvent ◀────┘
//!                                           │
//!                                           ▼
//!                                  SipInterface reactor
//! ```

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use rcs_sip_core::{Message, Request, Response, SipMessageExt, Via, generate_branch};
use rcs_sip_transport::{TransportManager, TransportType};
use tokio::time::Instant;

use crate::errors::Result;
use crate::trace::SipTrace;

pub mod client;
pub mod dialog;
pub mod key;
pub mod manager;
pub mod server;
pub mod timer;

pub use client::ClientTransaction;
pub use dialog::StackDialog;
pub use key::TransactionKey;
pub use manager::TransactionManager;
pub use server::ServerTransaction;
pub use timer::TimerSettings;

/// State of a stack transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Created, nothing sent yet
    Initial,
    /// INVITE client waiting for the first response
    Calling,
    /// Non-INVITE client waiting for the first response
    Trying,
    Proceeding,
    Completed,
    /// INVITE transaction after a 2xx (RFC 6026)
    Accepted,
    /// INVITE server after the ACK
    Confirmed,
    Terminated,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A handle on either side of a transaction
#[derive(Debug, Clone)]
pub enum StackTransaction {
    Client(ClientTransaction),
    Server(ServerTransaction),
}

impl StackTransaction {
    pub fn key(&self) -> &TransactionKey {
        match self {
            StackTransaction::Client(tx) => tx.key(),
            StackTransaction::Server(tx) => tx.key(),
        }
    }

    pub fn is_server(&self) -> bool {
        matches!(self, StackTransaction::Server(_))
    }

    /// The request that opened the transaction
    pub fn request(&self) -> &Request {
        match self {
            StackTransaction::Client(tx) => tx.request(),
            StackTransaction::Server(tx) => tx.request(),
        }
    }

    pub fn state(&self) -> TransactionState {
        match self {
            StackTransaction::Client(tx) => tx.state(),
            StackTransaction::Server(tx) => tx.state(),
        }
    }

    /// The stack dialog created alongside an INVITE transaction
    pub fn dialog(&self) -> Option<StackDialog> {
        match self {
            StackTransaction::Client(tx) => tx.dialog(),
            StackTransaction::Server(tx) => tx.dialog(),
        }
    }

    pub fn as_client(&self) -> Option<&ClientTransaction> {
        match self {
            StackTransaction::Client(tx) => Some(tx),
            StackTransaction::Server(_) => None,
        }
    }

    pub fn as_server(&self) -> Option<&ServerTransaction> {
        match self {
            StackTransaction::Server(tx) => Some(tx),
            StackTransaction::Client(_) => None,
        }
    }
}

impl From<ClientTransaction> for StackTransaction {
    fn from(tx: ClientTransaction) -> Self {
        StackTransaction::Client(tx)
    }
}

impl From<ServerTransaction> for StackTransaction {
    fn from(tx: ServerTransaction) -> Self {
        StackTransaction::Server(tx)
    }
}

/// What the transaction layer reports to the application
#[derive(Debug, Clone)]
pub enum StackEvent {
    /// A new request, or an ACK for a 2xx
    Request {
        request: Request,
        /// Server transaction the request belongs to; ACKs may have none
        transaction: Option<ServerTransaction>,
        source: SocketAddr,
    },
    /// First copy of a response on a client transaction
    Response {
        response: Response,
        transaction: ClientTransaction,
    },
    /// Timer B or F on a client transaction, Timer H on a server transaction
    Timeout { transaction: StackTransaction },
}

/// Sends stack messages: requests to the outbound proxy, responses back to
/// their source. Also builds the local Via for stack generated requests.
#[derive(Clone)]
pub(crate) struct StackSender {
    transport: Arc<TransportManager>,
    trace: Option<Arc<SipTrace>>,
    proxy: SocketAddr,
    local_ip: IpAddr,
    local_port: u16,
}

impl StackSender {
    pub(crate) fn new(
        transport: Arc<TransportManager>,
        trace: Option<Arc<SipTrace>>,
        proxy: SocketAddr,
        local_ip: IpAddr,
        local_port: u16,
    ) -> Self {
        Self {
            transport,
            trace,
            proxy,
            local_ip,
            local_port,
        }
    }

    pub(crate) fn proxy(&self) -> SocketAddr {
        self.proxy
    }

    pub(crate) fn default_transport(&self) -> TransportType {
        self.transport.default_transport_type()
    }

    /// Transport named by the top Via, or the default one
    pub(crate) fn transport_for(&self, request: &Request) -> TransportType {
        request
            .top_via()
            .and_then(|via| via.transport.parse().ok())
            .filter(|t| self.transport.has_transport(*t))
            .unwrap_or_else(|| self.default_transport())
    }

    /// A Via for this stack with a fresh branch and `rport`
    pub(crate) fn new_via(&self, transport: TransportType) -> Via {
        let host = match self.local_ip {
            IpAddr::V6(ip) => format!("[{}]", ip),
            IpAddr::V4(ip) => ip.to_string(),
        };
        let mut via = Via::new(
            &transport.to_string(),
            host,
            Some(self.local_port),
            &generate_branch(),
        );
        via.set_rport();
        via
    }

    pub(crate) async fn send_request(&self, request: &Request) -> Result<()> {
        let transport_type = self.transport_for(request);
        let message = Message::Request(request.clone());
        self.send(&message, self.proxy, transport_type).await
    }

    pub(crate) async fn send_response(
        &self,
        response: &Response,
        destination: SocketAddr,
        transport_type: TransportType,
    ) -> Result<()> {
        let message = Message::Response(response.clone());
        self.send(&message, destination, transport_type).await
    }

    async fn send(
        &self,
        message: &Message,
        destination: SocketAddr,
        transport_type: TransportType,
    ) -> Result<()> {
        if let Some(trace) = &self.trace {
            trace.sent(message);
        }
        self.transport
            .send_message(message, destination, transport_type)
            .await?;
        Ok(())
    }

    pub(crate) fn trace_received(&self, message: &Message) {
        if let Some(trace) = &self.trace {
            trace.received(message);
        }
    }
}

impl fmt::Debug for StackSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackSender")
            .field("proxy", &self.proxy)
            .field("local_ip", &self.local_ip)
            .field("local_port", &self.local_port)
            .finish()
    }
}

/// Sleeps until `deadline`, or forever when there is none
pub(crate) async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

/// Deadline `delay` from now
pub(crate) fn deadline_in(delay: Duration) -> Instant {
    Instant::now() + delay
}
