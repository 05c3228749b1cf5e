//! Transaction manager
//!
//! Owns the transaction and dialog tables and consumes the transport event
//! channel. For each incoming message it decides which transaction task must
//! see it and whether the application must see it:
//!
//! - a request matching a server transaction is a retransmission and is
//!   handed to that transaction only;
//! - a new request opens a server transaction (and a dialog for an initial
//!   INVITE) and is reported;
//! - an ACK with the branch of its INVITE acknowledges a non-2xx response and
//!   is absorbed; an ACK for a 2xx carries a new branch, is matched to its
//!   INVITE by Call-ID and CSeq number, and is reported;
//! - a response goes to its client transaction, which reports the first copy.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use rcs_sip_core::{Message, Method, Request, Response, SipMessageExt};
use rcs_sip_transport::{TransportEvent, TransportManager, TransportType};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::errors::{Result, SipError};
use crate::trace::SipTrace;
use crate::transaction::client::ClientTransaction;
use crate::transaction::dialog::StackDialog;
use crate::transaction::key::TransactionKey;
use crate::transaction::server::ServerTransaction;
use crate::transaction::timer::TimerSettings;
use crate::transaction::{StackEvent, StackSender};

/// Capacity of the stack event channel
const STACK_EVENT_BUFFER: usize = 1000;

/// State shared between the manager and the transaction tasks
pub(crate) struct Shared {
    pub(crate) sender: StackSender,
    pub(crate) timers: TimerSettings,
    events_tx: mpsc::Sender<StackEvent>,
    pub(crate) client_transactions: DashMap<TransactionKey, ClientTransaction>,
    pub(crate) server_transactions: DashMap<TransactionKey, ServerTransaction>,
    /// Stack dialogs by Call-ID
    pub(crate) dialogs: DashMap<String, StackDialog>,
}

impl Shared {
    pub(crate) async fn report(&self, event: StackEvent) {
        if self.events_tx.send(event).await.is_err() {
            debug!("Stack event receiver closed, event dropped");
        }
    }
}

/// Matches SIP traffic to stack transactions and dialogs
pub struct TransactionManager {
    shared: Arc<Shared>,
    transport: Arc<TransportManager>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl TransactionManager {
    /// Starts the manager on top of an opened transport.
    ///
    /// Requests are sent to `proxy`. `local_ip` and the default listening
    /// point's port are used in the Via of stack generated requests.
    pub fn start(
        transport: Arc<TransportManager>,
        transport_events: mpsc::Receiver<TransportEvent>,
        proxy: SocketAddr,
        local_ip: IpAddr,
        timers: TimerSettings,
        trace: Option<Arc<SipTrace>>,
    ) -> Result<(Self, mpsc::Receiver<StackEvent>)> {
        let local_port = transport
            .local_addr(transport.default_transport_type())?
            .port();
        let sender = StackSender::new(transport.clone(), trace, proxy, local_ip, local_port);
        let (events_tx, events_rx) = mpsc::channel(STACK_EVENT_BUFFER);
        let shared = Arc::new(Shared {
            sender,
            timers,
            events_tx,
            client_transactions: DashMap::new(),
            server_transactions: DashMap::new(),
            dialogs: DashMap::new(),
        });
        let event_loop = tokio::spawn(run_event_loop(shared.clone(), transport_events));
        info!(proxy = %proxy, "Transaction manager started");
        Ok((
            Self {
                shared,
                transport,
                event_loop: Mutex::new(Some(event_loop)),
            },
            events_rx,
        ))
    }

    pub fn timer_settings(&self) -> TimerSettings {
        self.shared.timers
    }

    pub fn transport(&self) -> &Arc<TransportManager> {
        &self.transport
    }

    /// Creates a client transaction for `request` without sending it.
    ///
    /// An INVITE gets the dialog of its Call-ID, which is created on the
    /// first INVITE of the call.
    pub fn create_client_transaction(&self, request: Request) -> Result<ClientTransaction> {
        let transport_type = self.shared.sender.transport_for(&request);
        let dialog = if request.method == Method::Invite {
            Some(self.dialog_for_outgoing(&request)?)
        } else {
            None
        };
        ClientTransaction::new(request, transport_type, dialog, &self.shared)
    }

    fn dialog_for_outgoing(&self, request: &Request) -> Result<StackDialog> {
        let call_id = request
            .call_id()
            .ok_or_else(|| SipError::payload("INVITE has no Call-ID header"))?;
        if let Some(dialog) = self.shared.dialogs.get(call_id) {
            return Ok(dialog.clone());
        }
        let dialog = StackDialog::for_outgoing(request, self.shared.sender.clone())?;
        self.shared
            .dialogs
            .insert(call_id.to_string(), dialog.clone());
        Ok(dialog)
    }

    pub fn dialog(&self, call_id: &str) -> Option<StackDialog> {
        self.shared.dialogs.get(call_id).map(|d| d.clone())
    }

    pub fn client_transaction(&self, key: &TransactionKey) -> Option<ClientTransaction> {
        self.shared.client_transactions.get(key).map(|t| t.clone())
    }

    pub fn server_transaction(&self, key: &TransactionKey) -> Option<ServerTransaction> {
        self.shared.server_transactions.get(key).map(|t| t.clone())
    }

    pub fn client_transaction_count(&self) -> usize {
        self.shared.client_transactions.len()
    }

    pub fn server_transaction_count(&self) -> usize {
        self.shared.server_transactions.len()
    }

    pub fn dialog_count(&self) -> usize {
        self.shared.dialogs.len()
    }

    /// Sends a request outside of any transaction
    pub async fn send_stateless(&self, request: &Request) -> Result<()> {
        self.shared.sender.send_request(request).await
    }

    /// Stops every transaction and the event loop
    pub fn close(&self) {
        if let Some(handle) = self.event_loop.lock().take() {
            handle.abort();
        }
        for tx in self.shared.client_transactions.iter() {
            tx.terminate();
        }
        for tx in self.shared.server_transactions.iter() {
            tx.terminate();
        }
        self.shared.client_transactions.clear();
        self.shared.server_transactions.clear();
        self.shared.dialogs.clear();
        info!("Transaction manager closed");
    }
}

impl Drop for TransactionManager {
    fn drop(&mut self) {
        if let Some(handle) = self.event_loop.lock().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("client_transactions", &self.shared.client_transactions.len())
            .field("server_transactions", &self.shared.server_transactions.len())
            .field("dialogs", &self.shared.dialogs.len())
            .finish()
    }
}

async fn run_event_loop(shared: Arc<Shared>, mut events: mpsc::Receiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::MessageReceived {
                message,
                source,
                transport,
                ..
            } => {
                shared.sender.trace_received(&message);
                match message {
                    Message::Request(request) => {
                        handle_request(&shared, request, source, transport).await
                    }
                    Message::Response(response) => handle_response(&shared, response).await,
                }
            }
            TransportEvent::Error { error } => warn!("Transport error: {}", error),
            TransportEvent::Closed => debug!("Listening point closed"),
        }
    }
    debug!("Transport event channel closed");
}

async fn handle_request(
    shared: &Arc<Shared>,
    request: Request,
    source: SocketAddr,
    transport_type: TransportType,
) {
    let Some(key) = TransactionKey::from_request(&request) else {
        warn!(source = %source, "Dropping {} without a Via branch", request.method);
        return;
    };

    if request.method == Method::Ack {
        handle_ack(shared, key, request, source).await;
        return;
    }

    if let Some(tx) = shared.server_transactions.get(&key).map(|t| t.clone()) {
        trace!(id = %key, "Request retransmission");
        tx.deliver(request);
        return;
    }

    let dialog = if request.method == Method::Invite {
        dialog_for_incoming(shared, &request)
    } else {
        None
    };
    match ServerTransaction::start(request.clone(), source, transport_type, dialog, shared) {
        Ok(tx) => {
            shared
                .report(StackEvent::Request {
                    request,
                    transaction: Some(tx),
                    source,
                })
                .await
        }
        Err(e) => warn!(source = %source, "Can't create server transaction: {}", e),
    }
}

fn dialog_for_incoming(shared: &Shared, request: &Request) -> Option<StackDialog> {
    let call_id = request.call_id()?;
    if let Some(dialog) = shared.dialogs.get(call_id) {
        return Some(dialog.clone());
    }
    match StackDialog::for_incoming(request, shared.sender.clone()) {
        Ok(dialog) => {
            shared.dialogs.insert(call_id.to_string(), dialog.clone());
            Some(dialog)
        }
        Err(e) => {
            warn!(call_id = %call_id, "Can't create dialog: {}", e);
            None
        }
    }
}

async fn handle_ack(shared: &Shared, key: TransactionKey, ack: Request, source: SocketAddr) {
    if let Some(tx) = shared.server_transactions.get(&key).map(|t| t.clone()) {
        let for_success = tx
            .last_response_status()
            .map(|s| s.is_success())
            .unwrap_or(false);
        tx.deliver(ack.clone());
        if !for_success {
            trace!(id = %key, "ACK for a non-2xx response absorbed");
            return;
        }
        shared
            .report(StackEvent::Request {
                request: ack,
                transaction: Some(tx),
                source,
            })
            .await;
        return;
    }

    let invite = find_invite_for_ack(shared, &ack);
    if let Some(tx) = &invite {
        tx.deliver(ack.clone());
    }
    shared
        .report(StackEvent::Request {
            request: ack,
            transaction: invite,
            source,
        })
        .await;
}

/// INVITE server transaction with the ACK's Call-ID and CSeq number
fn find_invite_for_ack(shared: &Shared, ack: &Request) -> Option<ServerTransaction> {
    let call_id = ack.call_id()?;
    let seq = ack.cseq_number()?;
    shared
        .server_transactions
        .iter()
        .find(|entry| {
            let invite = entry.value().request();
            entry.key().is_invite()
                && invite.call_id() == Some(call_id)
                && invite.cseq_number() == Some(seq)
        })
        .map(|entry| entry.value().clone())
}

async fn handle_response(shared: &Shared, response: Response) {
    let Some(key) = TransactionKey::from_response(&response) else {
        warn!("Dropping {} response without a Via branch", response.status);
        return;
    };
    if let Some(tx) = shared.client_transactions.get(&key).map(|t| t.clone()) {
        tx.deliver(response);
        return;
    }

    // A 2xx retransmitted after the INVITE transaction ended still needs
    // the dialog's ACK
    if response.status.is_success() && key.is_invite() {
        let dialog = response
            .call_id()
            .and_then(|id| shared.dialogs.get(id).map(|d| d.clone()));
        if let Some(dialog) = dialog {
            dialog.resend_last_ack().await;
            return;
        }
    }
    debug!(id = %key, status = %response.status, "No transaction for response");
}
