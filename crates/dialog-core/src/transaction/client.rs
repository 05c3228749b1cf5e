//! Client transactions (RFC 3261 sections 17.1.1 and 17.1.2)
//!
//! A [`ClientTransaction`] is created for an outgoing request and started by
//! [`ClientTransaction::send_request`] (or [`StackDialog::send_request`] for
//! in-dialog requests). Starting it transmits the request and spawns the task
//! that owns the transaction timers:
//!
//! ```text
//! INVITE:      Calling ──1xx──▶ Proceeding ──2xx──▶ Accepted ──Timer M──▶ Terminated
//!                 │                 │
//!                 └────300-699──────┴──▶ Completed (ACK sent) ──Timer D──▶ Terminated
//!
//! non-INVITE:  Trying ──1xx──▶ Proceeding ──final──▶ Completed ──Timer K──▶ Terminated
//! ```
//!
//! Timer B (INVITE, Calling only) and Timer F (non-INVITE) report a
//! [`StackEvent::Timeout`] and end the transaction.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rcs_sip_core::{CSeq, HeaderName, Method, Request, Response, SipMessageExt};
use rcs_sip_transport::TransportType;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::errors::{Result, SipError};
use crate::transaction::dialog::StackDialog;
use crate::transaction::key::TransactionKey;
use crate::transaction::manager::Shared;
use crate::transaction::{
    StackEvent, StackTransaction, TransactionState, deadline_in, sleep_until_opt,
};

pub(crate) enum ClientCommand {
    Response(Response),
    Terminate,
}

/// Handle on a client transaction
#[derive(Clone)]
pub struct ClientTransaction {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    key: TransactionKey,
    request: Request,
    transport_type: TransportType,
    state: Mutex<TransactionState>,
    dialog: Option<StackDialog>,
    shared: Weak<Shared>,
    commands: mpsc::UnboundedSender<ClientCommand>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<ClientCommand>>>,
}

impl ClientTransaction {
    pub(crate) fn new(
        request: Request,
        transport_type: TransportType,
        dialog: Option<StackDialog>,
        shared: &Arc<Shared>,
    ) -> Result<Self> {
        let key = TransactionKey::for_outgoing(&request)
            .ok_or_else(|| SipError::payload("Request has no Via branch"))?;
        let (commands, receiver) = mpsc::unbounded_channel();
        Ok(Self {
            inner: Arc::new(ClientInner {
                key,
                request,
                transport_type,
                state: Mutex::new(TransactionState::Initial),
                dialog,
                shared: Arc::downgrade(shared),
                commands,
                receiver: Mutex::new(Some(receiver)),
            }),
        })
    }

    pub fn key(&self) -> &TransactionKey {
        &self.inner.key
    }

    pub fn request(&self) -> &Request {
        &self.inner.request
    }

    pub fn state(&self) -> TransactionState {
        *self.inner.state.lock()
    }

    pub fn transport_type(&self) -> TransportType {
        self.inner.transport_type
    }

    pub fn is_invite(&self) -> bool {
        self.inner.key.is_invite()
    }

    /// Dialog created alongside an INVITE transaction
    pub fn dialog(&self) -> Option<StackDialog> {
        self.inner.dialog.clone()
    }

    pub fn ptr_eq(&self, other: &ClientTransaction) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn set_state(&self, state: TransactionState) {
        let previous = std::mem::replace(&mut *self.inner.state.lock(), state);
        if previous != state {
            trace!(id = %self.inner.key, "State changed from {} to {}", previous, state);
        }
    }

    /// Transmits the request and starts the transaction timers
    pub async fn send_request(&self) -> Result<()> {
        let shared = self
            .inner
            .shared
            .upgrade()
            .ok_or_else(|| SipError::network("SIP stack is closed"))?;
        let receiver = self.inner.receiver.lock().take().ok_or_else(|| {
            SipError::network(format!("Transaction {} already started", self.inner.key))
        })?;

        // Registered before sending so a fast response still finds it
        shared
            .client_transactions
            .insert(self.inner.key.clone(), self.clone());
        if let Err(e) = shared.sender.send_request(&self.inner.request).await {
            shared.client_transactions.remove(&self.inner.key);
            self.set_state(TransactionState::Terminated);
            return Err(e);
        }

        self.set_state(if self.is_invite() {
            TransactionState::Calling
        } else {
            TransactionState::Trying
        });
        debug!(id = %self.inner.key, "Client transaction started");
        tokio::spawn(run_client(self.clone(), shared, receiver));
        Ok(())
    }

    /// Builds a CANCEL for this INVITE (RFC 3261 section 9.1)
    pub fn create_cancel(&self) -> Result<Request> {
        if !self.is_invite() {
            return Err(SipError::payload("Only INVITE transactions can be cancelled"));
        }
        let to = self
            .inner
            .request
            .header(&HeaderName::To)
            .ok_or_else(|| SipError::payload("INVITE has no To header"))?
            .to_string();
        self.derived_request(Method::Cancel, &to)
    }

    /// ACK for a non-2xx final response (RFC 3261 section 17.1.1.3)
    fn create_error_ack(&self, response: &Response) -> Result<Request> {
        let to = response
            .header(&HeaderName::To)
            .ok_or_else(|| SipError::payload("Response has no To header"))?
            .to_string();
        self.derived_request(Method::Ack, &to)
    }

    /// Request sharing branch, Request-URI, Call-ID, From, Route and CSeq
    /// number with the original request
    fn derived_request(&self, method: Method, to: &str) -> Result<Request> {
        let original = &self.inner.request;
        let via = original
            .top_via()
            .ok_or_else(|| SipError::payload("Request has no Via header"))?;
        let seq = original
            .cseq_number()
            .ok_or_else(|| SipError::payload("Request has no CSeq header"))?;
        let call_id = original
            .call_id()
            .ok_or_else(|| SipError::payload("Request has no Call-ID header"))?
            .to_string();
        let from = original
            .header(&HeaderName::From)
            .ok_or_else(|| SipError::payload("Request has no From header"))?
            .to_string();

        let mut request = Request::new(method.clone(), original.uri.clone());
        request.push_header(HeaderName::Via, via.to_string())?;
        request.push_header(HeaderName::MaxForwards, "70")?;
        request.push_header(HeaderName::From, from)?;
        request.push_header(HeaderName::To, to)?;
        request.push_header(HeaderName::CallId, call_id)?;
        request.push_header(HeaderName::CSeq, CSeq::new(seq, method).to_string())?;
        for route in original.header_values(&HeaderName::Route) {
            request.push_header(HeaderName::Route, route)?;
        }
        Ok(request)
    }

    pub(crate) fn deliver(&self, response: Response) {
        if self
            .inner
            .commands
            .send(ClientCommand::Response(response))
            .is_err()
        {
            trace!(id = %self.inner.key, "Response for a finished transaction dropped");
        }
    }

    pub(crate) fn terminate(&self) {
        let _ = self.inner.commands.send(ClientCommand::Terminate);
    }

    async fn on_response(&self, shared: &Shared, response: Response, timers: &mut ClientTimers) {
        let status = response.status;
        let state = self.state();
        let reliable = self.inner.transport_type.is_reliable();

        if self.is_invite() {
            match state {
                TransactionState::Calling | TransactionState::Proceeding => {
                    timers.retransmit = None;
                    timers.timeout = None;
                    if let Some(dialog) = &self.inner.dialog {
                        dialog.on_response(&response);
                    }
                    if status.is_provisional() {
                        self.set_state(TransactionState::Proceeding);
                    } else if status.is_success() {
                        self.set_state(TransactionState::Accepted);
                        timers.linger = Some(deadline_in(shared.timers.timer_m()));
                    } else {
                        self.set_state(TransactionState::Completed);
                        self.send_error_ack(shared, &response).await;
                        self.forget_unconfirmed_dialog(shared);
                        timers.end_after(shared.timers.timer_d(reliable));
                    }
                    self.report(shared, response).await;
                }
                TransactionState::Accepted if status.is_success() => {
                    // 2xx retransmission: the ACK belongs to the dialog
                    if let Some(dialog) = &self.inner.dialog {
                        dialog.resend_last_ack().await;
                    }
                }
                TransactionState::Completed if status.is_final() && !status.is_success() => {
                    self.send_error_ack(shared, &response).await;
                }
                _ => trace!(id = %self.inner.key, status = %status, "Response absorbed"),
            }
        } else {
            match state {
                TransactionState::Trying | TransactionState::Proceeding => {
                    if status.is_provisional() {
                        self.set_state(TransactionState::Proceeding);
                        if timers.retransmit.is_some() {
                            timers.interval = shared.timers.t2;
                        }
                    } else {
                        self.set_state(TransactionState::Completed);
                        timers.retransmit = None;
                        timers.timeout = None;
                        if self.inner.key.method == Method::Bye {
                            if let Some(call_id) = self.inner.request.call_id() {
                                shared.dialogs.remove(call_id);
                            }
                        }
                        timers.end_after(shared.timers.timer_k(reliable));
                    }
                    self.report(shared, response).await;
                }
                _ => trace!(id = %self.inner.key, status = %status, "Response absorbed"),
            }
        }
    }

    async fn report(&self, shared: &Shared, response: Response) {
        shared
            .report(StackEvent::Response {
                response,
                transaction: self.clone(),
            })
            .await;
    }

    async fn send_error_ack(&self, shared: &Shared, response: &Response) {
        let ack = match self.create_error_ack(response) {
            Ok(ack) => ack,
            Err(e) => {
                warn!(id = %self.inner.key, "Can't build ACK: {}", e);
                return;
            }
        };
        if let Err(e) = shared.sender.send_request(&ack).await {
            warn!(id = %self.inner.key, "Can't send ACK: {}", e);
        }
    }

    /// A failed initial INVITE leaves no dialog behind
    fn forget_unconfirmed_dialog(&self, shared: &Shared) {
        let Some(dialog) = &self.inner.dialog else {
            return;
        };
        if dialog.is_confirmed() {
            return;
        }
        if let Some(call_id) = self.inner.request.call_id() {
            shared
                .dialogs
                .remove_if(call_id, |_, existing| existing.ptr_eq(dialog));
        }
    }

    async fn retransmit(&self, shared: &Shared) {
        trace!(id = %self.inner.key, "Retransmitting request");
        if let Err(e) = shared.sender.send_request(&self.inner.request).await {
            warn!(id = %self.inner.key, "Retransmission failed: {}", e);
        }
    }
}

impl fmt::Debug for ClientTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientTransaction")
            .field("key", &self.inner.key)
            .field("state", &self.state())
            .finish()
    }
}

struct ClientTimers {
    /// Timer A or E
    retransmit: Option<Instant>,
    interval: Duration,
    /// Timer B or F
    timeout: Option<Instant>,
    /// Timer D, K or M
    linger: Option<Instant>,
    done: bool,
}

impl ClientTimers {
    fn end_after(&mut self, delay: Duration) {
        if delay.is_zero() {
            self.done = true;
        } else {
            self.linger = Some(deadline_in(delay));
        }
    }
}

async fn run_client(
    tx: ClientTransaction,
    shared: Arc<Shared>,
    mut commands: mpsc::UnboundedReceiver<ClientCommand>,
) {
    let settings = shared.timers;
    let invite = tx.is_invite();
    let unreliable = !tx.inner.transport_type.is_reliable();
    let mut timers = ClientTimers {
        retransmit: unreliable.then(|| deadline_in(settings.t1)),
        interval: settings.t1,
        timeout: Some(deadline_in(if invite {
            settings.timer_b()
        } else {
            settings.timer_f()
        })),
        linger: None,
        done: false,
    };

    while !timers.done {
        tokio::select! {
            command = commands.recv() => match command {
                Some(ClientCommand::Response(response)) => {
                    tx.on_response(&shared, response, &mut timers).await;
                }
                Some(ClientCommand::Terminate) | None => break,
            },
            _ = sleep_until_opt(timers.retransmit) => {
                tx.retransmit(&shared).await;
                timers.interval = settings.next_interval(timers.interval, !invite);
                timers.retransmit = Some(deadline_in(timers.interval));
            }
            _ = sleep_until_opt(timers.timeout) => {
                debug!(id = %tx.inner.key, "Client transaction timed out");
                if invite {
                    tx.forget_unconfirmed_dialog(&shared);
                }
                shared
                    .report(StackEvent::Timeout {
                        transaction: StackTransaction::Client(tx.clone()),
                    })
                    .await;
                break;
            }
            _ = sleep_until_opt(timers.linger) => break,
        }
    }

    tx.set_state(TransactionState::Terminated);
    shared
        .client_transactions
        .remove_if(&tx.inner.key, |_, existing| existing.ptr_eq(&tx));
    debug!(id = %tx.inner.key, "Client transaction terminated");
}
