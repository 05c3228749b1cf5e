//! Server transactions (RFC 3261 sections 17.2.1 and 17.2.2)
//!
//! The [`TransactionManager`](super::TransactionManager) starts a server
//! transaction for every new request. Responses go out through
//! [`ServerTransaction::send_response`], which hands them to the
//! transaction task and waits for the transmission result.
//!
//! ```text
//! INVITE:      Proceeding ──2xx──▶ Accepted  ──ACK──▶ Confirmed ──Timer I──▶ Terminated
//!                  └──300-699──▶ Completed ──ACK──┘
//!
//! non-INVITE:  Trying ──1xx──▶ Proceeding ──final──▶ Completed ──Timer J──▶ Terminated
//! ```
//!
//! Final INVITE responses are retransmitted with Timer G over UDP until the
//! ACK arrives. Timer H ends the wait and is reported as a timeout.
//! Request retransmissions are answered with the last response sent.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rcs_sip_core::{Method, Request, Response, SipMessageExt, StatusCode};
use rcs_sip_transport::TransportType;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::errors::{Result, SipError};
use crate::transaction::dialog::StackDialog;
use crate::transaction::key::TransactionKey;
use crate::transaction::manager::Shared;
use crate::transaction::{
    StackEvent, StackTransaction, TransactionState, deadline_in, sleep_until_opt,
};

pub(crate) enum ServerCommand {
    /// A retransmitted request or the ACK
    Request(Request),
    Respond(Response, oneshot::Sender<Result<()>>),
    Terminate,
}

/// Handle on a server transaction
#[derive(Clone)]
pub struct ServerTransaction {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    key: TransactionKey,
    request: Request,
    source: SocketAddr,
    transport_type: TransportType,
    state: Mutex<TransactionState>,
    last_status: Mutex<Option<StatusCode>>,
    dialog: Option<StackDialog>,
    commands: mpsc::UnboundedSender<ServerCommand>,
}

impl ServerTransaction {
    /// Creates the transaction, registers it and spawns its task
    pub(crate) fn start(
        request: Request,
        source: SocketAddr,
        transport_type: TransportType,
        dialog: Option<StackDialog>,
        shared: &Arc<Shared>,
    ) -> Result<Self> {
        let key = TransactionKey::from_request(&request)
            .ok_or_else(|| SipError::payload("Request has no Via branch"))?;
        let initial = if key.is_invite() {
            TransactionState::Proceeding
        } else {
            TransactionState::Trying
        };
        let (commands, receiver) = mpsc::unbounded_channel();
        let tx = Self {
            inner: Arc::new(ServerInner {
                key,
                request,
                source,
                transport_type,
                state: Mutex::new(initial),
                last_status: Mutex::new(None),
                dialog,
                commands,
            }),
        };
        shared
            .server_transactions
            .insert(tx.inner.key.clone(), tx.clone());
        tokio::spawn(run_server(tx.clone(), shared.clone(), receiver));
        debug!(id = %tx.inner.key, source = %source, "Server transaction started");
        Ok(tx)
    }

    pub fn key(&self) -> &TransactionKey {
        &self.inner.key
    }

    pub fn request(&self) -> &Request {
        &self.inner.request
    }

    /// Address the request came from; responses go back there
    pub fn source(&self) -> SocketAddr {
        self.inner.source
    }

    pub fn transport_type(&self) -> TransportType {
        self.inner.transport_type
    }

    pub fn state(&self) -> TransactionState {
        *self.inner.state.lock()
    }

    pub fn is_invite(&self) -> bool {
        self.inner.key.is_invite()
    }

    /// Dialog created alongside an INVITE transaction
    pub fn dialog(&self) -> Option<StackDialog> {
        self.inner.dialog.clone()
    }

    /// Status of the last response sent, if any
    pub fn last_response_status(&self) -> Option<StatusCode> {
        *self.inner.last_status.lock()
    }

    pub fn ptr_eq(&self, other: &ServerTransaction) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Sends a response on this transaction
    pub async fn send_response(&self, response: Response) -> Result<()> {
        let (reply, result) = oneshot::channel();
        self.inner
            .commands
            .send(ServerCommand::Respond(response, reply))
            .map_err(|_| {
                SipError::network(format!("Transaction {} is terminated", self.inner.key))
            })?;
        result.await.map_err(|_| {
            SipError::network(format!(
                "Transaction {} ended before the response was sent",
                self.inner.key
            ))
        })?
    }

    pub(crate) fn deliver(&self, request: Request) {
        if self
            .inner
            .commands
            .send(ServerCommand::Request(request))
            .is_err()
        {
            trace!(id = %self.inner.key, "Request for a finished transaction dropped");
        }
    }

    pub(crate) fn terminate(&self) {
        let _ = self.inner.commands.send(ServerCommand::Terminate);
    }

    fn set_state(&self, state: TransactionState) {
        let previous = std::mem::replace(&mut *self.inner.state.lock(), state);
        if previous != state {
            trace!(id = %self.inner.key, "State changed from {} to {}", previous, state);
        }
    }

    async fn on_send_response(
        &self,
        shared: &Shared,
        response: Response,
        timers: &mut ServerTimers,
    ) -> Result<()> {
        let state = self.state();
        if !matches!(
            state,
            TransactionState::Trying | TransactionState::Proceeding
        ) {
            return Err(SipError::network(format!(
                "Transaction {} already answered ({})",
                self.inner.key, state
            )));
        }

        shared
            .sender
            .send_response(&response, self.inner.source, self.inner.transport_type)
            .await?;

        let status = response.status;
        *self.inner.last_status.lock() = Some(status);
        if let Some(dialog) = &self.inner.dialog {
            dialog.on_local_response(&response);
        }

        let reliable = self.inner.transport_type.is_reliable();
        if status.is_provisional() {
            self.set_state(TransactionState::Proceeding);
        } else if self.is_invite() {
            self.set_state(if status.is_success() {
                TransactionState::Accepted
            } else {
                TransactionState::Completed
            });
            if !reliable {
                timers.interval = shared.timers.timer_g();
                timers.retransmit = Some(deadline_in(timers.interval));
            }
            timers.timeout = Some(deadline_in(shared.timers.timer_h()));
        } else {
            self.set_state(TransactionState::Completed);
            if self.inner.key.method == Method::Bye {
                if let Some(call_id) = self.inner.request.call_id() {
                    shared.dialogs.remove(call_id);
                }
            }
            timers.end_after(shared.timers.timer_j(reliable));
        }
        timers.last_response = Some(response);
        Ok(())
    }

    async fn on_request(&self, shared: &Shared, request: Request, timers: &mut ServerTimers) {
        if request.method == Method::Ack {
            if matches!(
                self.state(),
                TransactionState::Completed | TransactionState::Accepted
            ) {
                self.set_state(TransactionState::Confirmed);
                timers.retransmit = None;
                timers.timeout = None;
                let reliable = self.inner.transport_type.is_reliable();
                timers.end_after(shared.timers.timer_i(reliable));
            }
            return;
        }
        // Retransmitted request: repeat the last response
        if let Some(response) = &timers.last_response {
            self.resend(shared, response).await;
        }
    }

    async fn resend(&self, shared: &Shared, response: &Response) {
        trace!(id = %self.inner.key, "Retransmitting response");
        if let Err(e) = shared
            .sender
            .send_response(response, self.inner.source, self.inner.transport_type)
            .await
        {
            warn!(id = %self.inner.key, "Response retransmission failed: {}", e);
        }
    }
}

impl fmt::Debug for ServerTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerTransaction")
            .field("key", &self.inner.key)
            .field("source", &self.inner.source)
            .field("state", &self.state())
            .finish()
    }
}

struct ServerTimers {
    last_response: Option<Response>,
    /// Timer G
    retransmit: Option<Instant>,
    interval: Duration,
    /// Timer H
    timeout: Option<Instant>,
    /// Timer I or J
    linger: Option<Instant>,
    done: bool,
}

impl ServerTimers {
    fn end_after(&mut self, delay: Duration) {
        if delay.is_zero() {
            self.done = true;
        } else {
            self.linger = Some(deadline_in(delay));
        }
    }
}

async fn run_server(
    tx: ServerTransaction,
    shared: Arc<Shared>,
    mut commands: mpsc::UnboundedReceiver<ServerCommand>,
) {
    let mut timers = ServerTimers {
        last_response: None,
        retransmit: None,
        interval: shared.timers.t1,
        timeout: None,
        linger: None,
        done: false,
    };

    while !timers.done {
        tokio::select! {
            command = commands.recv() => match command {
                Some(ServerCommand::Respond(response, reply)) => {
                    let result = tx.on_send_response(&shared, response, &mut timers).await;
                    let _ = reply.send(result);
                }
                Some(ServerCommand::Request(request)) => {
                    tx.on_request(&shared, request, &mut timers).await;
                }
                Some(ServerCommand::Terminate) | None => break,
            },
            _ = sleep_until_opt(timers.retransmit) => {
                if let Some(response) = &timers.last_response {
                    tx.resend(&shared, response).await;
                }
                timers.interval = shared.timers.next_interval(timers.interval, true);
                timers.retransmit = Some(deadline_in(timers.interval));
            }
            _ = sleep_until_opt(timers.timeout) => {
                debug!(id = %tx.inner.key, "No ACK received (Timer H)");
                shared
                    .report(StackEvent::Timeout {
                        transaction: StackTransaction::Server(tx.clone()),
                    })
                    .await;
                break;
            }
            _ = sleep_until_opt(timers.linger) => break,
        }
    }

    tx.set_state(TransactionState::Terminated);
    shared
        .server_transactions
        .remove_if(&tx.inner.key, |_, existing| existing.ptr_eq(&tx));
    debug!(id = %tx.inner.key, "Server transaction terminated");
}
