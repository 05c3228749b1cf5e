//! Request/response correlation
//!
//! A [`SipTransactionContext`] is registered for every request the engine
//! waits on (and for responses that expect an ACK). The stack reactor
//! resolves it with the final response, the ACK, or nothing on timeout; the
//! sending task waits on it with [`SipTransactionContext::wait_response`].
//!
//! Contexts live in a [`TransactionTable`] keyed by the Call-ID of the
//! message. This assumes one outstanding non-ACK transaction per dialog,
//! which is how the service layer drives the stack.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rcs_sip_core::Method;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::listener::ProvisionalResponseHandler;
use crate::message::{SipMessage, SipRequest, SipResponse};
use crate::transaction::StackTransaction;

#[derive(Debug, Clone)]
enum Outcome {
    Pending,
    /// `None` when the transaction timed out or the wait was aborted
    Resolved(Option<SipMessage>),
}

/// Rendezvous between a sender and the stack reactor for one transaction
pub struct SipTransactionContext {
    id: String,
    transaction: Option<StackTransaction>,
    outcome: watch::Sender<Outcome>,
    callback: Option<Arc<dyn ProvisionalResponseHandler>>,
}

impl SipTransactionContext {
    pub fn new(id: impl Into<String>, transaction: Option<StackTransaction>) -> Self {
        let (outcome, _) = watch::channel(Outcome::Pending);
        Self {
            id: id.into(),
            transaction,
            outcome,
            callback: None,
        }
    }

    /// Context that also forwards 180 Ringing to `callback`
    pub fn with_callback(
        id: impl Into<String>,
        transaction: Option<StackTransaction>,
        callback: Arc<dyn ProvisionalResponseHandler>,
    ) -> Self {
        Self {
            callback: Some(callback),
            ..Self::new(id, transaction)
        }
    }

    pub fn transaction_id(&self) -> &str {
        &self.id
    }

    pub fn transaction(&self) -> Option<&StackTransaction> {
        self.transaction.as_ref()
    }

    pub(crate) fn provisional_handler(&self) -> Option<Arc<dyn ProvisionalResponseHandler>> {
        self.callback.clone()
    }

    /// Waits until the context is resolved or `timeout` elapses.
    ///
    /// Check [`is_timeout`](Self::is_timeout) afterwards: a context that got
    /// nothing is a timeout, never a success.
    pub async fn wait_response(&self, timeout: Duration) {
        let mut outcome = self.outcome.subscribe();
        let resolved = tokio::time::timeout(
            timeout,
            outcome.wait_for(|o| matches!(o, Outcome::Resolved(_))),
        )
        .await;
        if resolved.is_err() {
            debug!(id = %self.id, "No response within {:?}", timeout);
        }
    }

    /// Delivers the response (or ACK) and wakes the waiter
    pub fn response_received(&self, message: SipMessage) {
        self.outcome.send_replace(Outcome::Resolved(Some(message)));
    }

    /// Aborts the wait without a message
    pub fn reset_context(&self) {
        self.outcome.send_replace(Outcome::Resolved(None));
    }

    /// True unless both this context and `transaction` are bound to
    /// transactions and those differ
    pub(crate) fn belongs_to(&self, transaction: Option<&StackTransaction>) -> bool {
        match (&self.transaction, transaction) {
            (Some(own), Some(other)) => own.key() == other.key(),
            _ => true,
        }
    }

    pub(crate) fn resolve(&self, message: Option<SipMessage>) {
        match message {
            Some(message) => self.response_received(message),
            None => self.reset_context(),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.outcome.borrow(), Outcome::Pending)
    }

    /// The received message, if any
    pub fn message(&self) -> Option<SipMessage> {
        match &*self.outcome.borrow() {
            Outcome::Resolved(message) => message.clone(),
            Outcome::Pending => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.message().is_none()
    }

    pub fn sip_response(&self) -> Option<SipResponse> {
        self.message().and_then(|m| m.as_response().cloned())
    }

    /// The received request; the ACK for a response context
    pub fn sip_request(&self) -> Option<SipRequest> {
        self.message().and_then(|m| m.as_request().cloned())
    }

    pub fn is_sip_response(&self) -> bool {
        self.sip_response().is_some()
    }

    pub fn status_code(&self) -> Option<u16> {
        self.sip_response().map(|r| r.status_code())
    }

    pub fn reason_phrase(&self) -> Option<String> {
        self.sip_response().map(|r| r.reason_phrase().to_string())
    }

    /// True for a 1xx response
    pub fn is_sip_intermediate_response(&self) -> bool {
        self.status_code().map(|c| c < 200).unwrap_or(false)
    }

    /// True for a 2xx response
    pub fn is_sip_successful_response(&self) -> bool {
        self.status_code()
            .map(|c| (200..300).contains(&c))
            .unwrap_or(false)
    }

    pub fn is_sip_ack(&self) -> bool {
        self.sip_request()
            .map(|r| r.method() == &Method::Ack)
            .unwrap_or(false)
    }
}

impl fmt::Debug for SipTransactionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SipTransactionContext")
            .field("id", &self.id)
            .field("pending", &self.is_pending())
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// Live transaction contexts by id
#[derive(Debug, Default)]
pub struct TransactionTable {
    contexts: DashMap<String, Arc<SipTransactionContext>>,
}

impl TransactionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a context. A context already registered under the same id
    /// is displaced and released without a message.
    pub fn insert(&self, context: Arc<SipTransactionContext>) {
        let id = context.transaction_id().to_string();
        if let Some(previous) = self.contexts.insert(id.clone(), context.clone()) {
            if !Arc::ptr_eq(&previous, &context) {
                warn!(id = %id, "Transaction context replaced while still pending");
                previous.reset_context();
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<SipTransactionContext>> {
        self.contexts.get(id).map(|c| c.clone())
    }

    pub fn remove(&self, id: &str) -> Option<Arc<SipTransactionContext>> {
        self.contexts.remove(id).map(|(_, c)| c)
    }

    /// Removes the context and hands it `message`; `None` signals a timeout.
    ///
    /// Returns false when no context was registered under `id`.
    pub fn resolve(&self, id: &str, message: Option<SipMessage>) -> bool {
        match self.remove(id) {
            Some(context) => {
                context.resolve(message);
                true
            }
            None => false,
        }
    }

    /// Like [`resolve`](Self::resolve), but leaves in place a context that
    /// waits on another transaction of the same call
    pub fn resolve_transaction(
        &self,
        id: &str,
        transaction: Option<&StackTransaction>,
        message: Option<SipMessage>,
    ) -> bool {
        match self
            .contexts
            .remove_if(id, |_, context| context.belongs_to(transaction))
        {
            Some((_, context)) => {
                context.resolve(message);
                true
            }
            None => {
                if self.contexts.contains_key(id) {
                    debug!(id = %id, "Context waits on another transaction, message by-passed");
                }
                false
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.contexts.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Releases every waiter without a message
    pub fn clear(&self) {
        let ids: Vec<String> = self.contexts.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.resolve(&id, None);
        }
    }
}
