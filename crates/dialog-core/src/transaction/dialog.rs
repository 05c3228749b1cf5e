//! Stack dialogs (RFC 3261 section 12)
//!
//! A [`StackDialog`] is created with the first INVITE transaction of a call,
//! on either side, and is shared by all transactions of that Call-ID. It
//! learns the peer's tag, target and route set from the messages exchanged
//! and builds the in-dialog requests (BYE, UPDATE, re-INVITE ...).
//!
//! Only client-side dialogs record the CSeq of requests they send. The owner
//! of a server-side dialog keeps the local sequence number aligned through
//! [`StackDialog::increment_local_sequence_number`].

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rcs_sip_core::{CSeq, HeaderName, Method, NameAddr, Request, Response, SipMessageExt, Uri};
use tracing::{debug, warn};

use crate::errors::{Result, SipError};
use crate::transaction::StackSender;
use crate::transaction::client::ClientTransaction;

/// Handle on a dialog kept by the stack
#[derive(Clone)]
pub struct StackDialog {
    inner: Arc<DialogInner>,
}

struct DialogInner {
    state: Mutex<DialogState>,
    sender: StackSender,
}

#[derive(Debug, Clone)]
struct DialogState {
    call_id: String,
    /// Local party without tag
    local_party: NameAddr,
    remote_party: NameAddr,
    local_tag: Option<String>,
    remote_tag: Option<String>,
    remote_target: Option<Uri>,
    route_set: Vec<NameAddr>,
    local_seq: u64,
    remote_seq: Option<u64>,
    local_contact: Option<String>,
    is_server: bool,
    confirmed: bool,
    last_ack: Option<Request>,
}

fn without_tag(mut addr: NameAddr) -> (NameAddr, Option<String>) {
    let tag = addr.params.remove("tag").and_then(|p| p.value().map(str::to_string));
    (addr, tag)
}

fn required<T>(value: Option<T>, header: &str) -> Result<T> {
    value.ok_or_else(|| SipError::payload(format!("Missing or invalid {} header", header)))
}

impl StackDialog {
    /// Dialog for an INVITE this side sends
    pub(crate) fn for_outgoing(request: &Request, sender: StackSender) -> Result<Self> {
        let (local_party, local_tag) = without_tag(required(request.from_header(), "From")?);
        let (remote_party, _) = without_tag(required(request.to_header(), "To")?);
        let state = DialogState {
            call_id: required(request.call_id(), "Call-ID")?.to_string(),
            local_party,
            remote_party,
            local_tag,
            remote_tag: None,
            remote_target: None,
            route_set: request.routes(),
            local_seq: required(request.cseq_number(), "CSeq")?,
            remote_seq: None,
            local_contact: request.header(&HeaderName::Contact).map(str::to_string),
            is_server: false,
            confirmed: false,
            last_ack: None,
        };
        Ok(Self::with_state(state, sender))
    }

    /// Dialog for an INVITE this side receives
    pub(crate) fn for_incoming(request: &Request, sender: StackSender) -> Result<Self> {
        let (remote_party, remote_tag) = without_tag(required(request.from_header(), "From")?);
        let (local_party, local_tag) = without_tag(required(request.to_header(), "To")?);
        let state = DialogState {
            call_id: required(request.call_id(), "Call-ID")?.to_string(),
            local_party,
            remote_party,
            local_tag,
            remote_tag,
            remote_target: request.contact().map(|c| c.uri),
            route_set: request.record_routes(),
            local_seq: 0,
            remote_seq: request.cseq_number(),
            local_contact: None,
            is_server: true,
            confirmed: false,
            last_ack: None,
        };
        Ok(Self::with_state(state, sender))
    }

    fn with_state(state: DialogState, sender: StackSender) -> Self {
        Self {
            inner: Arc::new(DialogInner {
                state: Mutex::new(state),
                sender,
            }),
        }
    }

    pub fn call_id(&self) -> String {
        self.inner.state.lock().call_id.clone()
    }

    pub fn local_tag(&self) -> Option<String> {
        self.inner.state.lock().local_tag.clone()
    }

    pub fn remote_tag(&self) -> Option<String> {
        self.inner.state.lock().remote_tag.clone()
    }

    pub fn remote_target(&self) -> Option<Uri> {
        self.inner.state.lock().remote_target.clone()
    }

    pub fn route_set(&self) -> Vec<NameAddr> {
        self.inner.state.lock().route_set.clone()
    }

    pub fn local_sequence_number(&self) -> u64 {
        self.inner.state.lock().local_seq
    }

    pub fn remote_sequence_number(&self) -> Option<u64> {
        self.inner.state.lock().remote_seq
    }

    /// True when this side answered the dialog-forming INVITE
    pub fn is_server(&self) -> bool {
        self.inner.state.lock().is_server
    }

    /// True once a 2xx to the INVITE was sent or received
    pub fn is_confirmed(&self) -> bool {
        self.inner.state.lock().confirmed
    }

    /// The last ACK sent for a 2xx
    pub fn last_ack(&self) -> Option<Request> {
        self.inner.state.lock().last_ack.clone()
    }

    pub fn increment_local_sequence_number(&self) {
        let mut state = self.inner.state.lock();
        state.local_seq += 1;
        debug!(call_id = %state.call_id, seq = state.local_seq, "Local sequence number incremented");
    }

    pub fn ptr_eq(&self, other: &StackDialog) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Learns the peer's side of the dialog from a response to our INVITE
    pub(crate) fn on_response(&self, response: &Response) {
        if response.cseq_method() != Some(Method::Invite) {
            return;
        }
        let Some(remote_tag) = response.to_tag() else {
            return;
        };
        let status = response.status;
        if status.as_u16() == 100 || !(status.is_provisional() || status.is_success()) {
            return;
        }
        let mut state = self.inner.state.lock();
        if state.confirmed {
            // re-INVITE answer: only the target may change
            if let Some(contact) = response.contact() {
                state.remote_target = Some(contact.uri);
            }
            return;
        }
        state.remote_tag = Some(remote_tag);
        if let Some(contact) = response.contact() {
            state.remote_target = Some(contact.uri);
        }
        let mut record_routes = response.record_routes();
        if !record_routes.is_empty() || status.is_success() {
            record_routes.reverse();
            state.route_set = record_routes;
        }
        if status.is_success() {
            state.confirmed = true;
        }
    }

    /// Learns the local tag and contact from a response this side sends
    pub(crate) fn on_local_response(&self, response: &Response) {
        if response.cseq_method() != Some(Method::Invite) {
            return;
        }
        let mut state = self.inner.state.lock();
        if state.local_tag.is_none() {
            state.local_tag = response.to_tag();
        }
        if let Some(contact) = response.header(&HeaderName::Contact) {
            state.local_contact = Some(contact.to_string());
        }
        if response.status.is_success() {
            state.confirmed = true;
        }
    }

    /// Builds an in-dialog request with CSeq = local sequence number + 1
    pub fn create_request(&self, method: Method) -> Result<Request> {
        if matches!(method, Method::Ack | Method::Cancel) {
            return Err(SipError::payload(format!(
                "{} can't be created from a dialog",
                method
            )));
        }
        let state = self.inner.state.lock().clone();
        let uri = state
            .remote_target
            .clone()
            .unwrap_or_else(|| state.remote_party.uri.clone());
        let via = self.inner.sender.new_via(self.inner.sender.default_transport());

        let mut from = state.local_party.clone();
        if let Some(tag) = &state.local_tag {
            from.set_tag(tag.clone());
        }
        let mut to = state.remote_party.clone();
        if let Some(tag) = &state.remote_tag {
            to.set_tag(tag.clone());
        }

        let mut request = Request::new(method.clone(), uri);
        request.push_header(HeaderName::Via, via.to_string())?;
        request.push_header(HeaderName::MaxForwards, "70")?;
        request.push_header(HeaderName::From, from.to_string())?;
        request.push_header(HeaderName::To, to.to_string())?;
        request.push_header(HeaderName::CallId, state.call_id.clone())?;
        request.push_header(
            HeaderName::CSeq,
            CSeq::new(state.local_seq + 1, method).to_string(),
        )?;
        for route in &state.route_set {
            request.push_header(HeaderName::Route, route.to_string())?;
        }
        if let Some(contact) = &state.local_contact {
            request.push_header(HeaderName::Contact, contact.clone())?;
        }
        Ok(request)
    }

    /// Starts an in-dialog client transaction
    pub async fn send_request(&self, transaction: &ClientTransaction) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if !state.is_server {
                if let Some(seq) = transaction.request().cseq_number() {
                    state.local_seq = state.local_seq.max(seq);
                }
            }
        }
        transaction.send_request().await
    }

    /// Sends the ACK for a 2xx outside of any transaction
    pub async fn send_ack(&self, ack: &Request) -> Result<()> {
        self.inner.sender.send_request(ack).await?;
        self.inner.state.lock().last_ack = Some(ack.clone());
        Ok(())
    }

    pub(crate) async fn resend_last_ack(&self) {
        let Some(ack) = self.last_ack() else {
            return;
        };
        if let Err(e) = self.inner.sender.send_request(&ack).await {
            warn!(call_id = %self.call_id(), "Can't resend ACK: {}", e);
        }
    }
}

impl fmt::Debug for StackDialog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("StackDialog")
            .field("call_id", &state.call_id)
            .field("local_tag", &state.local_tag)
            .field("remote_tag", &state.remote_tag)
            .field("local_seq", &state.local_seq)
            .field("is_server", &state.is_server)
            .field("confirmed", &state.confirmed)
            .finish()
    }
}
