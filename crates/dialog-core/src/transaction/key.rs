//! Transaction identification (RFC 3261 sections 17.1.3 and 17.2.3)
//!
//! A transaction is identified by the branch of the top Via, the method and
//! the side (client or server). The method of an ACK is mapped to INVITE so
//! that an ACK for a non-2xx final response finds its INVITE server
//! transaction. CANCEL keeps its own method and therefore its own key.

use std::fmt;

use rcs_sip_core::{Method, Request, Response, SipMessageExt};

/// Unique key of a stack transaction
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    /// Branch parameter of the top Via
    pub branch: String,
    pub method: Method,
    pub is_server: bool,
}

impl TransactionKey {
    pub fn new(branch: impl Into<String>, method: Method, is_server: bool) -> Self {
        Self {
            branch: branch.into(),
            method,
            is_server,
        }
    }

    /// Key of the server transaction an incoming request belongs to
    pub fn from_request(request: &Request) -> Option<Self> {
        let branch = request.top_via()?.branch()?.to_string();
        if branch.is_empty() {
            return None;
        }
        let method = match &request.method {
            Method::Ack => Method::Invite,
            other => other.clone(),
        };
        Some(Self::new(branch, method, true))
    }

    /// Key of the client transaction an incoming response belongs to
    pub fn from_response(response: &Response) -> Option<Self> {
        let branch = response.top_via()?.branch()?.to_string();
        if branch.is_empty() {
            return None;
        }
        let method = response.cseq_method()?;
        Some(Self::new(branch, method, false))
    }

    /// Key of the client transaction created for an outgoing request
    pub fn for_outgoing(request: &Request) -> Option<Self> {
        Self::from_request(request).map(|k| Self { is_server: false, ..k })
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn is_server(&self) -> bool {
        self.is_server
    }

    pub fn is_invite(&self) -> bool {
        self.method == Method::Invite
    }
}

impl fmt::Debug for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = if self.is_server { "server" } else { "client" };
        write!(f, "{}:{}:{}", self.branch, self.method, side)
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = if self.is_server { "server" } else { "client" };
        write!(f, "Key({}:{}:{})", self.branch, self.method, side)
    }
}
