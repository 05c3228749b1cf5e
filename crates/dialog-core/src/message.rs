//! SIP messages as seen by the service layer
//!
//! [`SipRequest`] and [`SipResponse`] wrap the wire types from
//! `rcs-sip-core` together with the stack transaction they travel on. All
//! header and body accessors come from [`SipMessageExt`]; the wrappers add
//! the few typed getters services use most.

use bytes::Bytes;
use rcs_sip_core::{Header, HeaderName, Message, Method, Request, Response, SipMessageExt, Uri};

use crate::transaction::StackTransaction;

/// A SIP request with its stack transaction
#[derive(Debug, Clone)]
pub struct SipRequest {
    request: Request,
    transaction: Option<StackTransaction>,
}

impl SipRequest {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            transaction: None,
        }
    }

    pub fn with_transaction(request: Request, transaction: Option<StackTransaction>) -> Self {
        Self {
            request,
            transaction,
        }
    }

    pub fn method(&self) -> &Method {
        &self.request.method
    }

    pub fn request_uri(&self) -> &Uri {
        &self.request.uri
    }

    /// Value of the Reason header (RFC 3326)
    pub fn reason(&self) -> Option<&str> {
        self.request.header(&HeaderName::Reason)
    }

    pub fn stack_message(&self) -> &Request {
        &self.request
    }

    pub fn stack_message_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    pub fn into_stack_message(self) -> Request {
        self.request
    }

    pub fn transaction(&self) -> Option<&StackTransaction> {
        self.transaction.as_ref()
    }

    pub fn set_transaction(&mut self, transaction: StackTransaction) {
        self.transaction = Some(transaction);
    }

    /// Correlation id of the transaction context for this request
    pub fn transaction_id(&self) -> Option<String> {
        transaction_id(&self.request)
    }
}

impl From<Request> for SipRequest {
    fn from(request: Request) -> Self {
        Self::new(request)
    }
}

/// A SIP response with its stack transaction
#[derive(Debug, Clone)]
pub struct SipResponse {
    response: Response,
    transaction: Option<StackTransaction>,
}

impl SipResponse {
    pub fn new(response: Response) -> Self {
        Self {
            response,
            transaction: None,
        }
    }

    pub fn with_transaction(response: Response, transaction: Option<StackTransaction>) -> Self {
        Self {
            response,
            transaction,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.response.status.as_u16()
    }

    pub fn reason_phrase(&self) -> &str {
        self.response.reason_phrase()
    }

    pub fn stack_message(&self) -> &Response {
        &self.response
    }

    pub fn stack_message_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    pub fn into_stack_message(self) -> Response {
        self.response
    }

    pub fn transaction(&self) -> Option<&StackTransaction> {
        self.transaction.as_ref()
    }

    pub fn set_transaction(&mut self, transaction: StackTransaction) {
        self.transaction = Some(transaction);
    }

    pub fn transaction_id(&self) -> Option<String> {
        transaction_id(&self.response)
    }
}

impl From<Response> for SipResponse {
    fn from(response: Response) -> Self {
        Self::new(response)
    }
}

/// Either kind of [`SipRequest`] / [`SipResponse`]
#[derive(Debug, Clone)]
pub enum SipMessage {
    Request(SipRequest),
    Response(SipResponse),
}

impl SipMessage {
    pub fn is_request(&self) -> bool {
        matches!(self, SipMessage::Request(_))
    }

    pub fn as_request(&self) -> Option<&SipRequest> {
        match self {
            SipMessage::Request(r) => Some(r),
            SipMessage::Response(_) => None,
        }
    }

    pub fn as_response(&self) -> Option<&SipResponse> {
        match self {
            SipMessage::Response(r) => Some(r),
            SipMessage::Request(_) => None,
        }
    }

    pub fn transaction(&self) -> Option<&StackTransaction> {
        match self {
            SipMessage::Request(r) => r.transaction(),
            SipMessage::Response(r) => r.transaction(),
        }
    }

    pub fn transaction_id(&self) -> Option<String> {
        transaction_id(self)
    }

    /// Wire form of the message
    pub fn to_message(&self) -> Message {
        match self {
            SipMessage::Request(r) => Message::Request(r.request.clone()),
            SipMessage::Response(r) => Message::Response(r.response.clone()),
        }
    }
}

impl From<SipRequest> for SipMessage {
    fn from(r: SipRequest) -> Self {
        SipMessage::Request(r)
    }
}

impl From<SipResponse> for SipMessage {
    fn from(r: SipResponse) -> Self {
        SipMessage::Response(r)
    }
}

/// Transaction context id of any message: its Call-ID.
///
/// Wrapped and wire messages of the same exchange yield the same id.
pub fn transaction_id<M: SipMessageExt + ?Sized>(message: &M) -> Option<String> {
    message.call_id().map(str::to_string)
}

impl SipMessageExt for SipRequest {
    fn headers(&self) -> &[Header] {
        &self.request.headers
    }
    fn headers_mut(&mut self) -> &mut Vec<Header> {
        &mut self.request.headers
    }
    fn body(&self) -> &Bytes {
        &self.request.body
    }
    fn set_body(&mut self, body: Bytes) {
        self.request.body = body;
    }
}

impl SipMessageExt for SipResponse {
    fn headers(&self) -> &[Header] {
        &self.response.headers
    }
    fn headers_mut(&mut self) -> &mut Vec<Header> {
        &mut self.response.headers
    }
    fn body(&self) -> &Bytes {
        &self.response.body
    }
    fn set_body(&mut self, body: Bytes) {
        self.response.body = body;
    }
}

impl SipMessageExt for SipMessage {
    fn headers(&self) -> &[Header] {
        match self {
            SipMessage::Request(r) => r.headers(),
            SipMessage::Response(r) => r.headers(),
        }
    }
    fn headers_mut(&mut self) -> &mut Vec<Header> {
        match self {
            SipMessage::Request(r) => r.headers_mut(),
            SipMessage::Response(r) => r.headers_mut(),
        }
    }
    fn body(&self) -> &Bytes {
        match self {
            SipMessage::Request(r) => r.body(),
            SipMessage::Response(r) => r.body(),
        }
    }
    fn set_body(&mut self, body: Bytes) {
        match self {
            SipMessage::Request(r) => r.set_body(body),
            SipMessage::Response(r) => r.set_body(body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcs_sip_core::StatusCode;

    fn message(raw: &str) -> Message {
        Message::parse(raw.replace('\n', "\r\n").as_bytes()).unwrap()
    }

    #[test]
    fn test_request_and_response_share_transaction_id() {
        let request = message(
            "INVITE sip:bob@example.com SIP/2.0\n\
             Via: SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bK1\n\
             From: <sip:alice@example.com>;tag=a1\n\
             To: <sip:bob@example.com>\n\
             Call-ID: abc@10.0.0.1\n\
             CSeq: 1 INVITE\n\
             Reason: SIP;cause=480\n\
             Expires: 60\n\
             Content-Length: 0\n\n",
        );
        let response = message(
            "SIP/2.0 180 Ringing\n\
             Via: SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bK1\n\
             From: <sip:alice@example.com>;tag=a1\n\
             To: <sip:bob@example.com>;tag=b1\n\
             Call-ID: abc@10.0.0.1\n\
             CSeq: 1 INVITE\n\
             Content-Length: 0\n\n",
        );
        let request = SipRequest::new(request.as_request().unwrap().clone());
        let response = SipResponse::new(response.as_response().unwrap().clone());

        assert_eq!(request.transaction_id(), response.transaction_id());
        assert_eq!(request.transaction_id(), transaction_id(request.stack_message()));
        assert_eq!(request.method(), &Method::Invite);
        assert_eq!(request.reason(), Some("SIP;cause=480"));
        assert_eq!(request.expires(), Some(60));
        assert_eq!(response.status_code(), 180);
        assert_eq!(response.reason_phrase(), "Ringing");
        assert_eq!(response.to_tag().as_deref(), Some("b1"));
    }

    #[test]
    fn test_wrapper_header_mutation() {
        let mut response = SipResponse::new(Response::new(StatusCode::OK));
        response.add_header("Subject", "hello");
        let message = SipMessage::from(response);
        assert_eq!(message.subject(), Some("hello"));
        assert!(message.transaction().is_none());
        assert!(message.to_message().is_response());
    }
}
