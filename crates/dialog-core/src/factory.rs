//! Message construction for the requests the engine sends on its own
//!
//! [`MessageFactory`] is the seam the [`SipInterface`](crate::SipInterface)
//! goes through to build ACK, BYE, CANCEL and UPDATE for a dialog, and
//! responses to incoming requests. [`DefaultMessageFactory`] builds them
//! from the dialog path and the stack dialog.

use rcs_sip_core::{
    CSeq, HeaderName, Method, NameAddr, Refresher, Request, Response, SessionExpires,
    SipMessageExt, StatusCode, Uri,
};

use crate::dialog_path::SipDialogPath;
use crate::errors::{Result, SipError};
use crate::message::{SipRequest, SipResponse};

/// User-Agent header value of this stack
pub const USER_AGENT: &str = concat!("rcs-sip/", env!("CARGO_PKG_VERSION"));

/// Methods advertised in the Allow header
pub const ALLOWED_METHODS: &str = "INVITE, UPDATE, ACK, CANCEL, BYE, NOTIFY, OPTIONS, MESSAGE, REFER";

/// Adds credentials to requests sent within a session
pub trait AuthenticationAgent: Send + Sync {
    /// Sets the Proxy-Authorization header of `request`
    fn set_proxy_authorization_header(&self, request: &mut SipRequest) -> Result<()>;
}

/// Builds the messages the interface sends for a dialog
pub trait MessageFactory: Send + Sync {
    fn create_ack(&self, dialog: &SipDialogPath) -> Result<SipRequest>;
    fn create_bye(&self, dialog: &SipDialogPath) -> Result<SipRequest>;
    fn create_cancel(&self, dialog: &SipDialogPath) -> Result<SipRequest>;
    fn create_update(&self, dialog: &SipDialogPath) -> Result<SipRequest>;

    /// Response to `request` on the request's transaction, with `local_tag`
    /// set on the To header when given
    fn create_response(
        &self,
        request: &SipRequest,
        local_tag: Option<&str>,
        code: u16,
    ) -> Result<SipResponse>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultMessageFactory;

impl DefaultMessageFactory {
    pub fn new() -> Self {
        Self
    }
}

fn party(value: &str, tag: Option<&str>) -> Result<NameAddr> {
    let mut addr: NameAddr = value
        .parse()
        .map_err(|e| SipError::payload_with(format!("Invalid party '{}'", value), e))?;
    if let Some(tag) = tag {
        addr.set_tag(tag);
    }
    Ok(addr)
}

/// `Reason: SIP;cause=<code>;text="<phrase>"` when the path has a
/// termination reason
fn add_termination_reason(request: &mut Request, dialog: &SipDialogPath) -> Result<()> {
    let code = dialog.session_termination_reason_code();
    if code == -1 {
        return Ok(());
    }
    let phrase = dialog.session_termination_reason_phrase().unwrap_or_default();
    request.set_header(
        HeaderName::Reason,
        format!("SIP;cause={};text=\"{}\"", code, phrase.replace('"', "'")),
    )?;
    Ok(())
}

/// Makes sure the top Via asks for `rport` (RFC 3581)
fn ensure_rport(request: &mut Request) -> Result<()> {
    if let Some(mut via) = request.top_via() {
        if !via.params.contains("rport") {
            via.set_rport();
            request.set_top_via(&via)?;
        }
    }
    Ok(())
}

fn stack_dialog_request(dialog: &SipDialogPath, method: Method) -> Result<Request> {
    let stack_dialog = dialog.stack_dialog().ok_or_else(|| {
        SipError::payload(format!("No stack dialog for call {}", dialog.call_id()))
    })?;
    let mut request = stack_dialog.create_request(method)?;
    ensure_rport(&mut request)?;
    request.set_header(HeaderName::UserAgent, USER_AGENT)?;
    Ok(request)
}

impl MessageFactory for DefaultMessageFactory {
    fn create_ack(&self, dialog: &SipDialogPath) -> Result<SipRequest> {
        let stack = dialog.sip_stack();
        let uri: Uri = dialog
            .target()
            .parse()
            .map_err(|e| SipError::payload_with("Can't create SIP message!", e))?;
        let from = party(dialog.local_party(), Some(dialog.local_tag()))?;
        let to = party(dialog.remote_party(), dialog.remote_tag().as_deref())?;
        let via = stack
            .via_headers()
            .into_iter()
            .next()
            .ok_or_else(|| SipError::payload("No Via header available"))?;

        let mut ack = Request::new(Method::Ack, uri);
        ack.push_header(HeaderName::Via, via.to_string())?;
        ack.push_header(HeaderName::MaxForwards, "70")?;
        ack.push_header(HeaderName::From, from.to_string())?;
        ack.push_header(HeaderName::To, to.to_string())?;
        ack.push_header(HeaderName::CallId, dialog.call_id())?;
        ack.push_header(
            HeaderName::CSeq,
            CSeq::new(dialog.cseq(), Method::Ack).to_string(),
        )?;
        for route in dialog.route() {
            ack.push_header(HeaderName::Route, route)?;
        }
        ack.push_header(HeaderName::Contact, stack.contact()?.to_string())?;
        ack.push_header(HeaderName::UserAgent, USER_AGENT)?;
        ack.push_header(HeaderName::Allow, ALLOWED_METHODS)?;
        ensure_rport(&mut ack)?;
        Ok(SipRequest::new(ack))
    }

    fn create_bye(&self, dialog: &SipDialogPath) -> Result<SipRequest> {
        let mut bye = stack_dialog_request(dialog, Method::Bye)?;
        add_termination_reason(&mut bye, dialog)?;
        Ok(SipRequest::new(bye))
    }

    fn create_cancel(&self, dialog: &SipDialogPath) -> Result<SipRequest> {
        let transaction = dialog
            .invite()
            .and_then(|invite| invite.transaction().and_then(|tx| tx.as_client().cloned()))
            .ok_or_else(|| SipError::payload("No INVITE client transaction to cancel"))?;
        let mut cancel = transaction.create_cancel()?;
        add_termination_reason(&mut cancel, dialog)?;
        ensure_rport(&mut cancel)?;
        Ok(SipRequest::new(cancel))
    }

    fn create_update(&self, dialog: &SipDialogPath) -> Result<SipRequest> {
        let mut update = stack_dialog_request(dialog, Method::Update)?;
        update.set_header(HeaderName::Supported, "timer")?;
        let expires = SessionExpires::new(dialog.session_expire_time(), Some(Refresher::Uac));
        update.set_header(HeaderName::SessionExpires, expires.to_string())?;
        Ok(SipRequest::new(update))
    }

    fn create_response(
        &self,
        request: &SipRequest,
        local_tag: Option<&str>,
        code: u16,
    ) -> Result<SipResponse> {
        let status = StatusCode::from_u16(code)?;
        let original = request.stack_message();
        let mut response = Response::new(status);

        for via in original.header_values(&HeaderName::Via) {
            response.push_header(HeaderName::Via, via)?;
        }
        let from = original
            .header(&HeaderName::From)
            .ok_or_else(|| SipError::payload("Request has no From header"))?;
        response.push_header(HeaderName::From, from)?;

        let mut to = original
            .to_header()
            .ok_or_else(|| SipError::payload("Request has no valid To header"))?;
        if let Some(tag) = local_tag {
            to.set_tag(tag);
        }
        response.push_header(HeaderName::To, to.to_string())?;

        let call_id = original
            .call_id()
            .ok_or_else(|| SipError::payload("Request has no Call-ID header"))?;
        response.push_header(HeaderName::CallId, call_id)?;
        let cseq = original
            .header(&HeaderName::CSeq)
            .ok_or_else(|| SipError::payload("Request has no CSeq header"))?;
        response.push_header(HeaderName::CSeq, cseq)?;

        if original.method.creates_dialog() && (101..300).contains(&code) {
            for record_route in original.header_values(&HeaderName::RecordRoute) {
                response.push_header(HeaderName::RecordRoute, record_route)?;
            }
        }

        Ok(SipResponse::with_transaction(
            response,
            request.transaction().cloned(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invite() -> SipRequest {
        let raw = "INVITE sip:bob@example.com SIP/2.0\r\n\
                   Via: SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bK1;rport\r\n\
                   Record-Route: <sip:pcscf.example.com;lr>\r\n\
                   From: <sip:alice@example.com>;tag=a1\r\n\
                   To: <sip:bob@example.com>\r\n\
                   Call-ID: abc@10.0.0.1\r\n\
                   CSeq: 7 INVITE\r\n\
                   Content-Length: 0\r\n\r\n";
        let message = rcs_sip_core::Message::parse(raw.as_bytes()).unwrap();
        SipRequest::new(message.as_request().unwrap().clone())
    }

    #[test]
    fn test_create_response_copies_dialog_headers() {
        let response = DefaultMessageFactory
            .create_response(&invite(), Some("b1"), 180)
            .unwrap();
        assert_eq!(response.status_code(), 180);
        assert_eq!(response.to_tag().as_deref(), Some("b1"));
        assert_eq!(response.from_tag().as_deref(), Some("a1"));
        assert_eq!(response.call_id(), Some("abc@10.0.0.1"));
        assert_eq!(response.cseq_number(), Some(7));
        assert_eq!(response.record_routes().len(), 1);
        assert_eq!(
            response.top_via().unwrap().branch(),
            Some("z9hG4bK1")
        );
    }

    #[test]
    fn test_final_error_response_has_no_record_route() {
        let response = DefaultMessageFactory
            .create_response(&invite(), None, 486)
            .unwrap();
        assert!(response.record_routes().is_empty());
        assert_eq!(response.to_tag(), None);
        assert!(DefaultMessageFactory.create_response(&invite(), None, 42).is_err());
    }
}
