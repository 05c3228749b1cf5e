//! Loopback fixtures shared by the integration tests
//!
//! [`FakeProxy`] is a plain UDP socket standing in for the P-CSCF: it sees
//! every request the stack sends and answers with hand-written responses.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use rcs_dialog_core::{SipDialogPath, SipInterface, SipRequest, SipStackConfig};
use rcs_infra_common::logging::{setup_logging, LoggingConfig};
use rcs_infra_common::{MemoryRegistry, Registry};
use rcs_sip_core::{HeaderName, Message, Method, Request, SipMessageExt, Uri};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::Level;

pub const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Installs the crate logging once; later calls find a subscriber and are ignored
pub fn init_logging() {
    let _ = setup_logging(LoggingConfig::new(Level::DEBUG, "rcs-dialog-core-tests"));
}

pub struct FakeProxy {
    socket: UdpSocket,
}

impl FakeProxy {
    pub async fn bind() -> Self {
        let socket = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
        Self { socket }
    }

    pub fn port(&self) -> u16 {
        self.socket.local_addr().unwrap().port()
    }

    /// Next datagram, CRLF keep-alives included
    pub async fn recv_raw(&self) -> (Vec<u8>, SocketAddr) {
        let mut buf = vec![0u8; 65535];
        let (len, source) = timeout(Duration::from_secs(5), self.socket.recv_from(&mut buf))
            .await
            .expect("timed out waiting for a datagram")
            .unwrap();
        buf.truncate(len);
        (buf, source)
    }

    /// Next datagram if one arrives within `wait`
    pub async fn recv_raw_within(&self, wait: Duration) -> Option<Vec<u8>> {
        let mut buf = vec![0u8; 65535];
        match timeout(wait, self.socket.recv_from(&mut buf)).await {
            Ok(Ok((len, _))) => {
                buf.truncate(len);
                Some(buf)
            }
            _ => None,
        }
    }

    /// Next SIP request, skipping keep-alives and responses
    pub async fn recv_request(&self) -> (Request, SocketAddr) {
        loop {
            let (data, source) = self.recv_raw().await;
            if data.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            if let Ok(Message::Request(request)) = Message::parse(&data) {
                return (request, source);
            }
        }
    }

    /// Next SIP request with the given method
    pub async fn recv_method(&self, method: Method) -> (Request, SocketAddr) {
        loop {
            let (request, source) = self.recv_request().await;
            if request.method == method {
                return (request, source);
            }
        }
    }

    /// Next SIP response, skipping everything else
    pub async fn recv_response(&self) -> rcs_sip_core::Response {
        loop {
            let (data, _) = self.recv_raw().await;
            if let Ok(Message::Response(response)) = Message::parse(&data) {
                return response;
            }
        }
    }

    /// True if nothing but keep-alives arrives within `wait`
    pub async fn is_silent(&self, wait: Duration) -> bool {
        let mut buf = vec![0u8; 65535];
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            match tokio::time::timeout_at(deadline, self.socket.recv_from(&mut buf)).await {
                Err(_) => return true,
                Ok(Ok((len, _))) if buf[..len].iter().all(|b| b.is_ascii_whitespace()) => {}
                Ok(_) => return false,
            }
        }
    }

    pub async fn send_raw(&self, text: &str, destination: SocketAddr) {
        self.socket
            .send_to(text.as_bytes(), destination)
            .await
            .unwrap();
    }

    /// Answers `request` with `code`, copying its dialog headers.
    ///
    /// `via_params` is appended to the top Via, `extra` holds full header
    /// lines.
    pub async fn reply(
        &self,
        request: &Request,
        destination: SocketAddr,
        code: u16,
        to_tag: Option<&str>,
        via_params: &str,
        extra: &str,
    ) {
        let mut text = format!("SIP/2.0 {} {}\r\n", code, reason(code));
        for (i, via) in request.header_values(&HeaderName::Via).iter().enumerate() {
            if i == 0 {
                text.push_str(&format!("Via: {}{}\r\n", via, via_params));
            } else {
                text.push_str(&format!("Via: {}\r\n", via));
            }
        }
        text.push_str(&format!(
            "From: {}\r\n",
            request.header(&HeaderName::From).unwrap()
        ));
        match to_tag {
            Some(tag) => text.push_str(&format!(
                "To: {};tag={}\r\n",
                request.header(&HeaderName::To).unwrap(),
                tag
            )),
            None => text.push_str(&format!(
                "To: {}\r\n",
                request.header(&HeaderName::To).unwrap()
            )),
        }
        text.push_str(&format!("Call-ID: {}\r\n", request.call_id().unwrap()));
        text.push_str(&format!(
            "CSeq: {}\r\n",
            request.header(&HeaderName::CSeq).unwrap()
        ));
        text.push_str(extra);
        text.push_str("Content-Length: 0\r\n\r\n");
        self.send_raw(&text, destination).await;
    }
}

fn reason(code: u16) -> &'static str {
    match code {
        100 => "Trying",
        180 => "Ringing",
        200 => "OK",
        403 => "Forbidden",
        404 => "Not Found",
        487 => "Request Terminated",
        _ => "Unknown",
    }
}

/// Loopback stack pointed at `proxy`, keep-alive off
pub fn stack_config(proxy: &FakeProxy) -> SipStackConfig {
    SipStackConfig::new(LOCALHOST, "127.0.0.1", proxy.port()).with_keep_alive(false, 120)
}

pub async fn start_stack(proxy: &FakeProxy) -> Arc<SipInterface> {
    Arc::new(SipInterface::initialize(stack_config(proxy)).await.unwrap())
}

pub fn stack_address(stack: &SipInterface) -> SocketAddr {
    SocketAddr::new(LOCALHOST, stack.listening_port())
}

/// Out-of-dialog request with the stack's Via and Contact
pub fn new_request(stack: &SipInterface, method: Method, call_id: &str) -> SipRequest {
    let mut request = Request::new(method.clone(), Uri::sip("example.com").with_user("bob"));
    let via = stack.via_headers().remove(0);
    request.push_header(HeaderName::Via, via.to_string()).unwrap();
    request.push_header(HeaderName::MaxForwards, "70").unwrap();
    request
        .push_header(HeaderName::From, "<sip:alice@example.com>;tag=alice1")
        .unwrap();
    request
        .push_header(HeaderName::To, "<sip:bob@example.com>")
        .unwrap();
    request.push_header(HeaderName::CallId, call_id).unwrap();
    request
        .push_header(HeaderName::CSeq, format!("1 {}", method))
        .unwrap();
    request
        .push_header(HeaderName::Contact, stack.contact().unwrap().to_string())
        .unwrap();
    SipRequest::new(request)
}

pub fn memory_registry() -> Arc<dyn Registry> {
    Arc::new(MemoryRegistry::new())
}

pub fn new_dialog_path(stack: &Arc<SipInterface>, registry: Arc<dyn Registry>) -> SipDialogPath {
    SipDialogPath::new(
        stack.clone(),
        stack.generate_call_id(),
        1,
        "<sip:bob@example.com>",
        "<sip:alice@example.com>",
        "<sip:bob@example.com>",
        stack.service_route_path(),
        stack.config().session_settings(),
        registry,
    )
}

/// INVITE for `path` with the path's tags, Call-ID and route
pub fn invite_for(stack: &SipInterface, path: &SipDialogPath) -> SipRequest {
    let mut invite = Request::new(Method::Invite, path.target().parse().unwrap());
    let via = stack.via_headers().remove(0);
    invite.push_header(HeaderName::Via, via.to_string()).unwrap();
    invite.push_header(HeaderName::MaxForwards, "70").unwrap();
    invite
        .push_header(
            HeaderName::From,
            format!("{};tag={}", path.local_party(), path.local_tag()),
        )
        .unwrap();
    invite
        .push_header(HeaderName::To, path.remote_party())
        .unwrap();
    invite
        .push_header(HeaderName::CallId, path.call_id())
        .unwrap();
    invite
        .push_header(HeaderName::CSeq, format!("{} INVITE", path.cseq()))
        .unwrap();
    for route in path.route() {
        invite.push_header(HeaderName::Route, route).unwrap();
    }
    invite
        .push_header(HeaderName::Contact, stack.contact().unwrap().to_string())
        .unwrap();
    SipRequest::new(invite)
}
