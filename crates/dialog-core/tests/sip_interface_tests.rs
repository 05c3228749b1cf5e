mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::*;
use rcs_dialog_core::{
    DefaultMessageFactory, MessageFactory, SipError, SipEventListener, SipInterface, SipMessage,
    SipRequest,
};
use rcs_sip_core::{HeaderName, Method, Request, SipMessageExt, Uri};
use rcs_sip_transport::TransportType;
use tokio::sync::mpsc;
use tokio::time::timeout;

struct ChannelListener {
    tx: mpsc::UnboundedSender<SipRequest>,
}

#[async_trait]
impl SipEventListener for ChannelListener {
    async fn receive_sip_request(&self, request: SipRequest) {
        let _ = self.tx.send(request);
    }
}

fn channel_listener() -> (Arc<ChannelListener>, mpsc::UnboundedReceiver<SipRequest>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(ChannelListener { tx }), rx)
}

async fn next_request(rx: &mut mpsc::UnboundedReceiver<SipRequest>) -> SipRequest {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for listener")
        .expect("listener channel closed")
}

/// Test that a request waits for and receives its final response
#[tokio::test]
async fn test_request_receives_final_response() {
    init_logging();
    let proxy = FakeProxy::bind().await;
    let stack = start_stack(&proxy).await;

    let call_id = stack.generate_call_id();
    let mut message = SipMessage::Request(new_request(&stack, Method::Options, &call_id));
    let context = stack
        .send_sip_message_and_wait(&mut message, None)
        .await
        .unwrap();
    assert!(context.is_pending());
    assert!(message.transaction().is_some());

    let (request, source) = proxy.recv_method(Method::Options).await;
    assert_eq!(request.call_id(), Some(call_id.as_str()));
    proxy.reply(&request, source, 100, None, "", "").await;
    proxy.reply(&request, source, 200, Some("bob1"), "", "").await;

    context.wait_response(Duration::from_secs(5)).await;
    assert!(!context.is_timeout());
    assert_eq!(context.status_code(), Some(200));
    assert!(context.is_sip_successful_response());
    assert_eq!(context.sip_response().unwrap().to_tag().as_deref(), Some("bob1"));
    assert!(stack.transaction_table().is_empty());

    stack.close().await;
}

/// Test that an unanswered request resolves as a timeout after 64*T1
#[tokio::test]
async fn test_unanswered_request_times_out() {
    let proxy = FakeProxy::bind().await;
    let config = stack_config(&proxy).with_timers(10, 40, 50);
    let stack = SipInterface::initialize(config).await.unwrap();

    let mut message = SipMessage::Request(new_request(
        &stack,
        Method::Message,
        &stack.generate_call_id(),
    ));
    let context = stack
        .send_sip_message_and_wait(&mut message, None)
        .await
        .unwrap();
    context.wait_response(Duration::from_secs(5)).await;

    assert!(!context.is_pending());
    assert!(context.is_timeout());
    assert_eq!(context.status_code(), None);
    stack.close().await;
}

/// Test that a short wait returns as a timeout while the context stays live
#[tokio::test]
async fn test_wait_shorter_than_transaction() {
    let proxy = FakeProxy::bind().await;
    let stack = start_stack(&proxy).await;

    let call_id = stack.generate_call_id();
    let mut message = SipMessage::Request(new_request(&stack, Method::Options, &call_id));
    let context = stack
        .send_sip_message_and_wait(&mut message, None)
        .await
        .unwrap();
    context.wait_response(Duration::from_millis(100)).await;
    assert!(context.is_timeout());
    assert!(context.is_pending());

    stack.remove_transaction_context(&call_id);
    assert!(stack.transaction_table().is_empty());
    stack.close().await;
}

/// Test that incoming requests reach listeners and can be answered
#[tokio::test]
async fn test_incoming_request_dispatched_to_listeners() {
    let proxy = FakeProxy::bind().await;
    let stack = start_stack(&proxy).await;
    let (first, mut first_rx) = channel_listener();
    let (second, mut second_rx) = channel_listener();
    stack.add_sip_event_listener(first);
    let second_id = stack.add_sip_event_listener(second);
    assert_eq!(stack.sip_event_listener_count(), 2);

    let message = "MESSAGE sip:alice@127.0.0.1 SIP/2.0\r\n\
                   Via: SIP/2.0/UDP 127.0.0.1:5070;branch=z9hG4bKmsg1\r\n\
                   From: <sip:bob@example.com>;tag=b1\r\n\
                   To: <sip:alice@example.com>\r\n\
                   Call-ID: msg-1@127.0.0.1\r\n\
                   CSeq: 1 MESSAGE\r\n\
                   Content-Length: 0\r\n\r\n";
    proxy.send_raw(message, stack_address(&stack)).await;

    let request = next_request(&mut first_rx).await;
    assert_eq!(request.method(), &Method::Message);
    assert_eq!(next_request(&mut second_rx).await.call_id(), Some("msg-1@127.0.0.1"));
    assert!(request.transaction().map(|tx| tx.is_server()).unwrap_or(false));

    let response = DefaultMessageFactory
        .create_response(&request, Some("a1"), 200)
        .unwrap();
    stack.send_sip_response(&response).await.unwrap();
    let answer = proxy.recv_response().await;
    assert_eq!(answer.status.as_u16(), 200);
    assert_eq!(answer.to_tag().as_deref(), Some("a1"));

    assert!(stack.remove_sip_event_listener(second_id));
    assert!(!stack.remove_sip_event_listener(second_id));
    assert_eq!(stack.sip_event_listener_count(), 1);
    stack.close().await;
}

/// Test that the ACK of a 2xx resolves the response context and is not
/// shown to listeners
#[tokio::test]
async fn test_ack_resolves_response_context() {
    let proxy = FakeProxy::bind().await;
    let stack = start_stack(&proxy).await;
    let (listener, mut rx) = channel_listener();
    stack.add_sip_event_listener(listener);

    let invite = "INVITE sip:alice@127.0.0.1 SIP/2.0\r\n\
                  Via: SIP/2.0/UDP 127.0.0.1:5070;branch=z9hG4bKinv1\r\n\
                  From: <sip:bob@example.com>;tag=b1\r\n\
                  To: <sip:alice@example.com>\r\n\
                  Call-ID: call-1@127.0.0.1\r\n\
                  CSeq: 1 INVITE\r\n\
                  Contact: <sip:bob@127.0.0.1:5070>\r\n\
                  Content-Length: 0\r\n\r\n";
    proxy.send_raw(invite, stack_address(&stack)).await;
    let request = next_request(&mut rx).await;
    assert_eq!(request.method(), &Method::Invite);

    let response = DefaultMessageFactory
        .create_response(&request, Some("a1"), 200)
        .unwrap();
    let mut message = SipMessage::Response(response);
    let context = stack
        .send_sip_message_and_wait(&mut message, None)
        .await
        .unwrap();
    assert_eq!(proxy.recv_response().await.status.as_u16(), 200);

    let ack = "ACK sip:alice@127.0.0.1 SIP/2.0\r\n\
               Via: SIP/2.0/UDP 127.0.0.1:5070;branch=z9hG4bKack1\r\n\
               From: <sip:bob@example.com>;tag=b1\r\n\
               To: <sip:alice@example.com>;tag=a1\r\n\
               Call-ID: call-1@127.0.0.1\r\n\
               CSeq: 1 ACK\r\n\
               Content-Length: 0\r\n\r\n";
    proxy.send_raw(ack, stack_address(&stack)).await;

    context.wait_response(Duration::from_secs(5)).await;
    assert!(context.is_sip_ack());
    assert!(!context.is_sip_response());
    assert!(
        timeout(Duration::from_millis(200), rx.recv()).await.is_err(),
        "ACK must not reach listeners"
    );
    stack.close().await;
}

/// Test that a response without a server transaction is refused
#[tokio::test]
async fn test_response_without_transaction_is_refused() {
    let proxy = FakeProxy::bind().await;
    let stack = start_stack(&proxy).await;

    let request = new_request(&stack, Method::Options, "orphan@127.0.0.1");
    let response = DefaultMessageFactory
        .create_response(&request, None, 200)
        .unwrap();
    let err = stack.send_sip_response(&response).await.unwrap_err();
    assert!(matches!(err, SipError::Network { .. }));

    let mut message = SipMessage::Response(response);
    assert!(stack.send_sip_message_and_wait(&mut message, None).await.is_err());
    assert!(stack.transaction_table().is_empty());
    stack.close().await;
}

/// Test the service route path keeps the default route first
#[tokio::test]
async fn test_service_route_path() {
    let proxy = FakeProxy::bind().await;
    let stack = start_stack(&proxy).await;

    let default_route = format!("<sip:127.0.0.1:{};transport=udp;lr>", proxy.port());
    assert_eq!(stack.default_route(), default_route);
    assert_eq!(stack.service_route_path(), vec![default_route.clone()]);

    stack.set_service_route_path([
        "<SIP:Orig@SCSCF.Example.NET;lr>",
        "<sip:orig@scscf.example.net;lr>",
        "",
    ]);
    assert_eq!(
        stack.service_route_path(),
        vec![
            default_route.clone(),
            "<sip:orig@scscf.example.net;lr>".to_string()
        ]
    );
    assert_eq!(stack.default_route_path(), vec![default_route]);
    stack.close().await;
}

/// Test the contact prefers the GRUU over the instance id
#[tokio::test]
async fn test_contact_addressing() {
    let proxy = FakeProxy::bind().await;
    let stack = start_stack(&proxy).await;

    let local = stack.contact().unwrap();
    assert_eq!(local.uri.port, Some(stack.listening_port()));
    assert_eq!(local.uri.transport(), Some("udp"));

    stack.set_instance_id(Some("\"<urn:gsma:imei:35-209900-176148-1>\"".to_string()));
    let with_instance = stack.contact().unwrap().to_string();
    assert!(with_instance.contains("+sip.instance"));

    stack.set_public_gruu(Some("sip:alice@example.com;gr=urn:uuid:1".to_string()));
    let gruu = stack.contact().unwrap();
    assert_eq!(gruu.uri.host, "example.com");
    assert!(!gruu.to_string().contains("+sip.instance"));

    stack.set_public_gruu(None);
    assert_eq!(stack.contact().unwrap().to_string(), with_instance);
    stack.close().await;
}

/// Test that large UDP requests are moved to TCP once
#[tokio::test]
async fn test_tcp_fallback_rewrites_via_and_route() {
    let proxy = FakeProxy::bind().await;
    let config = stack_config(&proxy).with_tcp_fallback(true).with_mtu(300);
    let stack = SipInterface::initialize(config).await.unwrap();

    let mut request = new_request(&stack, Method::Message, "big@127.0.0.1").into_stack_message();
    request
        .push_header(HeaderName::Route, stack.default_route())
        .unwrap();
    assert!(stack.apply_tcp_fallback(&mut request).unwrap());
    let via = request.top_via().unwrap();
    assert_eq!(via.transport, "TCP");
    let route = request.header(&HeaderName::Route).unwrap().to_string();
    assert!(route.contains("transport=tcp"));

    let rewritten = request.to_bytes();
    assert!(stack.apply_tcp_fallback(&mut request).unwrap());
    assert_eq!(request.to_bytes(), rewritten);
    stack.close().await;
}

/// Test that small requests and disabled fallback keep UDP
#[tokio::test]
async fn test_tcp_fallback_not_applied() {
    let proxy = FakeProxy::bind().await;
    let stack = start_stack(&proxy).await;
    let mut request = Request::new(Method::Options, Uri::sip("example.com"));
    assert!(!stack.apply_tcp_fallback(&mut request).unwrap());
    stack.close().await;

    let config = stack_config(&proxy).with_tcp_fallback(true);
    let stack = SipInterface::initialize(config).await.unwrap();
    let mut request = new_request(&stack, Method::Options, "small@127.0.0.1").into_stack_message();
    assert!(!stack.apply_tcp_fallback(&mut request).unwrap());
    assert_eq!(request.top_via().unwrap().transport, "UDP");
    assert_eq!(stack.default_protocol(), TransportType::Udp);
    stack.close().await;
}

/// Test that the stack refuses work once closed
#[tokio::test]
async fn test_closed_stack_refuses_requests() {
    let proxy = FakeProxy::bind().await;
    let stack = start_stack(&proxy).await;
    stack.close().await;
    stack.close().await;
    assert!(stack.is_closed());

    let mut message = SipMessage::Request(new_request(&stack, Method::Options, "late@127.0.0.1"));
    let err = stack
        .send_sip_message_and_wait(&mut message, None)
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}

/// Test that an invalid configuration fails initialization
#[tokio::test]
async fn test_invalid_configuration_fails_initialization() {
    let proxy = FakeProxy::bind().await;
    let config = stack_config(&proxy).with_mtu(100);
    let err = SipInterface::initialize(config).await.unwrap_err();
    assert!(matches!(err, SipError::Initialization { .. }));

    let config = stack_config(&proxy).with_default_protocol(TransportType::Tls);
    assert!(SipInterface::initialize(config).await.is_err());
}

/// Test that sent and received messages are written to the SIP trace
#[tokio::test]
async fn test_sip_trace_records_messages() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sip-trace.txt");
    let proxy = FakeProxy::bind().await;
    let config = stack_config(&proxy).with_sip_trace(&path);
    let stack = SipInterface::initialize(config).await.unwrap();

    let mut message = SipMessage::Request(new_request(&stack, Method::Options, "trace@127.0.0.1"));
    let context = stack
        .send_sip_message_and_wait(&mut message, None)
        .await
        .unwrap();
    let (request, source) = proxy.recv_method(Method::Options).await;
    proxy.reply(&request, source, 200, Some("t1"), "", "").await;
    context.wait_response(Duration::from_secs(5)).await;
    stack.close().await;
    drop(stack);

    // The trace writer runs on its own thread
    let mut trace = String::new();
    for _ in 0..50 {
        trace = std::fs::read_to_string(&path).unwrap_or_default();
        if trace.contains("SIP/2.0 200 OK") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(trace.contains("OPTIONS sip:bob@example.com SIP/2.0"));
    assert!(trace.contains("SIP/2.0 200 OK"));
}
