mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use rcs_dialog_core::{
    AuthenticationAgent, DefaultMessageFactory, MessageFactory, Result, SessionTimerSettings,
    SipDialogPath, SipMessage, SipRequest,
};
use rcs_infra_common::{FileRegistry, Registry};
use rcs_sip_core::{HeaderName, Method, SipMessageExt};

struct StaticCredentials;

impl AuthenticationAgent for StaticCredentials {
    fn set_proxy_authorization_header(&self, request: &mut SipRequest) -> Result<()> {
        request.set_header(
            HeaderName::ProxyAuthorization,
            "Digest username=\"alice\", realm=\"example.com\"",
        )?;
        Ok(())
    }
}

/// Sends the INVITE of `path` and returns the proxy's view of it
async fn send_invite(
    proxy: &FakeProxy,
    stack: &Arc<rcs_dialog_core::SipInterface>,
    path: &SipDialogPath,
) -> (
    Arc<rcs_dialog_core::SipTransactionContext>,
    rcs_sip_core::Request,
    std::net::SocketAddr,
) {
    let mut message = SipMessage::Request(invite_for(stack, path));
    let context = stack
        .send_sip_message_and_wait(&mut message, None)
        .await
        .unwrap();
    path.set_invite(message.as_request().unwrap().clone());
    let (invite, source) = proxy.recv_method(Method::Invite).await;
    (context, invite, source)
}

/// Test a full call: INVITE, 200, ACK and BYE with a reason
#[tokio::test]
async fn test_call_flow_ack_and_bye() {
    init_logging();
    let proxy = FakeProxy::bind().await;
    let stack = start_stack(&proxy).await;
    let path = new_dialog_path(&stack, memory_registry());
    path.set_authentication_agent(Arc::new(StaticCredentials));

    let (context, invite, source) = send_invite(&proxy, &stack, &path).await;
    assert!(path.stack_dialog().is_some());
    proxy.reply(&invite, source, 180, Some("bob1"), "", "").await;
    let contact = format!("Contact: <sip:bob@127.0.0.1:{}>\r\n", proxy.port());
    proxy
        .reply(&invite, source, 200, Some("bob1"), "", &contact)
        .await;

    context.wait_response(Duration::from_secs(5)).await;
    assert_eq!(context.status_code(), Some(200));
    path.set_remote_tag("bob1");
    path.set_target(&format!("<sip:bob@127.0.0.1:{}>", proxy.port()));
    path.sig_established();

    stack.send_sip_ack(&path).await.unwrap();
    let (ack, _) = proxy.recv_method(Method::Ack).await;
    assert_eq!(ack.call_id(), Some(path.call_id().as_str()));
    assert_eq!(ack.cseq_number(), Some(1));
    assert_eq!(ack.to_tag().as_deref(), Some("bob1"));
    assert_eq!(ack.from_tag().as_deref(), Some(path.local_tag()));
    assert!(ack.top_via().unwrap().params.contains("rport"));

    path.increment_cseq();
    path.session_terminated_with_reason(200, "Call completed");
    stack.send_sip_bye(&path).await.unwrap();
    let (bye, _) = proxy.recv_method(Method::Bye).await;
    assert_eq!(bye.cseq_number(), Some(2));
    assert_eq!(bye.to_tag().as_deref(), Some("bob1"));
    assert_eq!(
        bye.header(&HeaderName::Reason),
        Some("SIP;cause=200;text=\"Call completed\"")
    );
    assert!(bye.header(&HeaderName::ProxyAuthorization).is_some());
    assert!(path.is_session_terminated());

    stack.close().await;
}

/// Test that a CANCEL goes out on the INVITE branch and that its own 200
/// leaves the INVITE context pending
#[tokio::test]
async fn test_cancel_pending_invite() {
    let proxy = FakeProxy::bind().await;
    let stack = start_stack(&proxy).await;
    let path = new_dialog_path(&stack, memory_registry());

    let (context, invite, source) = send_invite(&proxy, &stack, &path).await;
    proxy.reply(&invite, source, 180, Some("bob1"), "", "").await;

    path.session_cancelled();
    stack.send_sip_cancel(&path).await.unwrap();
    let (cancel, cancel_source) = proxy.recv_method(Method::Cancel).await;
    assert_eq!(
        cancel.top_via().unwrap().branch(),
        invite.top_via().unwrap().branch()
    );
    assert_eq!(cancel.cseq_number(), Some(1));

    proxy.reply(&cancel, cancel_source, 200, Some("bob1"), "", "").await;
    context.wait_response(Duration::from_millis(300)).await;
    assert!(context.is_pending());

    proxy.reply(&invite, source, 487, Some("bob1"), "", "").await;
    context.wait_response(Duration::from_secs(5)).await;
    assert_eq!(context.status_code(), Some(487));
    assert!(path.is_session_cancelled());
    stack.close().await;
}

/// Test that CANCEL on the answering side sends nothing
#[tokio::test]
async fn test_cancel_on_answering_side_is_ignored() {
    let proxy = FakeProxy::bind().await;
    let stack = start_stack(&proxy).await;
    let (listener_tx, mut listener_rx) = tokio::sync::mpsc::unbounded_channel();
    stack.add_sip_event_listener(Arc::new(Forward(listener_tx)));

    let invite = "INVITE sip:alice@127.0.0.1 SIP/2.0\r\n\
                  Via: SIP/2.0/UDP 127.0.0.1:5070;branch=z9hG4bKinv9\r\n\
                  From: <sip:bob@example.com>;tag=b9\r\n\
                  To: <sip:alice@example.com>\r\n\
                  Call-ID: incoming-9@127.0.0.1\r\n\
                  CSeq: 1 INVITE\r\n\
                  Content-Length: 0\r\n\r\n";
    proxy.send_raw(invite, stack_address(&stack)).await;
    let request: SipRequest = tokio::time::timeout(Duration::from_secs(5), listener_rx.recv())
        .await
        .unwrap()
        .unwrap();

    let path = new_dialog_path(&stack, memory_registry());
    path.set_invite(request);
    stack.send_sip_cancel(&path).await.unwrap();
    assert!(proxy.is_silent(Duration::from_millis(300)).await);
    assert!(path.stack_dialog().unwrap().is_server());
    stack.close().await;
}

struct Forward(tokio::sync::mpsc::UnboundedSender<SipRequest>);

#[async_trait::async_trait]
impl rcs_dialog_core::SipEventListener for Forward {
    async fn receive_sip_request(&self, request: SipRequest) {
        let _ = self.0.send(request);
    }
}

/// Test that on the answering side the path CSeq and the stack dialog's
/// local sequence number move together
#[tokio::test]
async fn test_answering_side_cseq_follows_path() {
    let proxy = FakeProxy::bind().await;
    let stack = start_stack(&proxy).await;
    let (listener_tx, mut listener_rx) = tokio::sync::mpsc::unbounded_channel();
    stack.add_sip_event_listener(Arc::new(Forward(listener_tx)));

    let invite = "INVITE sip:alice@127.0.0.1 SIP/2.0\r\n\
                  Via: SIP/2.0/UDP 127.0.0.1:5070;branch=z9hG4bKinv12\r\n\
                  From: <sip:bob@example.com>;tag=b12\r\n\
                  To: <sip:alice@example.com>\r\n\
                  Call-ID: incoming-12@127.0.0.1\r\n\
                  CSeq: 1 INVITE\r\n\
                  Content-Length: 0\r\n\r\n";
    proxy.send_raw(invite, stack_address(&stack)).await;
    let request: SipRequest = tokio::time::timeout(Duration::from_secs(5), listener_rx.recv())
        .await
        .unwrap()
        .unwrap();

    let path = new_dialog_path(&stack, memory_registry());
    path.set_invite(request.clone());
    let ok = DefaultMessageFactory
        .create_response(&request, Some(path.local_tag()), 200)
        .unwrap();
    stack.send_sip_response(&ok).await.unwrap();
    assert_eq!(proxy.recv_response().await.status.as_u16(), 200);

    let dialog = path.stack_dialog().unwrap();
    assert!(dialog.is_server());
    let start = path.cseq();
    let local_start = dialog.local_sequence_number();
    path.increment_cseq();
    path.increment_cseq();
    assert_eq!(path.cseq(), start + 2);
    assert_eq!(dialog.local_sequence_number(), local_start + 2);

    stack.send_sip_bye(&path).await.unwrap();
    let (bye, _) = proxy.recv_method(Method::Bye).await;
    assert_eq!(bye.cseq_number(), Some(path.cseq()));
    assert_eq!(bye.to_tag().as_deref(), Some("b12"));
    stack.close().await;
}

/// Test that dialog requests need an INVITE on the path
#[tokio::test]
async fn test_dialog_requests_need_invite() {
    let proxy = FakeProxy::bind().await;
    let stack = start_stack(&proxy).await;
    let path = new_dialog_path(&stack, memory_registry());

    assert!(path.stack_dialog().is_none());
    assert!(stack.send_sip_bye(&path).await.is_err());
    assert!(stack.send_sip_cancel(&path).await.is_err());
    assert!(stack.send_sip_update(&path).await.is_err());
    stack.close().await;
}

/// Test path creation from the stack and the address helpers
#[tokio::test]
async fn test_new_path_state() {
    let proxy = FakeProxy::bind().await;
    let stack = start_stack(&proxy).await;
    let path = SipDialogPath::new(
        stack.clone(),
        "abc@127.0.0.1",
        7,
        "\"Bob\" <sip:bob@example.com>;tag=x",
        "<sip:alice@example.com>",
        "<sip:bob@example.com>",
        stack.service_route_path(),
        stack.config().session_settings(),
        memory_registry(),
    );

    assert_eq!(path.call_id(), "abc@127.0.0.1");
    assert_eq!(path.cseq(), 7);
    assert_eq!(path.target(), "sip:bob@example.com");
    assert!(!path.local_tag().is_empty());
    assert_eq!(path.remote_tag(), None);
    assert_eq!(path.route(), stack.service_route_path());
    assert_eq!(path.session_expire_time(), 1800);
    assert_eq!(path.session_termination_reason_code(), -1);
    assert!(!path.is_sig_established());
    assert!(!path.is_session_established());

    path.increment_cseq();
    assert_eq!(path.cseq(), 8);

    path.session_terminated_with_reason(486, "Busy");
    path.session_terminated();
    assert!(path.is_session_terminated());
    assert_eq!(path.session_termination_reason_code(), -1);
    assert_eq!(path.session_termination_reason_phrase(), None);

    let other = new_dialog_path(&stack, memory_registry());
    assert_ne!(other.local_tag(), path.local_tag());
    stack.close().await;
}

/// Test that a copied path no longer shares state with its source
#[tokio::test]
async fn test_path_copy_is_independent() {
    let proxy = FakeProxy::bind().await;
    let stack = start_stack(&proxy).await;
    let path = new_dialog_path(&stack, memory_registry());
    path.set_remote_tag("r1");
    path.set_local_content("v=0");

    let copy = path.clone();
    copy.set_remote_tag("r2");
    copy.session_established();

    assert_eq!(path.remote_tag().as_deref(), Some("r1"));
    assert_eq!(copy.local_content().as_deref(), Some("v=0"));
    assert!(!path.is_session_established());
    assert_eq!(copy.local_tag(), path.local_tag());
    stack.close().await;
}

/// Test that the minimum learned from a 422 is persisted for later paths
#[tokio::test]
async fn test_min_session_expire_time_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let registry_path = dir.path().join("registry.json");
    let proxy = FakeProxy::bind().await;
    let stack = start_stack(&proxy).await;

    let registry: Arc<dyn Registry> = Arc::new(FileRegistry::open(&registry_path).unwrap());
    let first = new_dialog_path(&stack, registry.clone());
    assert_eq!(first.session_expire_time(), 1800);
    first.set_min_session_expire_time(2400);
    assert_eq!(first.session_expire_time(), 1800);
    assert_eq!(
        registry.read_integer(SessionTimerSettings::REGISTRY_MIN_SESSION_EXPIRE_PERIOD, -1),
        2400
    );

    let reopened: Arc<dyn Registry> = Arc::new(FileRegistry::open(&registry_path).unwrap());
    let second = new_dialog_path(&stack, reopened.clone());
    assert_eq!(second.session_expire_time(), 2400);

    // The live period is left to the caller
    second.set_min_session_expire_time(600);
    assert_eq!(second.session_expire_time(), 2400);
    assert_eq!(
        reopened.read_integer(SessionTimerSettings::REGISTRY_MIN_SESSION_EXPIRE_PERIOD, -1),
        600
    );
    stack.close().await;
}
