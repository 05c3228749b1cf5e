mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::*;
use rcs_dialog_core::{
    ProvisionalResponseHandler, RegistrationHandle, SipError, SipManager, SipMessage, SipRequest,
    SipResponse,
};
use rcs_sip_core::{Method, SipMessageExt};
use tokio::sync::mpsc;

#[derive(Default)]
struct CountingRegistration {
    restarts: AtomicUsize,
}

#[async_trait]
impl RegistrationHandle for CountingRegistration {
    async fn restart(&self) {
        self.restarts.fetch_add(1, Ordering::SeqCst);
    }
}

struct RingingProbe(mpsc::UnboundedSender<SipResponse>);

#[async_trait]
impl ProvisionalResponseHandler for RingingProbe {
    async fn handle_180_ringing(&self, response: SipResponse) {
        let _ = self.0.send(response);
    }
}

async fn manager_with_stack(
    proxy: &FakeProxy,
) -> (Arc<SipManager>, Arc<CountingRegistration>) {
    let registration = Arc::new(CountingRegistration::default());
    let handle: Arc<dyn RegistrationHandle> = registration.clone();
    let manager = Arc::new(SipManager::new(Some(handle)));
    manager.init_stack(stack_config(proxy)).await.unwrap();
    (manager, registration)
}

fn request_message(manager: &SipManager, method: Method) -> SipMessage {
    let stack = manager.sip_stack().unwrap();
    let call_id = stack.generate_call_id();
    SipMessage::Request(new_request(&stack, method, &call_id))
}

/// Test the stack lifecycle and the error once it is closed
#[tokio::test]
async fn test_stack_lifecycle() {
    init_logging();
    let proxy = FakeProxy::bind().await;
    let manager = SipManager::new(None);
    assert!(!manager.is_stack_initialized());

    manager.init_stack(stack_config(&proxy)).await.unwrap();
    let first = manager.sip_stack().unwrap();
    manager.init_stack(stack_config(&proxy)).await.unwrap();
    let second = manager.sip_stack().unwrap();
    assert!(first.is_closed());
    assert!(!second.is_closed());

    manager.close_stack().await;
    assert!(!manager.is_stack_initialized());
    assert!(second.is_closed());

    let mut message = SipMessage::Request(new_request(&second, Method::Options, "x@127.0.0.1"));
    let err = manager
        .send_sip_message_and_wait(&mut message, SipManager::TIMEOUT, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SipError::Network { .. }));
    assert_eq!(err.message(), "Stack not initialized");

    manager.terminate().await;
}

/// Test that a failing configuration leaves no stack behind
#[tokio::test]
async fn test_init_failure_leaves_no_stack() {
    let proxy = FakeProxy::bind().await;
    let manager = SipManager::new(None);
    let err = manager
        .init_stack(stack_config(&proxy).with_mtu(10))
        .await
        .unwrap_err();
    assert!(matches!(err, SipError::Initialization { .. }));
    assert!(!manager.is_stack_initialized());
}

/// Test that a 403 without Warning means the registration was lost
#[tokio::test]
async fn test_forbidden_without_warning_restarts_registration() {
    let proxy = FakeProxy::bind().await;
    let (manager, registration) = manager_with_stack(&proxy).await;

    let sender = manager.clone();
    let send = tokio::spawn(async move {
        let mut message = request_message(&sender, Method::Message);
        sender
            .send_sip_message_and_wait(&mut message, Duration::from_secs(5), None)
            .await
    });
    let (request, source) = proxy.recv_method(Method::Message).await;
    proxy.reply(&request, source, 403, Some("p1"), "", "").await;

    let err = send.await.unwrap().unwrap_err();
    assert_eq!(err.message(), "Not registered");
    assert_eq!(registration.restarts.load(Ordering::SeqCst), 1);
    manager.terminate().await;
}

/// Test that a 403 carrying a Warning is a plain failure response
#[tokio::test]
async fn test_forbidden_with_warning_is_returned() {
    let proxy = FakeProxy::bind().await;
    let (manager, registration) = manager_with_stack(&proxy).await;

    let sender = manager.clone();
    let send = tokio::spawn(async move {
        let mut message = request_message(&sender, Method::Message);
        sender
            .send_sip_message_and_wait(&mut message, Duration::from_secs(5), None)
            .await
    });
    let (request, source) = proxy.recv_method(Method::Message).await;
    proxy
        .reply(
            &request,
            source,
            403,
            Some("p1"),
            "",
            "Warning: 399 pcscf \"Service barred\"\r\n",
        )
        .await;

    let context = send.await.unwrap().unwrap();
    assert_eq!(context.status_code(), Some(403));
    assert_eq!(registration.restarts.load(Ordering::SeqCst), 0);
    manager.terminate().await;
}

/// Test that a 403 to REGISTER is left to the registration logic
#[tokio::test]
async fn test_forbidden_register_is_returned() {
    let proxy = FakeProxy::bind().await;
    let (manager, registration) = manager_with_stack(&proxy).await;

    let sender = manager.clone();
    let send = tokio::spawn(async move {
        let mut message = request_message(&sender, Method::Register);
        sender
            .send_sip_message_and_wait(&mut message, Duration::from_secs(5), None)
            .await
    });
    let (request, source) = proxy.recv_method(Method::Register).await;
    proxy.reply(&request, source, 403, Some("r1"), "", "").await;

    assert_eq!(send.await.unwrap().unwrap().status_code(), Some(403));
    assert_eq!(registration.restarts.load(Ordering::SeqCst), 0);
    manager.terminate().await;
}

/// Test that the keep parameter of a REGISTER response sets the period
#[tokio::test]
async fn test_register_keep_parameter_sets_period() {
    let proxy = FakeProxy::bind().await;
    let (manager, _) = manager_with_stack(&proxy).await;
    let stack = manager.sip_stack().unwrap();
    let configured = stack.config().keep_alive_period();

    let sender = manager.clone();
    let send = tokio::spawn(async move {
        let mut message = request_message(&sender, Method::Register);
        sender
            .send_sip_message_and_wait(&mut message, Duration::from_secs(5), None)
            .await
    });
    let (request, source) = proxy.recv_method(Method::Register).await;
    proxy.reply(&request, source, 200, Some("r1"), ";keep=25", "").await;
    send.await.unwrap().unwrap();
    assert_eq!(
        stack.keep_alive_manager().period(),
        Duration::from_secs(25)
    );

    let sender = manager.clone();
    let send = tokio::spawn(async move {
        let mut message = request_message(&sender, Method::Register);
        sender
            .send_sip_message_and_wait(&mut message, Duration::from_secs(5), None)
            .await
    });
    let (request, source) = proxy.recv_method(Method::Register).await;
    proxy.reply(&request, source, 200, Some("r2"), "", "").await;
    send.await.unwrap().unwrap();
    assert_eq!(stack.keep_alive_manager().period(), configured);
    manager.terminate().await;
}

/// Test that 180 Ringing reaches the callback and a 403 with a callback
/// still returns the context
#[tokio::test]
async fn test_invite_callback_and_forbidden() {
    let proxy = FakeProxy::bind().await;
    let (manager, registration) = manager_with_stack(&proxy).await;
    let (ringing_tx, mut ringing_rx) = mpsc::unbounded_channel();

    let sender = manager.clone();
    let send = tokio::spawn(async move {
        let mut message = request_message(&sender, Method::Invite);
        let callback: Arc<dyn ProvisionalResponseHandler> = Arc::new(RingingProbe(ringing_tx));
        sender
            .send_sip_message_and_wait(&mut message, Duration::from_secs(5), Some(callback))
            .await
    });
    let (invite, source) = proxy.recv_method(Method::Invite).await;
    proxy.reply(&invite, source, 180, Some("b1"), "", "").await;
    let ringing = tokio::time::timeout(Duration::from_secs(5), ringing_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ringing.status_code(), 180);

    proxy.reply(&invite, source, 403, Some("b1"), "", "").await;
    let context = send.await.unwrap().unwrap();
    assert_eq!(context.status_code(), Some(403));
    assert_eq!(registration.restarts.load(Ordering::SeqCst), 1);
    manager.terminate().await;
}

/// Test the in-dialog request path through the manager
#[tokio::test]
async fn test_subsequent_request_forbidden() {
    let proxy = FakeProxy::bind().await;
    let (manager, registration) = manager_with_stack(&proxy).await;
    let stack = manager.sip_stack().unwrap();
    let path = Arc::new(new_dialog_path(&stack, memory_registry()));

    let mut message = SipMessage::Request(invite_for(&stack, &path));
    let context = stack
        .send_sip_message_and_wait(&mut message, None)
        .await
        .unwrap();
    path.set_invite(message.as_request().unwrap().clone());
    let (invite, source) = proxy.recv_method(Method::Invite).await;
    proxy.reply(&invite, source, 200, Some("b1"), "", "").await;
    context.wait_response(Duration::from_secs(5)).await;
    assert_eq!(context.status_code(), Some(200));

    let info = path
        .stack_dialog()
        .unwrap()
        .create_request(Method::Info)
        .unwrap();
    let sender = manager.clone();
    let dialog = path.clone();
    let send = tokio::spawn(async move {
        let mut request = SipRequest::new(info);
        sender
            .send_subsequent_request(&dialog, &mut request, Duration::from_secs(5))
            .await
    });
    let (info, source) = proxy.recv_method(Method::Info).await;
    assert_eq!(info.cseq_number(), Some(2));
    assert_eq!(info.to_tag().as_deref(), Some("b1"));
    proxy.reply(&info, source, 403, Some("b1"), "", "").await;

    let err = send.await.unwrap().unwrap_err();
    assert_eq!(err.message(), "Not registered");
    assert_eq!(registration.restarts.load(Ordering::SeqCst), 1);
    manager.terminate().await;
}
