//! SIP manager
//!
//! Owns the current [`SipInterface`] and adds the response analysis every
//! service needs after a request: a 403 without a Warning header means the
//! registration was lost, and the `keep` parameter of the Via in responses
//! to INVITE and REGISTER sets the keep-alive period (RFC 6223).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use rcs_sip_core::{HeaderName, Method, SipMessageExt, StatusCode};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::SipStackConfig;
use crate::dialog_path::SipDialogPath;
use crate::errors::{Result, SipError};
use crate::keep_alive::KeepAliveManager;
use crate::listener::ProvisionalResponseHandler;
use crate::message::{SipMessage, SipRequest, SipResponse};
use crate::sip_interface::SipInterface;
use crate::transaction_context::SipTransactionContext;

/// Restarts the registration when the network reports it lost
#[async_trait]
pub trait RegistrationHandle: Send + Sync {
    async fn restart(&self);
}

/// Lifecycle of the SIP stack plus response analysis
pub struct SipManager {
    stack: RwLock<Option<Arc<SipInterface>>>,
    registration: Option<Arc<dyn RegistrationHandle>>,
    lifecycle: Mutex<()>,
}

impl SipManager {
    /// Default time to wait for a response
    pub const TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(registration: Option<Arc<dyn RegistrationHandle>>) -> Self {
        info!("SIP manager started");
        Self {
            stack: RwLock::new(None),
            registration,
            lifecycle: Mutex::new(()),
        }
    }

    /// Closes the current stack, if any, and starts a new one
    pub async fn init_stack(&self, config: SipStackConfig) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.close_current().await;
        let stack = SipInterface::initialize(config).await?;
        *self.stack.write() = Some(Arc::new(stack));
        Ok(())
    }

    pub async fn close_stack(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.close_current().await;
    }

    async fn close_current(&self) {
        let stack = self.stack.write().take();
        if let Some(stack) = stack {
            stack.close().await;
        }
    }

    /// Closes the stack for good
    pub async fn terminate(&self) {
        info!("Terminate the SIP manager");
        self.close_stack().await;
        info!("SIP manager has been terminated");
    }

    pub fn is_stack_initialized(&self) -> bool {
        self.stack.read().is_some()
    }

    pub fn sip_stack(&self) -> Option<Arc<SipInterface>> {
        self.stack.read().clone()
    }

    fn stack(&self) -> Result<Arc<SipInterface>> {
        self.sip_stack()
            .ok_or_else(|| SipError::network("Stack not initialized"))
    }

    async fn restart_registration(&self) {
        match &self.registration {
            Some(registration) => {
                info!("Not registered anymore, restart registration");
                registration.restart().await;
            }
            None => warn!("Not registered anymore and no registration to restart"),
        }
    }

    /// Sends `message` and waits up to `timeout` for its response.
    ///
    /// Fails with "Not registered" on a 403 without Warning to anything but
    /// REGISTER, unless a `callback` was supplied. A timeout is not an
    /// error: check [`SipTransactionContext::is_timeout`].
    pub async fn send_sip_message_and_wait(
        &self,
        message: &mut SipMessage,
        timeout: Duration,
        callback: Option<Arc<dyn ProvisionalResponseHandler>>,
    ) -> Result<Arc<SipTransactionContext>> {
        let stack = self.stack()?;
        let has_callback = callback.is_some();
        let context = stack.send_sip_message_and_wait(message, callback).await?;
        context.wait_response(timeout).await;

        let SipMessage::Request(request) = message else {
            return Ok(context);
        };
        let Some(response) = context.sip_response() else {
            return Ok(context);
        };
        let method = request.method().clone();

        if method != Method::Register && is_not_registered(&response) {
            self.restart_registration().await;
            if !has_callback {
                return Err(SipError::network("Not registered"));
            }
        }

        if method == Method::Invite || method == Method::Register {
            apply_keep_parameter(
                stack.keep_alive_manager(),
                &response,
                stack.config().keep_alive_period(),
            );
        }
        Ok(context)
    }

    pub async fn send_sip_response(&self, response: &SipResponse) -> Result<()> {
        self.stack()?.send_sip_response(response).await
    }

    pub async fn send_sip_ack(&self, dialog: &SipDialogPath) -> Result<()> {
        self.stack()?.send_sip_ack(dialog).await
    }

    pub async fn send_sip_bye(&self, dialog: &SipDialogPath) -> Result<()> {
        self.stack()?.send_sip_bye(dialog).await
    }

    pub async fn send_sip_cancel(&self, dialog: &SipDialogPath) -> Result<()> {
        self.stack()?.send_sip_cancel(dialog).await
    }

    /// Sends an in-dialog request and waits up to `timeout` for its response
    pub async fn send_subsequent_request(
        &self,
        dialog: &SipDialogPath,
        request: &mut SipRequest,
        timeout: Duration,
    ) -> Result<Arc<SipTransactionContext>> {
        let stack = self.stack()?;
        let context = stack.send_subsequent_request(dialog, request).await?;
        context.wait_response(timeout).await;

        if let Some(response) = context.sip_response() {
            if is_not_registered(&response) {
                self.restart_registration().await;
                return Err(SipError::network("Not registered"));
            }
        }
        Ok(context)
    }
}

impl std::fmt::Debug for SipManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SipManager")
            .field("stack", &self.stack.read())
            .field("registration", &self.registration.is_some())
            .finish()
    }
}

/// 403 without a Warning header
fn is_not_registered(response: &SipResponse) -> bool {
    response.status_code() == StatusCode::FORBIDDEN.as_u16()
        && response.header(&HeaderName::Warning).is_none()
}

/// Sets the keep-alive period from the top Via `keep` parameter, or back
/// to `default_period` when it is absent or not a positive number
fn apply_keep_parameter(
    keep_alive: &KeepAliveManager,
    response: &SipResponse,
    default_period: Duration,
) {
    let keep = response
        .top_via()
        .and_then(|via| via.keep().map(str::to_string));
    let period = match keep.as_deref().map(str::parse::<i64>) {
        Some(Ok(secs)) if secs > 0 => Duration::from_secs(secs.unsigned_abs()),
        Some(Ok(_)) => {
            warn!("Non positive keep value {:?}", keep);
            default_period
        }
        Some(Err(e)) => {
            error!("Non-numeric keep value {:?}: {}", keep, e);
            default_period
        }
        None => default_period,
    };
    debug!("Keep-alive period from response: {:?}", period);
    keep_alive.set_period(period);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keep_alive::{HeartbeatSender, KeepAliveRecovery};
    use rcs_sip_core::Message;

    struct Silent;

    #[async_trait]
    impl HeartbeatSender for Silent {
        async fn send_heartbeat(&self) -> Result<()> {
            Ok(())
        }
    }

    fn response(status: &str, via_params: &str, extra: &str) -> SipResponse {
        let raw = format!(
            "SIP/2.0 {}\r\n\
             Via: SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bK1{}\r\n\
             From: <sip:alice@example.com>;tag=a\r\n\
             To: <sip:alice@example.com>;tag=b\r\n\
             Call-ID: reg@10.0.0.1\r\n\
             CSeq: 2 REGISTER\r\n\
             {}Content-Length: 0\r\n\r\n",
            status, via_params, extra
        );
        let message = Message::parse(raw.as_bytes()).unwrap();
        SipResponse::new(message.as_response().unwrap().clone())
    }

    #[test]
    fn test_keep_parameter_sets_period() {
        let keep_alive =
            KeepAliveManager::new(Arc::new(Silent), Duration::from_secs(120), KeepAliveRecovery::Halt);
        let default = Duration::from_secs(120);

        apply_keep_parameter(&keep_alive, &response("200 OK", ";keep=45", ""), default);
        assert_eq!(keep_alive.period(), Duration::from_secs(45));

        apply_keep_parameter(&keep_alive, &response("200 OK", ";keep=0", ""), default);
        assert_eq!(keep_alive.period(), default);

        keep_alive.set_period(Duration::from_secs(10));
        apply_keep_parameter(&keep_alive, &response("200 OK", ";keep=abc", ""), default);
        assert_eq!(keep_alive.period(), default);

        keep_alive.set_period(Duration::from_secs(10));
        apply_keep_parameter(&keep_alive, &response("200 OK", "", ""), default);
        assert_eq!(keep_alive.period(), default);
    }

    #[test]
    fn test_not_registered_detection() {
        assert!(is_not_registered(&response("403 Forbidden", "", "")));
        assert!(!is_not_registered(&response(
            "403 Forbidden",
            "",
            "Warning: 399 pcscf \"Barred\"\r\n"
        )));
        assert!(!is_not_registered(&response("404 Not Found", "", "")));
    }

    #[tokio::test]
    async fn test_calls_fail_without_stack() {
        let manager = SipManager::new(None);
        assert!(!manager.is_stack_initialized());
        let mut message = SipMessage::Request(SipRequest::new(rcs_sip_core::Request::new(
            Method::Options,
            rcs_sip_core::Uri::sip("example.com"),
        )));
        let err = manager
            .send_sip_message_and_wait(&mut message, SipManager::TIMEOUT, None)
            .await
            .unwrap_err();
        assert_eq!(err.message(), "Stack not initialized");
        assert!(err.is_retryable());
        manager.close_stack().await;
    }
}
