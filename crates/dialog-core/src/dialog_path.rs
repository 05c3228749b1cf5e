//! Per-session dialog state
//!
//! A [`SipDialogPath`] is created when a session is initiated or accepted and
//! lives as long as the session object owning it. Identity fields (parties,
//! local tag) are fixed at creation; everything the session logic updates
//! later sits behind one lock so the path can be shared between the task
//! driving the session and the tasks observing it.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rcs_infra_common::Registry;
use rcs_sip_core::ids::generate_tag;
use tracing::{debug, warn};

use crate::config::{SessionSettings, SessionTimerSettings};
use crate::factory::AuthenticationAgent;
use crate::message::SipRequest;
use crate::sip_interface::SipInterface;
use crate::transaction::StackDialog;

/// Reason attached to a terminated session; code -1 means none
#[derive(Debug, Clone, PartialEq, Eq)]
struct Termination {
    code: i32,
    phrase: Option<String>,
}

#[derive(Clone)]
struct PathState {
    call_id: String,
    cseq: u64,
    remote_tag: Option<String>,
    target: String,
    invite: Option<SipRequest>,
    local_content: Option<String>,
    remote_content: Option<String>,
    remote_sip_instance: Option<String>,
    route: Vec<String>,
    authentication_agent: Option<Arc<dyn AuthenticationAgent>>,
    session_expire_time: u32,
    sig_established: bool,
    session_established: bool,
    session_cancelled: bool,
    session_terminated: bool,
    termination: Termination,
}

/// State of one SIP dialog as the session logic sees it
pub struct SipDialogPath {
    stack: Arc<SipInterface>,
    registry: Arc<dyn Registry>,
    local_tag: String,
    local_party: String,
    remote_party: String,
    state: RwLock<PathState>,
}

/// `sip:bob@host` out of `"Bob" <sip:bob@host>;tag=x`; anything without
/// angle brackets is returned as is
pub fn extract_uri_from_address(address: &str) -> &str {
    match (address.find('<'), address.rfind('>')) {
        (Some(start), Some(end)) if start < end => address[start + 1..end].trim(),
        _ => address.trim(),
    }
}

/// Session expire time for a new path: the persisted minimum wins only when
/// it is set, larger than the configured period, and the configured period
/// is above the protocol minimum
fn initial_session_expire_time(configured: u32, persisted_min: i64) -> u32 {
    if configured > SessionTimerSettings::MIN_EXPIRE_PERIOD
        && persisted_min != -1
        && i64::from(configured) < persisted_min
    {
        u32::try_from(persisted_min).unwrap_or(configured)
    } else {
        configured
    }
}

impl SipDialogPath {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stack: Arc<SipInterface>,
        call_id: impl Into<String>,
        cseq: u64,
        target: &str,
        local_party: impl Into<String>,
        remote_party: impl Into<String>,
        route: Vec<String>,
        settings: SessionSettings,
        registry: Arc<dyn Registry>,
    ) -> Self {
        let persisted_min =
            registry.read_integer(SessionTimerSettings::REGISTRY_MIN_SESSION_EXPIRE_PERIOD, -1);
        let session_expire_time =
            initial_session_expire_time(settings.session_refresh_expire_period, persisted_min);

        Self {
            stack,
            registry,
            local_tag: generate_tag(),
            local_party: local_party.into(),
            remote_party: remote_party.into(),
            state: RwLock::new(PathState {
                call_id: call_id.into(),
                cseq,
                remote_tag: None,
                target: extract_uri_from_address(target).to_string(),
                invite: None,
                local_content: None,
                remote_content: None,
                remote_sip_instance: None,
                route,
                authentication_agent: None,
                session_expire_time,
                sig_established: false,
                session_established: false,
                session_cancelled: false,
                session_terminated: false,
                termination: Termination {
                    code: -1,
                    phrase: None,
                },
            }),
        }
    }

    pub fn sip_stack(&self) -> &Arc<SipInterface> {
        &self.stack
    }

    pub fn call_id(&self) -> String {
        self.state.read().call_id.clone()
    }

    pub fn set_call_id(&self, call_id: impl Into<String>) {
        self.state.write().call_id = call_id.into();
    }

    pub fn cseq(&self) -> u64 {
        self.state.read().cseq
    }

    /// Moves to the next CSeq.
    ///
    /// On the answering side the stack dialog does not count the requests
    /// sent through it, so its local sequence number is moved as well.
    pub fn increment_cseq(&self) {
        let mut state = self.state.write();
        state.cseq += 1;
        let dialog = state
            .invite
            .as_ref()
            .and_then(|invite| invite.transaction())
            .and_then(|tx| tx.dialog());
        if let Some(dialog) = dialog {
            if dialog.is_server() {
                dialog.increment_local_sequence_number();
            }
        }
    }

    pub fn local_tag(&self) -> &str {
        &self.local_tag
    }

    pub fn remote_tag(&self) -> Option<String> {
        self.state.read().remote_tag.clone()
    }

    pub fn set_remote_tag(&self, tag: impl Into<String>) {
        self.state.write().remote_tag = Some(tag.into());
    }

    /// Request-URI of in-dialog requests
    pub fn target(&self) -> String {
        self.state.read().target.clone()
    }

    pub fn set_target(&self, target: &str) {
        self.state.write().target = extract_uri_from_address(target).to_string();
    }

    pub fn local_party(&self) -> &str {
        &self.local_party
    }

    pub fn remote_party(&self) -> &str {
        &self.remote_party
    }

    /// The INVITE that opened the dialog
    pub fn invite(&self) -> Option<SipRequest> {
        self.state.read().invite.clone()
    }

    pub fn set_invite(&self, invite: SipRequest) {
        self.state.write().invite = Some(invite);
    }

    pub fn local_content(&self) -> Option<String> {
        self.state.read().local_content.clone()
    }

    pub fn set_local_content(&self, content: impl Into<String>) {
        self.state.write().local_content = Some(content.into());
    }

    pub fn remote_content(&self) -> Option<String> {
        self.state.read().remote_content.clone()
    }

    pub fn set_remote_content(&self, content: impl Into<String>) {
        self.state.write().remote_content = Some(content.into());
    }

    pub fn remote_sip_instance(&self) -> Option<String> {
        self.state.read().remote_sip_instance.clone()
    }

    pub fn set_remote_sip_instance(&self, instance_id: impl Into<String>) {
        self.state.write().remote_sip_instance = Some(instance_id.into());
    }

    pub fn route(&self) -> Vec<String> {
        self.state.read().route.clone()
    }

    pub fn set_route(&self, route: Vec<String>) {
        self.state.write().route = route;
    }

    pub fn authentication_agent(&self) -> Option<Arc<dyn AuthenticationAgent>> {
        self.state.read().authentication_agent.clone()
    }

    pub fn set_authentication_agent(&self, agent: Arc<dyn AuthenticationAgent>) {
        self.state.write().authentication_agent = Some(agent);
    }

    /// Session-Expires value in seconds
    pub fn session_expire_time(&self) -> u32 {
        self.state.read().session_expire_time
    }

    pub fn set_session_expire_time(&self, seconds: u32) {
        self.state.write().session_expire_time = seconds;
    }

    /// Records the Min-SE learned from a 422 response.
    ///
    /// The value is only persisted for the next dialogs; callers retrying
    /// with the new minimum set this path's period through
    /// [`set_session_expire_time`](Self::set_session_expire_time).
    pub fn set_min_session_expire_time(&self, seconds: u32) {
        debug!(call_id = %self.call_id(), "Minimum session expire time set to {}", seconds);
        if let Err(e) = self.registry.write_integer(
            SessionTimerSettings::REGISTRY_MIN_SESSION_EXPIRE_PERIOD,
            i64::from(seconds),
        ) {
            warn!("Can't persist minimum session expire time: {}", e);
        }
    }

    pub fn is_sig_established(&self) -> bool {
        self.state.read().sig_established
    }

    pub fn sig_established(&self) {
        self.state.write().sig_established = true;
    }

    pub fn is_session_established(&self) -> bool {
        self.state.read().session_established
    }

    pub fn session_established(&self) {
        self.state.write().session_established = true;
    }

    pub fn is_session_cancelled(&self) -> bool {
        self.state.read().session_cancelled
    }

    pub fn session_cancelled(&self) {
        self.state.write().session_cancelled = true;
    }

    pub fn is_session_terminated(&self) -> bool {
        self.state.read().session_terminated
    }

    /// Marks the session terminated without a reason
    pub fn session_terminated(&self) {
        let mut state = self.state.write();
        state.session_terminated = true;
        state.termination = Termination {
            code: -1,
            phrase: None,
        };
    }

    pub fn session_terminated_with_reason(&self, code: i32, phrase: impl Into<String>) {
        let mut state = self.state.write();
        state.session_terminated = true;
        state.termination = Termination {
            code,
            phrase: Some(phrase.into()),
        };
    }

    /// -1 unless the session was terminated with a reason
    pub fn session_termination_reason_code(&self) -> i32 {
        self.state.read().termination.code
    }

    pub fn session_termination_reason_phrase(&self) -> Option<String> {
        self.state.read().termination.phrase.clone()
    }

    /// Stack dialog of the INVITE transaction, once the INVITE went out or
    /// came in
    pub fn stack_dialog(&self) -> Option<StackDialog> {
        self.state
            .read()
            .invite
            .as_ref()
            .and_then(|invite| invite.transaction())
            .and_then(|tx| tx.dialog())
    }
}

/// Full copy, used to fork session state for a refresh
impl Clone for SipDialogPath {
    fn clone(&self) -> Self {
        Self {
            stack: self.stack.clone(),
            registry: self.registry.clone(),
            local_tag: self.local_tag.clone(),
            local_party: self.local_party.clone(),
            remote_party: self.remote_party.clone(),
            state: RwLock::new(self.state.read().clone()),
        }
    }
}

impl fmt::Debug for SipDialogPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("SipDialogPath")
            .field("call_id", &state.call_id)
            .field("cseq", &state.cseq)
            .field("local_tag", &self.local_tag)
            .field("remote_tag", &state.remote_tag)
            .field("target", &state.target)
            .field("session_expire_time", &state.session_expire_time)
            .field("terminated", &state.session_terminated)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_uri_from_address() {
        assert_eq!(
            extract_uri_from_address("\"Bob\" <sip:bob@example.com>;tag=1"),
            "sip:bob@example.com"
        );
        assert_eq!(
            extract_uri_from_address(" sip:bob@example.com "),
            "sip:bob@example.com"
        );
        assert_eq!(extract_uri_from_address("tel:+33612345678"), "tel:+33612345678");
    }

    #[test]
    fn test_initial_session_expire_time() {
        // Persisted minimum above the configured period wins
        assert_eq!(initial_session_expire_time(1800, 3600), 3600);
        // Unset minimum
        assert_eq!(initial_session_expire_time(1800, -1), 1800);
        // Minimum below the configured period
        assert_eq!(initial_session_expire_time(1800, 600), 1800);
        // Configured period not above the protocol minimum
        assert_eq!(initial_session_expire_time(90, 3600), 90);
        assert_eq!(initial_session_expire_time(60, 3600), 60);
    }
}
