//! # rcs-dialog-core
//!
//! SIP transaction and dialog engine for IMS/RCS clients.
//!
//! The crate sits between the session services (chat, file transfer, calls)
//! and the transport layer:
//!
//! - [`SipInterface`] owns the listening points and the transaction layer,
//!   sends requests and responses, and dispatches incoming traffic to the
//!   registered [`SipEventListener`]s
//! - [`SipTransactionContext`] is the rendezvous between a task waiting on a
//!   request and the reactor delivering its final response
//! - [`SipDialogPath`] holds the state of one session dialog
//! - [`KeepAliveManager`] sends CRLF heartbeats to the outbound proxy
//! - [`SipManager`] owns the current stack and analyses the responses
//!   every service cares about (lost registration, keep-alive period)
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rcs_dialog_core::{SipManager, SipStackConfig};
//!
//! # async fn run() -> rcs_dialog_core::Result<()> {
//! let manager = SipManager::new(None);
//! let config = SipStackConfig {
//!     local_ip: "192.0.2.10".parse().unwrap(),
//!     outbound_proxy_addr: "pcscf.example.net".to_string(),
//!     outbound_proxy_port: 5060,
//!     ..Default::default()
//! };
//! manager.init_stack(config).await?;
//! assert!(manager.is_stack_initialized());
//! manager.terminate().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dialog_path;
pub mod errors;
pub mod factory;
pub mod keep_alive;
pub mod listener;
pub mod manager;
pub mod message;
pub mod sip_interface;
pub mod trace;
pub mod transaction;
pub mod transaction_context;

pub use config::{NetworkType, SessionSettings, SessionTimerSettings, SipStackConfig, TlsSettings};
pub use dialog_path::SipDialogPath;
pub use errors::{Result, SipError};
pub use factory::{AuthenticationAgent, DefaultMessageFactory, MessageFactory};
pub use keep_alive::{HeartbeatSender, KeepAliveManager, KeepAliveRecovery, KeepAliveState};
pub use listener::{ListenerId, ProvisionalResponseHandler, SipEventListener};
pub use manager::{RegistrationHandle, SipManager};
pub use message::{SipMessage, SipRequest, SipResponse};
pub use sip_interface::SipInterface;
pub use transaction::{
    ClientTransaction, ServerTransaction, StackDialog, StackTransaction, TimerSettings,
};
pub use transaction_context::{SipTransactionContext, TransactionTable};

pub use rcs_infra_common::Registry;
