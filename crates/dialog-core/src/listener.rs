//! Listener interfaces for incoming SIP traffic
//!
//! Incoming requests (other than ACK) are fanned out to every registered
//! [`SipEventListener`]. Each listener gets its own channel and worker task,
//! so a slow listener neither blocks the stack reactor nor delays other
//! listeners, and each listener sees requests in arrival order.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::message::{SipRequest, SipResponse};

/// Receives requests that do not belong to a pending transaction
#[async_trait]
pub trait SipEventListener: Send + Sync {
    async fn receive_sip_request(&self, request: SipRequest);
}

/// Notified when a 180 Ringing arrives for a pending INVITE
#[async_trait]
pub trait ProvisionalResponseHandler: Send + Sync {
    async fn handle_180_ringing(&self, response: SipResponse);
}

/// Registration handle returned by
/// [`SipInterface::add_sip_event_listener`](crate::SipInterface::add_sip_event_listener)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Registered listeners and the channels feeding their workers
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, mpsc::UnboundedSender<SipRequest>)>>,
}

impl ListenerRegistry {
    /// Registers a listener and spawns its worker; needs a tokio runtime
    pub(crate) fn add(&self, listener: Arc<dyn SipEventListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, mut rx) = mpsc::unbounded_channel::<SipRequest>();
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                listener.receive_sip_request(request).await;
            }
            trace!(id = %id, "Listener worker stopped");
        });
        self.listeners.lock().push((id, tx));
        debug!(id = %id, "SIP event listener added");
        id
    }

    /// Removes a listener; requests already queued are still delivered
    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        before != listeners.len()
    }

    pub(crate) fn clear(&self) {
        self.listeners.lock().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    /// Queues `request` for every listener, in registration order
    pub(crate) fn dispatch(&self, request: &SipRequest) {
        let mut listeners = self.listeners.lock();
        listeners.retain(|(id, tx)| {
            let delivered = tx.send(request.clone()).is_ok();
            if !delivered {
                debug!(id = %id, "Dropping listener whose worker stopped");
            }
            delivered
        });
    }
}
