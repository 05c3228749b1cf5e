//! # Keep-alive
//!
//! Periodic CRLF heartbeats to the outbound proxy (RFC 5626) keep NAT
//! bindings open between requests. The manager runs one tokio task that
//! sleeps for the current period, sends a heartbeat through a
//! [`HeartbeatSender`] and schedules the next one.
//!
//! What happens after a failed heartbeat is set by [`KeepAliveRecovery`]:
//!
//! - `Halt` (the default) ends the task and leaves the manager in
//!   [`KeepAliveState::NeedsRestart`] until someone calls
//!   [`KeepAliveManager::start`] again.
//! - `Backoff` keeps the task alive and retries with a doubling delay.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::errors::Result;

/// Delay before the first retry under [`KeepAliveRecovery::Backoff`]
pub const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Sends one heartbeat
#[async_trait]
pub trait HeartbeatSender: Send + Sync {
    async fn send_heartbeat(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveState {
    Stopped,
    Running,
    /// A heartbeat failed and the manager halted
    NeedsRestart,
}

/// Policy applied when a heartbeat fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeepAliveRecovery {
    #[default]
    Halt,
    /// Retry after 1 s, 2 s, 4 s... capped at `max_delay`; the normal period
    /// resumes after the next success
    Backoff { max_delay: Duration },
}

struct KeepAliveInner {
    sender: Arc<dyn HeartbeatSender>,
    period: Mutex<Duration>,
    recovery: KeepAliveRecovery,
    state: Mutex<KeepAliveState>,
    heartbeats: AtomicU64,
    failures: AtomicU64,
}

impl KeepAliveInner {
    fn set_state(&self, state: KeepAliveState) {
        let previous = std::mem::replace(&mut *self.state.lock(), state);
        if previous != state {
            debug!("Keep-alive state changed from {:?} to {:?}", previous, state);
        }
    }
}

/// Sends heartbeats on a refreshable period
pub struct KeepAliveManager {
    inner: Arc<KeepAliveInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl KeepAliveManager {
    pub fn new(
        sender: Arc<dyn HeartbeatSender>,
        period: Duration,
        recovery: KeepAliveRecovery,
    ) -> Self {
        Self {
            inner: Arc::new(KeepAliveInner {
                sender,
                period: Mutex::new(period),
                recovery,
                state: Mutex::new(KeepAliveState::Stopped),
                heartbeats: AtomicU64::new(0),
                failures: AtomicU64::new(0),
            }),
            task: Mutex::new(None),
        }
    }

    /// Schedules the first heartbeat one period from now.
    ///
    /// Does nothing while already running; restarts a halted manager.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if self.state() == KeepAliveState::Running {
            return;
        }
        if let Some(handle) = task.take() {
            handle.abort();
        }
        self.inner.set_state(KeepAliveState::Running);
        info!("Start keep-alive every {:?}", self.period());
        *task = Some(tokio::spawn(run(self.inner.clone())));
    }

    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        if self.state() != KeepAliveState::Stopped {
            info!("Stop keep-alive");
        }
        self.inner.set_state(KeepAliveState::Stopped);
    }

    /// Changes the period; the heartbeat already scheduled keeps its time
    pub fn set_period(&self, period: Duration) {
        debug!("Set keep-alive period to {:?}", period);
        *self.inner.period.lock() = period;
    }

    pub fn period(&self) -> Duration {
        *self.inner.period.lock()
    }

    pub fn recovery(&self) -> KeepAliveRecovery {
        self.inner.recovery
    }

    pub fn state(&self) -> KeepAliveState {
        *self.inner.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == KeepAliveState::Running
    }

    /// Heartbeats sent successfully since creation
    pub fn heartbeats_sent(&self) -> u64 {
        self.inner.heartbeats.load(Ordering::Relaxed)
    }

    pub fn heartbeat_failures(&self) -> u64 {
        self.inner.failures.load(Ordering::Relaxed)
    }

    /// Sends one heartbeat now, outside of the schedule
    pub async fn periodic_processing(&self) -> Result<()> {
        periodic_processing(&self.inner).await
    }
}

impl Drop for KeepAliveManager {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for KeepAliveManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeepAliveManager")
            .field("state", &self.state())
            .field("period", &self.period())
            .field("recovery", &self.inner.recovery)
            .finish()
    }
}

async fn periodic_processing(inner: &KeepAliveInner) -> Result<()> {
    match inner.sender.send_heartbeat().await {
        Ok(()) => {
            inner.heartbeats.fetch_add(1, Ordering::Relaxed);
            trace!("Keep-alive sent");
            Ok(())
        }
        Err(e) => {
            inner.failures.fetch_add(1, Ordering::Relaxed);
            warn!("SIP heartbeat has failed: {}", e);
            Err(e)
        }
    }
}

async fn run(inner: Arc<KeepAliveInner>) {
    let mut retry_delay: Option<Duration> = None;
    loop {
        let delay = retry_delay.unwrap_or_else(|| *inner.period.lock());
        tokio::time::sleep(delay).await;

        if periodic_processing(&inner).await.is_ok() {
            retry_delay = None;
            continue;
        }
        match inner.recovery {
            KeepAliveRecovery::Halt => {
                warn!("Keep-alive halted, restart required");
                inner.set_state(KeepAliveState::NeedsRestart);
                return;
            }
            KeepAliveRecovery::Backoff { max_delay } => {
                let next = retry_delay
                    .map(|d| d.saturating_mul(2))
                    .unwrap_or(INITIAL_RETRY_DELAY)
                    .min(max_delay);
                debug!("Retry keep-alive in {:?}", next);
                retry_delay = Some(next);
            }
        }
    }
}
