//! Session keep-alive task.
//!
//! A single background task issues `GET /tickle` at a fixed interval for as
//! long as the process lives. Failures are logged and never take the
//! process down; three consecutive failures invalidate the live session
//! token so the next authenticated call derives a fresh one.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::broker::client::BrokerClient;
use crate::constants::tickler::{INTERVAL_SECS, MAX_CONSECUTIVE_FAILURES};

/// Lifecycle state of the keep-alive task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicklerState {
    /// Not yet started.
    Idle,
    /// Background task alive.
    Running,
    /// Stopped cooperatively.
    Stopped,
}

impl TicklerState {
    fn as_u8(self) -> u8 {
        match self {
            TicklerState::Idle => 0,
            TicklerState::Running => 1,
            TicklerState::Stopped => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => TicklerState::Running,
            2 => TicklerState::Stopped,
            _ => TicklerState::Idle,
        }
    }
}

/// Handle over the background keep-alive task.
pub struct Tickler {
    task: Option<JoinHandle<()>>,
    state: Arc<AtomicU8>,
}

impl Tickler {
    /// Spawn the keep-alive loop at the default interval.
    pub fn spawn(client: Arc<BrokerClient>) -> Self {
        Self::with_interval(client, Duration::from_secs(INTERVAL_SECS))
    }

    /// Spawn the keep-alive loop at a custom interval.
    pub fn with_interval(client: Arc<BrokerClient>, interval: Duration) -> Self {
        let state = Arc::new(AtomicU8::new(TicklerState::Running.as_u8()));
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut failures = 0u32;
            loop {
                ticker.tick().await;
                match client.tickle().await {
                    Ok(_) => {
                        failures = 0;
                        tracing::trace!("tickle ok");
                    }
                    Err(e) => {
                        failures += 1;
                        tracing::warn!(error = %e, failures, "tickle failed");
                        if failures >= MAX_CONSECUTIVE_FAILURES {
                            tracing::warn!(
                                "tickle failed {failures} times in a row, invalidating session"
                            );
                            client.invalidate_session();
                            failures = 0;
                        }
                    }
                }
            }
        });
        Self {
            task: Some(task),
            state,
        }
    }

    /// Current task state.
    pub fn state(&self) -> TicklerState {
        let raw = TicklerState::from_u8(self.state.load(Ordering::Relaxed));
        match raw {
            TicklerState::Running
                if self.task.as_ref().is_none_or(JoinHandle::is_finished) =>
            {
                TicklerState::Stopped
            }
            other => other,
        }
    }

    /// Stop the keep-alive loop.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.state
            .store(TicklerState::Stopped.as_u8(), Ordering::Relaxed);
    }
}

impl Drop for Tickler {
    fn drop(&mut self) {
        self.stop();
    }
}
