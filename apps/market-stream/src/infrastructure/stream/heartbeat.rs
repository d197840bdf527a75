//! Heartbeat Manager
//!
//! Keeps a streaming session alive by requesting a protocol keep-alive on a
//! fixed interval, and optionally flags the session as stale when no inbound
//! traffic arrives within a timeout.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::StreamSettings;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between keep-alive messages.
    pub interval: Duration,
    /// Silence after which the session is considered lost. `None` disables
    /// stale detection.
    pub timeout: Option<Duration>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: None,
        }
    }
}

impl HeartbeatConfig {
    /// Build from stream settings.
    #[must_use]
    pub const fn from_settings(settings: &StreamSettings) -> Self {
        Self {
            interval: settings.heartbeat_interval,
            timeout: settings.heartbeat_timeout,
        }
    }
}

/// Events emitted by the heartbeat manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send the protocol keep-alive.
    SendPing,
    /// No inbound traffic within the timeout.
    Timeout(Duration),
}

/// Inbound activity shared between the session reader and the manager.
#[derive(Debug)]
pub struct HeartbeatState {
    last_inbound: RwLock<Instant>,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create state with activity recorded now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_inbound: RwLock::new(Instant::now()),
        }
    }

    /// Record inbound traffic.
    pub fn record_inbound(&self) {
        *self.last_inbound.write() = Instant::now();
    }

    /// Time of the last inbound message.
    #[must_use]
    pub fn last_inbound(&self) -> Instant {
        *self.last_inbound.read()
    }

    /// Time since the last inbound message.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_inbound().elapsed()
    }
}

/// Heartbeat loop for one session.
#[derive(Debug)]
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled, the receiver is dropped, or a timeout fires.
    ///
    /// The first keep-alive is sent one interval after start.
    pub async fn run(self) {
        let period = self.config.interval.max(Duration::from_millis(1));
        let mut ping = tokio::time::interval_at(Instant::now() + period, period);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let stale_at = self.config.timeout.map(|t| self.state.last_inbound() + t);

            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat manager cancelled");
                    break;
                }
                _ = ping.tick() => {
                    if self.event_tx.send(HeartbeatEvent::SendPing).await.is_err() {
                        tracing::debug!("Event channel closed, stopping heartbeat");
                        break;
                    }
                }
                () = sleep_until_opt(stale_at) => {
                    let Some(timeout) = self.config.timeout else { continue };
                    let idle = self.state.idle_for();
                    if idle >= timeout {
                        tracing::warn!(
                            idle_ms = u64::try_from(idle.as_millis()).unwrap_or(u64::MAX),
                            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                            "Heartbeat timeout detected"
                        );
                        let _ = self.event_tx.send(HeartbeatEvent::Timeout(idle)).await;
                        break;
                    }
                }
            }
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Error type for heartbeat operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeartbeatError {
    /// No inbound traffic within the timeout.
    #[error("no inbound traffic for {0:?}")]
    Timeout(Duration),
}
