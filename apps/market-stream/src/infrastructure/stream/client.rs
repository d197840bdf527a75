//! Market Data Client
//!
//! Owns one logical connection to a market data provider and keeps it alive:
//! protocol handshake, subscription replay, heartbeat, exponential-backoff
//! reconnection and fan-out of decoded events to observers.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──open ok──▶ Connected
//!       ▲                         │                      │
//!       │                     open failed          lost (code != 1000)
//!  disconnect() /                 ▼                      ▼
//!  close 1000                   Error ◀──exhausted── Reconnecting
//!                                 └────timer fires──────▶┘
//! ```
//!
//! Each session is tagged with a generation number. Callbacks from a session
//! that is no longer current are ignored, so a late event from a cancelled
//! socket can never change state. Observers are always called after the
//! state lock has been released.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::buffer::{DEFAULT_BUFFER_SIZE, MessageBuffer};
use super::codec::{self, CodecError, InboundMessage};
use super::heartbeat::{
    HeartbeatConfig, HeartbeatError, HeartbeatEvent, HeartbeatManager, HeartbeatState,
};
use super::messages::{OutboundMessages, WireProtocol};
use super::observers::{ObserverHandle, ObserverList};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{
    CloseInfo, ErrorContext, ErrorReporter, StreamConnector, StreamTransport, TransportError,
    TransportEvent,
};
use crate::domain::streaming::{ConnectionStatus, MarketEvent};
use crate::domain::subscription::SubscriptionSet;
use crate::infrastructure::config::StreamSettings;
use crate::infrastructure::metrics::{self, DropReason};
use crate::infrastructure::scheduling::DelayedTask;

const COMPONENT: &str = "market_data_client";

// =============================================================================
// Configuration
// =============================================================================

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Provider WebSocket URL.
    pub url: String,
    /// Wire protocol.
    pub protocol: WireProtocol,
    /// Reconnection settings.
    pub reconnect: ReconnectConfig,
    /// Heartbeat settings.
    pub heartbeat: HeartbeatConfig,
    /// Capacity of the recent-event buffer.
    pub buffer_size: usize,
}

impl ClientConfig {
    /// Configuration with defaults for everything but the URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            protocol: WireProtocol::default(),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Build from stream settings.
    #[must_use]
    pub fn from_settings(settings: &StreamSettings) -> Self {
        Self {
            url: settings.url.clone(),
            protocol: settings.protocol,
            reconnect: ReconnectConfig::from_settings(settings),
            heartbeat: HeartbeatConfig::from_settings(settings),
            buffer_size: settings.buffer_size,
        }
    }

    /// Set the wire protocol.
    #[must_use]
    pub const fn with_protocol(mut self, protocol: WireProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Set the reconnection settings.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set the heartbeat settings.
    #[must_use]
    pub const fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Set the buffer capacity.
    #[must_use]
    pub const fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors delivered to error observers and the error reporter.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Opening or using the socket failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An inbound message could not be decoded.
    #[error("decode failed: {0}")]
    Codec(#[from] CodecError),

    /// An outbound message could not be serialised.
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The peer closed the connection abnormally.
    #[error("connection closed (code {code:?}): {reason}")]
    ConnectionClosed {
        /// Close code, if any.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },

    /// The connection went silent.
    #[error(transparent)]
    Heartbeat(#[from] HeartbeatError),

    /// The reconnect budget is spent.
    #[error("maximum reconnection attempts ({attempts}) exceeded")]
    MaxReconnectAttemptsExceeded {
        /// Reconnects attempted.
        attempts: u32,
    },

    /// `connect()` was called outside a Tokio runtime.
    #[error("no Tokio runtime available")]
    NoRuntime,
}

impl ClientError {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Transport(TransportError::Connect { .. }) => "connect",
            Self::Transport(_) => "transport",
            Self::Codec(_) => "decode",
            Self::Serialize(_) => "serialize",
            Self::ConnectionClosed { .. } => "connection_closed",
            Self::Heartbeat(_) => "heartbeat_timeout",
            Self::MaxReconnectAttemptsExceeded { .. } => "max_reconnect_attempts",
            Self::NoRuntime => "no_runtime",
        }
    }
}

/// Snapshot of client state for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientStats {
    /// Current status.
    pub status: ConnectionStatus,
    /// Reconnect attempts since the last successful connection.
    pub reconnect_attempts: u32,
    /// Events held in the buffer.
    pub buffered_messages: usize,
    /// Subscribed canonical symbols.
    pub subscriptions: Vec<String>,
}

// =============================================================================
// State
// =============================================================================

struct Session {
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<String>>,
    cancel: CancellationToken,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct ClientState {
    status: ConnectionStatus,
    policy: ReconnectPolicy,
    subscriptions: SubscriptionSet,
    buffer: MessageBuffer<MarketEvent>,
    messages: OutboundMessages,
    session: Option<Session>,
    reconnect_timer: Option<DelayedTask>,
    generation: u64,
}

impl ClientState {
    fn set_status(&mut self, status: ConnectionStatus) -> Option<ConnectionStatus> {
        if self.status == status {
            return None;
        }
        tracing::info!(from = %self.status, to = %status, "Connection status changed");
        self.status = status;
        metrics::set_connection_status(status);
        Some(status)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.generation == generation)
    }

    fn outbound(&self) -> Option<&mpsc::UnboundedSender<String>> {
        if !self.status.is_connected() {
            return None;
        }
        self.session.as_ref().and_then(|s| s.outbound.as_ref())
    }

    fn send_all(&self, frames: Vec<String>) -> bool {
        let Some(outbound) = self.outbound() else {
            return false;
        };
        frames.into_iter().all(|frame| outbound.send(frame).is_ok())
    }
}

/// Notifications gathered under the lock and delivered after it is released.
#[derive(Default)]
struct Effects {
    statuses: Vec<ConnectionStatus>,
    errors: Vec<(ClientError, ErrorContext)>,
    events: Vec<MarketEvent>,
    /// Session the events came from; undelivered events are dropped once
    /// it stops being current.
    source: Option<u64>,
}

impl Effects {
    fn status(&mut self, changed: Option<ConnectionStatus>) {
        self.statuses.extend(changed);
    }

    fn error(&mut self, error: impl Into<ClientError>, operation: &'static str) {
        self.errors
            .push((error.into(), ErrorContext::new(COMPONENT, operation)));
    }
}

struct ClientInner {
    config: ClientConfig,
    connector: Arc<dyn StreamConnector>,
    reporter: Arc<dyn ErrorReporter>,
    state: Mutex<ClientState>,
    message_observers: ObserverList<MarketEvent>,
    status_observers: ObserverList<ConnectionStatus>,
    error_observers: ObserverList<ClientError>,
}

// =============================================================================
// Client
// =============================================================================

/// Streaming market data client.
///
/// Cheap to clone; clones share the same connection. The connection is
/// cancelled when the last clone is dropped.
#[derive(Clone)]
pub struct MarketDataClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for MarketDataClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketDataClient")
            .field("url", &self.inner.config.url)
            .field("protocol", &self.inner.config.protocol)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl MarketDataClient {
    /// Create a disconnected client.
    #[must_use]
    pub fn new(
        config: ClientConfig,
        connector: Arc<dyn StreamConnector>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        let state = ClientState {
            status: ConnectionStatus::Disconnected,
            policy: ReconnectPolicy::new(config.reconnect.clone()),
            subscriptions: SubscriptionSet::new(config.protocol.symbol_mapping()),
            buffer: MessageBuffer::new(config.buffer_size),
            messages: OutboundMessages::new(config.protocol),
            session: None,
            reconnect_timer: None,
            generation: 0,
        };

        Self {
            inner: Arc::new(ClientInner {
                config,
                connector,
                reporter,
                state: Mutex::new(state),
                message_observers: ObserverList::new("message"),
                status_observers: ObserverList::new("status"),
                error_observers: ObserverList::new("error"),
            }),
        }
    }

    /// Start connecting.
    ///
    /// Does nothing while connecting, connected or waiting to reconnect.
    /// From `Disconnected` or `Error` this starts a fresh attempt budget.
    pub fn connect(&self) {
        let mut fx = Effects::default();
        {
            let mut state = self.inner.state.lock();
            if state.status.is_active() {
                tracing::debug!(status = %state.status, "connect() ignored");
                return;
            }

            if tokio::runtime::Handle::try_current().is_err() {
                fx.status(state.set_status(ConnectionStatus::Error));
                fx.error(ClientError::NoRuntime, "connect");
            } else {
                state.policy.reset();
                state.reconnect_timer = None;
                fx.status(state.set_status(ConnectionStatus::Connecting));
                self.inner.start_session(&mut state);
            }
        }
        self.inner.dispatch(fx);
    }

    /// Close the connection and cancel every pending timer.
    ///
    /// Safe to call in any state, any number of times.
    pub fn disconnect(&self) {
        let mut fx = Effects::default();
        {
            let mut state = self.inner.state.lock();
            state.reconnect_timer = None;
            state.session = None;
            state.policy.reset();
            fx.status(state.set_status(ConnectionStatus::Disconnected));
        }
        self.inner.dispatch(fx);
    }

    /// Record a subscription and send it if connected.
    ///
    /// Returns whether the subscription is live on the wire. The symbol is
    /// recorded either way and replayed on the next connection.
    pub fn subscribe(&self, symbol: &str) -> bool {
        let mut fx = Effects::default();
        let sent = {
            let mut state = self.inner.state.lock();
            let (provider, added) = state.subscriptions.insert(symbol);
            metrics::set_subscriptions(state.subscriptions.len());

            if !added {
                tracing::debug!(symbol, "Already subscribed");
                state.outbound().is_some()
            } else if state.outbound().is_none() {
                tracing::debug!(symbol, "Subscription recorded, not connected");
                false
            } else {
                match state.messages.subscribe(&provider) {
                    Ok(frames) => state.send_all(frames),
                    Err(e) => {
                        fx.error(e, "subscribe");
                        false
                    }
                }
            }
        };
        self.inner.dispatch(fx);
        sent
    }

    /// Remove a subscription and send the unsubscribe if connected.
    ///
    /// Returns `false` if the symbol was not subscribed or nothing was sent.
    pub fn unsubscribe(&self, symbol: &str) -> bool {
        let mut fx = Effects::default();
        let sent = {
            let mut state = self.inner.state.lock();
            let Some(provider) = state.subscriptions.remove(symbol) else {
                return false;
            };
            metrics::set_subscriptions(state.subscriptions.len());

            if state.outbound().is_none() {
                false
            } else {
                match state.messages.unsubscribe(&provider) {
                    Ok(frames) => state.send_all(frames),
                    Err(e) => {
                        fx.error(e, "unsubscribe");
                        false
                    }
                }
            }
        };
        self.inner.dispatch(fx);
        sent
    }

    /// Serialise `message` as JSON, frame it for the protocol and send it.
    ///
    /// Returns `false` when not connected or serialisation fails.
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> bool {
        match serde_json::to_string(message) {
            Ok(payload) => {
                let framed = self.inner.state.lock().messages.wrap(&payload);
                self.send_text(framed)
            }
            Err(e) => {
                let mut fx = Effects::default();
                fx.error(e, "send");
                self.inner.dispatch(fx);
                false
            }
        }
    }

    /// Send raw text as-is. Returns `false` when not connected.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        let state = self.inner.state.lock();
        state
            .outbound()
            .is_some_and(|outbound| outbound.send(text.into()).is_ok())
    }

    /// Register a market event observer.
    pub fn on_message<F>(&self, observer: F) -> ObserverHandle
    where
        F: Fn(&MarketEvent) + Send + Sync + 'static,
    {
        self.inner.message_observers.register(observer)
    }

    /// Register a status observer. Called once per actual change.
    pub fn on_status_change<F>(&self, observer: F) -> ObserverHandle
    where
        F: Fn(&ConnectionStatus) + Send + Sync + 'static,
    {
        self.inner.status_observers.register(observer)
    }

    /// Register an error observer.
    pub fn on_error<F>(&self, observer: F) -> ObserverHandle
    where
        F: Fn(&ClientError) + Send + Sync + 'static,
    {
        self.inner.error_observers.register(observer)
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.inner.state.lock().status
    }

    /// Whether the socket is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// Reconnect attempts since the last successful connection.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.state.lock().policy.attempt_count()
    }

    /// Subscribed canonical symbols.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.state.lock().subscriptions.symbols()
    }

    /// Events held in the buffer.
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.inner.state.lock().buffer.len()
    }

    /// Drop buffered events.
    pub fn clear_buffer(&self) {
        self.inner.state.lock().buffer.clear();
        metrics::set_buffered_messages(0);
    }

    /// Take buffered events, oldest first.
    pub fn drain_buffer(&self) -> Vec<MarketEvent> {
        let events = self.inner.state.lock().buffer.drain();
        metrics::set_buffered_messages(0);
        events
    }

    /// Snapshot for health reporting.
    #[must_use]
    pub fn stats(&self) -> ClientStats {
        let state = self.inner.state.lock();
        ClientStats {
            status: state.status,
            reconnect_attempts: state.policy.attempt_count(),
            buffered_messages: state.buffer.len(),
            subscriptions: state.subscriptions.symbols(),
        }
    }

    /// The wire protocol in use.
    #[must_use]
    pub fn protocol(&self) -> WireProtocol {
        self.inner.config.protocol
    }
}

// =============================================================================
// Session handling
// =============================================================================

impl ClientInner {
    fn start_session(self: &Arc<Self>, state: &mut ClientState) {
        state.generation += 1;
        let generation = state.generation;
        let cancel = CancellationToken::new();
        state.session = Some(Session {
            generation,
            outbound: None,
            cancel: cancel.clone(),
        });

        tokio::spawn(run_session(
            Arc::downgrade(self),
            Arc::clone(&self.connector),
            self.config.url.clone(),
            self.config.heartbeat.clone(),
            generation,
            cancel,
        ));
    }

    fn on_open(&self, generation: u64, outbound: mpsc::UnboundedSender<String>) -> bool {
        let mut fx = Effects::default();
        {
            let mut state = self.state.lock();
            if !state.is_current(generation) {
                return false;
            }

            state.policy.reset();
            state.messages = OutboundMessages::new(self.config.protocol);

            let mut frames = match state.messages.handshake() {
                Ok(frames) => frames,
                Err(e) => {
                    fx.error(e, "handshake");
                    Vec::new()
                }
            };
            for (symbol, provider) in state.subscriptions.iter() {
                match state.messages.subscribe(provider) {
                    Ok(more) => frames.extend(more),
                    Err(e) => {
                        tracing::warn!(symbol, error = %e, "Failed to encode subscription");
                    }
                }
            }
            let replayed = state.subscriptions.len();

            for frame in frames {
                if outbound.send(frame).is_err() {
                    break;
                }
            }
            if let Some(session) = state.session.as_mut() {
                session.outbound = Some(outbound);
            }

            fx.status(state.set_status(ConnectionStatus::Connected));
            tracing::info!(
                url = %self.config.url,
                protocol = %self.config.protocol,
                replayed,
                "Connected to market stream"
            );
        }
        self.dispatch(fx);
        true
    }

    fn on_open_failed(self: &Arc<Self>, generation: u64, error: TransportError) {
        let mut fx = Effects::default();
        {
            let mut state = self.state.lock();
            if !state.is_current(generation) {
                return;
            }
            tracing::warn!(error = %error, "Failed to open market stream");
            state.session = None;
            fx.status(state.set_status(ConnectionStatus::Error));
            fx.error(error, "connect");
            self.schedule_reconnect(&mut state, &mut fx);
        }
        self.dispatch(fx);
    }

    fn on_closed(self: &Arc<Self>, generation: u64, info: CloseInfo) {
        if !info.is_normal() {
            self.on_session_lost(
                generation,
                ClientError::ConnectionClosed {
                    code: info.code,
                    reason: info.reason,
                },
            );
            return;
        }

        let mut fx = Effects::default();
        {
            let mut state = self.state.lock();
            if !state.is_current(generation) {
                return;
            }
            tracing::info!(reason = %info.reason, "Market stream closed normally");
            state.session = None;
            state.reconnect_timer = None;
            state.policy.reset();
            fx.status(state.set_status(ConnectionStatus::Disconnected));
        }
        self.dispatch(fx);
    }

    fn on_session_lost(self: &Arc<Self>, generation: u64, error: ClientError) {
        let mut fx = Effects::default();
        {
            let mut state = self.state.lock();
            if !state.is_current(generation) {
                return;
            }
            tracing::warn!(error = %error, "Market stream connection lost");
            state.session = None;
            fx.error(error, "session");
            if state.policy.should_retry() {
                fx.status(state.set_status(ConnectionStatus::Reconnecting));
            }
            self.schedule_reconnect(&mut state, &mut fx);
        }
        self.dispatch(fx);
    }

    fn schedule_reconnect(self: &Arc<Self>, state: &mut ClientState, fx: &mut Effects) {
        if let Some(delay) = state.policy.next_delay() {
            let attempt = state.policy.attempt_count();
            tracing::info!(
                attempt,
                max_attempts = state.policy.max_attempts(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Scheduling reconnect"
            );
            metrics::record_reconnect();

            let client = Arc::downgrade(self);
            state.reconnect_timer = Some(DelayedTask::spawn(delay, move |token| {
                if let Some(inner) = client.upgrade() {
                    inner.on_reconnect_timer(&token);
                }
            }));
        } else {
            let attempts = state.policy.attempt_count();
            tracing::error!(attempts, "Reconnect budget exhausted");
            state.reconnect_timer = None;
            fx.status(state.set_status(ConnectionStatus::Error));
            fx.error(
                ClientError::MaxReconnectAttemptsExceeded { attempts },
                "reconnect",
            );
        }
    }

    fn on_reconnect_timer(self: &Arc<Self>, token: &CancellationToken) {
        let mut fx = Effects::default();
        {
            let mut state = self.state.lock();
            if token.is_cancelled() {
                return;
            }
            state.reconnect_timer = None;
            fx.status(state.set_status(ConnectionStatus::Reconnecting));
            self.start_session(&mut state);
        }
        self.dispatch(fx);
    }

    fn on_text(&self, generation: u64, text: &str) {
        let mut fx = Effects {
            source: Some(generation),
            ..Effects::default()
        };
        {
            let mut state = self.state.lock();
            if !state.is_current(generation) {
                return;
            }

            for decoded in codec::decode(text) {
                match decoded {
                    Ok(InboundMessage::Event(event)) => {
                        let Some(canonical) =
                            state.subscriptions.resolve(event.symbol()).map(str::to_owned)
                        else {
                            tracing::trace!(
                                symbol = event.symbol(),
                                "Dropping unsubscribed symbol"
                            );
                            metrics::record_message_dropped(DropReason::Unsubscribed);
                            continue;
                        };
                        let event = event.with_symbol(canonical);
                        metrics::record_message_received(match event {
                            MarketEvent::Tick(_) => "tick",
                            MarketEvent::Candle { .. } => "candle",
                        });
                        state.buffer.push(event.clone());
                        fx.events.push(event);
                    }
                    Ok(InboundMessage::Heartbeat(frame)) => {
                        let outbound = state.session.as_ref().and_then(|s| s.outbound.as_ref());
                        if let Some(Err(e)) = outbound.map(|o| o.send(frame)) {
                            tracing::debug!(error = %e, "Heartbeat echo not sent");
                        }
                    }
                    Ok(InboundMessage::Control(kind)) => {
                        tracing::trace!(kind = %kind, "Control message");
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "Dropping malformed message");
                        metrics::record_message_dropped(DropReason::DecodeError);
                        fx.error(e, "decode");
                    }
                }
            }
            metrics::set_buffered_messages(state.buffer.len());
        }
        self.dispatch(fx);
    }

    fn send_heartbeat(&self, generation: u64) {
        let mut fx = Effects::default();
        {
            let state = self.state.lock();
            if !state.is_current(generation) {
                return;
            }
            match state.messages.heartbeat() {
                Ok(frame) => {
                    state.send_all(vec![frame]);
                }
                Err(e) => fx.error(e, "heartbeat"),
            }
        }
        self.dispatch(fx);
    }

    fn dispatch(&self, fx: Effects) {
        for status in &fx.statuses {
            self.status_observers.notify(status);
        }
        for (error, context) in &fx.errors {
            metrics::record_error(context.component, error.kind());
            self.reporter.report(error, context);
            self.error_observers.notify(error);
        }
        // An observer already running when the session ends still sees its
        // event; the rest of the batch is dropped.
        for (delivered, event) in fx.events.iter().enumerate() {
            if fx.source.is_some_and(|g| !self.state.lock().is_current(g)) {
                tracing::debug!(
                    dropped = fx.events.len() - delivered,
                    "Session ended, dropping undelivered events"
                );
                metrics::record_message_dropped(DropReason::SessionEnded);
                break;
            }
            self.message_observers.notify(event);
        }
    }
}

async fn run_session(
    client: Weak<ClientInner>,
    connector: Arc<dyn StreamConnector>,
    url: String,
    heartbeat: HeartbeatConfig,
    generation: u64,
    cancel: CancellationToken,
) {
    let opened = tokio::select! {
        biased;
        () = cancel.cancelled() => return,
        opened = connector.open(&url) => opened,
    };

    let StreamTransport {
        outbound,
        mut inbound,
    } = match opened {
        Ok(transport) => transport,
        Err(e) => {
            if let Some(inner) = client.upgrade() {
                inner.on_open_failed(generation, e);
            }
            return;
        }
    };

    let Some(inner) = client.upgrade() else {
        return;
    };
    if !inner.on_open(generation, outbound) {
        return;
    }
    drop(inner);

    let heartbeat_state = Arc::new(HeartbeatState::new());
    let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(10);
    let heartbeat_cancel = cancel.child_token();
    tokio::spawn(
        HeartbeatManager::new(
            heartbeat,
            Arc::clone(&heartbeat_state),
            heartbeat_tx,
            heartbeat_cancel.clone(),
        )
        .run(),
    );
    let mut heartbeat_alive = true;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = heartbeat_rx.recv(), if heartbeat_alive => {
                let Some(inner) = client.upgrade() else { break };
                match event {
                    Some(HeartbeatEvent::SendPing) => inner.send_heartbeat(generation),
                    Some(HeartbeatEvent::Timeout(idle)) => {
                        inner.on_session_lost(generation, HeartbeatError::Timeout(idle).into());
                        break;
                    }
                    None => heartbeat_alive = false,
                }
            }
            event = inbound.recv() => {
                let Some(inner) = client.upgrade() else { break };
                match event {
                    Some(TransportEvent::Text(text)) => {
                        heartbeat_state.record_inbound();
                        inner.on_text(generation, &text);
                    }
                    Some(TransportEvent::Closed(info)) => {
                        inner.on_closed(generation, info);
                        break;
                    }
                    Some(TransportEvent::Error(e)) => {
                        inner.on_session_lost(generation, e.into());
                        break;
                    }
                    None => {
                        inner.on_session_lost(
                            generation,
                            ClientError::ConnectionClosed {
                                code: None,
                                reason: "transport ended".to_string(),
                            },
                        );
                        break;
                    }
                }
            }
        }
    }

    heartbeat_cancel.cancel();
    tracing::debug!(generation, "Session task stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::application::ports::NoopErrorReporter;

    struct RefusingConnector;

    #[async_trait]
    impl StreamConnector for RefusingConnector {
        async fn open(&self, _url: &str) -> Result<StreamTransport, TransportError> {
            Err(TransportError::Connect {
                message: "refused".to_string(),
            })
        }
    }

    fn client() -> MarketDataClient {
        MarketDataClient::new(
            ClientConfig::new("wss://example.test/ws"),
            Arc::new(RefusingConnector),
            Arc::new(NoopErrorReporter),
        )
    }

    #[test]
    fn config_builders() {
        let config = ClientConfig::new("wss://x")
            .with_protocol(WireProtocol::Framed)
            .with_buffer_size(5)
            .with_heartbeat(HeartbeatConfig {
                interval: Duration::from_secs(5),
                timeout: Some(Duration::from_secs(15)),
            });
        assert_eq!(config.protocol, WireProtocol::Framed);
        assert_eq!(config.buffer_size, 5);
        assert_eq!(config.heartbeat.timeout, Some(Duration::from_secs(15)));
        assert_eq!(config.reconnect.max_attempts, 10);
    }

    #[test]
    fn subscribe_before_connect_records_and_returns_false() {
        let client = client();
        assert!(!client.subscribe("EUR/USD"));
        assert!(!client.subscribe("EUR/USD"));
        assert_eq!(client.subscriptions(), vec!["EUR/USD"]);
        assert!(!client.unsubscribe("EUR/USD"));
        assert!(client.subscriptions().is_empty());
        assert!(!client.unsubscribe("EUR/USD"));
    }

    #[test]
    fn send_without_connection_returns_false() {
        let client = client();
        assert!(!client.send(&serde_json::json!({"type": "ping"})));
        assert!(!client.send_text("raw"));
    }

    #[test]
    fn connect_without_runtime_reports_error() {
        let client = client();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        client.on_error(move |e| sink.lock().push(e.kind()));

        client.connect();

        assert_eq!(client.status(), ConnectionStatus::Error);
        assert_eq!(*errors.lock(), vec!["no_runtime"]);
    }

    #[test]
    fn disconnect_is_idempotent() {
        let client = client();
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&statuses);
        client.on_status_change(move |s| sink.lock().push(*s));

        client.disconnect();
        client.disconnect();

        assert!(statuses.lock().is_empty());
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn error_kinds() {
        assert_eq!(
            ClientError::MaxReconnectAttemptsExceeded { attempts: 3 }.kind(),
            "max_reconnect_attempts"
        );
        assert_eq!(
            ClientError::from(TransportError::Io {
                message: String::new()
            })
            .kind(),
            "transport"
        );
    }
}
