//! Shared helpers for integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use market_stream::application::ports::CloseInfo;
use market_stream::{
    ClientConfig, ClientError, ConnectionStatus, MarketDataClient, MarketEvent, NoopErrorReporter,
    StreamConnector, StreamTransport, TransportError, TransportEvent,
};

/// Far end of a transport handed out by [`MockConnector`].
pub struct Peer {
    /// Frames the client sent.
    pub sent: mpsc::UnboundedReceiver<String>,
    /// Events to deliver to the client.
    pub events: mpsc::Sender<TransportEvent>,
}

impl Peer {
    /// Deliver a text message.
    pub async fn text(&self, text: impl Into<String>) {
        self.events
            .send(TransportEvent::Text(text.into()))
            .await
            .unwrap();
    }

    /// Deliver a close frame.
    pub async fn close(&self, code: u16, reason: &str) {
        self.events
            .send(TransportEvent::Closed(CloseInfo {
                code: Some(code),
                reason: reason.to_string(),
            }))
            .await
            .unwrap();
    }

    /// Everything sent so far.
    pub fn drain_sent(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.sent.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

/// Connector refusing the first `failures` opens and then handing out
/// in-memory transports.
#[derive(Default)]
pub struct MockConnector {
    failures: usize,
    opens: AtomicUsize,
    peers: Mutex<VecDeque<Peer>>,
}

impl MockConnector {
    /// Accept every open.
    pub fn accepting() -> Arc<Self> {
        Self::failing_first(0)
    }

    /// Refuse every open.
    pub fn refusing() -> Arc<Self> {
        Self::failing_first(usize::MAX)
    }

    /// Refuse the first `failures` opens.
    pub fn failing_first(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures,
            ..Self::default()
        })
    }

    /// Number of open attempts.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Take the oldest unclaimed peer.
    pub fn take_peer(&self) -> Peer {
        self.peers.lock().pop_front().expect("no open transport")
    }
}

#[async_trait]
impl StreamConnector for MockConnector {
    async fn open(&self, _url: &str) -> Result<StreamTransport, TransportError> {
        let attempt = self.opens.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(TransportError::Connect {
                message: "connection refused".to_string(),
            });
        }

        let (outbound, sent) = mpsc::unbounded_channel();
        let (events, inbound) = mpsc::channel(256);
        self.peers.lock().push_back(Peer { sent, events });
        Ok(StreamTransport { outbound, inbound })
    }
}

/// Everything a client told its observers.
#[derive(Default)]
pub struct Recorded {
    pub statuses: Mutex<Vec<ConnectionStatus>>,
    pub errors: Mutex<Vec<String>>,
    pub error_kinds: Mutex<Vec<&'static str>>,
    pub events: Mutex<Vec<MarketEvent>>,
}

/// Register recording observers on `client`.
pub fn record(client: &MarketDataClient) -> Arc<Recorded> {
    let recorded = Arc::new(Recorded::default());

    let sink = Arc::clone(&recorded);
    client.on_status_change(move |status| sink.statuses.lock().push(*status));

    let sink = Arc::clone(&recorded);
    client.on_error(move |error: &ClientError| {
        sink.errors.lock().push(error.to_string());
        sink.error_kinds.lock().push(error.kind());
    });

    let sink = Arc::clone(&recorded);
    client.on_message(move |event| sink.events.lock().push(event.clone()));

    recorded
}

/// Client over `connector` with no error reporting.
pub fn client(config: ClientConfig, connector: Arc<MockConnector>) -> MarketDataClient {
    MarketDataClient::new(config, connector, Arc::new(NoopErrorReporter))
}

/// Let spawned tasks run without moving the clock.
pub async fn settle() {
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
}

/// Advance the paused clock in small steps, letting tasks run in between.
pub async fn run_for(duration: Duration) {
    let step = Duration::from_millis(1);
    let mut elapsed = Duration::ZERO;
    while elapsed < duration {
        tokio::time::advance(step).await;
        settle().await;
        elapsed += step;
    }
}

/// A flat JSON tick.
pub fn tick_json(symbol: &str, price: f64, timestamp: i64) -> String {
    format!(r#"{{"symbol":"{symbol}","price":{price},"timestamp":{timestamp}}}"#)
}
