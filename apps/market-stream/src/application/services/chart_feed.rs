//! Chart Feed Service
//!
//! Wires one chart symbol through the pipeline:
//!
//! ```text
//! MarketDataClient ──► UpdateBatcher ──► PriceAnimator + CandleSeries ──► render_frame()
//!        │ status                              ▲
//!        └──────────► PollingFallback ─────────┘
//! ```
//!
//! Polling starts when the stream reports `Disconnected` or `Error` and
//! stops once it reports `Connected`. A fallback that gave up after
//! repeated failures is not restarted.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;

use crate::application::ports::{CandleHistoryPort, MarketApiError};
use crate::domain::animation::{AnimatorConfig, PriceAnimator};
use crate::domain::streaming::{
    Candle, CandleSeries, ConnectionStatus, DEFAULT_MAX_CANDLES, DataQuality, MarketEvent,
    Timeframe,
};
use crate::infrastructure::batching::{BatcherConfig, UpdateBatcher};
use crate::infrastructure::polling::{PollEvent, PollingFallback};
use crate::infrastructure::stream::{MarketDataClient, ObserverHandle};

/// Chart feed configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartFeedConfig {
    /// Canonical chart symbol.
    pub symbol: String,
    /// Candle timeframe for the series.
    pub timeframe: Timeframe,
    /// Price animation settings.
    pub animator: AnimatorConfig,
    /// Update batching settings.
    pub batcher: BatcherConfig,
    /// Candles retained in the series.
    pub max_candles: usize,
}

impl ChartFeedConfig {
    /// Defaults for `symbol`.
    #[must_use]
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe: Timeframe::default(),
            animator: AnimatorConfig::default(),
            batcher: BatcherConfig::default(),
            max_candles: DEFAULT_MAX_CANDLES,
        }
    }

    /// Set the animator settings.
    #[must_use]
    pub const fn with_animator(mut self, animator: AnimatorConfig) -> Self {
        self.animator = animator;
        self
    }

    /// Set the batching settings.
    #[must_use]
    pub const fn with_batcher(mut self, batcher: BatcherConfig) -> Self {
        self.batcher = batcher;
        self
    }

    /// Set the candle timeframe.
    #[must_use]
    pub const fn with_timeframe(mut self, timeframe: Timeframe) -> Self {
        self.timeframe = timeframe;
        self
    }
}

/// What one render pass should draw.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChartFrame {
    /// Animated price.
    pub price: f64,
    /// Whether the price is still converging.
    pub animating: bool,
    /// Candles in the series.
    pub candles_len: usize,
    /// Most recent candle.
    pub last_candle: Option<Candle>,
}

struct ChartState {
    animator: PriceAnimator,
    series: CandleSeries,
    has_price: bool,
}

impl ChartState {
    /// The first known price is shown directly; later ones animate.
    fn show_price(&mut self, price: f64) {
        if self.has_price {
            self.animator.set_target(price);
        } else {
            self.animator.set_direct(price);
            self.has_price = true;
        }
    }

    fn apply(&mut self, event: &MarketEvent) {
        match event {
            MarketEvent::Tick(tick) => {
                self.show_price(tick.price);
                self.series.apply_tick(tick);
            }
            MarketEvent::Candle { candle, .. } => self.series.apply_candle(*candle),
        }
    }
}

/// Real-time feed for one chart.
pub struct ChartFeed {
    config: ChartFeedConfig,
    client: MarketDataClient,
    polling: Option<Arc<PollingFallback>>,
    chart: Arc<Mutex<ChartState>>,
    batcher: Arc<UpdateBatcher<MarketEvent>>,
    handles: Mutex<Option<Vec<ObserverHandle>>>,
}

impl ChartFeed {
    /// Create an idle feed reading from `client`.
    #[must_use]
    pub fn new(config: ChartFeedConfig, client: MarketDataClient) -> Self {
        let chart = Arc::new(Mutex::new(ChartState {
            animator: PriceAnimator::new(config.animator),
            series: CandleSeries::new(config.timeframe, config.max_candles),
            has_price: false,
        }));

        let sink = Arc::clone(&chart);
        let batcher = Arc::new(UpdateBatcher::new(config.batcher, move |batch: Vec<MarketEvent>| {
            let mut chart = sink.lock();
            for event in &batch {
                chart.apply(event);
            }
        }));

        Self {
            config,
            client,
            polling: None,
            chart,
            batcher,
            handles: Mutex::new(None),
        }
    }

    /// Poll `polling` while the stream is unavailable.
    #[must_use]
    pub fn with_polling(mut self, polling: PollingFallback) -> Self {
        self.polling = Some(Arc::new(polling));
        self
    }

    /// Register observers, subscribe the chart symbol and connect.
    ///
    /// Returns `false` if already started. Must be called from within a
    /// Tokio runtime.
    pub fn start(&self) -> bool {
        let mut handles = self.handles.lock();
        if handles.is_some() {
            return false;
        }

        let mut registered = Vec::with_capacity(3);
        let symbol = self.config.symbol.clone();
        let batcher: Weak<UpdateBatcher<MarketEvent>> = Arc::downgrade(&self.batcher);
        registered.push(self.client.on_message(move |event| {
            if event.symbol() != symbol {
                return;
            }
            if let Some(batcher) = batcher.upgrade() {
                batcher.add(event.clone());
            }
        }));

        if let Some(polling) = &self.polling {
            let chart = Arc::clone(&self.chart);
            registered.push(polling.on_event(move |event| on_poll_event(&chart, event)));

            let polling = Arc::downgrade(polling);
            let chart = Arc::clone(&self.chart);
            registered.push(self.client.on_status_change(move |status| {
                if let Some(polling) = polling.upgrade() {
                    on_status(&polling, &chart, *status);
                }
            }));
        }

        *handles = Some(registered);
        drop(handles);

        tracing::info!(symbol = %self.config.symbol, "Starting chart feed");
        self.client.subscribe(&self.config.symbol);
        self.client.connect();
        true
    }

    /// Tear everything down: observers, subscription, connection, polling
    /// and pending updates. Safe when idle.
    pub fn stop(&self) {
        let Some(handles) = self.handles.lock().take() else {
            return;
        };
        for handle in &handles {
            handle.unregister();
        }

        self.client.unsubscribe(&self.config.symbol);
        self.client.disconnect();
        if let Some(polling) = &self.polling {
            polling.stop();
        }
        self.batcher.clear();
        tracing::info!(symbol = %self.config.symbol, "Stopped chart feed");
    }

    /// Replace the series with history from `source` and show its last
    /// close. Returns the number of candles loaded.
    ///
    /// # Errors
    ///
    /// Returns the source's error; the series is left untouched.
    pub async fn load_history(
        &self,
        source: &dyn CandleHistoryPort,
        limit: usize,
    ) -> Result<usize, MarketApiError> {
        let candles = source
            .fetch_candles(&self.config.symbol, self.config.timeframe, limit)
            .await?;

        let (loaded, last) = {
            let mut chart = self.chart.lock();
            chart.series.set_initial(candles);
            let last = chart.series.last().copied();
            if let Some(last) = last {
                chart.animator.set_direct(last.close);
                chart.has_price = true;
            }
            (chart.series.len(), last)
        };

        if let (Some(polling), Some(last)) = (&self.polling, last) {
            polling.set_last_timestamp(last.timestamp);
        }
        tracing::debug!(symbol = %self.config.symbol, loaded, "Loaded chart history");
        Ok(loaded)
    }

    /// Advance the animation one frame and describe what to draw.
    pub fn render_frame(&self) -> ChartFrame {
        let mut chart = self.chart.lock();
        let price = chart.animator.update();
        ChartFrame {
            price,
            animating: chart.animator.is_active(),
            candles_len: chart.series.len(),
            last_candle: chart.series.last().copied(),
        }
    }

    /// Deliver batched updates now.
    pub fn flush(&self) {
        self.batcher.flush();
    }

    /// Whether the feed is started.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handles.lock().is_some()
    }

    /// Whether the polling fallback is running.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.polling.as_ref().is_some_and(|p| p.is_active())
    }

    /// Snapshot of the candle series.
    #[must_use]
    pub fn candles(&self) -> Vec<Candle> {
        self.chart.lock().series.candles().to_vec()
    }

    /// Number of candles held.
    #[must_use]
    pub fn candle_count(&self) -> usize {
        self.chart.lock().series.len()
    }

    /// Quality scores of the candle series as of `now_ms`.
    #[must_use]
    pub fn quality(&self, now_ms: i64) -> DataQuality {
        DataQuality::assess(self.chart.lock().series.candles(), now_ms)
    }

    /// The chart symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.config.symbol
    }

    /// The streaming client.
    #[must_use]
    pub const fn client(&self) -> &MarketDataClient {
        &self.client
    }
}

impl Drop for ChartFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ChartFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChartFeed")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

fn on_status(polling: &PollingFallback, chart: &Mutex<ChartState>, status: ConnectionStatus) {
    match status {
        ConnectionStatus::Connected => polling.stop(),
        ConnectionStatus::Disconnected | ConnectionStatus::Error => {
            if polling.is_active() || polling.is_exhausted() {
                return;
            }
            if tokio::runtime::Handle::try_current().is_err() {
                tracing::warn!("No Tokio runtime; polling fallback not started");
                return;
            }
            if polling.last_timestamp().is_none()
                && let Some(ts) = chart.lock().series.last_timestamp()
            {
                polling.set_last_timestamp(ts);
            }
            polling.start();
        }
        ConnectionStatus::Connecting | ConnectionStatus::Reconnecting => {}
    }
}

fn on_poll_event(chart: &Mutex<ChartState>, event: &PollEvent) {
    match event {
        PollEvent::Candles { candles, .. } => {
            let mut chart = chart.lock();
            chart.series.merge(candles.iter().copied());
            if let Some(last) = chart.series.last().map(|c| c.close) {
                chart.show_price(last);
            }
        }
        PollEvent::Error(e) => tracing::debug!(error = %e, "Polling fallback error"),
        PollEvent::MaxAttemptsReached { attempts } => {
            tracing::warn!(attempts, "Polling fallback exhausted");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::application::ports::{
        MockCandleHistoryPort, NoopErrorReporter, StreamConnector, StreamTransport,
        TransportError, TransportEvent,
    };
    use crate::infrastructure::polling::PollingConfig;
    use crate::infrastructure::stream::ClientConfig;

    type Peer = (
        mpsc::UnboundedReceiver<String>,
        mpsc::Sender<TransportEvent>,
    );

    /// Fails the first `failures` opens, then hands out channel transports.
    #[derive(Default)]
    struct ScriptedConnector {
        failures: AtomicUsize,
        opens: AtomicUsize,
        peers: Mutex<VecDeque<Peer>>,
    }

    impl ScriptedConnector {
        fn failing(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failures: AtomicUsize::new(failures),
                ..Self::default()
            })
        }

        fn peer(&self) -> Peer {
            self.peers.lock().pop_back().unwrap()
        }
    }

    #[async_trait]
    impl StreamConnector for ScriptedConnector {
        async fn open(&self, _url: &str) -> Result<StreamTransport, TransportError> {
            let attempt = self.opens.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures.load(Ordering::SeqCst) {
                return Err(TransportError::Connect {
                    message: "refused".to_string(),
                });
            }
            let (outbound, outbound_rx) = mpsc::unbounded_channel();
            let (tx, inbound) = mpsc::channel(64);
            self.peers.lock().push_back((outbound_rx, tx));
            Ok(StreamTransport { outbound, inbound })
        }
    }

    fn client(connector: Arc<ScriptedConnector>) -> MarketDataClient {
        MarketDataClient::new(
            ClientConfig::new("wss://example.test/ws"),
            connector,
            Arc::new(NoopErrorReporter),
        )
    }

    fn tick(price: f64, timestamp: i64) -> TransportEvent {
        TransportEvent::Text(format!(
            r#"{{"symbol":"EUR/USD","price":{price},"timestamp":{timestamp}}}"#
        ))
    }

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    async fn run_for(duration: Duration) {
        let step = Duration::from_millis(10);
        let mut elapsed = Duration::ZERO;
        while elapsed < duration {
            tokio::time::advance(step).await;
            settle().await;
            elapsed += step;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_drive_animation_and_series() {
        let connector = ScriptedConnector::failing(0);
        let feed = ChartFeed::new(ChartFeedConfig::new("EUR/USD"), client(Arc::clone(&connector)));

        assert!(feed.start());
        assert!(!feed.start());
        settle().await;
        assert!(feed.client().is_connected());

        let (mut sent, inbound) = connector.peer();
        assert_eq!(
            sent.recv().await.unwrap(),
            r#"{"type":"subscribe","symbol":"EUR/USD"}"#
        );

        inbound.send(tick(1.08, 1_700_000_000_000)).await.unwrap();
        settle().await;
        run_for(Duration::from_millis(20)).await;

        let frame = feed.render_frame();
        assert!((frame.price - 1.08).abs() < 1e-12);
        assert!(!frame.animating);
        assert_eq!(frame.candles_len, 1);

        inbound.send(tick(1.085, 1_700_000_001_000)).await.unwrap();
        settle().await;
        run_for(Duration::from_millis(20)).await;

        let frame = feed.render_frame();
        assert!((frame.price - 1.081_387_5).abs() < 1e-9, "{}", frame.price);
        assert!(frame.animating);
        let last = frame.last_candle.unwrap();
        assert!((last.close - 1.085).abs() < 1e-12);
        assert!((last.high - 1.085).abs() < 1e-12);

        feed.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn other_symbols_are_ignored() {
        let connector = ScriptedConnector::failing(0);
        let feed = ChartFeed::new(ChartFeedConfig::new("EUR/USD"), client(Arc::clone(&connector)));
        feed.start();
        feed.client().subscribe("BTC/USD");
        settle().await;

        let (_sent, inbound) = connector.peer();
        inbound
            .send(TransportEvent::Text(
                r#"{"symbol":"BTC/USD","price":43000.0,"timestamp":1700000000000}"#.to_string(),
            ))
            .await
            .unwrap();
        settle().await;
        feed.flush();

        assert_eq!(feed.render_frame().candles_len, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_while_stream_is_down() {
        let connector = ScriptedConnector::failing(1);
        let mut source = MockCandleHistoryPort::new();
        source
            .expect_fetch_candles()
            .returning(|_, _, _| Ok(vec![Candle::from_price(1_700_000_000_000, 1.09, 0.0)]));
        let polling = PollingFallback::new(PollingConfig::new("EUR/USD"), Arc::new(source));

        let feed = ChartFeed::new(ChartFeedConfig::new("EUR/USD"), client(Arc::clone(&connector)))
            .with_polling(polling);
        feed.start();
        settle().await;

        assert_eq!(feed.client().status(), ConnectionStatus::Error);
        assert!(feed.is_polling());
        let frame = feed.render_frame();
        assert_eq!(frame.candles_len, 1);
        assert!((frame.price - 1.09).abs() < 1e-12);

        run_for(Duration::from_millis(1_100)).await;
        assert!(feed.client().is_connected());
        assert!(!feed.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_polling_is_not_restarted() {
        let connector = ScriptedConnector::failing(usize::MAX);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut source = MockCandleHistoryPort::new();
        source.expect_fetch_candles().returning(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(MarketApiError::Status { status: 503 })
        });
        let polling = PollingFallback::new(PollingConfig::new("EUR/USD"), Arc::new(source));

        let feed = ChartFeed::new(ChartFeedConfig::new("EUR/USD"), client(connector))
            .with_polling(polling);
        feed.start();
        settle().await;
        run_for(Duration::from_secs(60)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!feed.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn history_seeds_series_and_price() {
        let connector = ScriptedConnector::failing(0);
        let feed = ChartFeed::new(ChartFeedConfig::new("EUR/USD"), client(connector));

        let mut source = MockCandleHistoryPort::new();
        source.expect_fetch_candles().returning(|_, _, limit| {
            assert_eq!(limit, 50);
            Ok(vec![
                Candle::from_price(120_000, 1.2, 0.0),
                Candle::from_price(60_000, 1.1, 0.0),
            ])
        });

        assert_eq!(feed.load_history(&source, 50).await.unwrap(), 2);
        let frame = feed.render_frame();
        assert!((frame.price - 1.2).abs() < 1e-12);
        assert_eq!(frame.last_candle.unwrap().timestamp, 120_000);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_tears_down() {
        let connector = ScriptedConnector::failing(0);
        let feed = ChartFeed::new(ChartFeedConfig::new("EUR/USD"), client(Arc::clone(&connector)));
        feed.start();
        settle().await;
        let (_sent, inbound) = connector.peer();

        feed.stop();
        feed.stop();
        assert!(!feed.is_running());
        assert_eq!(feed.client().status(), ConnectionStatus::Disconnected);
        assert!(feed.client().subscriptions().is_empty());

        let _ = inbound.send(tick(1.5, 1_700_000_000_000)).await;
        run_for(Duration::from_millis(50)).await;
        assert_eq!(feed.render_frame().candles_len, 0);
    }
}
