//! HTTP Polling Fallback
//!
//! Keeps a chart fed with candles when streaming is unavailable. Polls a
//! [`CandleHistoryPort`] on a fixed interval, forwarding candles at or after
//! the last seen timestamp, and gives up after a run of consecutive failures.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{CandleHistoryPort, MarketApiError};
use crate::domain::streaming::{Candle, Timeframe};
use crate::infrastructure::config::PollingSettings;
use crate::infrastructure::metrics;
use crate::infrastructure::stream::{ObserverHandle, ObserverList};

/// Polling configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingConfig {
    /// Symbol to poll.
    pub symbol: String,
    /// Candle timeframe.
    pub timeframe: Timeframe,
    /// Delay between successful polls.
    pub interval: Duration,
    /// Delay after a failed poll.
    pub retry_delay: Duration,
    /// Consecutive failures before giving up.
    pub max_attempts: u32,
    /// Candles requested per poll.
    pub limit: usize,
}

impl PollingConfig {
    /// Defaults for `symbol`.
    #[must_use]
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe: Timeframe::default(),
            interval: Duration::from_secs(5),
            retry_delay: Duration::from_secs(5),
            max_attempts: 3,
            limit: 100,
        }
    }

    /// Defaults for `symbol` with the interval from settings.
    #[must_use]
    pub fn from_settings(symbol: impl Into<String>, settings: &PollingSettings) -> Self {
        Self {
            interval: settings.interval,
            ..Self::new(symbol)
        }
    }
}

/// Events emitted by the fallback.
#[derive(Debug, Clone)]
pub enum PollEvent {
    /// New or updated candles, oldest first.
    Candles {
        /// Polled symbol.
        symbol: String,
        /// The candles.
        candles: Vec<Candle>,
    },
    /// A poll failed; polling continues.
    Error(MarketApiError),
    /// Polling stopped after too many consecutive failures.
    MaxAttemptsReached {
        /// Failures in a row.
        attempts: u32,
    },
}

#[derive(Debug, Default)]
struct PollState {
    cancel: Option<CancellationToken>,
    last_timestamp: Option<i64>,
    failures: u32,
    exhausted: bool,
}

/// Polling fallback for one symbol.
pub struct PollingFallback {
    config: PollingConfig,
    source: Arc<dyn CandleHistoryPort>,
    state: Arc<Mutex<PollState>>,
    observers: ObserverList<PollEvent>,
}

impl PollingFallback {
    /// Create an idle fallback.
    #[must_use]
    pub fn new(config: PollingConfig, source: Arc<dyn CandleHistoryPort>) -> Self {
        Self {
            config,
            source,
            state: Arc::new(Mutex::new(PollState::default())),
            observers: ObserverList::new("poll"),
        }
    }

    /// Register an event observer.
    pub fn on_event<F>(&self, observer: F) -> ObserverHandle
    where
        F: Fn(&PollEvent) + Send + Sync + 'static,
    {
        self.observers.register(observer)
    }

    /// Start polling immediately. Returns `false` if already polling.
    ///
    /// Clears the failure count. Must be called from within a Tokio runtime.
    pub fn start(&self) -> bool {
        let mut state = self.state.lock();
        if state.cancel.is_some() {
            return false;
        }
        let token = CancellationToken::new();
        state.cancel = Some(token.clone());
        state.failures = 0;
        state.exhausted = false;
        drop(state);

        tracing::info!(
            symbol = %self.config.symbol,
            interval_ms = u64::try_from(self.config.interval.as_millis()).unwrap_or(u64::MAX),
            "Starting polling fallback"
        );
        tokio::spawn(poll_loop(
            self.config.clone(),
            Arc::clone(&self.source),
            Arc::clone(&self.state),
            self.observers.clone(),
            token,
        ));
        true
    }

    /// Stop polling. Safe when idle.
    pub fn stop(&self) {
        if let Some(token) = self.state.lock().cancel.take() {
            token.cancel();
            tracing::info!(symbol = %self.config.symbol, "Stopped polling fallback");
        }
    }

    /// Whether polling is running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.lock().cancel.is_some()
    }

    /// Whether polling gave up after consecutive failures.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.state.lock().exhausted
    }

    /// Timestamp of the newest candle seen.
    #[must_use]
    pub fn last_timestamp(&self) -> Option<i64> {
        self.state.lock().last_timestamp
    }

    /// Seed the last seen timestamp (e.g. from an initial history load).
    pub fn set_last_timestamp(&self, timestamp: i64) {
        self.state.lock().last_timestamp = Some(timestamp);
    }

    /// The configuration.
    #[must_use]
    pub const fn config(&self) -> &PollingConfig {
        &self.config
    }
}

impl Drop for PollingFallback {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for PollingFallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingFallback")
            .field("config", &self.config)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

async fn poll_loop(
    config: PollingConfig,
    source: Arc<dyn CandleHistoryPort>,
    state: Arc<Mutex<PollState>>,
    observers: ObserverList<PollEvent>,
    cancel: CancellationToken,
) {
    loop {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = source.fetch_candles(&config.symbol, config.timeframe, config.limit) => result,
        };

        let mut events = Vec::new();
        let delay = {
            let mut state = state.lock();
            if cancel.is_cancelled() {
                break;
            }
            match result {
                Ok(candles) => {
                    metrics::record_poll("ok");
                    state.failures = 0;
                    let fresh: Vec<Candle> = match state.last_timestamp {
                        Some(since) => candles
                            .into_iter()
                            .filter(|c| c.timestamp >= since)
                            .collect(),
                        None => candles,
                    };
                    if let Some(newest) = fresh.iter().map(|c| c.timestamp).max() {
                        state.last_timestamp =
                            Some(state.last_timestamp.map_or(newest, |t| t.max(newest)));
                        events.push(PollEvent::Candles {
                            symbol: config.symbol.clone(),
                            candles: fresh,
                        });
                    }
                    Some(config.interval)
                }
                Err(e) => {
                    metrics::record_poll("error");
                    state.failures += 1;
                    tracing::warn!(
                        symbol = %config.symbol,
                        attempt = state.failures,
                        max_attempts = config.max_attempts,
                        error = %e,
                        "Poll failed"
                    );
                    events.push(PollEvent::Error(e));
                    if state.failures >= config.max_attempts {
                        state.exhausted = true;
                        state.cancel = None;
                        tracing::error!(symbol = %config.symbol, "Polling fallback gave up");
                        events.push(PollEvent::MaxAttemptsReached {
                            attempts: state.failures,
                        });
                        None
                    } else {
                        Some(config.retry_delay)
                    }
                }
            }
        };

        for event in &events {
            observers.notify(event);
        }

        let Some(delay) = delay else { break };
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }
}
