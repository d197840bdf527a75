//! Market Data Streaming Types
//!
//! Core domain types for market data: ticks, candles and the events
//! delivered by a streaming connection. These types are codec-agnostic
//! and represent the canonical internal representation of market data.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod parser;
pub mod quality;
pub mod series;

pub use parser::{MarketDataParser, RawMarketMessage};
pub use quality::DataQuality;
pub use series::{CandleSeries, DEFAULT_MAX_CANDLES};

// =============================================================================
// Connection Status
// =============================================================================

/// Lifecycle state of a streaming connection.
///
/// Exactly one value holds at any time. Transitions are driven only by the
/// connection that owns the status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No socket, no pending reconnect.
    #[default]
    Disconnected,
    /// Socket is being opened.
    Connecting,
    /// Socket open and subscriptions replayed.
    Connected,
    /// Connection was lost and a reconnect is pending or in progress.
    Reconnecting,
    /// The last attempt failed, or the reconnect budget is exhausted.
    Error,
}

impl ConnectionStatus {
    /// Get the status name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        }
    }

    /// Check if the connection is usable for sending.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if a connection attempt is already underway or established.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Reconnecting)
    }

    /// Numeric encoding used for the status gauge.
    #[must_use]
    pub const fn as_gauge(&self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Connected => 2.0,
            Self::Reconnecting => 3.0,
            Self::Error => 4.0,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Ticks and Candles
// =============================================================================

/// A single price update for one symbol.
///
/// Produced by the network layer and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTick {
    /// Canonical symbol (e.g. `EUR/USD`).
    pub symbol: String,
    /// Last traded or quoted price.
    pub price: f64,
    /// Best bid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid: Option<f64>,
    /// Best ask.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask: Option<f64>,
    /// Traded volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl MarketTick {
    /// Create a tick with only the mandatory fields.
    #[must_use]
    pub fn new(symbol: impl Into<String>, price: f64, timestamp: i64) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            bid: None,
            ask: None,
            volume: None,
            timestamp,
        }
    }

    /// Attach bid/ask quotes.
    #[must_use]
    pub const fn with_quote(mut self, bid: f64, ask: f64) -> Self {
        self.bid = Some(bid);
        self.ask = Some(ask);
        self
    }

    /// Attach a traded volume.
    #[must_use]
    pub const fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Mid price when both sides are quoted.
    #[must_use]
    pub fn mid(&self) -> Option<f64> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            _ => None,
        }
    }
}

/// OHLCV candle. `timestamp` is the bucket start in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bucket start (ms since epoch).
    pub timestamp: i64,
    /// Opening price.
    pub open: f64,
    /// Highest price.
    pub high: f64,
    /// Lowest price.
    pub low: f64,
    /// Closing price.
    pub close: f64,
    /// Volume traded in the bucket.
    #[serde(default)]
    pub volume: f64,
}

impl Candle {
    /// Open a new candle from a single price.
    #[must_use]
    pub const fn from_price(timestamp: i64, price: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
        }
    }

    /// Fold a price into the candle.
    pub fn absorb(&mut self, price: f64, volume: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += volume;
    }

    /// Check OHLC consistency.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.high >= self.open.max(self.close)
            && self.low <= self.open.min(self.close)
            && self.high >= self.low
    }
}

// =============================================================================
// Timeframe
// =============================================================================

/// Candle timeframe used for history requests and tick bucketing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Timeframe {
    /// One minute.
    #[default]
    OneMinute,
    /// Five minutes.
    FiveMinutes,
    /// Fifteen minutes.
    FifteenMinutes,
    /// One hour.
    OneHour,
    /// One day.
    OneDay,
}

impl Timeframe {
    /// Wire name used by the history API.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::OneHour => "1h",
            Self::OneDay => "1d",
        }
    }

    /// Bucket length in milliseconds.
    #[must_use]
    pub const fn as_millis(&self) -> i64 {
        match self {
            Self::OneMinute => 60_000,
            Self::FiveMinutes => 300_000,
            Self::FifteenMinutes => 900_000,
            Self::OneHour => 3_600_000,
            Self::OneDay => 86_400_000,
        }
    }

    /// Parse a wire name, falling back to one minute.
    #[must_use]
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "5m" => Self::FiveMinutes,
            "15m" => Self::FifteenMinutes,
            "1h" => Self::OneHour,
            "1d" => Self::OneDay,
            _ => Self::OneMinute,
        }
    }

    /// Start of the bucket containing `timestamp`.
    #[must_use]
    pub const fn bucket_start(&self, timestamp: i64) -> i64 {
        timestamp.div_euclid(self.as_millis()) * self.as_millis()
    }
}

// =============================================================================
// Market Events
// =============================================================================

/// A decoded unit of market data delivered to message observers.
#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    /// Real-time price update.
    Tick(MarketTick),
    /// Full or partial candle update.
    Candle {
        /// Canonical symbol.
        symbol: String,
        /// The candle.
        candle: Candle,
    },
}

impl MarketEvent {
    /// Symbol the event belongs to.
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::Tick(tick) => &tick.symbol,
            Self::Candle { symbol, .. } => symbol,
        }
    }

    /// Latest price carried by the event.
    #[must_use]
    pub const fn price(&self) -> f64 {
        match self {
            Self::Tick(tick) => tick.price,
            Self::Candle { candle, .. } => candle.close,
        }
    }

    /// Event time in milliseconds.
    #[must_use]
    pub const fn timestamp(&self) -> i64 {
        match self {
            Self::Tick(tick) => tick.timestamp,
            Self::Candle { candle, .. } => candle.timestamp,
        }
    }

    /// Replace the symbol (used when mapping provider symbols back).
    #[must_use]
    pub fn with_symbol(self, symbol: String) -> Self {
        match self {
            Self::Tick(tick) => Self::Tick(MarketTick { symbol, ..tick }),
            Self::Candle { candle, .. } => Self::Candle { symbol, candle },
        }
    }
}
