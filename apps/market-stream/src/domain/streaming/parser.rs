//! Market data validation and normalisation.
//!
//! Converts loosely-typed provider payloads into [`MarketTick`] and
//! [`Candle`] values. Prices must be positive and finite, candles must be
//! OHLC-consistent after normalisation and timestamps are always returned
//! in milliseconds.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::{Candle, MarketEvent, MarketTick};

/// Timestamps below this value are interpreted as seconds.
const SECONDS_THRESHOLD: i64 = 10_000_000_000;

/// Errors produced while validating a payload.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    /// A required field is absent.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A price field is not a positive finite number.
    #[error("invalid {field}: {value}")]
    InvalidNumber {
        /// Field name.
        field: &'static str,
        /// Offending value, rendered as JSON.
        value: String,
    },

    /// Candle high/low contradict open/close.
    #[error("inconsistent candle: high={high} low={low} open={open} close={close}")]
    InconsistentCandle {
        /// High.
        high: f64,
        /// Low.
        low: f64,
        /// Open.
        open: f64,
        /// Close.
        close: f64,
    },

    /// The payload is not an object.
    #[error("expected object payload")]
    NotAnObject,
}

/// Generic market data envelope:
/// `{type, symbol, timestamp?, data}`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMarketMessage {
    /// Message kind (`candle`, `tick`, `price`, `volume`, `trade`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Symbol the payload belongs to.
    pub symbol: String,
    /// Seconds, milliseconds or an ISO-8601 string.
    #[serde(default)]
    pub timestamp: Option<Value>,
    /// Kind-specific payload.
    pub data: Value,
}

/// Stateless parser for market data payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketDataParser;

impl MarketDataParser {
    /// A price is valid when it is finite and strictly positive.
    #[must_use]
    pub fn is_valid_price(value: f64) -> bool {
        value.is_finite() && value > 0.0
    }

    /// Parse a generic envelope.
    ///
    /// Returns `Ok(None)` for kinds that carry no chart data (`volume`
    /// and unknown kinds).
    ///
    /// # Errors
    ///
    /// Returns an error if the payload fails validation.
    pub fn parse_envelope(message: &RawMarketMessage) -> Result<Option<MarketEvent>, ParseError> {
        match message.kind.as_str() {
            "candle" => {
                let candle = Self::parse_candle(&message.data, message.timestamp.as_ref())?;
                Ok(Some(MarketEvent::Candle {
                    symbol: message.symbol.clone(),
                    candle,
                }))
            }
            "tick" | "price" | "trade" => {
                let tick =
                    Self::parse_tick(&message.symbol, &message.data, message.timestamp.as_ref())?;
                Ok(Some(MarketEvent::Tick(tick)))
            }
            _ => Ok(None),
        }
    }

    /// Parse a tick payload `{price, bid?, ask?, volume?}`.
    ///
    /// When `timestamp` is `None` the payload's own `timestamp` field is
    /// used, falling back to the current time.
    ///
    /// # Errors
    ///
    /// Returns an error if the price is missing or invalid, or if an
    /// optional field is present but not a valid number.
    pub fn parse_tick(
        symbol: &str,
        data: &Value,
        timestamp: Option<&Value>,
    ) -> Result<MarketTick, ParseError> {
        let obj = data.as_object().ok_or(ParseError::NotAnObject)?;
        let price = required_price(obj.get("price"), "price")?;
        let bid = optional_price(obj.get("bid"), "bid")?;
        let ask = optional_price(obj.get("ask"), "ask")?;
        let volume = optional_volume(obj.get("volume"))?;
        let ts = timestamp.or_else(|| obj.get("timestamp"));

        Ok(MarketTick {
            symbol: symbol.to_string(),
            price,
            bid,
            ask,
            volume,
            timestamp: Self::normalize_timestamp(ts),
        })
    }

    /// Parse a candle payload `{open, high?, low?, close, volume?}`.
    ///
    /// Missing high/low are derived from open/close; an invalid volume
    /// becomes zero.
    ///
    /// # Errors
    ///
    /// Returns an error if open/close are invalid or the provided high/low
    /// contradict them.
    pub fn parse_candle(data: &Value, timestamp: Option<&Value>) -> Result<Candle, ParseError> {
        let obj = data.as_object().ok_or(ParseError::NotAnObject)?;
        let open = required_price(obj.get("open"), "open")?;
        let close = required_price(obj.get("close"), "close")?;
        let high = optional_price(obj.get("high"), "high")?;
        let low = optional_price(obj.get("low"), "low")?;

        let body_high = open.max(close);
        let body_low = open.min(close);
        if high.is_some_and(|h| h < body_high) || low.is_some_and(|l| l > body_low) {
            return Err(ParseError::InconsistentCandle {
                high: high.unwrap_or(body_high),
                low: low.unwrap_or(body_low),
                open,
                close,
            });
        }

        let volume = obj
            .get("volume")
            .and_then(Value::as_f64)
            .filter(|v| Self::is_valid_price(*v))
            .unwrap_or(0.0);
        let ts = timestamp
            .or_else(|| obj.get("timestamp"))
            .or_else(|| obj.get("time"));

        Ok(Candle {
            timestamp: Self::normalize_timestamp(ts),
            open,
            high: high.unwrap_or(body_high),
            low: low.unwrap_or(body_low),
            close,
            volume,
        })
    }

    /// Normalise a timestamp to milliseconds using the current time for
    /// missing or unparseable values.
    #[must_use]
    pub fn normalize_timestamp(value: Option<&Value>) -> i64 {
        Self::normalize_timestamp_at(value, Utc::now().timestamp_millis())
    }

    /// Normalise a timestamp to milliseconds with an explicit `now`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn normalize_timestamp_at(value: Option<&Value>, now_ms: i64) -> i64 {
        let raw = match value {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
            Some(Value::String(s)) => {
                return DateTime::parse_from_rfc3339(s)
                    .map_or(now_ms, |dt| dt.with_timezone(&Utc).timestamp_millis());
            }
            _ => None,
        };

        match raw {
            Some(ts) if ts > 0 && ts < SECONDS_THRESHOLD => ts * 1000,
            Some(ts) if ts > 0 => ts,
            _ => now_ms,
        }
    }

    /// Aggregate ticks into OHLCV candles of `interval_ms`.
    ///
    /// Ticks are sorted by time first; each candle's timestamp is the start
    /// of its bucket.
    #[must_use]
    pub fn group_ticks_into_candles(ticks: &[MarketTick], interval_ms: i64) -> Vec<Candle> {
        if ticks.is_empty() || interval_ms <= 0 {
            return Vec::new();
        }

        let mut sorted: Vec<&MarketTick> = ticks.iter().collect();
        sorted.sort_by_key(|t| t.timestamp);

        let mut candles: Vec<Candle> = Vec::new();
        for tick in sorted {
            let bucket = tick.timestamp.div_euclid(interval_ms) * interval_ms;
            let volume = tick.volume.unwrap_or(0.0);
            match candles.last_mut() {
                Some(current) if current.timestamp == bucket => current.absorb(tick.price, volume),
                _ => candles.push(Candle::from_price(bucket, tick.price, volume)),
            }
        }
        candles
    }
}

fn required_price(value: Option<&Value>, field: &'static str) -> Result<f64, ParseError> {
    match value {
        None | Some(Value::Null) => Err(ParseError::MissingField(field)),
        Some(v) => v
            .as_f64()
            .filter(|p| MarketDataParser::is_valid_price(*p))
            .ok_or_else(|| ParseError::InvalidNumber {
                field,
                value: v.to_string(),
            }),
    }
}

fn optional_price(value: Option<&Value>, field: &'static str) -> Result<Option<f64>, ParseError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(_) => required_price(value, field).map(Some),
    }
}

fn optional_volume(value: Option<&Value>) -> Result<Option<f64>, ParseError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .filter(|x| x.is_finite() && *x >= 0.0)
            .map(Some)
            .ok_or_else(|| ParseError::InvalidNumber {
                field: "volume",
                value: v.to_string(),
            }),
    }
}
