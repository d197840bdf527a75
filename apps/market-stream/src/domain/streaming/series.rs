//! In-memory candle history for one chart.

use super::{Candle, MarketTick, Timeframe};

/// Default cap on retained candles.
pub const DEFAULT_MAX_CANDLES: usize = 10_000;

/// Ordered, bounded candle history.
///
/// Candles are kept sorted by bucket start with at most one candle per
/// bucket. When the cap is exceeded the oldest candles are discarded.
#[derive(Debug, Clone)]
pub struct CandleSeries {
    candles: Vec<Candle>,
    timeframe: Timeframe,
    max_candles: usize,
}

impl CandleSeries {
    /// Create an empty series.
    #[must_use]
    pub fn new(timeframe: Timeframe, max_candles: usize) -> Self {
        Self {
            candles: Vec::new(),
            timeframe,
            max_candles: max_candles.max(1),
        }
    }

    /// Replace the history with `candles`, sorted by time.
    pub fn set_initial(&mut self, mut candles: Vec<Candle>) {
        candles.sort_by_key(|c| c.timestamp);
        candles.dedup_by(|later, earlier| {
            if later.timestamp == earlier.timestamp {
                *earlier = *later;
                true
            } else {
                false
            }
        });
        self.candles = candles;
        self.enforce_cap();
    }

    /// Insert or replace a candle.
    pub fn apply_candle(&mut self, candle: Candle) {
        match self
            .candles
            .binary_search_by_key(&candle.timestamp, |c| c.timestamp)
        {
            Ok(idx) => self.candles[idx] = candle,
            Err(idx) => {
                self.candles.insert(idx, candle);
                self.enforce_cap();
            }
        }
    }

    /// Apply many candles.
    pub fn merge(&mut self, candles: impl IntoIterator<Item = Candle>) {
        for candle in candles {
            self.apply_candle(candle);
        }
    }

    /// Fold a tick into the series.
    ///
    /// A tick in the last candle's bucket updates it. A tick in a later
    /// bucket opens a new candle from the previous close. A tick in an
    /// earlier bucket only updates that bucket if it is still retained.
    pub fn apply_tick(&mut self, tick: &MarketTick) {
        let bucket = self.timeframe.bucket_start(tick.timestamp);
        let volume = tick.volume.unwrap_or(0.0);

        let Some(last) = self.candles.last_mut() else {
            self.candles
                .push(Candle::from_price(bucket, tick.price, volume));
            return;
        };

        if bucket == last.timestamp {
            last.absorb(tick.price, volume);
        } else if bucket > last.timestamp {
            let mut next = Candle::from_price(bucket, last.close, 0.0);
            next.absorb(tick.price, volume);
            self.candles.push(next);
            self.enforce_cap();
        } else if let Ok(idx) = self
            .candles
            .binary_search_by_key(&bucket, |c| c.timestamp)
        {
            self.candles[idx].absorb(tick.price, volume);
        }
    }

    /// All candles, oldest first.
    #[must_use]
    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    /// Most recent candle.
    #[must_use]
    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// Bucket start of the most recent candle.
    #[must_use]
    pub fn last_timestamp(&self) -> Option<i64> {
        self.candles.last().map(|c| c.timestamp)
    }

    /// Number of candles held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.candles.len()
    }

    /// Whether the series is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Bucketing timeframe.
    #[must_use]
    pub const fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    fn enforce_cap(&mut self) {
        if self.candles.len() > self.max_candles {
            let excess = self.candles.len() - self.max_candles;
            self.candles.drain(..excess);
        }
    }
}

impl Default for CandleSeries {
    fn default() -> Self {
        Self::new(Timeframe::OneMinute, DEFAULT_MAX_CANDLES)
    }
}
