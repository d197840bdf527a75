//! Candle data quality scoring.
//!
//! Scores a candle series on three axes, each a fraction in `[0, 1]`:
//!
//! - **completeness**: share of OHLC and timestamp fields holding finite values
//! - **consistency**: share of candles whose high/low bound open/close with
//!   all prices positive
//! - **timeliness**: share of candles younger than [`TIMELY_WINDOW_MS`]
//!
//! `overall` weights them 0.3 / 0.5 / 0.2.

use serde::Serialize;

use super::Candle;

/// Age below which a candle counts as timely.
pub const TIMELY_WINDOW_MS: i64 = 5 * 60 * 1000;

const COMPLETENESS_WEIGHT: f64 = 0.3;
const CONSISTENCY_WEIGHT: f64 = 0.5;
const TIMELINESS_WEIGHT: f64 = 0.2;

/// Quality scores for a candle series.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct DataQuality {
    /// Share of fields holding usable values.
    pub completeness: f64,
    /// Share of candles with coherent OHLC values.
    pub consistency: f64,
    /// Share of recent candles.
    pub timeliness: f64,
    /// Weighted blend of the three scores.
    pub overall: f64,
}

impl DataQuality {
    /// Score `candles` relative to `now_ms`. An empty series scores zero.
    #[must_use]
    pub fn assess(candles: &[Candle], now_ms: i64) -> Self {
        if candles.is_empty() {
            return Self::default();
        }

        let complete_fields: usize = candles.iter().map(complete_field_count).sum();
        let completeness = ratio(complete_fields, candles.len() * 5);
        let consistent = candles.iter().filter(|c| is_consistent(c)).count();
        let consistency = ratio(consistent, candles.len());
        let timeliness = ratio(
            candles
                .iter()
                .filter(|c| now_ms - c.timestamp < TIMELY_WINDOW_MS)
                .count(),
            candles.len(),
        );

        Self {
            completeness,
            consistency,
            timeliness,
            overall: completeness * COMPLETENESS_WEIGHT
                + consistency * CONSISTENCY_WEIGHT
                + timeliness * TIMELINESS_WEIGHT,
        }
    }
}

fn complete_field_count(candle: &Candle) -> usize {
    let prices = [candle.open, candle.high, candle.low, candle.close];
    usize::from(candle.timestamp > 0) + prices.iter().filter(|p| p.is_finite()).count()
}

fn is_consistent(candle: &Candle) -> bool {
    candle.high >= candle.open.max(candle.close)
        && candle.low <= candle.open.min(candle.close)
        && candle.high >= candle.low
        && [candle.open, candle.high, candle.low, candle.close]
            .iter()
            .all(|p| *p > 0.0)
}

#[allow(clippy::cast_precision_loss)]
fn ratio(part: usize, whole: usize) -> f64 {
    part as f64 / whole as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_600_000;

    fn candle(timestamp: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            timestamp,
            open,
            high,
            low,
            close,
            volume: 0.0,
        }
    }

    #[test]
    fn empty_series_scores_zero() {
        assert_eq!(DataQuality::assess(&[], NOW), DataQuality::default());
    }

    #[test]
    fn fresh_well_formed_series_scores_one() {
        let candles = [
            candle(NOW - 120_000, 1.08, 1.09, 1.07, 1.085),
            candle(NOW - 60_000, 1.085, 1.086, 1.08, 1.081),
        ];
        let quality = DataQuality::assess(&candles, NOW);
        assert!((quality.overall - 1.0).abs() < 1e-12);
    }

    #[test]
    fn inconsistent_and_stale_candles_lower_the_score() {
        let candles = [
            candle(NOW - 60_000, 1.08, 1.09, 1.07, 1.085),
            // High below close.
            candle(NOW - 60_000, 1.08, 1.08, 1.07, 1.09),
            candle(NOW - TIMELY_WINDOW_MS, 1.08, 1.09, 1.07, 1.085),
            candle(NOW - 3_600_000, 1.08, 1.09, 1.07, 1.085),
        ];
        let quality = DataQuality::assess(&candles, NOW);

        assert!((quality.completeness - 1.0).abs() < 1e-12);
        assert!((quality.consistency - 0.75).abs() < 1e-12);
        assert!((quality.timeliness - 0.5).abs() < 1e-12);
        assert!((quality.overall - (0.3 + 0.375 + 0.1)).abs() < 1e-12);
    }

    #[test]
    fn non_finite_prices_are_incomplete() {
        let candles = [candle(NOW, f64::NAN, 1.09, 1.07, 1.085)];
        let quality = DataQuality::assess(&candles, NOW);
        assert!((quality.completeness - 0.8).abs() < 1e-12);
        assert!(quality.consistency.abs() < 1e-12);
    }
}
