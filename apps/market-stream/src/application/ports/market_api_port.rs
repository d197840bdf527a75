//! Market API Ports (Driven Ports)
//!
//! Interfaces for the request/response market data collaborators used for
//! initial chart loads and for polling when streaming is unavailable.

use async_trait::async_trait;

use crate::domain::streaming::{Candle, MarketTick, Timeframe};

/// Market API error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MarketApiError {
    /// Transport-level failure.
    #[error("Market API request failed: {message}")]
    Request {
        /// Error details.
        message: String,
    },

    /// Non-success HTTP status.
    #[error("Market API returned status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// Response body could not be decoded.
    #[error("Market API response invalid: {message}")]
    InvalidResponse {
        /// Error details.
        message: String,
    },

    /// No data for the symbol.
    #[error("No market data for {symbol}")]
    NotFound {
        /// The symbol.
        symbol: String,
    },
}

/// Port for historical candles.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CandleHistoryPort: Send + Sync {
    /// Fetch up to `limit` candles, oldest first.
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, MarketApiError>;
}

/// Port for current prices.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceLookupPort: Send + Sync {
    /// Fetch the current price for `symbol`.
    async fn current_price(&self, symbol: &str) -> Result<MarketTick, MarketApiError>;
}
