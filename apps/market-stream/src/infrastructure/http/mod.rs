//! Market API HTTP Adapter
//!
//! `reqwest` implementation of [`CandleHistoryPort`] and [`PriceLookupPort`]
//! against the market REST API:
//!
//! - `GET {base}/api/market/historical?symbol&timeframe&limit` returning
//!   `{"candles": [{time, open, high, low, close, volume?}, ...]}`
//! - `GET {base}/api/market/price?symbol` returning
//!   `{"success": true, "data": {symbol, price, timestamp, ...}}`

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::application::ports::{CandleHistoryPort, MarketApiError, PriceLookupPort};
use crate::domain::streaming::{Candle, MarketDataParser, MarketTick, Timeframe};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct HistoricalResponse {
    #[serde(default)]
    candles: Vec<Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP client for the market REST API.
#[derive(Debug, Clone)]
pub struct HttpMarketApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMarketApi {
    /// Create a client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, MarketApiError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MarketApiError::Request {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, MarketApiError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await
            .map_err(|e| MarketApiError::Request {
                message: e.to_string(),
            })?;
        Ok(response)
    }
}

#[async_trait]
impl CandleHistoryPort for HttpMarketApi {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, MarketApiError> {
        let response = self
            .get(
                "/api/market/historical",
                &[
                    ("symbol", symbol.to_string()),
                    ("timeframe", timeframe.as_str().to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        if !response.status().is_success() {
            return Err(MarketApiError::Status {
                status: response.status().as_u16(),
            });
        }

        let body: HistoricalResponse =
            response
                .json()
                .await
                .map_err(|e| MarketApiError::InvalidResponse {
                    message: e.to_string(),
                })?;

        if let Some(error) = body.error {
            return Err(MarketApiError::InvalidResponse { message: error });
        }

        let mut candles = Vec::with_capacity(body.candles.len());
        for raw in &body.candles {
            match MarketDataParser::parse_candle(raw, None) {
                Ok(candle) => candles.push(candle),
                Err(e) => tracing::debug!(symbol, error = %e, "Skipping invalid candle"),
            }
        }
        candles.sort_by_key(|c| c.timestamp);

        tracing::debug!(symbol, count = candles.len(), "Fetched historical candles");
        Ok(candles)
    }
}

#[async_trait]
impl PriceLookupPort for HttpMarketApi {
    async fn current_price(&self, symbol: &str) -> Result<MarketTick, MarketApiError> {
        let response = self
            .get("/api/market/price", &[("symbol", symbol.to_string())])
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(MarketApiError::NotFound {
                symbol: symbol.to_string(),
            });
        }
        if !status.is_success() {
            return Err(MarketApiError::Status {
                status: status.as_u16(),
            });
        }

        let body: PriceResponse =
            response
                .json()
                .await
                .map_err(|e| MarketApiError::InvalidResponse {
                    message: e.to_string(),
                })?;

        let data = match (body.success, body.data) {
            (true, Some(data)) => data,
            (_, _) => {
                return Err(MarketApiError::InvalidResponse {
                    message: body.error.unwrap_or_else(|| "missing data".to_string()),
                });
            }
        };

        let reported = data
            .get("symbol")
            .and_then(Value::as_str)
            .unwrap_or(symbol)
            .to_string();
        MarketDataParser::parse_tick(&reported, &data, data.get("timestamp")).map_err(|e| {
            MarketApiError::InvalidResponse {
                message: e.to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn fetches_and_sorts_candles() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/market/historical"))
            .and(query_param("symbol", "EUR/USD"))
            .and(query_param("timeframe", "5m"))
            .and(query_param("limit", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candles": [
                    {"time": 1_700_000_300, "open": 1.1, "high": 1.2, "low": 1.0, "close": 1.15},
                    {"time": 1_700_000_000, "open": 1.0, "high": 1.1, "low": 0.9, "close": 1.1, "volume": 10}
                ]
            })))
            .mount(&server)
            .await;

        let api = HttpMarketApi::new(server.uri()).unwrap();
        let candles = api
            .fetch_candles("EUR/USD", Timeframe::FiveMinutes, 2)
            .await
            .unwrap();

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].timestamp, 1_700_000_000_000);
        assert!((candles[0].volume - 10.0).abs() < f64::EPSILON);
        assert_eq!(candles[1].timestamp, 1_700_000_300_000);
    }

    #[tokio::test]
    async fn skips_invalid_candles() {
        let server = MockServer::start().await;
        Mock::given(path("/api/market/historical"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candles": [
                    {"time": 1_700_000_000, "open": -1.0, "close": 1.0},
                    {"time": 1_700_000_060, "open": 1.0, "high": 1.1, "low": 0.9, "close": 1.05}
                ]
            })))
            .mount(&server)
            .await;

        let api = HttpMarketApi::new(server.uri()).unwrap();
        let candles = api
            .fetch_candles("EUR/USD", Timeframe::OneMinute, 10)
            .await
            .unwrap();
        assert_eq!(candles.len(), 1);
    }

    #[tokio::test]
    async fn maps_error_statuses() {
        let server = MockServer::start().await;
        Mock::given(path("/api/market/historical"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(path("/api/market/price"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "success": false, "error": "Pair XYZ not found"
            })))
            .mount(&server)
            .await;

        let api = HttpMarketApi::new(server.uri()).unwrap();
        assert!(matches!(
            api.fetch_candles("EUR/USD", Timeframe::OneMinute, 10).await,
            Err(MarketApiError::Status { status: 503 })
        ));
        assert!(matches!(
            api.current_price("XYZ").await,
            Err(MarketApiError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn fetches_current_price() {
        let server = MockServer::start().await;
        Mock::given(path("/api/market/price"))
            .and(query_param("symbol", "EUR/USD"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {"symbol": "EUR/USD", "price": 1.0842, "timestamp": 1_700_000_000_000_i64}
            })))
            .mount(&server)
            .await;

        let api = HttpMarketApi::new(format!("{}/", server.uri())).unwrap();
        let tick = api.current_price("EUR/USD").await.unwrap();

        assert_eq!(tick.symbol, "EUR/USD");
        assert!((tick.price - 1.0842).abs() < f64::EPSILON);
        assert_eq!(tick.timestamp, 1_700_000_000_000);
    }

    #[tokio::test]
    async fn unsuccessful_body_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(path("/api/market/price"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false, "error": "Failed to fetch price"
            })))
            .mount(&server)
            .await;

        let api = HttpMarketApi::new(server.uri()).unwrap();
        assert!(matches!(
            api.current_price("EUR/USD").await,
            Err(MarketApiError::InvalidResponse { .. })
        ));
    }
}
