//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, stream status reporting, and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (200 iff the stream is connected)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::ChartFeed;
use crate::domain::streaming::{ConnectionStatus, DataQuality};
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::rendering::{PerformanceMonitor, PerformanceStats};
use crate::infrastructure::stream::{ClientStats, MarketDataClient};

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Streaming client snapshot.
    pub stream: ClientStats,
    /// Render statistics, when a monitor is attached and enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub render: Option<PerformanceStats>,
    /// Candle data quality per chart.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub charts: Vec<ChartQuality>,
}

/// Data quality of one chart's candle series.
#[derive(Debug, Clone, Serialize)]
pub struct ChartQuality {
    /// Chart symbol.
    pub symbol: String,
    /// Number of candles held.
    pub candles: usize,
    /// Quality scores.
    pub quality: DataQuality,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Stream connected.
    Healthy,
    /// Stream connecting or reconnecting.
    Degraded,
    /// Stream disconnected or failed.
    Unhealthy,
}

impl From<ConnectionStatus> for HealthStatus {
    fn from(status: ConnectionStatus) -> Self {
        match status {
            ConnectionStatus::Connected => Self::Healthy,
            ConnectionStatus::Connecting | ConnectionStatus::Reconnecting => Self::Degraded,
            ConnectionStatus::Disconnected | ConnectionStatus::Error => Self::Unhealthy,
        }
    }
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    client: MarketDataClient,
    monitor: Option<Arc<PerformanceMonitor>>,
    feeds: Arc<Vec<ChartFeed>>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: impl Into<String>, client: MarketDataClient) -> Self {
        Self {
            version: version.into(),
            started_at: Instant::now(),
            client,
            monitor: None,
            feeds: Arc::new(Vec::new()),
        }
    }

    /// Include candle data quality for `feeds` in `/health`.
    #[must_use]
    pub fn with_feeds(mut self, feeds: Arc<Vec<ChartFeed>>) -> Self {
        self.feeds = feeds;
        self
    }

    /// Include render statistics from `monitor` in `/health`.
    #[must_use]
    pub fn with_monitor(mut self, monitor: Arc<PerformanceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    fn snapshot(&self) -> HealthResponse {
        let stream = self.client.stats();
        let render = self
            .monitor
            .as_ref()
            .filter(|m| m.is_enabled())
            .map(|m| m.stats());
        let now_ms = Utc::now().timestamp_millis();
        let charts = self
            .feeds
            .iter()
            .map(|feed| ChartQuality {
                symbol: feed.symbol().to_string(),
                candles: feed.candle_count(),
                quality: feed.quality(now_ms),
            })
            .collect();

        HealthResponse {
            status: HealthStatus::from(stream.status),
            version: self.version.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            current_time: Utc::now(),
            stream,
            render,
            charts,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Build the router serving every endpoint.
    pub fn router(state: Arc<HealthServerState>) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = Self::router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = state.snapshot();
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.client.is_connected() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
