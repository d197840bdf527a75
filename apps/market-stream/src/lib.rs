#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation
    )
)]

//! Market Stream - Real-time Market Data Core
//!
//! Keeps a streaming connection to a market data provider and turns its
//! high-frequency ticks into smooth, frame-aligned chart updates.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types and deterministic logic
//!   - `streaming`: ticks, candles, connection status, payload parsing
//!   - `subscription`: subscription set and provider symbol mapping
//!   - `animation`: price interpolation with easing
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: stream connector, market API, error reporter
//!   - `services`: `ChartFeed` composing one chart's pipeline
//!
//! - **Infrastructure**: Adapters and runtime machinery
//!   - `stream`: `MarketDataClient`, codec, heartbeat, reconnect policy,
//!     WebSocket transport
//!   - `batching`: fixed-cadence `UpdateBatcher`
//!   - `rendering`: frame pacer, render loop, performance monitor
//!   - `polling`: polling fallback while streaming is down
//!   - `http`: market REST API adapter
//!   - `config`, `health`, `metrics`, `telemetry`, `scheduling`
//!
//! # Data Flow
//!
//! ```text
//! Provider WS ──► MarketDataClient ──► UpdateBatcher ──► ChartFeed ──► SmoothRenderer
//!                       │ status                           ▲
//!                       └────────► PollingFallback ────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core market data types with no runtime dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::animation::{AnimatorConfig, Easing, PriceAnimator};
pub use domain::streaming::{
    Candle, CandleSeries, ConnectionStatus, DataQuality, MarketDataParser, MarketEvent, MarketTick,
    Timeframe,
};
pub use domain::subscription::{SubscriptionSet, SymbolMapping};

// Ports and services
pub use application::ports::{
    CandleHistoryPort, ErrorContext, ErrorReporter, MarketApiError, NoopErrorReporter,
    PriceLookupPort, StreamConnector, StreamTransport, TransportError, TransportEvent,
};
pub use application::services::{ChartFeed, ChartFeedConfig, ChartFrame};

// Configuration
pub use infrastructure::config::{
    BatchSettings, ConfigError, ErrorReporterKind, MarketStreamConfig, PollingSettings,
    RenderSettings, ServerSettings, StreamSettings,
};

// Streaming client
pub use infrastructure::stream::{
    ClientConfig, ClientError, ClientStats, HeartbeatConfig, MarketDataClient, ObserverHandle,
    ReconnectConfig, TracingErrorReporter, TungsteniteConnector, WireProtocol,
};

// Pipeline components
pub use infrastructure::batching::{BatcherConfig, UpdateBatcher};
pub use infrastructure::http::HttpMarketApi;
pub use infrastructure::polling::{PollEvent, PollingConfig, PollingFallback};
pub use infrastructure::rendering::{
    FramePacer, PerformanceMonitor, PerformanceStats, RendererConfig, SmoothRenderer,
};
pub use infrastructure::scheduling::DelayedTask;

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{
    TelemetryConfig, TelemetryError, TelemetryGuard, init as init_telemetry,
};
