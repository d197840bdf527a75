//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the runtime machinery (timers,
//! batching, render pacing) the services are built from.

/// Configuration loaded from the environment.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing integration.
pub mod telemetry;

/// Cancellable one-shot timers.
pub mod scheduling;

/// Streaming market data client and WebSocket transport.
pub mod stream;

/// Frame-aligned update batching.
pub mod batching;

/// Frame pacing, render loop and performance monitoring.
pub mod rendering;

/// Polling fallback used while streaming is unavailable.
pub mod polling;

/// HTTP market API adapter.
pub mod http;
