//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Messages**: market events received, dropped and batched
//! - **Connection**: status, reconnects and errors of the streaming client
//! - **Rendering**: frame rate and frame time of the render loop
//! - **Polling**: fallback poll outcomes
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! functions are safe to call before [`init_metrics`]; values are dropped
//! until a recorder is installed.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::streaming::ConnectionStatus;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder and describe all metrics.
///
/// Subsequent calls return the existing handle.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "market_stream_messages_received_total",
        "Market events received from the provider"
    );
    describe_counter!(
        "market_stream_messages_dropped_total",
        "Inbound messages dropped before delivery"
    );
    describe_counter!(
        "market_stream_errors_total",
        "Errors by component and type"
    );
    describe_counter!(
        "market_stream_reconnects_total",
        "Scheduled reconnection attempts"
    );
    describe_counter!(
        "market_stream_observer_panics_total",
        "Observer callbacks that panicked"
    );
    describe_gauge!(
        "market_stream_connection_status",
        "Connection status (0=disconnected 1=connecting 2=connected 3=reconnecting 4=error)"
    );
    describe_gauge!(
        "market_stream_subscriptions",
        "Active symbol subscriptions"
    );
    describe_gauge!(
        "market_stream_buffered_messages",
        "Events held in the introspection buffer"
    );
    describe_counter!(
        "market_stream_batches_flushed_total",
        "Update batches delivered"
    );
    describe_histogram!(
        "market_stream_batch_size",
        "Number of updates per delivered batch"
    );
    describe_gauge!("market_stream_render_fps", "Rolling average render FPS");
    describe_gauge!(
        "market_stream_frame_time_ms",
        "Rolling average frame time in milliseconds"
    );
    describe_counter!(
        "market_stream_low_fps_total",
        "Stats windows whose average FPS fell below the warning threshold"
    );
    describe_counter!(
        "market_stream_polls_total",
        "Polling fallback requests by outcome"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Drop reasons for inbound messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Symbol not in the subscription set.
    Unsubscribed,
    /// Payload could not be decoded.
    DecodeError,
    /// Session ended before the event was delivered.
    SessionEnded,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Unsubscribed => "unsubscribed",
            Self::DecodeError => "decode_error",
            Self::SessionEnded => "session_ended",
        }
    }
}

/// Record a market event received (`tick` or `candle`).
pub fn record_message_received(kind: &'static str) {
    counter!("market_stream_messages_received_total", "kind" => kind).increment(1);
}

/// Record an inbound message dropped before delivery.
pub fn record_message_dropped(reason: DropReason) {
    counter!("market_stream_messages_dropped_total", "reason" => reason.as_str()).increment(1);
}

/// Record an error.
pub fn record_error(component: &'static str, error_type: &'static str) {
    counter!(
        "market_stream_errors_total",
        "component" => component,
        "error_type" => error_type
    )
    .increment(1);
}

/// Record a scheduled reconnect.
pub fn record_reconnect() {
    counter!("market_stream_reconnects_total").increment(1);
}

/// Record an observer panic.
pub fn record_observer_panic(list: &'static str) {
    counter!("market_stream_observer_panics_total", "list" => list).increment(1);
}

/// Update the connection status gauge.
pub fn set_connection_status(status: ConnectionStatus) {
    gauge!("market_stream_connection_status").set(status.as_gauge());
}

/// Update the subscription gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(count: usize) {
    gauge!("market_stream_subscriptions").set(count as f64);
}

/// Update the buffered message gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_buffered_messages(count: usize) {
    gauge!("market_stream_buffered_messages").set(count as f64);
}

/// Record a delivered batch.
#[allow(clippy::cast_precision_loss)]
pub fn record_batch(size: usize) {
    counter!("market_stream_batches_flushed_total").increment(1);
    histogram!("market_stream_batch_size").record(size as f64);
}

/// Update render statistics.
pub fn set_render_stats(average_fps: f64, average_frame_time_ms: f64) {
    gauge!("market_stream_render_fps").set(average_fps);
    gauge!("market_stream_frame_time_ms").set(average_frame_time_ms);
}

/// Record a low-FPS stats window.
pub fn record_low_fps() {
    counter!("market_stream_low_fps_total").increment(1);
}

/// Record a polling fallback request (`ok` or `error`).
pub fn record_poll(outcome: &'static str) {
    counter!("market_stream_polls_total", "outcome" => outcome).increment(1);
}

// =============================================================================
// Tests
// =============================================================================
