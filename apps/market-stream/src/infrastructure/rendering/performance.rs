//! Frame performance tracking.
//!
//! Keeps a rolling window of per-frame measurements and recomputes summary
//! statistics at most once per stats interval. Every operation is a no-op
//! while the monitor is disabled.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::infrastructure::metrics;

/// Samples kept in the rolling window.
pub const HISTORY_SIZE: usize = 60;

/// Minimum time between stats recomputations.
pub const STATS_INTERVAL: Duration = Duration::from_secs(1);

/// Average FPS below which a warning is emitted.
pub const LOW_FPS_THRESHOLD: f64 = 30.0;

/// Measurements for one frame, or an aggregate over several.
///
/// Counters are `f64` so averages can be represented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FrameMetrics {
    /// Frames per second derived from the gap to the previous frame.
    pub fps: f64,
    /// Time between `start_frame` and `end_frame`.
    pub frame_time_ms: f64,
    /// Draw calls recorded.
    pub draw_calls: f64,
    /// Vertices submitted.
    pub vertices: f64,
    /// Triangles submitted.
    pub triangles: f64,
    /// Buffer bytes uploaded.
    pub buffer_bytes: f64,
    /// Milliseconds since the monitor was created.
    pub timestamp_ms: f64,
}

/// Summary over the rolling window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PerformanceStats {
    /// Last completed frame when stats were computed.
    pub current: FrameMetrics,
    /// Window averages.
    pub average: FrameMetrics,
    /// Window minima.
    pub min: FrameMetrics,
    /// Window maxima.
    pub max: FrameMetrics,
    /// Samples in the window.
    pub samples: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct FrameCounters {
    draw_calls: u64,
    vertices: u64,
    triangles: u64,
    buffer_bytes: u64,
}

#[derive(Debug)]
struct MonitorState {
    enabled: bool,
    origin: Instant,
    frame_start: Instant,
    last_frame_end: Instant,
    last_stats_update: Instant,
    frame: FrameCounters,
    current: FrameMetrics,
    stats: PerformanceStats,
    history: VecDeque<FrameMetrics>,
    frame_count: u64,
}

/// Thread-safe frame performance monitor.
#[derive(Debug)]
pub struct PerformanceMonitor {
    state: Mutex<MonitorState>,
}

impl PerformanceMonitor {
    /// Create a monitor.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        let now = Instant::now();
        Self {
            state: Mutex::new(MonitorState {
                enabled,
                origin: now,
                frame_start: now,
                last_frame_end: now,
                last_stats_update: now,
                frame: FrameCounters::default(),
                current: FrameMetrics::default(),
                stats: PerformanceStats::default(),
                history: VecDeque::with_capacity(HISTORY_SIZE + 1),
                frame_count: 0,
            }),
        }
    }

    /// Enable or disable. Disabling resets everything.
    pub fn set_enabled(&self, enabled: bool) {
        let mut state = self.state.lock();
        state.enabled = enabled;
        if !enabled {
            state.reset();
        }
    }

    /// Whether measurements are being taken.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    /// Mark the start of a frame.
    pub fn start_frame(&self) {
        let mut state = self.state.lock();
        if !state.enabled {
            return;
        }
        state.frame_start = Instant::now();
        state.frame = FrameCounters::default();
    }

    /// Record one draw call in the current frame.
    pub fn record_draw_call(&self, vertices: u64, triangles: u64, buffer_bytes: u64) {
        let mut state = self.state.lock();
        if !state.enabled {
            return;
        }
        state.frame.draw_calls += 1;
        state.frame.vertices += vertices;
        state.frame.triangles += triangles;
        state.frame.buffer_bytes += buffer_bytes;
    }

    /// Mark the end of a frame and fold it into the window.
    #[allow(clippy::cast_precision_loss)]
    pub fn end_frame(&self) {
        let mut state = self.state.lock();
        if !state.enabled {
            return;
        }

        let now = Instant::now();
        let frame_time = now.saturating_duration_since(state.frame_start);
        let delta = now.saturating_duration_since(state.last_frame_end);
        state.last_frame_end = now;

        let fps = if delta.is_zero() {
            0.0
        } else {
            1.0 / delta.as_secs_f64()
        };

        let metrics = FrameMetrics {
            fps,
            frame_time_ms: frame_time.as_secs_f64() * 1000.0,
            draw_calls: state.frame.draw_calls as f64,
            vertices: state.frame.vertices as f64,
            triangles: state.frame.triangles as f64,
            buffer_bytes: state.frame.buffer_bytes as f64,
            timestamp_ms: now.saturating_duration_since(state.origin).as_secs_f64() * 1000.0,
        };
        state.current = metrics;
        state.history.push_back(metrics);
        if state.history.len() > HISTORY_SIZE {
            state.history.pop_front();
        }

        if now.saturating_duration_since(state.last_stats_update) >= STATS_INTERVAL {
            state.update_stats();
            state.last_stats_update = now;

            if state.stats.samples > 0 {
                let average = state.stats.average;
                metrics::set_render_stats(average.fps, average.frame_time_ms);
                if average.fps < LOW_FPS_THRESHOLD {
                    tracing::warn!(
                        average_fps = average.fps,
                        threshold = LOW_FPS_THRESHOLD,
                        "Render frame rate below threshold"
                    );
                    metrics::record_low_fps();
                }
            }
        }

        state.frame_count += 1;
    }

    /// Last completed frame.
    #[must_use]
    pub fn current_metrics(&self) -> FrameMetrics {
        self.state.lock().current
    }

    /// Most recently computed statistics.
    #[must_use]
    pub fn stats(&self) -> PerformanceStats {
        self.state.lock().stats
    }

    /// Clear history, counters and frame count.
    pub fn reset(&self) {
        self.state.lock().reset();
    }

    /// Frames completed since the last reset.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.state.lock().frame_count
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

impl MonitorState {
    fn reset(&mut self) {
        let now = Instant::now();
        self.frame_count = 0;
        self.history.clear();
        self.frame = FrameCounters::default();
        self.current = FrameMetrics::default();
        self.stats = PerformanceStats::default();
        self.frame_start = now;
        self.last_frame_end = now;
        self.last_stats_update = now;
    }

    #[allow(clippy::cast_precision_loss)]
    fn update_stats(&mut self) {
        if self.history.is_empty() {
            return;
        }
        let n = self.history.len() as f64;

        let fold = |init: f64, f: fn(f64, f64) -> f64| -> FrameMetrics {
            let pick = |field: fn(&FrameMetrics) -> f64| {
                self.history.iter().map(field).fold(init, f)
            };
            FrameMetrics {
                fps: pick(|m| m.fps),
                frame_time_ms: pick(|m| m.frame_time_ms),
                draw_calls: pick(|m| m.draw_calls),
                vertices: pick(|m| m.vertices),
                triangles: pick(|m| m.triangles),
                buffer_bytes: pick(|m| m.buffer_bytes),
                timestamp_ms: self.current.timestamp_ms,
            }
        };

        let sum = fold(0.0, |a, b| a + b);
        let average = FrameMetrics {
            fps: sum.fps / n,
            frame_time_ms: sum.frame_time_ms / n,
            draw_calls: sum.draw_calls / n,
            vertices: sum.vertices / n,
            triangles: sum.triangles / n,
            buffer_bytes: sum.buffer_bytes / n,
            timestamp_ms: self.current.timestamp_ms,
        };

        self.stats = PerformanceStats {
            current: self.current,
            average,
            min: fold(f64::INFINITY, f64::min),
            max: fold(f64::NEG_INFINITY, f64::max),
            samples: self.history.len(),
        };
    }
}
