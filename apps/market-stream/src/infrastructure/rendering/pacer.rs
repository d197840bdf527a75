//! Frame pacing.

use std::time::Duration;

use tokio::time::Instant;

/// Decides which host frames render so output stays at the target rate.
///
/// A frame renders once at least one frame interval has passed since the
/// last render. The render timeline then advances by the whole number of
/// intervals elapsed, carrying the remainder, so pacing does not drift and a
/// stall never causes a burst of catch-up renders.
#[derive(Debug, Clone)]
pub struct FramePacer {
    frame_interval: Duration,
    last_render: Instant,
}

impl FramePacer {
    /// Pacer targeting `target_fps`, with its timeline starting at `start`.
    ///
    /// Non-positive or non-finite rates fall back to 60.
    #[must_use]
    pub fn new(target_fps: f64, start: Instant) -> Self {
        Self {
            frame_interval: frame_interval(target_fps),
            last_render: start,
        }
    }

    /// Whether the host frame at `now` should render.
    pub fn on_host_frame(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_render);
        if elapsed < self.frame_interval {
            return false;
        }
        let interval = self.frame_interval.as_nanos().max(1);
        let whole = elapsed.as_nanos() / interval;
        let advance = u64::try_from(whole * interval).unwrap_or(u64::MAX);
        self.last_render += Duration::from_nanos(advance);
        true
    }

    /// Restart the timeline at `now`.
    pub const fn reset(&mut self, now: Instant) {
        self.last_render = now;
    }

    /// Interval between rendered frames.
    #[must_use]
    pub const fn frame_interval(&self) -> Duration {
        self.frame_interval
    }
}

fn frame_interval(target_fps: f64) -> Duration {
    let fps = if target_fps.is_finite() && target_fps > 0.0 {
        target_fps
    } else {
        60.0
    };
    Duration::from_secs_f64(1.0 / fps)
}
