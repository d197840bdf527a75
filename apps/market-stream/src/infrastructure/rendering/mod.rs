//! Rendering support: frame pacing, the render loop and performance
//! tracking.

mod pacer;
mod performance;
mod renderer;

pub use pacer::FramePacer;
pub use performance::{
    FrameMetrics, HISTORY_SIZE, LOW_FPS_THRESHOLD, PerformanceMonitor, PerformanceStats,
    STATS_INTERVAL,
};
pub use renderer::{RendererConfig, SmoothRenderer};
