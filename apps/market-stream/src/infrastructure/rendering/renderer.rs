//! Paced render loop.

use std::cell::RefCell;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::pacer::FramePacer;
use super::performance::PerformanceMonitor;
use crate::infrastructure::config::RenderSettings;

/// Render loop configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RendererConfig {
    /// Rendered frames per second.
    pub target_fps: f64,
    /// Host frame period driving the pacer.
    pub host_frame_interval: Duration,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            target_fps: 60.0,
            host_frame_interval: Duration::from_secs_f64(1.0 / 120.0),
        }
    }
}

impl RendererConfig {
    /// Build from render settings.
    #[must_use]
    pub fn from_settings(settings: &RenderSettings) -> Self {
        Self {
            target_fps: settings.target_fps,
            ..Self::default()
        }
    }
}

// Reentrant so that `stop` called from inside the callback does not deadlock.
type RenderCallback = Arc<ReentrantMutex<RefCell<Box<dyn FnMut() + Send>>>>;

#[derive(Default)]
struct RendererState {
    callback: Option<RenderCallback>,
    cancel: Option<CancellationToken>,
}

/// Drives a render callback at the target frame rate.
pub struct SmoothRenderer {
    config: RendererConfig,
    monitor: Option<Arc<PerformanceMonitor>>,
    state: Arc<Mutex<RendererState>>,
}

impl SmoothRenderer {
    /// Create an idle renderer.
    #[must_use]
    pub fn new(config: RendererConfig) -> Self {
        Self {
            config,
            monitor: None,
            state: Arc::new(Mutex::new(RendererState::default())),
        }
    }

    /// Wrap every render in `start_frame`/`end_frame` on `monitor`.
    #[must_use]
    pub fn with_monitor(mut self, monitor: Arc<PerformanceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Start the loop. Returns `false` if it was already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<F>(&self, callback: F) -> bool
    where
        F: FnMut() + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.cancel.is_some() {
            return false;
        }

        let token = CancellationToken::new();
        state.callback = Some(Arc::new(ReentrantMutex::new(RefCell::new(Box::new(callback)))));
        state.cancel = Some(token.clone());
        drop(state);

        tokio::spawn(run_loop(
            self.config,
            Arc::clone(&self.state),
            self.monitor.clone(),
            token,
        ));
        tracing::debug!(target_fps = self.config.target_fps, "Render loop started");
        true
    }

    /// Stop the loop and drop the callback. Safe when idle.
    ///
    /// Blocks until a render already in progress on another thread has
    /// returned; the callback is never invoked after this returns.
    pub fn stop(&self) {
        let callback = {
            let mut state = self.state.lock();
            if let Some(token) = state.cancel.take() {
                token.cancel();
                tracing::debug!("Render loop stopped");
            }
            state.callback.take()
        };
        if let Some(callback) = callback {
            drop(callback.lock());
        }
    }

    /// Render now without touching the pacing timeline.
    ///
    /// Returns `false` when the loop is stopped.
    pub fn force_render(&self) -> bool {
        let (callback, cancel) = {
            let state = self.state.lock();
            (state.callback.clone(), state.cancel.clone())
        };
        match (callback, cancel) {
            (Some(callback), Some(cancel)) => render(&callback, &cancel, self.monitor.as_deref()),
            _ => false,
        }
    }

    /// Whether the loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.lock().cancel.is_some()
    }
}

impl Drop for SmoothRenderer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for SmoothRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmoothRenderer")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Invoke the callback unless `cancel` has fired.
///
/// The token is checked while holding the callback lock, which `stop`
/// also takes after cancelling.
fn render(
    callback: &RenderCallback,
    cancel: &CancellationToken,
    monitor: Option<&PerformanceMonitor>,
) -> bool {
    let guard = callback.lock();
    if cancel.is_cancelled() {
        return false;
    }
    // Re-entered from inside the callback.
    let Ok(mut callback) = guard.try_borrow_mut() else {
        return false;
    };
    if let Some(monitor) = monitor {
        monitor.start_frame();
    }
    (*callback)();
    if let Some(monitor) = monitor {
        monitor.end_frame();
    }
    true
}

async fn run_loop(
    config: RendererConfig,
    state: Arc<Mutex<RendererState>>,
    monitor: Option<Arc<PerformanceMonitor>>,
    cancel: CancellationToken,
) {
    let host = config.host_frame_interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval(host);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut pacer = FramePacer::new(config.target_fps, Instant::now());

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            now = ticker.tick() => {
                if !pacer.on_host_frame(now) {
                    continue;
                }
                let callback = {
                    let state = state.lock();
                    if cancel.is_cancelled() {
                        break;
                    }
                    state.callback.clone()
                };
                if let Some(callback) = callback {
                    render(&callback, &cancel, monitor.as_deref());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    async fn run_for(duration: Duration) {
        let step = Duration::from_millis(1);
        let mut elapsed = Duration::ZERO;
        while elapsed < duration {
            tokio::time::advance(step).await;
            tokio::task::yield_now().await;
            elapsed += step;
        }
    }

    fn counter() -> (Arc<AtomicUsize>, impl FnMut() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn renders_near_target_rate() {
        let renderer = SmoothRenderer::new(RendererConfig::default());
        let (count, callback) = counter();

        assert!(renderer.start(callback));
        tokio::task::yield_now().await;
        run_for(Duration::from_secs(1)).await;

        let renders = count.load(Ordering::SeqCst);
        assert!((58..=61).contains(&renders), "renders={renders}");
        renderer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent() {
        let renderer = SmoothRenderer::new(RendererConfig::default());
        let (first, callback) = counter();
        let (second, other) = counter();

        assert!(renderer.start(callback));
        assert!(!renderer.start(other));
        assert!(renderer.is_running());

        run_for(Duration::from_millis(100)).await;
        assert!(first.load(Ordering::SeqCst) > 0);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_prevents_further_renders() {
        let renderer = SmoothRenderer::new(RendererConfig::default());
        let (count, callback) = counter();

        renderer.start(callback);
        run_for(Duration::from_millis(100)).await;
        renderer.stop();
        let after_stop = count.load(Ordering::SeqCst);

        run_for(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
        assert!(!renderer.is_running());
        assert!(!renderer.force_render());
        renderer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn force_render_runs_immediately() {
        let renderer = SmoothRenderer::new(RendererConfig::default());
        assert!(!renderer.force_render());

        let (count, callback) = counter();
        renderer.start(callback);
        assert!(renderer.force_render());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_sees_rendered_frames() {
        let monitor = Arc::new(PerformanceMonitor::new(true));
        let renderer =
            SmoothRenderer::new(RendererConfig::default()).with_monitor(Arc::clone(&monitor));
        let (_count, callback) = counter();

        renderer.start(callback);
        run_for(Duration::from_millis(500)).await;
        renderer.stop();

        assert!(monitor.frame_count() >= 28);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_waits_for_render_in_progress() {
        let renderer = Arc::new(SmoothRenderer::new(RendererConfig {
            target_fps: 1000.0,
            host_frame_interval: Duration::from_millis(1),
        }));
        let calls = Arc::new(AtomicUsize::new(0));
        let slow = Arc::new(AtomicBool::new(false));
        let (c, s) = (Arc::clone(&calls), Arc::clone(&slow));
        assert!(renderer.start(move || {
            c.fetch_add(1, Ordering::SeqCst);
            if s.swap(false, Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(200));
            }
        }));
        tokio::time::sleep(Duration::from_millis(20)).await;

        // A forced render on another thread holds the callback while the
        // loop queues up behind it.
        slow.store(true, Ordering::SeqCst);
        let forced = {
            let renderer = Arc::clone(&renderer);
            std::thread::spawn(move || renderer.force_render())
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        renderer.stop();
        let at_stop = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(calls.load(Ordering::SeqCst), at_stop);
        forced.join().unwrap();
        assert!(!renderer.force_render());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_from_inside_callback() {
        let renderer = Arc::new(SmoothRenderer::new(RendererConfig::default()));
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = Arc::downgrade(&renderer);
        let c = Arc::clone(&calls);
        renderer.start(move || {
            c.fetch_add(1, Ordering::SeqCst);
            if let Some(renderer) = handle.upgrade() {
                renderer.stop();
            }
        });

        run_for(Duration::from_millis(200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!renderer.is_running());
    }
}
