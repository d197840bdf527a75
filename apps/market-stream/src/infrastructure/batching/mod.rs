//! Update Batching
//!
//! Groups high-frequency updates and hands them to a consumer at a fixed
//! cadence. The flush schedule is fixed-rate: a flush happens at most one
//! `batch_interval` after the previous one no matter how often updates
//! arrive, so a steady stream cannot postpone delivery.
//!
//! Reaching `max_batch_size` flushes synchronously inside [`UpdateBatcher::add`].

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::BatchSettings;
use crate::infrastructure::metrics;
use crate::infrastructure::scheduling::DelayedTask;

/// Batcher configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatcherConfig {
    /// Fixed flush cadence.
    pub batch_interval: Duration,
    /// Pending count that forces a synchronous flush.
    pub max_batch_size: usize,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batch_interval: Duration::from_millis(16),
            max_batch_size: 100,
        }
    }
}

impl BatcherConfig {
    /// Build from batch settings.
    #[must_use]
    pub const fn from_settings(settings: &BatchSettings) -> Self {
        Self {
            batch_interval: settings.interval,
            max_batch_size: settings.max_batch_size,
        }
    }
}

type BatchCallback<T> = Box<dyn FnMut(Vec<T>) + Send>;

struct BatchState<T> {
    pending: Vec<T>,
    last_flush: Instant,
    timer: Option<DelayedTask>,
}

struct Inner<T> {
    config: BatcherConfig,
    state: Mutex<BatchState<T>>,
    callback: Mutex<BatchCallback<T>>,
}

/// Fixed-cadence update batcher.
///
/// Batches are delivered in arrival order, never empty, and the callback
/// never runs concurrently with itself. The callback must not call back into
/// the same batcher.
pub struct UpdateBatcher<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Send + 'static> UpdateBatcher<T> {
    /// Create a batcher delivering to `callback`.
    ///
    /// The first interval window starts now.
    pub fn new<F>(config: BatcherConfig, callback: F) -> Self
    where
        F: FnMut(Vec<T>) + Send + 'static,
    {
        let config = BatcherConfig {
            max_batch_size: config.max_batch_size.max(1),
            ..config
        };
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(BatchState {
                    pending: Vec::new(),
                    last_flush: Instant::now(),
                    timer: None,
                }),
                callback: Mutex::new(Box::new(callback)),
            }),
        }
    }

    /// Queue an update.
    ///
    /// Flushes synchronously when the batch is full or the interval has
    /// already elapsed; otherwise makes sure a flush is scheduled.
    pub fn add(&self, update: T) {
        let mut state = self.inner.state.lock();
        state.pending.push(update);

        let due = state.pending.len() >= self.inner.config.max_batch_size
            || state.last_flush.elapsed() >= self.inner.config.batch_interval;

        if due {
            self.inner.deliver(state);
        } else if state.timer.is_none() {
            let deadline = state.last_flush + self.inner.config.batch_interval;
            let batcher: Weak<Inner<T>> = Arc::downgrade(&self.inner);
            state.timer = Some(DelayedTask::spawn_at(deadline, move |token| {
                if let Some(inner) = batcher.upgrade() {
                    inner.on_timer(&token);
                }
            }));
        }
    }

    /// Deliver pending updates now. No-op when nothing is pending.
    pub fn flush(&self) {
        let state = self.inner.state.lock();
        self.inner.deliver(state);
    }

    /// Drop pending updates and cancel the scheduled flush.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        state.pending.clear();
        state.timer = None;
    }

    /// Updates waiting for the next flush.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// The effective configuration.
    #[must_use]
    pub fn config(&self) -> BatcherConfig {
        self.inner.config
    }
}

impl<T> Inner<T> {
    fn on_timer(&self, token: &CancellationToken) {
        let state = self.state.lock();
        if token.is_cancelled() {
            return;
        }
        self.deliver(state);
    }

    /// Take the pending batch and run the callback outside the state lock.
    ///
    /// The callback lock is acquired before the state lock is released so
    /// that batches taken in order are delivered in order.
    fn deliver(&self, mut state: parking_lot::MutexGuard<'_, BatchState<T>>) {
        state.timer = None;
        if state.pending.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut state.pending);
        state.last_flush = Instant::now();

        let mut callback = self.callback.lock();
        drop(state);

        tracing::trace!(size = batch.len(), "Flushing update batch");
        metrics::record_batch(batch.len());
        (*callback)(batch);
    }
}

impl<T> Drop for UpdateBatcher<T> {
    fn drop(&mut self) {
        self.inner.state.lock().timer = None;
    }
}

impl<T> std::fmt::Debug for UpdateBatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateBatcher")
            .field("config", &self.inner.config)
            .field("pending", &self.inner.state.lock().pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Batches = Arc<Mutex<Vec<Vec<u32>>>>;

    fn batcher(interval_ms: u64, max: usize) -> (UpdateBatcher<u32>, Batches) {
        let batches: Batches = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&batches);
        let batcher = UpdateBatcher::new(
            BatcherConfig {
                batch_interval: Duration::from_millis(interval_ms),
                max_batch_size: max,
            },
            move |batch| sink.lock().push(batch),
        );
        (batcher, batches)
    }

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_cadence_scenario() {
        let (batcher, batches) = batcher(16, 100);

        for i in 0..50 {
            batcher.add(i);
            tokio::time::advance(Duration::from_millis(2)).await;
            settle().await;
        }
        tokio::time::advance(Duration::from_millis(20)).await;
        settle().await;

        let batches = batches.lock();
        assert_eq!(batches.len(), 7);
        assert!(batches.iter().all(|b| !b.is_empty()));
        let flat: Vec<u32> = batches.iter().flatten().copied().collect();
        assert_eq!(flat, (0..50).collect::<Vec<_>>());
        assert_eq!(batcher.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn full_batch_flushes_synchronously() {
        let (batcher, batches) = batcher(1000, 3);

        batcher.add(1);
        batcher.add(2);
        assert!(batches.lock().is_empty());
        batcher.add(3);

        assert_eq!(*batches.lock(), vec![vec![1, 2, 3]]);
        assert_eq!(batcher.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_flush_fires_once_per_interval() {
        let (batcher, batches) = batcher(16, 100);

        batcher.add(1);
        tokio::time::advance(Duration::from_millis(10)).await;
        batcher.add(2);
        settle().await;
        assert!(batches.lock().is_empty());

        tokio::time::advance(Duration::from_millis(6)).await;
        settle().await;
        assert_eq!(*batches.lock(), vec![vec![1, 2]]);

        tokio::time::advance(Duration::from_millis(100)).await;
        settle().await;
        assert_eq!(batches.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn add_after_idle_flushes_immediately() {
        let (batcher, batches) = batcher(16, 100);

        tokio::time::advance(Duration::from_millis(50)).await;
        batcher.add(9);

        assert_eq!(*batches.lock(), vec![vec![9]]);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_cancels_scheduled_flush() {
        let (batcher, batches) = batcher(16, 100);

        batcher.add(1);
        batcher.add(2);
        batcher.clear();
        assert_eq!(batcher.pending_count(), 0);

        tokio::time::advance(Duration::from_millis(50)).await;
        settle().await;
        assert!(batches.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn manual_flush_and_empty_flush() {
        let (batcher, batches) = batcher(16, 100);

        batcher.flush();
        assert!(batches.lock().is_empty());

        batcher.add(4);
        batcher.flush();
        assert_eq!(*batches.lock(), vec![vec![4]]);

        tokio::time::advance(Duration::from_millis(50)).await;
        settle().await;
        assert_eq!(batches.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_batcher_cancels_timer() {
        let (batcher, batches) = batcher(16, 100);
        batcher.add(1);
        drop(batcher);

        tokio::time::advance(Duration::from_millis(50)).await;
        settle().await;
        assert!(batches.lock().is_empty());
    }
}
