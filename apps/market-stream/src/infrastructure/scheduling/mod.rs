//! Cancellable delayed execution.
//!
//! [`DelayedTask`] is the single timer primitive used by the batcher, the
//! streaming client and the polling fallback. A task runs a synchronous
//! closure once after a delay unless it is cancelled first.
//!
//! The closure receives the task's [`CancellationToken`]. Owners that
//! cancel tasks while holding a lock should re-check the token under the
//! same lock inside the closure; a task cancelled before the closure
//! acquires that lock then never acts.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A one-shot timer owning its Tokio task.
///
/// Dropping the handle cancels the timer.
#[derive(Debug)]
pub struct DelayedTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl DelayedTask {
    /// Run `f` after `delay`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<F>(delay: Duration, f: F) -> Self
    where
        F: FnOnce(CancellationToken) + Send + 'static,
    {
        Self::spawn_at(Instant::now() + delay, f)
    }

    /// Run `f` at `deadline`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn_at<F>(deadline: Instant, f: F) -> Self
    where
        F: FnOnce(CancellationToken) + Send + 'static,
    {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                () = task_token.cancelled() => {}
                () = tokio::time::sleep_until(deadline) => {
                    if !task_token.is_cancelled() {
                        f(task_token);
                    }
                }
            }
        });
        Self { token, handle }
    }

    /// Cancel the timer. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether [`cancel`](Self::cancel) was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the timer fired or was cancelled and its task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// The token handed to the closure.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for DelayedTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
