//! Observer lists with explicit unregistration.
//!
//! Observers are called in registration order from a snapshot taken under
//! the list lock; the lock is not held while calling. A panicking observer
//! is caught and logged, and delivery continues with the next one.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::infrastructure::metrics;

type Callback<A> = Arc<dyn Fn(&A) + Send + Sync>;

trait Unregister: Send + Sync {
    fn unregister(&self, id: u64) -> bool;
}

struct Inner<A: ?Sized> {
    name: &'static str,
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Callback<A>)>>,
}

impl<A: ?Sized + 'static> Unregister for Inner<A> {
    fn unregister(&self, id: u64) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }
}

/// Ordered list of observers receiving `&A`.
pub struct ObserverList<A: ?Sized> {
    inner: Arc<Inner<A>>,
}

impl<A: ?Sized + 'static> ObserverList<A> {
    /// Create an empty list. `name` labels panic logs.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                next_id: AtomicU64::new(1),
                entries: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register an observer.
    pub fn register<F>(&self, observer: F) -> ObserverHandle
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let callback: Callback<A> = Arc::new(observer);
        self.inner.entries.lock().push((id, callback));
        let list: Weak<dyn Unregister> = Arc::downgrade(&self.inner) as Weak<Inner<A>>;
        ObserverHandle { id, list }
    }

    /// Deliver `value` to every observer. Returns how many returned
    /// without panicking.
    pub fn notify(&self, value: &A) -> usize {
        let snapshot: Vec<Callback<A>> = self
            .inner
            .entries
            .lock()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        let mut delivered = 0;
        for observer in snapshot {
            if catch_unwind(AssertUnwindSafe(|| observer(value))).is_ok() {
                delivered += 1;
            } else {
                tracing::error!(observers = self.inner.name, "Observer panicked");
                metrics::record_observer_panic(self.inner.name);
            }
        }
        delivered
    }

    /// Number of registered observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Whether no observers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every observer.
    pub fn clear(&self) {
        self.inner.entries.lock().clear();
    }
}

impl<A: ?Sized> Clone for ObserverList<A> {
    /// The clone shares the same observers.
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: ?Sized> std::fmt::Debug for ObserverList<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverList")
            .field("name", &self.inner.name)
            .field("len", &self.inner.entries.lock().len())
            .finish()
    }
}

/// Registration token returned by [`ObserverList::register`].
///
/// Dropping the handle does not unregister the observer.
pub struct ObserverHandle {
    id: u64,
    list: Weak<dyn Unregister>,
}

impl ObserverHandle {
    /// Remove the observer. Returns `false` if it was already removed or
    /// the list no longer exists.
    pub fn unregister(&self) -> bool {
        self.list
            .upgrade()
            .is_some_and(|list| list.unregister(self.id))
    }
}

impl std::fmt::Debug for ObserverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverHandle").field("id", &self.id).finish()
    }
}
