//! Bounded buffer of recently delivered events.

use std::collections::VecDeque;

/// Default capacity.
pub const DEFAULT_BUFFER_SIZE: usize = 1000;

/// Fixed-capacity FIFO that evicts the oldest entry when full.
///
/// Used for introspection only; buffered events are never replayed.
#[derive(Debug, Clone)]
pub struct MessageBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
    evicted: u64,
}

impl<T> MessageBuffer<T> {
    /// Create a buffer holding at most `capacity` items. Zero disables
    /// buffering.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(DEFAULT_BUFFER_SIZE)),
            capacity,
            evicted: 0,
        }
    }

    /// Append an item, evicting the oldest if full.
    pub fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        if self.items.len() == self.capacity {
            self.items.pop_front();
            self.evicted += 1;
        }
        self.items.push_back(item);
    }

    /// Remove and return everything, oldest first.
    pub fn drain(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Items held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items evicted since creation.
    #[must_use]
    pub const fn evicted(&self) -> u64 {
        self.evicted
    }
}
