//! Single slot holding the most recently published value. Publishing overwrites, there
//! is no queue: a reader only ever sees the newest value and stale ones are dropped.

use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug)]
pub struct Latest<T> {
    slot: Arc<Mutex<Option<Arc<T>>>>,
}

impl<T> Clone for Latest<T> {
    fn clone(&self) -> Self {
        Latest { slot: Arc::clone(&self.slot) }
    }
}

impl<T> Default for Latest<T> {
    fn default() -> Self {
        Latest { slot: Arc::new(Mutex::new(None)) }
    }
}

impl<T> Latest<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current value.
    pub fn publish(&self, value: T) {
        *self.slot.lock() = Some(Arc::new(value));
    }

    /// The newest value, if anything was published yet. Holding it does not block writers.
    pub fn get(&self) -> Option<Arc<T>> {
        self.slot.lock().clone()
    }
}
