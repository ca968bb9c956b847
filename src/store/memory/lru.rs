//! LRU Tracker Module
//!
//! Recency order of keys in the in-memory store, used to bound its size.

use indexmap::IndexSet;

// == LRU Tracker ==
/// Keys ordered from least (front) to most (back) recently used.
#[derive(Debug, Default)]
pub struct LruTracker {
    order: IndexSet<String>,
}

impl LruTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a key as most recently used.
    pub fn touch(&mut self, key: &str) {
        if let Some(index) = self.order.get_index_of(key) {
            let last = self.order.len() - 1;
            self.order.move_index(index, last);
        } else {
            self.order.insert(key.to_string());
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.order.shift_remove(key);
    }

    /// Removes and returns the least recently used key.
    pub fn evict_oldest(&mut self) -> Option<String> {
        self.order.shift_remove_index(0)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.order.len()
    }
}
