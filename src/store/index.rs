use std::collections::{HashMap, VecDeque};

use super::CacheEntry;

/// Insertion-ordered index over one named cache. Eviction is FIFO by write
/// order, not by access recency: reads never reorder, and an overwrite counts
/// as a new write, moving the key to the back of the queue.
#[derive(Debug, Default)]
pub(super) struct FifoIndex {
    order: VecDeque<String>,
    entries: HashMap<String, CacheEntry>,
}

impl FifoIndex {
    pub(super) fn new() -> Self {
        Self::default()
    }

    pub(super) fn reset(&mut self) {
        self.order.clear();
        self.entries.clear();
    }

    pub(super) fn get(&self, key_base: &str) -> Option<CacheEntry> {
        self.entries.get(key_base).cloned()
    }

    pub(super) fn insert(&mut self, key_base: String, entry: CacheEntry) -> Option<CacheEntry> {
        let replaced = self.entries.insert(key_base.clone(), entry);
        if replaced.is_some() {
            self.order.retain(|key| key != &key_base);
        }
        self.order.push_back(key_base);
        replaced
    }

    pub(super) fn remove(&mut self, key_base: &str) -> Option<CacheEntry> {
        let removed = self.entries.remove(key_base);
        if removed.is_some() {
            self.order.retain(|key| key != key_base);
        }
        removed
    }

    pub(super) fn pop_oldest(&mut self) -> Option<(String, CacheEntry)> {
        let key_base = self.order.pop_front()?;
        let entry = self
            .entries
            .remove(&key_base)
            .expect("index order and entry map out of sync");
        Some((key_base, entry))
    }

    pub(super) fn keys(&self) -> Vec<String> {
        self.order.iter().cloned().collect()
    }

    pub(super) fn len(&self) -> usize {
        self.entries.len()
    }
}
