use crate::Classification;
use dashmap::DashMap;
use std::sync::Arc;

/// Append-only memo of classifications keyed by the raw link.
#[derive(Clone)]
pub struct Cache {
    entries: Arc<DashMap<String, Classification>>,
    capacity: usize,
}

impl Cache {
    /// A capacity of zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(DashMap::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    pub fn get(&self, key: &str) -> Option<Classification> {
        self.entries.get(key).map(|entry| entry.clone())
    }

    /// Stores `value` unless the cache is full; existing entries are never evicted.
    pub fn set(&self, key: String, value: Classification) {
        if self.entries.contains_key(&key) || self.entries.len() < self.capacity {
            self.entries.insert(key, value);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
