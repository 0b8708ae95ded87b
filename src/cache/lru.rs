//! Size-bounded memory store with LRU eviction.
//!
//! Entries are weighed in bytes rather than counted. Access order is tracked
//! with a logical clock that advances on every touch, so two entries never
//! share an access stamp and eviction is strictly least-recently-used.

use std::collections::HashMap;

use serde::Serialize;

use crate::types::CacheValue;

/// A cached value with its accounting data.
#[derive(Debug)]
struct LruEntry {
    value: CacheValue,
    size: u64,
    last_access: u64,
}

/// Snapshot of the store's occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LruStats {
    pub count: usize,
    pub current_size: u64,
    pub max_size: u64,
    /// Occupancy as a percentage of `max_size`.
    pub utilization_rate: f64,
}

/// Memory store with byte-size LRU eviction.
#[derive(Debug)]
pub struct LruStore {
    entries: HashMap<String, LruEntry>,
    current_size: u64,
    max_size: u64,
    clock: u64,
}

impl LruStore {
    /// Creates an empty store bounded to `max_size` bytes.
    pub fn new(max_size: u64) -> Self {
        Self {
            entries: HashMap::new(),
            current_size: 0,
            max_size,
            clock: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Returns a value by key, marking it most recently used.
    pub fn get(&mut self, key: &str) -> Option<&CacheValue> {
        let stamp = self.tick();
        let entry = self.entries.get_mut(key)?;
        entry.last_access = stamp;
        Some(&entry.value)
    }

    /// Inserts or replaces a value of `size` bytes.
    ///
    /// Least recently used entries are evicted until the new value fits. A
    /// value larger than the whole store is still admitted once everything
    /// else has been evicted. Returns the keys that were evicted.
    pub fn set(&mut self, key: &str, value: CacheValue, size: u64) -> Vec<String> {
        if let Some(old) = self.entries.remove(key) {
            self.current_size -= old.size;
        }

        let mut evicted = Vec::new();
        while self.current_size + size > self.max_size && !self.entries.is_empty() {
            match self.evict_lru() {
                Some(k) => evicted.push(k),
                None => break,
            }
        }

        let stamp = self.tick();
        self.entries.insert(
            key.to_string(),
            LruEntry {
                value,
                size,
                last_access: stamp,
            },
        );
        self.current_size += size;

        evicted
    }

    /// Evicts the least recently used entry, returning its key.
    fn evict_lru(&mut self) -> Option<String> {
        let oldest_key = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(k, _)| k.clone())?;

        let entry = self.entries.remove(&oldest_key)?;
        self.current_size -= entry.size;
        Some(oldest_key)
    }

    /// Removes a value. Missing keys are ignored.
    pub fn delete(&mut self, key: &str) -> Option<CacheValue> {
        let entry = self.entries.remove(key)?;
        self.current_size -= entry.size;
        Some(entry.value)
    }

    /// Checks if a key is resident without touching its access order.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Clears all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.current_size = 0;
    }

    /// Returns the number of resident entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the sum of resident entry sizes.
    pub fn current_size(&self) -> u64 {
        self.current_size
    }

    /// Returns occupancy statistics.
    pub fn stats(&self) -> LruStats {
        LruStats {
            count: self.entries.len(),
            current_size: self.current_size,
            max_size: self.max_size,
            utilization_rate: if self.max_size > 0 {
                self.current_size as f64 / self.max_size as f64 * 100.0
            } else {
                0.0
            },
        }
    }
}
