//! Eviction Cache - fixed-capacity LRU map
//!
//! Recency is tracked with a monotonically increasing access tick. Each key
//! maps to its payload and last tick, and a `BTreeMap<tick, key>` keeps the
//! keys in recency order so the least recently used entry is always the
//! first element.
//!
//! # Performance
//! - get / set / has: O(log n)
//! - eviction: O(log n), at most one entry per insert

use crate::resolution::ResolutionError;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

struct Slot<V> {
    value: V,
    tick: u64,
}

/// Least-recently-used cache bounded at `capacity` entries
pub struct EvictionCache<K, V> {
    entries: HashMap<K, Slot<V>>,
    /// tick → key, oldest first
    order: BTreeMap<u64, K>,
    capacity: usize,
    next_tick: u64,
    evictions: u64,
}

impl<K, V> EvictionCache<K, V>
where
    K: Clone + Eq + Hash,
{
    /// Create an empty cache
    ///
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            capacity: capacity.max(1),
            next_tick: 0,
            evictions: 0,
        }
    }

    fn bump(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    fn promote(&mut self, key: &K) {
        let tick = self.bump();
        if let Some(slot) = self.entries.get_mut(key) {
            self.order.remove(&slot.tick);
            slot.tick = tick;
            self.order.insert(tick, key.clone());
        }
    }

    /// Get a payload, promoting it to most recently used
    pub fn get(&mut self, key: &K) -> Option<&V> {
        if !self.entries.contains_key(key) {
            return None;
        }
        self.promote(key);
        self.entries.get(key).map(|slot| &slot.value)
    }

    /// Membership test that leaves recency untouched
    pub fn has(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Read a payload without promoting it
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|slot| &slot.value)
    }

    /// Insert or replace a payload
    ///
    /// Returns the key evicted to make room, if any.
    pub fn set(&mut self, key: K, value: V) -> Option<K> {
        if let Some(slot) = self.entries.get_mut(&key) {
            slot.value = value;
            self.promote(&key);
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.evict_lru()
        } else {
            None
        };

        let tick = self.bump();
        self.order.insert(tick, key.clone());
        self.entries.insert(key, Slot { value, tick });

        debug_assert!(
            self.entries.len() <= self.capacity,
            "eviction cache exceeded capacity"
        );

        evicted
    }

    fn evict_lru(&mut self) -> Option<K> {
        let (_, key) = self.order.pop_first()?;
        self.entries.remove(&key);
        self.evictions += 1;
        Some(key)
    }

    /// Remove an entry
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.entries.remove(key)?;
        self.order.remove(&slot.tick);
        Some(slot.value)
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total evictions since creation
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Keys ordered from least to most recently used
    pub fn keys(&self) -> Vec<K> {
        self.order.values().cloned().collect()
    }

    /// Iterate payloads in no particular order
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values().map(|slot| &slot.value)
    }

    /// Verify size and ordering invariants
    pub fn check_invariants(&self) -> Result<(), ResolutionError> {
        if self.entries.len() > self.capacity || self.order.len() != self.entries.len() {
            return Err(ResolutionError::CacheCorruption {
                len: self.entries.len(),
                capacity: self.capacity,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_least_recently_inserted() {
        let mut cache = EvictionCache::new(3);
        cache.set(1, "a");
        cache.set(2, "b");
        cache.set(3, "c");

        let evicted = cache.set(4, "d");

        assert_eq!(evicted, Some(1));
        assert_eq!(cache.len(), 3);
        assert!(!cache.has(&1));
        assert_eq!(cache.keys(), vec![2, 3, 4]);
    }

    #[test]
    fn test_get_changes_eviction_victim() {
        let mut cache = EvictionCache::new(3);
        cache.set(1, "a");
        cache.set(2, "b");
        cache.set(3, "c");

        assert_eq!(cache.get(&1), Some(&"a"));
        let evicted = cache.set(4, "d");

        assert_eq!(evicted, Some(2));
        assert!(cache.has(&1));
        assert_eq!(cache.evictions(), 1);
    }

    #[test]
    fn test_has_does_not_promote() {
        let mut cache = EvictionCache::new(2);
        cache.set(1, "a");
        cache.set(2, "b");

        assert!(cache.has(&1));
        assert_eq!(cache.peek(&1), Some(&"a"));
        assert_eq!(cache.set(3, "c"), Some(1));
    }

    #[test]
    fn test_set_existing_refreshes_without_evicting() {
        let mut cache = EvictionCache::new(2);
        cache.set(1, "a");
        cache.set(2, "b");

        assert_eq!(cache.set(1, "a2"), None);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.set(3, "c"), Some(2));
        assert_eq!(cache.peek(&1), Some(&"a2"));
    }

    #[test]
    fn test_size_never_exceeds_capacity() {
        let mut cache = EvictionCache::new(50);
        for i in 0..500 {
            cache.set(i, i * 2);
            assert!(cache.len() <= 50);
        }
        assert!(cache.check_invariants().is_ok());
        assert_eq!(cache.evictions(), 450);
    }

    #[test]
    fn test_remove_and_clear() {
        let mut cache = EvictionCache::new(4);
        cache.set("x", 1);
        cache.set("y", 2);

        assert_eq!(cache.remove(&"x"), Some(1));
        assert_eq!(cache.keys(), vec!["y"]);

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get(&"y").is_none());
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let mut cache = EvictionCache::new(0);
        cache.set(1, ());
        cache.set(2, ());
        assert_eq!(cache.capacity(), 1);
        assert_eq!(cache.keys(), vec![2]);
    }
}
