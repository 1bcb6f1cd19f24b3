//! LRU Cache implementation.
//!
//! A mutex-protected LRU cache sized for the repair workload, where every
//! table is opened once and a small capacity suffices.

use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;

struct LruInner<K, V> {
    /// Map from key to value.
    map: HashMap<K, V>,
    /// Keys from least to most recently used.
    order: Vec<K>,
}

/// A least-recently-used cache with a fixed capacity.
pub struct LruCache<K, V> {
    capacity: usize,
    inner: Mutex<LruInner<K, V>>,
}

impl<K: Hash + Eq + Clone, V: Clone> LruCache<K, V> {
    /// Create a new cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(LruInner {
                map: HashMap::with_capacity(capacity),
                order: Vec::with_capacity(capacity),
            }),
        }
    }

    /// Look up a key, marking it most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let value = inner.map.get(key).cloned()?;
        Self::touch(&mut inner.order, key);
        Some(value)
    }

    /// Insert a value, evicting the least recently used entry at capacity.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();

        if inner.map.insert(key.clone(), value).is_some() {
            Self::touch(&mut inner.order, &key);
            return;
        }

        inner.order.push(key);
        if inner.map.len() > self.capacity {
            let evicted = inner.order.remove(0);
            inner.map.remove(&evicted);
        }
    }

    /// Remove an entry.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let value = inner.map.remove(key)?;
        inner.order.retain(|k| k != key);
        Some(value)
    }

    /// Get the number of cached entries.
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all entries.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.order.clear();
    }

    fn touch(order: &mut Vec<K>, key: &K) {
        if let Some(pos) = order.iter().position(|k| k == key) {
            let k = order.remove(pos);
            order.push(k);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_insert_get() {
        let cache = LruCache::new(4);
        cache.insert("a", 1);
        cache.insert("b", 2);

        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"b"), Some(2));
        assert_eq!(cache.get(&"c"), None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_lru_eviction_order() {
        let cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);

        // Touch "a" so "b" becomes the eviction candidate.
        cache.get(&"a");
        cache.insert("c", 3);

        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[test]
    fn test_lru_update_existing() {
        let cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("a", 10);

        assert_eq!(cache.get(&"a"), Some(10));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_lru_remove_and_clear() {
        let cache = LruCache::new(4);
        cache.insert("a", 1);
        cache.insert("b", 2);

        assert_eq!(cache.remove(&"a"), Some(1));
        assert_eq!(cache.get(&"a"), None);

        cache.clear();
        assert!(cache.is_empty());
    }
}
