//! In-memory TTL cache with approximate-LRU (FIFO) eviction on overflow.
//!
//! One mechanism backs all three caches named in §4.9: a mutex-guarded map
//! from key to `(value, inserted_at)`, checked for staleness on read and
//! evicting the oldest entry on insertion over cap.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// A capped, TTL-expiring cache. Safe to share across requests behind an
/// `Arc`; a single mutex serialises get-or-insert and evict-oldest-on-full,
/// per the concurrency model of §5.
pub struct TtlCache<K, V> {
    inner: Mutex<HashMap<K, Entry<V>>>,
    ttl: Duration,
    capacity: usize,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            ttl,
            capacity,
        }
    }

    /// Returns a live value for `key`, evicting it first if it has expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut guard = self.inner.lock().unwrap();
        match guard.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(entry.value.clone()),
            Some(_) => {
                guard.remove(key);
                None
            }
            None => None,
        }
    }

    /// Inserts `value` under `key`, evicting the oldest entry first if the
    /// cache is at capacity. FIFO on ties — an accepted approximation of
    /// LRU per §9.
    pub fn insert(&self, key: K, value: V) {
        let mut guard = self.inner.lock().unwrap();
        if guard.len() >= self.capacity && !guard.contains_key(&key) {
            if let Some(oldest_key) = guard
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(k, _)| k.clone())
            {
                guard.remove(&oldest_key);
            }
        }
        guard.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single-entry, long-TTL cache for the comprehensive fallback dataset
/// (§4.9: "comprehensive-dataset cache (long TTL, single entry)").
pub struct SingletonTtlCache<V> {
    inner: Mutex<Option<Entry<V>>>,
    ttl: Duration,
}

impl<V: Clone> SingletonTtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(None),
            ttl,
        }
    }

    pub fn get(&self) -> Option<V> {
        let mut guard = self.inner.lock().unwrap();
        match guard.as_ref() {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(entry.value.clone()),
            Some(_) => {
                *guard = None;
                None
            }
            None => None,
        }
    }

    pub fn set(&self, value: V) {
        *self.inner.lock().unwrap() = Some(Entry {
            value,
            inserted_at: Instant::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn round_trips_within_ttl() {
        let cache: TtlCache<String, i32> = TtlCache::new(Duration::from_secs(60), 10);
        cache.insert("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
    }

    #[test]
    fn expires_after_ttl() {
        let cache: TtlCache<String, i32> = TtlCache::new(Duration::from_millis(10), 10);
        cache.insert("a".to_string(), 1);
        sleep(Duration::from_millis(25));
        assert_eq!(cache.get(&"a".to_string()), None);
    }

    #[test]
    fn evicts_oldest_when_over_capacity() {
        let cache: TtlCache<i32, i32> = TtlCache::new(Duration::from_secs(60), 2);
        cache.insert(1, 10);
        sleep(Duration::from_millis(5));
        cache.insert(2, 20);
        sleep(Duration::from_millis(5));
        cache.insert(3, 30);
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&2), Some(20));
        assert_eq!(cache.get(&3), Some(30));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn singleton_cache_round_trips() {
        let cache: SingletonTtlCache<Vec<i32>> = SingletonTtlCache::new(Duration::from_secs(60));
        assert_eq!(cache.get(), None);
        cache.set(vec![1, 2, 3]);
        assert_eq!(cache.get(), Some(vec![1, 2, 3]));
    }
}
