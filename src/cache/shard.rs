//! Sharded Map
//!
//! Concurrent hashmap split into power-of-two shards, each behind its own
//! `RwLock`. Every structural change to one key happens under that key's
//! shard write lock, so a reader never observes a torn entry.
//!
//! Entry count and total weight are tracked per shard with atomics and are
//! only adjusted while the shard write lock is held.

use parking_lot::RwLock;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicU64, Ordering};

use super::CACHE_LINE_SIZE;

/// Values that report their own size for capacity accounting
pub trait Weighted {
    fn weight(&self) -> u64;
}

/// Single shard: a map plus its counters
#[repr(C)]
pub struct Shard<K, V> {
    map: RwLock<HashMap<K, V>>,
    count: AtomicU64,
    weight: AtomicU64,
    _padding: [u8; CACHE_LINE_SIZE - 16],
}

impl<K, V> Default for Shard<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Shard<K, V> {
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            count: AtomicU64::new(0),
            weight: AtomicU64::new(0),
            _padding: [0; CACHE_LINE_SIZE - 16],
        }
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of value weights in this shard
    pub fn weight(&self) -> u64 {
        self.weight.load(Ordering::Relaxed)
    }
}

impl<K: Eq + Hash, V: Weighted> Shard<K, V> {
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.map.read().get(key).cloned()
    }

    /// Read a projection of the value without cloning it
    pub fn peek<Q, R>(&self, key: &Q, f: impl FnOnce(&V) -> R) -> Option<R>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.read().get(key).map(f)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.read().contains_key(key)
    }

    /// Insert or replace, returning the previous value
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let added = value.weight();
        let mut guard = self.map.write();
        let old = guard.insert(key, value);

        match &old {
            Some(prev) => {
                self.weight.fetch_add(added, Ordering::Relaxed);
                self.weight.fetch_sub(prev.weight(), Ordering::Relaxed);
            }
            None => {
                self.count.fetch_add(1, Ordering::Relaxed);
                self.weight.fetch_add(added, Ordering::Relaxed);
            }
        }

        old
    }

    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.remove_if(key, |_| true)
    }

    /// Remove only when `pred` holds for the current value
    pub fn remove_if<Q>(&self, key: &Q, pred: impl FnOnce(&V) -> bool) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut guard = self.map.write();
        if !guard.get(key).map(pred).unwrap_or(false) {
            return None;
        }

        let removed = guard.remove(key)?;
        self.count.fetch_sub(1, Ordering::Relaxed);
        self.weight.fetch_sub(removed.weight(), Ordering::Relaxed);
        Some(removed)
    }

    pub fn clear(&self) {
        let mut guard = self.map.write();
        guard.clear();
        self.count.store(0, Ordering::Relaxed);
        self.weight.store(0, Ordering::Relaxed);
    }

    /// Collect a projection of every entry, holding the read lock once
    pub fn collect<R>(&self, mut f: impl FnMut(&K, &V) -> Option<R>) -> Vec<R> {
        let guard = self.map.read();
        guard.iter().filter_map(|(k, v)| f(k, v)).collect()
    }
}

/// Sharded map with `N` shards
pub struct ShardedMap<K, V, const N: usize> {
    shards: Box<[Shard<K, V>]>,
    hasher: std::collections::hash_map::RandomState,
}

impl<K, V, const N: usize> Default for ShardedMap<K, V, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, const N: usize> ShardedMap<K, V, N> {
    pub fn new() -> Self {
        debug_assert!(N.is_power_of_two(), "shard count must be a power of two");
        Self {
            shards: (0..N).map(|_| Shard::new()).collect(),
            hasher: Default::default(),
        }
    }

    #[inline]
    pub const fn shard_count(&self) -> usize {
        N
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.is_empty())
    }

    /// Total weight across shards
    pub fn weight(&self) -> u64 {
        self.shards.iter().map(|s| s.weight()).sum()
    }

    /// Per-shard entry counts
    pub fn distribution(&self) -> Vec<usize> {
        self.shards.iter().map(|s| s.len()).collect()
    }
}

impl<K: Eq + Hash, V: Weighted, const N: usize> ShardedMap<K, V, N> {
    #[inline]
    fn shard_for<Q: Hash + ?Sized>(&self, key: &Q) -> &Shard<K, V> {
        let hash = self.hasher.hash_one(key);
        &self.shards[(hash as usize) & (N - 1)]
    }

    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.shard_for(key).get(key)
    }

    pub fn peek<R>(&self, key: &K, f: impl FnOnce(&V) -> R) -> Option<R> {
        self.shard_for(key).peek(key, f)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.shard_for(key).contains_key(key)
    }

    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.shard_for(&key).insert(key, value)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.shard_for(key).remove(key)
    }

    pub fn remove_if(&self, key: &K, pred: impl FnOnce(&V) -> bool) -> Option<V> {
        self.shard_for(key).remove_if(key, pred)
    }

    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.clear();
        }
    }

    /// Collect a projection of every entry, one shard lock at a time
    pub fn collect<R>(&self, mut f: impl FnMut(&K, &V) -> Option<R>) -> Vec<R> {
        let mut out = Vec::new();
        for shard in self.shards.iter() {
            out.extend(shard.collect(&mut f));
        }
        out
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Blob(Vec<u8>);

    impl Weighted for Blob {
        fn weight(&self) -> u64 {
            self.0.len() as u64
        }
    }

    fn blob(n: usize) -> Blob {
        Blob(vec![0u8; n])
    }

    #[test]
    fn test_shard_insert_replace_remove() {
        let shard: Shard<String, Blob> = Shard::new();
        assert!(shard.is_empty());

        assert!(shard.insert("a".to_string(), blob(4)).is_none());
        assert_eq!(shard.len(), 1);
        assert_eq!(shard.weight(), 4);

        // Replacement adjusts weight but not count
        let old = shard.insert("a".to_string(), blob(10));
        assert_eq!(old, Some(blob(4)));
        assert_eq!(shard.len(), 1);
        assert_eq!(shard.weight(), 10);

        assert_eq!(shard.remove("a"), Some(blob(10)));
        assert!(shard.is_empty());
        assert_eq!(shard.weight(), 0);
    }

    #[test]
    fn test_remove_if() {
        let shard: Shard<String, Blob> = Shard::new();
        shard.insert("a".to_string(), blob(4));

        assert!(shard.remove_if("a", |v| v.0.len() == 5).is_none());
        assert_eq!(shard.len(), 1);
        assert!(shard.remove_if("a", |v| v.0.len() == 4).is_some());
        assert!(shard.is_empty());
        assert!(shard.remove_if("missing", |_| true).is_none());
    }

    #[test]
    fn test_sharded_map_basic() {
        let map: ShardedMap<String, Blob, 16> = ShardedMap::new();
        assert_eq!(map.shard_count(), 16);

        map.insert("key1".to_string(), blob(1));
        map.insert("key2".to_string(), blob(2));

        assert_eq!(map.len(), 2);
        assert_eq!(map.weight(), 3);
        assert_eq!(map.get(&"key1".to_string()), Some(blob(1)));
        assert_eq!(map.peek(&"key2".to_string(), |v| v.weight()), Some(2));
        assert!(map.get(&"key3".to_string()).is_none());

        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.weight(), 0);
    }

    #[test]
    fn test_collect_visits_every_entry() {
        let map: ShardedMap<u32, Blob, 8> = ShardedMap::new();
        for i in 0..100 {
            map.insert(i, blob(i as usize));
        }

        let mut even: Vec<u32> = map.collect(|k, _| (k % 2 == 0).then_some(*k));
        even.sort();
        assert_eq!(even.len(), 50);
        assert_eq!(even[0], 0);
        assert_eq!(even[49], 98);
    }

    #[test]
    fn test_distribution() {
        let map: ShardedMap<String, Blob, 16> = ShardedMap::new();
        for i in 0..1000 {
            map.insert(format!("key{}", i), blob(1));
        }

        let counts = map.distribution();
        let max = counts.iter().max().copied().unwrap_or(0);
        let min = counts.iter().min().copied().unwrap_or(0);
        assert!(max < 200, "Uneven distribution: max shard has {} entries", max);
        assert!(min > 20, "Uneven distribution: min shard has {} entries", min);
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let map: Arc<ShardedMap<String, Blob, 16>> = Arc::new(ShardedMap::new());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let map = Arc::clone(&map);
                thread::spawn(move || {
                    for i in 0..1000 {
                        let key = format!("key-{}-{}", t, i);
                        map.insert(key.clone(), blob(4));
                        map.get(&key);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(map.len(), 8000);
        assert_eq!(map.weight(), 32000);
    }
}
