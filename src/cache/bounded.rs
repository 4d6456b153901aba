use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use serde::Serialize;

use super::lfu::LfuStore;
use crate::error::ConfigError;

/// Default maximum number of cached entries.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

// =============================================================================
// Eviction Policy
// =============================================================================

/// Which entry a full cache gives up when a new key arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePolicy {
    /// Evict the least recently used entry
    #[default]
    Lru,

    /// Evict the least frequently used entry, oldest first on ties
    Lfu,
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CachePolicy::Lru => f.write_str("lru"),
            CachePolicy::Lfu => f.write_str("lfu"),
        }
    }
}

impl FromStr for CachePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(CachePolicy::Lru),
            "lfu" => Ok(CachePolicy::Lfu),
            other => Err(format!("unknown cache policy '{other}' (expected lru or lfu)")),
        }
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub policy: CachePolicy,
    pub capacity: usize,
    pub len: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

// =============================================================================
// Store
// =============================================================================

enum Store<K: Hash + Eq, V> {
    Lru(LruCache<K, V>),
    Lfu(LfuStore<K, V>),
}

impl<K: Hash + Eq + Clone, V> Store<K, V> {
    fn get(&mut self, key: &K) -> Option<&V> {
        match self {
            Store::Lru(lru) => lru.get(key),
            Store::Lfu(lfu) => lfu.get(key),
        }
    }

    fn peek(&self, key: &K) -> Option<&V> {
        match self {
            Store::Lru(lru) => lru.peek(key),
            Store::Lfu(lfu) => lfu.peek(key),
        }
    }

    fn contains(&self, key: &K) -> bool {
        match self {
            Store::Lru(lru) => lru.contains(key),
            Store::Lfu(lfu) => lfu.contains(key),
        }
    }

    /// Insert or overwrite. Returns the entry evicted to make room, if any.
    fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        match self {
            Store::Lru(lru) => {
                if lru.contains(&key) {
                    lru.put(key, value);
                    None
                } else {
                    lru.push(key, value)
                }
            }
            Store::Lfu(lfu) => lfu.insert(key, value),
        }
    }

    /// Replace the value of an existing entry in place, leaving its
    /// recency or frequency untouched.
    fn overwrite(&mut self, key: &K, value: V) -> bool {
        match self {
            Store::Lru(lru) => match lru.peek_mut(key) {
                Some(slot) => {
                    *slot = value;
                    true
                }
                None => false,
            },
            Store::Lfu(lfu) => lfu.overwrite(key, value),
        }
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        match self {
            Store::Lru(lru) => lru.pop(key),
            Store::Lfu(lfu) => lfu.remove(key),
        }
    }

    fn clear(&mut self) {
        match self {
            Store::Lru(lru) => lru.clear(),
            Store::Lfu(lfu) => lfu.clear(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Store::Lru(lru) => lru.len(),
            Store::Lfu(lfu) => lfu.len(),
        }
    }
}

struct Inner<K: Hash + Eq, V> {
    store: Store<K, V>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<K: Hash + Eq + Clone, V> Inner<K, V> {
    fn insert(&mut self, key: K, value: V) {
        if self.store.insert(key, value).is_some() {
            self.evictions += 1;
        }
    }
}

// =============================================================================
// Bounded Cache
// =============================================================================

/// Memoizing cache bounded by entry count.
///
/// Every operation holds a single mutex, so a lookup and the insert that
/// follows a miss are atomic with respect to other threads. The `fetch`
/// closures passed to [`get_or_insert_with`](Self::get_or_insert_with) and
/// [`refresh_if`](Self::refresh_if) run under that lock and must not touch the
/// cache again.
///
/// Values are returned by clone; store `Arc`s or other cheap handles.
///
/// # Example
///
/// ```
/// use std::num::NonZeroUsize;
/// use maptile_cache::cache::{BoundedCache, CachePolicy};
///
/// let cache = BoundedCache::new(NonZeroUsize::new(2).unwrap(), CachePolicy::Lru);
///
/// let mut calls = 0;
/// let first = cache.get_or_insert_with("a", |_| { calls += 1; 1 });
/// let again = cache.get_or_insert_with("a", |_| { calls += 1; 2 });
///
/// assert_eq!((first, again, calls), (1, 1, 1));
/// ```
pub struct BoundedCache<K: Hash + Eq, V> {
    inner: Mutex<Inner<K, V>>,
    capacity: NonZeroUsize,
    policy: CachePolicy,
}

impl<K: Hash + Eq + Clone, V: Clone> BoundedCache<K, V> {
    /// Create an empty cache.
    pub fn new(capacity: NonZeroUsize, policy: CachePolicy) -> Self {
        let store = match policy {
            CachePolicy::Lru => Store::Lru(LruCache::new(capacity)),
            CachePolicy::Lfu => Store::Lfu(LfuStore::new(capacity)),
        };

        Self {
            inner: Mutex::new(Inner {
                store,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            capacity,
            policy,
        }
    }

    /// Create an empty cache, rejecting a zero capacity.
    pub fn with_capacity(capacity: usize, policy: CachePolicy) -> Result<Self, ConfigError> {
        let capacity = NonZeroUsize::new(capacity).ok_or(ConfigError::InvalidCapacity)?;
        Ok(Self::new(capacity, policy))
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K, V>> {
        // A panicking fetch closure leaves the store itself consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a value, counting it as an access.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.lock();
        match inner.store.get(key).cloned() {
            Some(value) => {
                inner.hits += 1;
                Some(value)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Look up a value without touching recency, frequency or counters.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.lock().store.peek(key).cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.lock().store.contains(key)
    }

    /// Return the cached value for `key`, computing and storing it on a miss.
    ///
    /// `fetch` runs at most once per miss and its result is memoized whatever
    /// it is, including values that stand for "nothing there".
    pub fn get_or_insert_with<F>(&self, key: K, fetch: F) -> V
    where
        F: FnOnce(&K) -> V,
    {
        self.refresh_if(key, |_| false, fetch)
    }

    /// Like [`get_or_insert_with`](Self::get_or_insert_with), but a cached
    /// value for which `stale` returns `true` is recomputed.
    pub fn refresh_if<S, F>(&self, key: K, stale: S, fetch: F) -> V
    where
        S: FnOnce(&V) -> bool,
        F: FnOnce(&K) -> V,
    {
        let mut inner = self.lock();

        if let Some(value) = inner.store.get(&key).filter(|v| !stale(v)).cloned() {
            inner.hits += 1;
            return value;
        }

        inner.misses += 1;
        let value = fetch(&key);
        inner.insert(key, value.clone());
        value
    }

    /// Insert or overwrite an entry.
    pub fn replace(&self, key: K, value: V) {
        self.lock().insert(key, value);
    }

    /// Overwrite an existing entry when `f` returns a new value.
    ///
    /// Returns `false` when the key is not cached or `f` declined. Neither
    /// recency nor frequency changes.
    pub fn update<F>(&self, key: &K, f: F) -> bool
    where
        F: FnOnce(&V) -> Option<V>,
    {
        let mut inner = self.lock();

        let Some(next) = inner.store.peek(key).and_then(f) else {
            return false;
        };

        inner.store.overwrite(key, next)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.lock().store.remove(key)
    }

    /// Drop every entry. Counters are kept.
    pub fn invalidate_all(&self) {
        self.lock().store.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            policy: self.policy,
            capacity: self.capacity.get(),
            len: inner.store.len(),
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }
}

impl<K: Hash + Eq, V> fmt::Debug for BoundedCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedCache")
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
