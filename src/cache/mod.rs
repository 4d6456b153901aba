//! Bounded, memoizing in-memory cache.
//!
//! [`BoundedCache`] wraps any value-producing operation: a miss calls the
//! supplied closure once and stores whatever it returns. Capacity is counted
//! in entries and enforced by one of two eviction policies:
//!
//! - [`CachePolicy::Lru`]: least recently used, backed by the `lru` crate
//! - [`CachePolicy::Lfu`]: least frequently used, ties broken by insertion age

mod bounded;
mod lfu;

pub use bounded::{BoundedCache, CachePolicy, CacheStats, DEFAULT_CACHE_CAPACITY};
