use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::num::NonZeroUsize;

/// Least-frequently-used store.
///
/// Entries are ordered by `(frequency, insertion sequence)`, so among entries
/// with equal frequency the oldest-inserted one is evicted first.
pub(crate) struct LfuStore<K, V> {
    entries: HashMap<K, LfuEntry<V>>,
    order: BTreeMap<(u64, u64), K>,
    next_seq: u64,
    capacity: NonZeroUsize,
}

struct LfuEntry<V> {
    value: V,
    frequency: u64,
    seq: u64,
}

impl<K: Hash + Eq + Clone, V> LfuStore<K, V> {
    pub(crate) fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity.get()),
            order: BTreeMap::new(),
            next_seq: 0,
            capacity,
        }
    }

    /// Look up a value and count the access.
    pub(crate) fn get(&mut self, key: &K) -> Option<&V> {
        let entry = self.entries.get_mut(key)?;
        self.order.remove(&(entry.frequency, entry.seq));
        entry.frequency += 1;
        self.order.insert((entry.frequency, entry.seq), key.clone());
        Some(&entry.value)
    }

    /// Look up a value without counting the access.
    pub(crate) fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert or overwrite a value.
    ///
    /// Overwriting keeps the entry's frequency and insertion order. Inserting a
    /// new key into a full store evicts and returns the least-frequent entry.
    pub(crate) fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.value = value;
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity.get() {
            self.evict()
        } else {
            None
        };

        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert((1, seq), key.clone());
        self.entries.insert(
            key,
            LfuEntry {
                value,
                frequency: 1,
                seq,
            },
        );

        evicted
    }

    /// Replace the value of an existing entry without counting an access.
    pub(crate) fn overwrite(&mut self, key: &K, value: V) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.value = value;
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove(&mut self, key: &K) -> Option<V> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&(entry.frequency, entry.seq));
        Some(entry.value)
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn frequency(&self, key: &K) -> Option<u64> {
        self.entries.get(key).map(|entry| entry.frequency)
    }

    fn evict(&mut self) -> Option<(K, V)> {
        let (_, key) = self.order.pop_first()?;
        let entry = self.entries.remove(&key)?;
        Some((key, entry.value))
    }
}
