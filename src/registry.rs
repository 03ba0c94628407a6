use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

/// Thread-safe append-only registry.
///
/// The first registration for a key wins; later registrations for the same key
/// are ignored and entries are never removed. Used for endpoint options and
/// camera-info fields.
pub struct Registry<K, V> {
    entries: RwLock<BTreeMap<K, V>>,
}

impl<K: Ord + Copy, V: Clone> Registry<K, V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register `value` under `key`. Returns false if the key was already taken.
    pub fn register(&self, key: K, value: V) -> bool {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&key) {
            return false;
        }
        entries.insert(key, value);
        true
    }

    pub fn get(&self, key: K) -> Option<V> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
    }

    pub fn contains(&self, key: K) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&key)
    }

    /// Registered keys in key order.
    pub fn keys(&self) -> Vec<K> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }
}

impl<K: Ord + Copy, V: Clone> Default for Registry<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
