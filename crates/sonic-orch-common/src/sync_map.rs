//! Map wrapper that never creates entries implicitly.
//!
//! Lookup tables such as a LAG manager's master and slave tables must never
//! grow as a side effect of a read: a stray default entry for a port would
//! make it look like a member of nothing in particular. `SyncMap` only adds
//! entries through [`SyncMap::insert`].

use std::collections::HashMap;
use std::hash::Hash;

/// A map wrapper without auto-vivification.
///
/// # Example
///
/// ```
/// use sonic_orch_common::SyncMap;
///
/// let mut owners: SyncMap<u32, u32> = SyncMap::new();
///
/// assert!(owners.get(&10).is_none());
/// assert!(owners.is_empty());
///
/// owners.insert(10, 100);
/// assert_eq!(owners.get(&10), Some(&100));
/// ```
#[derive(Debug, Clone)]
pub struct SyncMap<K, V> {
    inner: HashMap<K, V>,
}

impl<K, V> SyncMap<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            inner: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    /// Returns `None` for a missing key. **This never creates entries.**
    pub fn get(&self, key: &K) -> Option<&V> {
        self.inner.get(key)
    }

    /// Returns `None` for a missing key. **This never creates entries.**
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.inner.get_mut(key)
    }

    /// Inserts a key-value pair, returning the previous value if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.inner.insert(key, value)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.inner.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.inner.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.inner.values()
    }
}

impl<K, V> SyncMap<K, V>
where
    K: Eq + Hash + Ord + Clone,
{
    /// Returns the keys in ascending order.
    pub fn sorted_keys(&self) -> Vec<K> {
        let mut keys: Vec<K> = self.inner.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl<K, V> Default for SyncMap<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}
