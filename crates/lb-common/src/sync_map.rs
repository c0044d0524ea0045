//! Reference-counted registry map that never auto-vivifies entries.
//!
//! Shared records such as backends are looked up, counted and released
//! through explicit methods only:
//! - `get()` returns `Option<&V>`
//! - `increment_ref()` / `decrement_ref()` return `Result<u32, SyncMapError>`
//!
//! A missing key or a count underflow is an error, never a silently
//! created default entry.

use std::collections::HashMap;
use std::hash::Hash;
use thiserror::Error;

/// Error type for SyncMap operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncMapError {
    #[error("Key not found")]
    KeyNotFound,

    #[error("Reference count underflow")]
    RefCountUnderflow,
}

/// Trait for types that have a reference count.
pub trait HasRefCount {
    /// Increments the reference count and returns the new value.
    fn increment_ref(&mut self) -> u32;

    /// Decrements the reference count and returns the new value.
    ///
    /// Returns `None` if the count would underflow.
    fn decrement_ref(&mut self) -> Option<u32>;

    /// Returns the current reference count.
    fn ref_count(&self) -> u32;
}

/// A map wrapper whose lookups never create entries.
///
/// # Example
///
/// ```
/// use lb_common::SyncMap;
///
/// let mut map: SyncMap<u16, &str> = SyncMap::new();
/// assert!(map.get(&1).is_none());
/// assert!(map.is_empty());
///
/// map.insert(1, "10.0.0.1:8080/TCP");
/// assert_eq!(map.get(&1), Some(&"10.0.0.1:8080/TCP"));
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

    /// Returns a reference to the value for the given key.
    ///
    /// **This never creates entries.**
    pub fn get(&self, key: &K) -> Option<&V> {
        self.inner.get(key)
    }

    /// Inserts a key-value pair, returning the previous value if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.inner.insert(key, value)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.inner.remove(key)
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.inner.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.inner.keys()
    }
}

impl<K, V> SyncMap<K, V>
where
    K: Eq + Hash,
    V: HasRefCount,
{
    /// Increments the reference count for the given key.
    ///
    /// Returns the new reference count, or an error if the key is not found.
    pub fn increment_ref(&mut self, key: &K) -> Result<u32, SyncMapError> {
        match self.inner.get_mut(key) {
            Some(entry) => Ok(entry.increment_ref()),
            None => Err(SyncMapError::KeyNotFound),
        }
    }

    /// Decrements the reference count for the given key.
    ///
    /// Returns the new reference count, or an error if the key is not found
    /// or the count would underflow.
    pub fn decrement_ref(&mut self, key: &K) -> Result<u32, SyncMapError> {
        match self.inner.get_mut(key) {
            Some(entry) => entry
                .decrement_ref()
                .ok_or(SyncMapError::RefCountUnderflow),
            None => Err(SyncMapError::KeyNotFound),
        }
    }

    /// Returns the reference count for the given key.
    pub fn ref_count(&self, key: &K) -> Option<u32> {
        self.inner.get(key).map(|e| e.ref_count())
    }

    /// Returns the keys of all entries whose count is zero.
    pub fn unreferenced_keys(&self) -> impl Iterator<Item = &K> {
        self.inner
            .iter()
            .filter(|(_, v)| v.ref_count() == 0)
            .map(|(k, _)| k)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Endpoint {
        addr: String,
        ref_count: u32,
    }

    impl Endpoint {
        fn new(addr: &str) -> Self {
            Self {
                addr: addr.to_string(),
                ref_count: 0,
            }
        }
    }

    impl HasRefCount for Endpoint {
        fn increment_ref(&mut self) -> u32 {
            self.ref_count += 1;
            self.ref_count
        }

        fn decrement_ref(&mut self) -> Option<u32> {
            if self.ref_count == 0 {
                None
            } else {
                self.ref_count -= 1;
                Some(self.ref_count)
            }
        }

        fn ref_count(&self) -> u32 {
            self.ref_count
        }
    }

    #[test]
    fn test_get_never_creates() {
        let mut map: SyncMap<u16, Endpoint> = SyncMap::new();

        assert!(map.get(&1).is_none());
        assert!(map.is_empty());
    }

    #[test]
    fn test_increment_ref_requires_existing_key() {
        let mut map: SyncMap<u16, Endpoint> = SyncMap::new();
        assert_eq!(map.increment_ref(&1), Err(SyncMapError::KeyNotFound));
        assert!(map.is_empty());

        map.insert(1, Endpoint::new("10.0.0.1:8080/TCP"));
        assert_eq!(map.increment_ref(&1), Ok(1));
        assert_eq!(map.increment_ref(&1), Ok(2));
        assert_eq!(map.get(&1).map(|e| e.addr.as_str()), Some("10.0.0.1:8080/TCP"));
    }

    #[test]
    fn test_decrement_ref_underflow_protection() {
        let mut map: SyncMap<u16, Endpoint> = SyncMap::new();
        map.insert(1, Endpoint::new("10.0.0.1:8080/TCP"));

        assert_eq!(map.decrement_ref(&1), Err(SyncMapError::RefCountUnderflow));

        map.increment_ref(&1).unwrap();
        assert_eq!(map.decrement_ref(&1), Ok(0));
        assert_eq!(map.decrement_ref(&1), Err(SyncMapError::RefCountUnderflow));
        assert_eq!(map.decrement_ref(&2), Err(SyncMapError::KeyNotFound));
    }

    #[test]
    fn test_unreferenced_keys() {
        let mut map: SyncMap<u16, Endpoint> = SyncMap::new();
        map.insert(1, Endpoint::new("10.0.0.1:8080/TCP"));
        map.insert(2, Endpoint::new("10.0.0.2:8080/TCP"));
        map.increment_ref(&2).unwrap();

        let idle: Vec<_> = map.unreferenced_keys().copied().collect();
        assert_eq!(idle, vec![1]);
        assert_eq!(map.ref_count(&2), Some(1));
        assert_eq!(map.ref_count(&3), None);
    }
}
