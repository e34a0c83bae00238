//! In-memory KV backend implementation using `DashMap`.
//!
//! Data is lost on process restart; for persistence, supply a
//! file-backed or remote [`super::KvBackend`] implementation.

use dashmap::DashMap;

use super::KvBackend;
use crate::Result;

/// In-memory key-value store using a lock-free concurrent hashmap.
///
/// Thread-safe and suited to concurrent trial writers.
///
/// # Example
///
/// ```rust
/// use afinar::kv::{KvBackend, MemoryKv};
///
/// # fn example() -> afinar::Result<()> {
/// let store = MemoryKv::new();
/// store.put("hello", b"world".to_vec())?;
/// assert_eq!(store.get("hello")?, Some(b"world".to_vec()));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryKv {
    store: DashMap<String, Vec<u8>>,
}

impl MemoryKv {
    /// Create a new in-memory KV store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: DashMap::new(),
        }
    }

    /// Get the number of entries in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Clear all entries.
    pub fn clear(&self) {
        self.store.clear();
    }
}

impl KvBackend for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.store.get(key).map(|v| v.value().clone()))
    }

    fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.store.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.store.remove(key);
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.store.contains_key(key))
    }

    fn list_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .store
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect())
    }
}
