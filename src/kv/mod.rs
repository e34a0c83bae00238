//! Key-value backend interface for durable run storage
//!
//! The ledger persists runs through this narrow contract. A conforming
//! backend may be a local file store, a remote tracking service, or
//! pure memory; the ledger never branches on which one it holds.
//!
//! # Example
//!
//! ```rust
//! use afinar::kv::{KvBackend, MemoryKv};
//!
//! # fn example() -> afinar::Result<()> {
//! let store = MemoryKv::new();
//!
//! store.put("key", b"value".to_vec())?;
//! assert_eq!(store.get("key")?, Some(b"value".to_vec()));
//!
//! store.delete("key")?;
//! assert!(!store.exists("key")?);
//! # Ok(())
//! # }
//! ```

mod memory;

pub use memory::MemoryKv;

use crate::Result;

/// Narrow key-value + blob contract a durable ledger backend must satisfy.
///
/// Values are opaque bytes; the ledger stores JSON-encoded run records
/// under `run/<run_id>` keys. Implementations must be safe under
/// concurrent writers (parallel trial evaluation appends concurrently).
/// Each key has a single owning writer: the ledger never updates the
/// same run id from two threads, so `put` needs no read-modify-write
/// atomicity beyond per-key last-write-wins.
pub trait KvBackend: Send + Sync {
    /// Get a value by key.
    ///
    /// Returns `None` if the key doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] if the store is unreachable.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Set a value for a key, overwriting any existing value.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] if the write fails.
    fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Delete a key. No-op if the key doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] if the delete fails.
    fn delete(&self, key: &str) -> Result<()>;

    /// Check if a key exists.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] if the store is unreachable.
    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// List all keys starting with the given prefix.
    ///
    /// Ordering is unspecified; callers sort as needed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] if the store is unreachable.
    fn list_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_kv_set_get() {
        let store = MemoryKv::new();
        store.put("key1", b"value1".to_vec()).unwrap();
        assert_eq!(store.get("key1").unwrap(), Some(b"value1".to_vec()));
    }

    #[test]
    fn test_memory_kv_get_nonexistent() {
        let store = MemoryKv::new();
        assert_eq!(store.get("nonexistent").unwrap(), None);
    }

    #[test]
    fn test_memory_kv_overwrite() {
        let store = MemoryKv::new();
        store.put("key", b"value1".to_vec()).unwrap();
        store.put("key", b"value2".to_vec()).unwrap();
        assert_eq!(store.get("key").unwrap(), Some(b"value2".to_vec()));
    }

    #[test]
    fn test_memory_kv_delete() {
        let store = MemoryKv::new();
        store.put("key", b"value".to_vec()).unwrap();
        store.delete("key").unwrap();
        assert_eq!(store.get("key").unwrap(), None);

        // Deleting a missing key should not error
        store.delete("nonexistent").unwrap();
    }

    #[test]
    fn test_memory_kv_exists() {
        let store = MemoryKv::new();
        assert!(!store.exists("key").unwrap());
        store.put("key", b"value".to_vec()).unwrap();
        assert!(store.exists("key").unwrap());
    }

    #[test]
    fn test_memory_kv_list_prefix() {
        let store = MemoryKv::new();
        store.put("run/a", vec![1]).unwrap();
        store.put("run/b", vec![2]).unwrap();
        store.put("blob/c", vec![3]).unwrap();

        let mut keys = store.list_prefix("run/").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["run/a".to_string(), "run/b".to_string()]);
    }

    #[test]
    fn test_memory_kv_concurrent_access() {
        use std::sync::Arc;

        let store = Arc::new(MemoryKv::new());
        let mut handles = vec![];

        for i in 0..100 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                let key = format!("key{i}");
                store.put(&key, format!("value{i}").into_bytes()).unwrap();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        for i in 0..100 {
            let key = format!("key{i}");
            let expected = format!("value{i}").into_bytes();
            assert_eq!(store.get(&key).unwrap(), Some(expected));
        }
    }

    #[test]
    fn test_memory_kv_empty_key_and_value() {
        let store = MemoryKv::new();
        store.put("", b"empty_key_value".to_vec()).unwrap();
        assert_eq!(store.get("").unwrap(), Some(b"empty_key_value".to_vec()));

        store.put("key", vec![]).unwrap();
        assert_eq!(store.get("key").unwrap(), Some(vec![]));
    }

    #[test]
    fn test_memory_kv_len_and_clear() {
        let store = MemoryKv::new();
        assert!(store.is_empty());

        store.put("key1", vec![1]).unwrap();
        store.put("key2", vec![2]).unwrap();
        assert_eq!(store.len(), 2);

        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.get("key1").unwrap(), None);
    }
}
