//! The in-memory response store.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use super::{Storage, StorageError};

/// The default storage, a concurrent in-memory map.
///
/// Suitable for single-run crawls; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<u64, Bytes>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored responses.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn store(&self, key: u64, value: Bytes) -> Result<(), StorageError> {
        self.entries.insert(key, value);
        Ok(())
    }

    async fn load(&self, key: u64) -> Result<Option<Bytes>, StorageError> {
        Ok(self.entries.get(&key).map(|entry| entry.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_load() {
        let store = MemoryStore::new();

        store.store(1, Bytes::from_static(b"hello")).await.unwrap();

        let value = store.load(1).await.unwrap();
        assert_eq!(value, Some(Bytes::from_static(b"hello")));
    }

    #[tokio::test]
    async fn test_load_missing() {
        let store = MemoryStore::new();
        assert_eq!(store.load(42).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_overwrites() {
        let store = MemoryStore::new();

        store.store(1, Bytes::from_static(b"old")).await.unwrap();
        store.store(1, Bytes::from_static(b"new")).await.unwrap();

        assert_eq!(store.load(1).await.unwrap(), Some(Bytes::from_static(b"new")));
        assert_eq!(store.len(), 1);
    }
}
