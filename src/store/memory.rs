use super::{ObjectStore, StoreError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// In-memory object store keyed by `(container, key)`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<(String, String), Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects across all containers.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, container: &str, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        self.objects
            .write()
            .await
            .insert((container.to_string(), key.to_string()), bytes);
        Ok(())
    }

    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        self.objects
            .read()
            .await
            .get(&(container.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                container: container.to_string(),
                key: key.to_string(),
            })
    }

    async fn list_by_prefix(&self, container: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .objects
            .read()
            .await
            .keys()
            .filter(|(c, k)| c == container && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_overwrites() {
        let store = MemoryStore::new();
        store.put("c", "a/1", b"one".to_vec()).await.unwrap();
        store.put("c", "a/1", b"two".to_vec()).await.unwrap();
        assert_eq!(store.get("c", "a/1").await.unwrap(), b"two");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get("c", "nope").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_is_scoped_to_container_and_prefix() {
        let store = MemoryStore::new();
        store.put("c", "17/2-2_a.jpg", vec![]).await.unwrap();
        store.put("c", "17/1-2_a.jpg", vec![]).await.unwrap();
        store.put("c", "170/1-1_a.jpg", vec![]).await.unwrap();
        store.put("other", "17/1-2_a.jpg", vec![]).await.unwrap();

        let keys = store.list_by_prefix("c", "17/").await.unwrap();
        assert_eq!(keys, vec!["17/1-2_a.jpg", "17/2-2_a.jpg"]);
    }
}
