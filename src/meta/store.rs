//! Pluggable key/value backend for meta records.

use async_trait::async_trait;
use dashmap::DashMap;

/// String KV contract the side-channel runs on. A single-process map, a
/// multi-process coordinator, or a remote KV all satisfy it; operations are
/// linearizable per key.
#[async_trait]
pub trait MetaStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: String);
    async fn delete(&self, key: &str) -> bool;
    async fn has(&self, key: &str) -> bool;
    async fn keys(&self) -> Vec<String>;
}

/// In-process store backing a single-instance deployment.
#[derive(Default)]
pub struct MemoryMetaStore {
    entries: DashMap<String, String>,
}

#[async_trait]
impl MetaStore for MemoryMetaStore {
    async fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|entry| entry.clone())
    }

    async fn set(&self, key: &str, value: String) {
        self.entries.insert(key.to_string(), value);
    }

    async fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    async fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    async fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_contract() {
        let store = MemoryMetaStore::default();
        assert!(store.get("a").await.is_none());
        assert!(!store.has("a").await);

        store.set("a", "1".into()).await;
        assert_eq!(store.get("a").await.as_deref(), Some("1"));
        assert!(store.has("a").await);

        store.set("b", "2".into()).await;
        let mut keys = store.keys().await;
        keys.sort();
        assert_eq!(keys, ["a", "b"]);

        assert!(store.delete("a").await);
        assert!(!store.delete("a").await);
        assert!(store.get("a").await.is_none());
    }
}
