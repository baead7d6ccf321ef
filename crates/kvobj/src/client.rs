use std::sync::Arc;

use kvobj_store::StoreClient;

use crate::config::ObjectConfig;
use crate::error::ObjectResult;
use crate::hash::Hash;
use crate::priority::PriorityQueue;
use crate::queue::Queue;

/// Factory for accessors bound to keys in one store.
///
/// The client holds no state besides the store handle and its config, so it
/// is cheap to clone and share between tasks.
#[derive(Clone)]
pub struct ObjectClient {
    store: Arc<dyn StoreClient>,
    config: ObjectConfig,
}

impl ObjectClient {
    /// Client with the default configuration.
    pub fn new(store: Arc<dyn StoreClient>) -> Self {
        Self {
            store,
            config: ObjectConfig::default(),
        }
    }

    pub fn with_config(store: Arc<dyn StoreClient>, config: ObjectConfig) -> ObjectResult<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &ObjectConfig {
        &self.config
    }

    /// The underlying store handle.
    pub fn store(&self) -> &Arc<dyn StoreClient> {
        &self.store
    }

    /// Hash table stored under `name`.
    pub fn hash<V>(&self, name: &str) -> Hash<V> {
        Hash::with_scan_batch(self.config.key(name), Arc::clone(&self.store), self.config.scan_batch)
    }

    /// FIFO queue stored under `name`.
    pub fn queue<V>(&self, name: &str) -> Queue<V> {
        Queue::new(self.config.key(name), Arc::clone(&self.store))
    }

    /// Priority queue stored under `name`.
    pub fn priority_queue<V>(&self, name: &str) -> PriorityQueue<V> {
        PriorityQueue::with_order(
            self.config.key(name),
            Arc::clone(&self.store),
            self.config.priority_order,
        )
    }
}

impl std::fmt::Debug for ObjectClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use kvobj_store::{InMemoryStore, KeyKind};
    use serde_json::Value;

    use super::*;
    use crate::config::PriorityOrder;
    use crate::error::ObjectError;

    #[tokio::test]
    async fn namespace_prefixes_every_key() {
        let store = Arc::new(InMemoryStore::new());
        let config = ObjectConfig {
            namespace: Some("tenant".into()),
            ..Default::default()
        };
        let client = ObjectClient::with_config(store.clone(), config).unwrap();

        let h = client.hash::<u32>("settings");
        let q = client.queue::<u32>("jobs");
        let pq = client.priority_queue::<u32>("work");
        assert_eq!(h.key(), "tenant:settings");

        h.set("a", &1).await.unwrap();
        q.push(&2).await.unwrap();
        pq.push(&3, 1.0).await.unwrap();
        assert_eq!(store.keys(), vec!["tenant:jobs", "tenant:settings", "tenant:work"]);
    }

    #[tokio::test]
    async fn priority_order_comes_from_config() {
        let config = ObjectConfig {
            priority_order: PriorityOrder::Descending,
            ..Default::default()
        };
        let client = ObjectClient::with_config(Arc::new(InMemoryStore::new()), config).unwrap();
        let pq = client.priority_queue::<u32>("work");
        pq.push(&1, 1.0).await.unwrap();
        pq.push(&2, 2.0).await.unwrap();
        assert_eq!(pq.pop().await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn accessors_share_the_store() {
        let client = ObjectClient::new(Arc::new(InMemoryStore::new()));
        client.queue::<u32>("k").push(&1).await.unwrap();

        assert_eq!(client.store().key_kind("k").await.unwrap(), Some(KeyKind::List));
        assert!(matches!(
            client.hash::<Value>("k").get("f").await,
            Err(ObjectError::TypeMismatch { expected: KeyKind::Hash, .. })
        ));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = ObjectConfig {
            scan_batch: 0,
            ..Default::default()
        };
        assert!(ObjectClient::with_config(Arc::new(InMemoryStore::new()), config).is_err());
    }
}
