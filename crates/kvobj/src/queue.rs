//! FIFO queue accessor over a store list.
//!
//! `push` appends to the tail, `pop` takes from the head. A pop on an empty
//! queue suspends only the calling task, up to its [`Wait`]. When several
//! tasks are blocked on one queue, which of them receives the next element
//! is up to the store's scheduling; treat it as best-effort FIFO.
//!
//! Dropping a pending `pop` future cancels it without consuming anything.

use std::marker::PhantomData;
use std::sync::Arc;

use kvobj_store::{StoreClient, Wait};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::codec::{decode, encode};
use crate::error::ObjectResult;

/// A FIFO queue of JSON values.
pub struct Queue<V> {
    key: String,
    store: Arc<dyn StoreClient>,
    _value: PhantomData<fn() -> V>,
}

impl<V> Queue<V> {
    /// Bind to `key`, which may be absent or already hold a list.
    pub fn new(key: impl Into<String>, store: Arc<dyn StoreClient>) -> Self {
        Self {
            key: key.into(),
            store,
            _value: PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Number of queued elements.
    pub async fn len(&self) -> ObjectResult<usize> {
        Ok(self.store.list_len(&self.key).await?)
    }

    pub async fn is_empty(&self) -> ObjectResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Drop every queued element.
    pub async fn clear(&self) -> ObjectResult<bool> {
        Ok(self.store.delete_key(&self.key).await?)
    }
}

impl<V> Queue<V>
where
    V: Serialize + DeserializeOwned,
{
    /// Append `value` to the tail. Returns the new queue length.
    pub async fn push(&self, value: &V) -> ObjectResult<usize> {
        let raw = encode(value)?;
        Ok(self.store.push_tail(&self.key, raw).await?)
    }

    /// Remove and return the head element, waiting up to `wait` for one.
    ///
    /// Returns `Ok(None)` if the wait elapsed with nothing delivered. A zero
    /// duration or [`Wait::NoWait`] never suspends.
    pub async fn pop(&self, wait: impl Into<Wait>) -> ObjectResult<Option<V>> {
        let wait = wait.into();
        match self.store.blocking_pop_head(&self.key, wait).await? {
            Some(raw) => decode(&self.key, &raw).map(Some),
            None => {
                debug!(key = %self.key, ?wait, "queue pop returned nothing");
                Ok(None)
            }
        }
    }

    /// Remove and return the head element only if one is available now.
    pub async fn pop_ready(&self) -> ObjectResult<Option<V>> {
        match self.store.pop_head(&self.key).await? {
            Some(raw) => decode(&self.key, &raw).map(Some),
            None => Ok(None),
        }
    }
}

impl<V> Clone for Queue<V> {
    fn clone(&self) -> Self {
        Self::new(self.key.clone(), Arc::clone(&self.store))
    }
}

impl<V> std::fmt::Debug for Queue<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue").field("key", &self.key).finish()
    }
}
