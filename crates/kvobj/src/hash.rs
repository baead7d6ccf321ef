//! Hash table accessor.
//!
//! Every method is a single store round trip except the scan-based ones
//! ([`Hash::scan`], [`Hash::all`], [`Hash::keys`]), which page through the
//! table and are weakly consistent: each field present for the whole pass is
//! seen, fields changed during the pass may or may not be.

use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use kvobj_store::{ScanCursor, StoreClient};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{decode, encode};
use crate::error::{ObjectError, ObjectResult};

const DEFAULT_SCAN_BATCH: usize = 100;

/// A hash table of JSON values keyed by field name.
pub struct Hash<V> {
    key: String,
    store: Arc<dyn StoreClient>,
    scan_batch: usize,
    _value: PhantomData<fn() -> V>,
}

impl<V> Hash<V> {
    /// Bind to `key`, which may be absent or already hold a hash.
    pub fn new(key: impl Into<String>, store: Arc<dyn StoreClient>) -> Self {
        Self::with_scan_batch(key, store, DEFAULT_SCAN_BATCH)
    }

    pub(crate) fn with_scan_batch(
        key: impl Into<String>,
        store: Arc<dyn StoreClient>,
        scan_batch: usize,
    ) -> Self {
        Self {
            key: key.into(),
            store,
            scan_batch: scan_batch.max(1),
            _value: PhantomData,
        }
    }

    /// The store key this table lives under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Number of fields.
    pub async fn len(&self) -> ObjectResult<usize> {
        Ok(self.store.field_count(&self.key).await?)
    }

    pub async fn is_empty(&self) -> ObjectResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Remove a field. Returns `true` if it existed; absent fields are fine.
    pub async fn delete(&self, field: &str) -> ObjectResult<bool> {
        Ok(self.store.delete_field(&self.key, field).await?)
    }

    /// Drop the whole table. Returns `true` if it existed.
    pub async fn clear(&self) -> ObjectResult<bool> {
        Ok(self.store.delete_key(&self.key).await?)
    }

    /// Raw field/value pages, flattened. Starts a fresh pass on every call.
    fn raw_entries(&self) -> impl Stream<Item = ObjectResult<(String, Bytes)>> + Send + 'static {
        let store = Arc::clone(&self.store);
        let key = self.key.clone();
        let batch = self.scan_batch;
        let pages = stream::try_unfold(Some(ScanCursor::Start), move |cursor| {
            let store = Arc::clone(&store);
            let key = key.clone();
            async move {
                let Some(cursor) = cursor else {
                    return Ok(None);
                };
                let page = store.scan_fields(&key, cursor, batch).await?;
                Ok::<_, ObjectError>(Some((page.entries, page.next)))
            }
        });
        pages
            .map_ok(|entries| stream::iter(entries.into_iter().map(Ok::<_, ObjectError>)))
            .try_flatten()
    }

    /// All field names.
    pub async fn keys(&self) -> ObjectResult<HashSet<String>> {
        self.raw_entries().map_ok(|(field, _)| field).try_collect().await
    }
}

impl<V> Hash<V>
where
    V: Serialize + DeserializeOwned,
{
    /// Store `value` under `field`, overwriting any previous value.
    ///
    /// Returns `true` if the field is new.
    pub async fn set(&self, field: &str, value: &V) -> ObjectResult<bool> {
        let raw = encode(value)?;
        Ok(self.store.set_field(&self.key, field, raw).await?)
    }

    /// Store `value` under `field` only if the field is absent.
    ///
    /// Returns `true` if the value was inserted.
    pub async fn add(&self, field: &str, value: &V) -> ObjectResult<bool> {
        let raw = encode(value)?;
        Ok(self.store.set_field_if_absent(&self.key, field, raw).await?)
    }

    /// Read a field. `Ok(None)` means the field (or the table) is absent,
    /// which is distinct from a stored JSON `null`.
    pub async fn get(&self, field: &str) -> ObjectResult<Option<V>> {
        match self.store.get_field(&self.key, field).await? {
            Some(raw) => decode(&self.key, &raw).map(Some),
            None => Ok(None),
        }
    }

    /// Read several fields in one round trip. Absent fields are omitted.
    pub async fn get_many(&self, fields: &[String]) -> ObjectResult<HashMap<String, V>> {
        let values = self.store.get_fields(&self.key, fields).await?;
        let mut found = HashMap::with_capacity(values.len());
        for (field, raw) in fields.iter().zip(values) {
            if let Some(raw) = raw {
                found.insert(field.clone(), decode(&self.key, &raw)?);
            }
        }
        Ok(found)
    }

    /// Lazily iterate over `(field, value)` pairs in no particular order.
    ///
    /// Each call starts a fresh pass over the table.
    pub fn scan(&self) -> impl Stream<Item = ObjectResult<(String, V)>> + Send + 'static
    where
        V: Send + 'static,
    {
        let key = self.key.clone();
        self.raw_entries().map(move |entry| -> ObjectResult<(String, V)> {
            let (field, raw) = entry?;
            let value = decode(&key, &raw)?;
            Ok((field, value))
        })
    }

    /// Load the whole table.
    pub async fn all(&self) -> ObjectResult<HashMap<String, V>>
    where
        V: Send + 'static,
    {
        self.scan().try_collect().await
    }
}

impl<V> Clone for Hash<V> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            store: Arc::clone(&self.store),
            scan_batch: self.scan_batch,
            _value: PhantomData,
        }
    }
}

impl<V> std::fmt::Debug for Hash<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hash").field("key", &self.key).finish()
    }
}
