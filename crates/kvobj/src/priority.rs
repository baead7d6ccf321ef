//! Priority queue accessor over a store sorted set.
//!
//! Each pushed value becomes its own sorted-set member, scored by its
//! priority. [`PriorityQueue::pop`] removes the front member with the store's
//! atomic extremal pop, so concurrent poppers in any number of processes
//! never receive the same member twice.
//!
//! Unlike [`Queue::pop`](crate::Queue::pop), popping an empty priority queue
//! never waits: it returns `Ok(None)` at once.
//!
//! Members with equal priority leave in member order. Members are encoded
//! with a leading UUIDv7, so with [`PriorityOrder::Ascending`] equal
//! priorities pop in push order for pushes made from one process (roughly so
//! across processes); [`PriorityOrder::Descending`] reverses that.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use kvobj_store::{ScoredMember, StoreClient};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::codec::{decode_member, encode_member};
use crate::config::PriorityOrder;
use crate::error::{ObjectError, ObjectResult};

/// Opaque handle to one pushed member.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct MemberId {
    id: Uuid,
    raw: Bytes,
}

impl MemberId {
    /// The unique id assigned at push time.
    pub fn uuid(&self) -> Uuid {
        self.id
    }
}

impl fmt::Debug for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MemberId").field(&self.id).finish()
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// A value read from the queue together with its bookkeeping.
#[derive(Clone, Debug, PartialEq)]
pub struct Prioritized<V> {
    pub id: MemberId,
    pub value: V,
    pub priority: f64,
}

/// A priority queue of JSON values.
pub struct PriorityQueue<V> {
    key: String,
    store: Arc<dyn StoreClient>,
    order: PriorityOrder,
    _value: PhantomData<fn() -> V>,
}

impl<V> PriorityQueue<V> {
    /// Bind to `key`, popping lowest priorities first.
    pub fn new(key: impl Into<String>, store: Arc<dyn StoreClient>) -> Self {
        Self::with_order(key, store, PriorityOrder::Ascending)
    }

    pub fn with_order(key: impl Into<String>, store: Arc<dyn StoreClient>, order: PriorityOrder) -> Self {
        Self {
            key: key.into(),
            store,
            order,
            _value: PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn order(&self) -> PriorityOrder {
        self.order
    }

    /// Number of queued members.
    pub async fn len(&self) -> ObjectResult<usize> {
        Ok(self.store.member_count(&self.key).await?)
    }

    pub async fn is_empty(&self) -> ObjectResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Drop every queued member.
    pub async fn clear(&self) -> ObjectResult<bool> {
        Ok(self.store.delete_key(&self.key).await?)
    }

    /// Current priority of a member, `None` once it has left the queue.
    pub async fn score(&self, id: &MemberId) -> ObjectResult<Option<f64>> {
        Ok(self.store.member_score(&self.key, &id.raw).await?)
    }

    /// Number of members ahead of `id` in pop order.
    pub async fn rank(&self, id: &MemberId) -> ObjectResult<Option<usize>> {
        Ok(self
            .store
            .member_rank(&self.key, &id.raw, self.order.front())
            .await?)
    }

    /// Withdraw a member without popping it. Returns `true` if this call
    /// removed it; a member already popped elsewhere yields `false`.
    pub async fn remove(&self, id: &MemberId) -> ObjectResult<bool> {
        Ok(self.store.remove_member(&self.key, &id.raw).await?)
    }
}

impl<V> PriorityQueue<V>
where
    V: Serialize + DeserializeOwned,
{
    /// Queue `value` with `priority`. Returns the handle of the new member.
    pub async fn push(&self, value: &V, priority: f64) -> ObjectResult<MemberId> {
        if priority.is_nan() {
            return Err(ObjectError::InvalidPriority(priority));
        }
        let id = Uuid::now_v7();
        let raw = encode_member(id, value)?;
        self.store
            .add_member(&self.key, priority, raw.clone())
            .await?;
        Ok(MemberId { id, raw })
    }

    /// Atomically remove and return the front value.
    pub async fn pop(&self) -> ObjectResult<Option<V>> {
        Ok(self.pop_entry().await?.map(|entry| entry.value))
    }

    /// Like [`pop`](Self::pop), also returning the member handle and priority.
    pub async fn pop_entry(&self) -> ObjectResult<Option<Prioritized<V>>> {
        match self.store.pop_extremal(&self.key, self.order.front()).await? {
            Some(member) => {
                let entry = self.decode(member)?;
                debug!(key = %self.key, member = %entry.id, priority = entry.priority, "popped member");
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    /// Read the front value without removing it.
    ///
    /// Another popper may take it before the caller acts on the result.
    pub async fn peek(&self) -> ObjectResult<Option<V>> {
        Ok(self.peek_entry().await?.map(|entry| entry.value))
    }

    pub async fn peek_entry(&self) -> ObjectResult<Option<Prioritized<V>>> {
        match self.store.peek_extremal(&self.key, self.order.front()).await? {
            Some(member) => self.decode(member).map(Some),
            None => Ok(None),
        }
    }

    fn decode(&self, member: ScoredMember) -> ObjectResult<Prioritized<V>> {
        let envelope = decode_member::<V>(&self.key, &member.member)?;
        Ok(Prioritized {
            id: MemberId {
                id: envelope.id,
                raw: member.member,
            },
            value: envelope.value,
            priority: member.score,
        })
    }
}

impl<V> Clone for PriorityQueue<V> {
    fn clone(&self) -> Self {
        Self::with_order(self.key.clone(), Arc::clone(&self.store), self.order)
    }
}

impl<V> fmt::Debug for PriorityQueue<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityQueue")
            .field("key", &self.key)
            .field("order", &self.order)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use kvobj_store::{InMemoryStore, KeyKind};
    use serde_json::{json, Value};

    use super::*;

    fn pq<V>() -> PriorityQueue<V> {
        PriorityQueue::new("pq", Arc::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn pops_lowest_priority_first() {
        let q: PriorityQueue<String> = pq();
        q.push(&"a".into(), 10.0).await.unwrap();
        q.push(&"b".into(), 5.0).await.unwrap();
        q.push(&"c".into(), 20.0).await.unwrap();

        assert_eq!(q.pop().await.unwrap().as_deref(), Some("b"));
        assert_eq!(q.pop().await.unwrap().as_deref(), Some("a"));
        assert_eq!(q.pop().await.unwrap().as_deref(), Some("c"));
        assert_eq!(q.pop().await.unwrap(), None);
    }

    #[tokio::test]
    async fn descending_order_pops_highest_first() {
        let q: PriorityQueue<u32> =
            PriorityQueue::with_order("pq", Arc::new(InMemoryStore::new()), PriorityOrder::Descending);
        q.push(&1, 1.0).await.unwrap();
        q.push(&3, 3.0).await.unwrap();
        q.push(&2, 2.0).await.unwrap();

        assert_eq!(q.peek().await.unwrap(), Some(3));
        assert_eq!(q.pop().await.unwrap(), Some(3));
        assert_eq!(q.pop().await.unwrap(), Some(2));
        assert_eq!(q.pop().await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn equal_priorities_pop_in_push_order() {
        let q: PriorityQueue<u32> = pq();
        for i in 0..20 {
            q.push(&i, 1.0).await.unwrap();
        }
        let mut out = Vec::new();
        while let Some(v) = q.pop().await.unwrap() {
            out.push(v);
        }
        assert_eq!(out, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn identical_values_are_distinct_members() {
        let q: PriorityQueue<Value> = pq();
        let a = q.push(&json!({"job": 1}), 1.0).await.unwrap();
        let b = q.push(&json!({"job": 1}), 1.0).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(q.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn peek_does_not_remove() {
        let q: PriorityQueue<u32> = pq();
        assert_eq!(q.peek().await.unwrap(), None);
        q.push(&9, 0.5).await.unwrap();

        let front = q.peek_entry().await.unwrap().unwrap();
        assert_eq!(front.value, 9);
        assert_eq!(front.priority, 0.5);
        assert_eq!(q.len().await.unwrap(), 1);

        let popped = q.pop_entry().await.unwrap().unwrap();
        assert_eq!(popped.id, front.id);
        assert!(q.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn score_rank_and_remove_follow_the_member() {
        let q: PriorityQueue<String> = pq();
        let low = q.push(&"low".into(), 1.0).await.unwrap();
        let high = q.push(&"high".into(), 9.0).await.unwrap();

        assert_eq!(q.score(&high).await.unwrap(), Some(9.0));
        assert_eq!(q.rank(&low).await.unwrap(), Some(0));
        assert_eq!(q.rank(&high).await.unwrap(), Some(1));

        assert!(q.remove(&low).await.unwrap());
        assert!(!q.remove(&low).await.unwrap());
        assert_eq!(q.score(&low).await.unwrap(), None);
        assert_eq!(q.rank(&high).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn nan_priority_is_rejected_before_any_write() {
        let store = Arc::new(InMemoryStore::new());
        let q: PriorityQueue<u32> = PriorityQueue::new("pq", store.clone());
        assert!(matches!(
            q.push(&1, f64::NAN).await,
            Err(ObjectError::InvalidPriority(_))
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn wrong_collection_type_is_reported() {
        let store = Arc::new(InMemoryStore::new());
        store
            .set_field("pq", "f", Bytes::from_static(b"1"))
            .await
            .unwrap();
        let q: PriorityQueue<u32> = PriorityQueue::new("pq", store);
        assert!(matches!(
            q.pop().await,
            Err(ObjectError::TypeMismatch { expected: KeyKind::SortedSet, .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_pops_deliver_each_member_at_most_once() {
        let q: PriorityQueue<u32> = pq();
        for i in 0..250u32 {
            q.push(&i, f64::from(i % 5)).await.unwrap();
        }
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let q = q.clone();
            tasks.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some(v) = q.pop().await.unwrap() {
                    got.push(v);
                }
                got
            }));
        }
        let mut seen = HashSet::new();
        for t in tasks {
            for v in t.await.unwrap() {
                assert!(seen.insert(v), "member {v} delivered twice");
            }
        }
        assert_eq!(seen.len(), 250);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn two_racing_pops_split_two_members() {
        let q: PriorityQueue<String> = pq();
        q.push(&"m1".into(), 1.0).await.unwrap();
        q.push(&"m2".into(), 2.0).await.unwrap();

        let (a, b) = tokio::join!(
            tokio::spawn({
                let q = q.clone();
                async move { q.pop().await.unwrap() }
            }),
            tokio::spawn({
                let q = q.clone();
                async move { q.pop().await.unwrap() }
            }),
        );
        let mut got = vec![a.unwrap().unwrap(), b.unwrap().unwrap()];
        got.sort();
        assert_eq!(got, vec!["m1", "m2"]);
        assert_eq!(q.pop().await.unwrap(), None);
    }
}
