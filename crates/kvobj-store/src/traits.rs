//! The [`StoreClient`] trait: the primitive operations the object layer is
//! built on.
//!
//! Every operation is addressed by a namespace key plus an optional sub-key
//! (hash field or sorted-set member). Keys are created implicitly by the first
//! write and vanish once their last element is removed; an operation against
//! a key holding a different collection type fails with
//! [`StoreError::TypeMismatch`](crate::StoreError::TypeMismatch).

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::error::StoreResult;
use crate::types::{Extremity, KeyKind, ScanCursor, ScanPage, ScoredMember, Wait};

/// Capability contract of the backing key-value store.
///
/// Implementations must be thread-safe and each call must be atomic with
/// respect to every other call on the same store.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Collection type held by `key`, `None` if the key does not exist.
    async fn key_kind(&self, key: &str) -> StoreResult<Option<KeyKind>>;

    /// Drop `key` whatever it holds. Returns `true` if it existed.
    async fn delete_key(&self, key: &str) -> StoreResult<bool>;

    // -- hash -------------------------------------------------------------

    async fn get_field(&self, key: &str, field: &str) -> StoreResult<Option<Bytes>>;

    /// Read several fields at once, positionally aligned with `fields`.
    async fn get_fields(&self, key: &str, fields: &[String]) -> StoreResult<Vec<Option<Bytes>>>;

    /// Store `value` under `field`. Returns `true` if the field is new.
    async fn set_field(&self, key: &str, field: &str, value: Bytes) -> StoreResult<bool>;

    /// Store `value` only if `field` is absent. Returns `true` if inserted.
    async fn set_field_if_absent(&self, key: &str, field: &str, value: Bytes) -> StoreResult<bool>;

    /// Returns `true` if the field existed.
    async fn delete_field(&self, key: &str, field: &str) -> StoreResult<bool>;

    /// Fetch the next page of a hash scan.
    ///
    /// `count` is a hint. A full pass returns every field present for the
    /// whole pass at least once; fields added or removed meanwhile may or may
    /// not appear.
    async fn scan_fields(&self, key: &str, cursor: ScanCursor, count: usize) -> StoreResult<ScanPage>;

    async fn field_count(&self, key: &str) -> StoreResult<usize>;

    // -- list -------------------------------------------------------------

    /// Append to the tail, waking blocked poppers. Returns the new length.
    async fn push_tail(&self, key: &str, value: Bytes) -> StoreResult<usize>;

    /// Prepend to the head, waking blocked poppers. Returns the new length.
    async fn push_head(&self, key: &str, value: Bytes) -> StoreResult<usize>;

    async fn pop_head(&self, key: &str) -> StoreResult<Option<Bytes>>;

    /// Pop the head, suspending the calling task while the list is empty.
    ///
    /// Returns `Ok(None)` when `wait` elapses first. Dropping the returned
    /// future before it resolves must not consume an element.
    async fn blocking_pop_head(&self, key: &str, wait: Wait) -> StoreResult<Option<Bytes>>;

    async fn list_len(&self, key: &str) -> StoreResult<usize>;

    // -- sorted set -------------------------------------------------------

    /// Insert `member` or update its score. Returns `true` if it is new.
    async fn add_member(&self, key: &str, score: f64, member: Bytes) -> StoreResult<bool>;

    async fn peek_extremal(&self, key: &str, end: Extremity) -> StoreResult<Option<ScoredMember>>;

    /// Returns `true` if this call removed the member.
    async fn remove_member(&self, key: &str, member: &[u8]) -> StoreResult<bool>;

    async fn member_score(&self, key: &str, member: &[u8]) -> StoreResult<Option<f64>>;

    /// Zero-based position of `member` counted from `end`.
    async fn member_rank(&self, key: &str, member: &[u8], end: Extremity) -> StoreResult<Option<usize>>;

    async fn member_count(&self, key: &str) -> StoreResult<usize>;

    /// Atomically remove and return the extremal member.
    ///
    /// The default is an optimistic compare-and-delete loop: read the
    /// candidate, delete it only if it is still present, and retry when a
    /// concurrent popper removed it first. Only the caller whose delete
    /// succeeded returns the member, so delivery is at-most-once. Backends
    /// with a native primitive should override this.
    async fn pop_extremal(&self, key: &str, end: Extremity) -> StoreResult<Option<ScoredMember>> {
        let mut attempts = 0u32;
        loop {
            let Some(candidate) = self.peek_extremal(key, end).await? else {
                return Ok(None);
            };
            if self.remove_member(key, &candidate.member).await? {
                return Ok(Some(candidate));
            }
            attempts += 1;
            debug!(key, attempts, "extremal member taken by a concurrent popper; retrying");
        }
    }
}
