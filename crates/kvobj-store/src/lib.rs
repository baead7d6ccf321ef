//! Primitive store layer for kvobj.
//!
//! This crate defines the capability contract the object layer consumes:
//! atomic hash-field, list and sorted-set operations on a shared key-value
//! store, plus a blocking list pop and an atomic extremal sorted-set pop.
//!
//! # Backends
//!
//! All backends implement the [`StoreClient`] trait:
//!
//! - [`InMemoryStore`] -- in-process mock engine with the same observable
//!   semantics (ordering, blocking, atomicity) as a real store
//! - `RedisStore` -- Redis client (cargo feature `redis`)
//!
//! # Rules
//!
//! 1. A key holds exactly one collection type while it exists.
//! 2. Keys appear on first write and vanish when their last element goes.
//! 3. Each call is atomic with respect to every other call on the store.
//! 4. Values are opaque bytes; the store never interprets them.
//! 5. Errors are propagated unchanged, never retried.

pub mod error;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;
pub mod traits;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
#[cfg(feature = "redis")]
pub use crate::redis::{RedisConfig, RedisStore};
pub use traits::StoreClient;
pub use types::{Extremity, KeyKind, ScanCursor, ScanPage, ScoredMember, Wait};
