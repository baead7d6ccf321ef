//! Typed object accessors over a shared key-value store.
//!
//! An [`ObjectClient`] wraps any [`StoreClient`](kvobj_store::StoreClient)
//! and hands out accessors bound to a key:
//!
//! - [`Hash`] -- field/value table over a store hash
//! - [`Queue`] -- FIFO queue over a store list, with blocking pop
//! - [`PriorityQueue`] -- priority queue over a store sorted set, with atomic
//!   front removal
//!
//! Values cross the store boundary as JSON. Encoding happens before any store
//! call, so a value that cannot be encoded never causes a partial write.
//! Accessors keep no client-side cache: every call is a fresh round trip, and
//! the store is the only shared mutable state.
//!
//! # Absent values
//!
//! Reads of missing fields, pops from empty queues and blocking pops whose
//! wait elapsed all return `Ok(None)`. Errors are reserved for type
//! mismatches, encoding failures and store failures, and are never retried.

pub mod client;
mod codec;
pub mod config;
pub mod error;
pub mod hash;
pub mod priority;
pub mod queue;
#[cfg(test)]
mod scenarios;

pub use client::ObjectClient;
pub use config::{ObjectConfig, PriorityOrder};
pub use error::{ObjectError, ObjectResult};
pub use hash::Hash;
pub use priority::{MemberId, Prioritized, PriorityQueue};
pub use queue::Queue;

pub use kvobj_store::{InMemoryStore, StoreClient, Wait};
