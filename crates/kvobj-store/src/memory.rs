//! In-process mock store engine.
//!
//! [`InMemoryStore`] reimplements the full [`StoreClient`] primitive set over
//! plain collections behind one `Mutex`, so every call is atomic with respect
//! to every other call, exactly as on a single-threaded store server. Blocked
//! list pops really suspend the calling task on a per-key [`Notify`] and are
//! woken by pushes to that key.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::cmp::Ordering;
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::traits::StoreClient;
use crate::types::{Extremity, KeyKind, ScanCursor, ScanPage, ScoredMember, Wait};

/// Sorted-set score with a total order.
#[derive(Clone, Copy, Debug)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Members ordered by score, then by member bytes.
#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<Bytes, f64>,
    ordered: BTreeSet<(Score, Bytes)>,
}

impl SortedSet {
    fn insert(&mut self, score: f64, member: Bytes) -> bool {
        let previous = self.scores.insert(member.clone(), score);
        if let Some(old) = previous {
            self.ordered.remove(&(Score(old), member.clone()));
        }
        self.ordered.insert((Score(score), member));
        previous.is_none()
    }

    fn remove(&mut self, member: &[u8]) -> bool {
        match self.scores.remove_entry(member) {
            Some((member, score)) => self.ordered.remove(&(Score(score), member)),
            None => false,
        }
    }

    fn peek(&self, end: Extremity) -> Option<ScoredMember> {
        let entry = match end {
            Extremity::Min => self.ordered.first(),
            Extremity::Max => self.ordered.last(),
        };
        entry.map(|(score, member)| ScoredMember {
            member: member.clone(),
            score: score.0,
        })
    }

    fn pop(&mut self, end: Extremity) -> Option<ScoredMember> {
        let (score, member) = match end {
            Extremity::Min => self.ordered.pop_first(),
            Extremity::Max => self.ordered.pop_last(),
        }?;
        self.scores.remove(&member);
        Some(ScoredMember {
            member,
            score: score.0,
        })
    }

    fn rank(&self, member: &[u8], end: Extremity) -> Option<usize> {
        match end {
            Extremity::Min => self.ordered.iter().position(|(_, m)| m.as_ref() == member),
            Extremity::Max => self.ordered.iter().rev().position(|(_, m)| m.as_ref() == member),
        }
    }
}

/// Per-key state: a key holds exactly one collection type while it exists.
#[derive(Debug)]
enum Entry {
    Hash(BTreeMap<String, Bytes>),
    List(VecDeque<Bytes>),
    SortedSet(SortedSet),
}

impl Entry {
    fn empty(kind: KeyKind) -> Self {
        match kind {
            KeyKind::Hash => Entry::Hash(BTreeMap::new()),
            KeyKind::List => Entry::List(VecDeque::new()),
            KeyKind::SortedSet => Entry::SortedSet(SortedSet::default()),
        }
    }

    fn kind(&self) -> KeyKind {
        match self {
            Entry::Hash(_) => KeyKind::Hash,
            Entry::List(_) => KeyKind::List,
            Entry::SortedSet(_) => KeyKind::SortedSet,
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Entry::Hash(h) => h.is_empty(),
            Entry::List(l) => l.is_empty(),
            Entry::SortedSet(z) => z.scores.is_empty(),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
    /// Wake handles for blocked list pops, with the number of waiters using each.
    waiters: HashMap<String, (Arc<Notify>, usize)>,
}

impl State {
    fn existing(&self, key: &str, expected: KeyKind) -> StoreResult<Option<&Entry>> {
        match self.entries.get(key) {
            Some(entry) if entry.kind() != expected => {
                Err(StoreError::type_mismatch(key, expected))
            }
            other => Ok(other),
        }
    }

    fn existing_mut(&mut self, key: &str, expected: KeyKind) -> StoreResult<Option<&mut Entry>> {
        match self.entries.get_mut(key) {
            Some(entry) if entry.kind() != expected => {
                Err(StoreError::type_mismatch(key, expected))
            }
            other => Ok(other),
        }
    }

    /// Fetch the entry for a write, creating it on first use.
    fn create(&mut self, key: &str, expected: KeyKind) -> StoreResult<&mut Entry> {
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::empty(expected));
        if entry.kind() != expected {
            return Err(StoreError::type_mismatch(key, expected));
        }
        Ok(entry)
    }

    /// Drop the key once its last element is gone.
    fn prune(&mut self, key: &str) {
        if self.entries.get(key).is_some_and(Entry::is_empty) {
            self.entries.remove(key);
        }
    }

    fn push_list(&mut self, key: &str, value: Bytes, at_head: bool) -> StoreResult<usize> {
        let Entry::List(list) = self.create(key, KeyKind::List)? else {
            unreachable!("create checked the kind");
        };
        if at_head {
            list.push_front(value);
        } else {
            list.push_back(value);
        }
        let len = list.len();
        if let Some((notify, _)) = self.waiters.get(key) {
            notify.notify_waiters();
        }
        Ok(len)
    }

    fn pop_list_head(&mut self, key: &str) -> StoreResult<Option<Bytes>> {
        let Some(Entry::List(list)) = self.existing_mut(key, KeyKind::List)? else {
            return Ok(None);
        };
        let value = list.pop_front();
        self.prune(key);
        Ok(value)
    }

    fn sorted_set(&self, key: &str) -> StoreResult<Option<&SortedSet>> {
        match self.existing(key, KeyKind::SortedSet)? {
            Some(Entry::SortedSet(z)) => Ok(Some(z)),
            _ => Ok(None),
        }
    }

    fn hash(&self, key: &str) -> StoreResult<Option<&BTreeMap<String, Bytes>>> {
        match self.existing(key, KeyKind::Hash)? {
            Some(Entry::Hash(h)) => Ok(Some(h)),
            _ => Ok(None),
        }
    }
}

/// In-memory drop-in for a real store client.
///
/// Intended for tests and single-process embedding. Data is lost when the
/// store is dropped.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|e| StoreError::Backend(format!("lock poisoned: {e}")))
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.state.lock().expect("lock poisoned").entries.len()
    }

    /// Returns `true` if no key exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted list of all live keys.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .state
            .lock()
            .expect("lock poisoned")
            .entries
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Remove every key.
    pub fn clear(&self) {
        self.state.lock().expect("lock poisoned").entries.clear();
    }

    fn register_waiter(&self, key: &str) -> StoreResult<WaiterGuard<'_>> {
        let mut state = self.state()?;
        let (notify, count) = state
            .waiters
            .entry(key.to_string())
            .or_insert_with(|| (Arc::new(Notify::new()), 0));
        *count += 1;
        Ok(WaiterGuard {
            store: self,
            key: key.to_string(),
            notify: Arc::clone(notify),
        })
    }
}

/// Keeps a key's wake handle registered while a blocked pop is pending.
struct WaiterGuard<'a> {
    store: &'a InMemoryStore,
    key: String,
    notify: Arc<Notify>,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        let Ok(mut state) = self.store.state() else {
            return;
        };
        if let Some((_, count)) = state.waiters.get_mut(&self.key) {
            *count -= 1;
            if *count == 0 {
                state.waiters.remove(&self.key);
            }
        }
    }
}

#[async_trait]
impl StoreClient for InMemoryStore {
    async fn key_kind(&self, key: &str) -> StoreResult<Option<KeyKind>> {
        Ok(self.state()?.entries.get(key).map(Entry::kind))
    }

    async fn delete_key(&self, key: &str) -> StoreResult<bool> {
        Ok(self.state()?.entries.remove(key).is_some())
    }

    async fn get_field(&self, key: &str, field: &str) -> StoreResult<Option<Bytes>> {
        let state = self.state()?;
        Ok(state.hash(key)?.and_then(|h| h.get(field).cloned()))
    }

    async fn get_fields(&self, key: &str, fields: &[String]) -> StoreResult<Vec<Option<Bytes>>> {
        let state = self.state()?;
        let hash = state.hash(key)?;
        Ok(fields
            .iter()
            .map(|f| hash.and_then(|h| h.get(f).cloned()))
            .collect())
    }

    async fn set_field(&self, key: &str, field: &str, value: Bytes) -> StoreResult<bool> {
        let mut state = self.state()?;
        let Entry::Hash(hash) = state.create(key, KeyKind::Hash)? else {
            unreachable!("create checked the kind");
        };
        Ok(hash.insert(field.to_string(), value).is_none())
    }

    async fn set_field_if_absent(&self, key: &str, field: &str, value: Bytes) -> StoreResult<bool> {
        let mut state = self.state()?;
        let Entry::Hash(hash) = state.create(key, KeyKind::Hash)? else {
            unreachable!("create checked the kind");
        };
        if hash.contains_key(field) {
            return Ok(false);
        }
        hash.insert(field.to_string(), value);
        Ok(true)
    }

    async fn delete_field(&self, key: &str, field: &str) -> StoreResult<bool> {
        let mut state = self.state()?;
        let Some(Entry::Hash(hash)) = state.existing_mut(key, KeyKind::Hash)? else {
            return Ok(false);
        };
        let removed = hash.remove(field).is_some();
        state.prune(key);
        Ok(removed)
    }

    async fn scan_fields(&self, key: &str, cursor: ScanCursor, count: usize) -> StoreResult<ScanPage> {
        let state = self.state()?;
        let Some(hash) = state.hash(key)? else {
            return Ok(ScanPage::default());
        };
        let lower = match &cursor {
            ScanCursor::Start => Bound::Unbounded,
            ScanCursor::Resume(after) => Bound::Excluded(after.as_str()),
        };
        let count = count.max(1);
        let mut entries: Vec<(String, Bytes)> = hash
            .range::<str, _>((lower, Bound::Unbounded))
            .take(count + 1)
            .map(|(f, v)| (f.clone(), v.clone()))
            .collect();
        let next = if entries.len() > count {
            entries.truncate(count);
            entries.last().map(|(f, _)| ScanCursor::Resume(f.clone()))
        } else {
            None
        };
        Ok(ScanPage { entries, next })
    }

    async fn field_count(&self, key: &str) -> StoreResult<usize> {
        let state = self.state()?;
        Ok(state.hash(key)?.map_or(0, BTreeMap::len))
    }

    async fn push_tail(&self, key: &str, value: Bytes) -> StoreResult<usize> {
        self.state()?.push_list(key, value, false)
    }

    async fn push_head(&self, key: &str, value: Bytes) -> StoreResult<usize> {
        self.state()?.push_list(key, value, true)
    }

    async fn pop_head(&self, key: &str) -> StoreResult<Option<Bytes>> {
        self.state()?.pop_list_head(key)
    }

    async fn blocking_pop_head(&self, key: &str, wait: Wait) -> StoreResult<Option<Bytes>> {
        if wait == Wait::NoWait {
            return self.pop_head(key).await;
        }
        let deadline = wait.deadline();
        let waiter = self.register_waiter(key)?;
        loop {
            // Register interest before looking, so a push landing between
            // the check and the await still wakes us.
            let notified = waiter.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let popped = {
                let mut state = self.state()?;
                state.pop_list_head(key)?
            };
            if popped.is_some() {
                return Ok(popped);
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        debug!(key, "blocking pop timed out");
                        return Ok(None);
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn list_len(&self, key: &str) -> StoreResult<usize> {
        let state = self.state()?;
        match state.existing(key, KeyKind::List)? {
            Some(Entry::List(list)) => Ok(list.len()),
            _ => Ok(0),
        }
    }

    async fn add_member(&self, key: &str, score: f64, member: Bytes) -> StoreResult<bool> {
        if score.is_nan() {
            return Err(StoreError::InvalidScore(score));
        }
        let mut state = self.state()?;
        let Entry::SortedSet(set) = state.create(key, KeyKind::SortedSet)? else {
            unreachable!("create checked the kind");
        };
        // Fold -0.0 into 0.0 so equal scores compare equal.
        Ok(set.insert(score + 0.0, member))
    }

    async fn peek_extremal(&self, key: &str, end: Extremity) -> StoreResult<Option<ScoredMember>> {
        let state = self.state()?;
        Ok(state.sorted_set(key)?.and_then(|z| z.peek(end)))
    }

    async fn remove_member(&self, key: &str, member: &[u8]) -> StoreResult<bool> {
        let mut state = self.state()?;
        let Some(Entry::SortedSet(set)) = state.existing_mut(key, KeyKind::SortedSet)? else {
            return Ok(false);
        };
        let removed = set.remove(member);
        state.prune(key);
        Ok(removed)
    }

    async fn member_score(&self, key: &str, member: &[u8]) -> StoreResult<Option<f64>> {
        let state = self.state()?;
        Ok(state
            .sorted_set(key)?
            .and_then(|z| z.scores.get(member).copied()))
    }

    async fn member_rank(&self, key: &str, member: &[u8], end: Extremity) -> StoreResult<Option<usize>> {
        let state = self.state()?;
        Ok(state.sorted_set(key)?.and_then(|z| z.rank(member, end)))
    }

    async fn member_count(&self, key: &str) -> StoreResult<usize> {
        let state = self.state()?;
        Ok(state.sorted_set(key)?.map_or(0, |z| z.scores.len()))
    }

    async fn pop_extremal(&self, key: &str, end: Extremity) -> StoreResult<Option<ScoredMember>> {
        let mut state = self.state()?;
        let Some(Entry::SortedSet(set)) = state.existing_mut(key, KeyKind::SortedSet)? else {
            return Ok(None);
        };
        let popped = set.pop(end);
        state.prune(key);
        Ok(popped)
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("key_count", &self.len())
            .finish()
    }
}
