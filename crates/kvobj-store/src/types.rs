use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// The collection type a key currently holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    Hash,
    List,
    SortedSet,
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyKind::Hash => write!(f, "hash"),
            KeyKind::List => write!(f, "list"),
            KeyKind::SortedSet => write!(f, "sorted set"),
        }
    }
}

/// How long a blocking pop may suspend the calling task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Wait {
    /// Return immediately when nothing is available.
    #[default]
    NoWait,
    /// Suspend for at most this long.
    For(Duration),
    /// Suspend until an element arrives or the caller cancels.
    Forever,
}

impl Wait {
    /// Deadline for this wait measured from now, `None` when unbounded.
    ///
    /// `NoWait` yields a deadline of now. A duration too large to add to the
    /// clock counts as unbounded.
    pub fn deadline(&self) -> Option<tokio::time::Instant> {
        let now = tokio::time::Instant::now();
        match self {
            Wait::NoWait => Some(now),
            Wait::For(d) => now.checked_add(*d),
            Wait::Forever => None,
        }
    }
}

impl From<Duration> for Wait {
    fn from(d: Duration) -> Self {
        if d.is_zero() {
            Wait::NoWait
        } else {
            Wait::For(d)
        }
    }
}

impl From<Option<Duration>> for Wait {
    /// `None` means wait forever.
    fn from(d: Option<Duration>) -> Self {
        match d {
            Some(d) => d.into(),
            None => Wait::Forever,
        }
    }
}

/// Which end of a sorted set an extremal operation addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Extremity {
    /// Lowest score first.
    Min,
    /// Highest score first.
    Max,
}

/// A sorted-set member together with its score.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoredMember {
    pub member: Bytes,
    pub score: f64,
}

/// Position within an incremental hash scan.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum ScanCursor {
    /// Begin a fresh pass.
    #[default]
    Start,
    /// Continue from a backend-specific position.
    Resume(String),
}

/// One page of an incremental hash scan.
#[derive(Clone, Debug, Default)]
pub struct ScanPage {
    pub entries: Vec<(String, Bytes)>,
    /// `None` once the pass is complete.
    pub next: Option<ScanCursor>,
}
