//! Cache entries and their lifecycle state

use crate::cache::types::CacheKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a cached statement.
///
/// `Absent -> Preparing -> Ready -> (Stale | Evicted)`. A stale entry gets one
/// re-prepare; if that fails it is evicted. `Evicted` is terminal for the
/// entry, though the same key may be inserted again later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    Absent,
    Preparing,
    Ready,
    Stale,
    Evicted,
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryState::Absent => write!(f, "absent"),
            EntryState::Preparing => write!(f, "preparing"),
            EntryState::Ready => write!(f, "ready"),
            EntryState::Stale => write!(f, "stale"),
            EntryState::Evicted => write!(f, "evicted"),
        }
    }
}

/// Bookkeeping used by the eviction policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// Wall-clock creation time, for diagnostics only
    pub created_at: DateTime<Utc>,

    /// Logical tick of the most recent use
    pub last_used: u64,

    /// Number of executions served by this entry
    pub use_count: u64,

    /// Insertion sequence number; lower is older
    pub inserted: u64,
}

/// A prepared statement owned by the cache
#[derive(Debug, Clone)]
pub struct CacheEntry<H> {
    pub key: CacheKey,
    pub handle: H,
    pub state: EntryState,
    pub metadata: CacheMetadata,
}

impl<H> CacheEntry<H> {
    /// A freshly prepared entry, counted as used once at `tick`
    pub fn new(key: CacheKey, handle: H, tick: u64, inserted: u64) -> Self {
        Self {
            key,
            handle,
            state: EntryState::Ready,
            metadata: CacheMetadata {
                created_at: Utc::now(),
                last_used: tick,
                use_count: 1,
                inserted,
            },
        }
    }

    pub fn mark_used(&mut self, tick: u64) {
        self.metadata.last_used = tick;
        self.metadata.use_count += 1;
    }

    pub fn mark_stale(&mut self) {
        self.state = EntryState::Stale;
    }

    pub fn is_ready(&self) -> bool {
        self.state == EntryState::Ready
    }

    /// Eviction order: smaller sorts first
    pub(crate) fn eviction_rank(&self) -> (u64, u64, u64) {
        (
            self.metadata.last_used,
            self.metadata.use_count,
            self.metadata.inserted,
        )
    }
}
