//! Eviction policy and eviction records
//!
//! Victims are chosen least-recently-used first. Ties on the logical
//! last-used tick go to the entry with the lowest use count, then to the
//! oldest insertion.

use crate::cache::entry::{CacheEntry, EntryState};
use crate::cache::types::CacheKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why an entry left the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvictionReason {
    /// Made room for a new entry at capacity
    Capacity,

    /// The server reported the handle invalid
    Stale,

    /// Removed on request
    Manual,

    /// Displaced by a new handle for the same key
    Replaced,

    /// The owning connection is closing
    Shutdown,
}

impl std::fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvictionReason::Capacity => write!(f, "capacity reached"),
            EvictionReason::Stale => write!(f, "stale handle"),
            EvictionReason::Manual => write!(f, "manual removal"),
            EvictionReason::Replaced => write!(f, "replaced"),
            EvictionReason::Shutdown => write!(f, "connection closing"),
        }
    }
}

/// An entry that has left the cache and whose handle still needs releasing
#[derive(Debug)]
pub struct Evicted<H> {
    pub entry: CacheEntry<H>,
    pub reason: EvictionReason,
    pub timestamp: DateTime<Utc>,
}

impl<H> Evicted<H> {
    pub fn new(mut entry: CacheEntry<H>, reason: EvictionReason) -> Self {
        entry.state = EntryState::Evicted;
        Self {
            entry,
            reason,
            timestamp: Utc::now(),
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.entry.key
    }

    /// Give up the handle for release
    pub fn into_handle(self) -> H {
        self.entry.handle
    }
}

/// Pick the entry to evict next, if any
pub fn select_victim<'a, H: 'a>(
    entries: impl IntoIterator<Item = &'a CacheEntry<H>>,
) -> Option<&'a CacheKey> {
    entries
        .into_iter()
        .min_by_key(|entry| entry.eviction_rank())
        .map(|entry| &entry.key)
}
