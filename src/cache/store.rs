//! Bounded statement cache with LRU eviction
//!
//! The cache is bookkeeping only: it never talks to the database. The owning
//! connection performs prepares and releases and tells the cache about them,
//! so handles coming out of [`StatementCache::insert`] and
//! [`StatementCache::remove`] must still be released by the caller.

use crate::cache::{
    config::CacheConfig,
    entry::{CacheEntry, EntryState},
    eviction::{select_victim, Evicted, EvictionReason},
    types::{CacheKey, CacheStats},
};
use crate::error::{Result, StatementError};
use std::collections::HashMap;
use tracing::{debug, info};

/// Prepared statement cache for a single connection
///
/// No internal locking: a cache belongs to exactly one connection, and that
/// connection runs one statement at a time.
#[derive(Debug)]
pub struct StatementCache<H> {
    capacity: usize,

    entries: HashMap<CacheKey, CacheEntry<H>>,

    /// Logical clock, advanced on every hit and insertion
    clock: u64,

    /// Next insertion sequence number
    next_seq: u64,

    stats: CacheStats,
}

impl<H: Clone> StatementCache<H> {
    /// Create a cache from an enabled configuration
    pub fn new(config: &CacheConfig) -> Result<Self> {
        config.validate()?;
        if !config.enabled {
            return Err(StatementError::ConfigError(
                "statement cache is disabled".to_string(),
            ));
        }

        info!("Initializing statement cache (capacity: {})", config.capacity);

        Ok(Self::with_capacity(config.capacity))
    }

    fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity.min(256)),
            clock: 0,
            next_seq: 0,
            stats: CacheStats::default(),
        }
    }

    /// Look up a ready handle, recording a hit or a miss
    pub fn lookup(&mut self, key: &CacheKey) -> Option<H> {
        self.clock += 1;
        let tick = self.clock;

        match self.entries.get_mut(key) {
            Some(entry) if entry.is_ready() => {
                entry.mark_used(tick);
                self.stats.hits += 1;
                debug!("Statement cache hit: {}", key);
                Some(entry.handle.clone())
            }
            _ => {
                self.stats.misses += 1;
                debug!("Statement cache miss: {}", key);
                None
            }
        }
    }

    /// Store a freshly prepared handle.
    ///
    /// At capacity, exactly one entry is evicted first and returned so its
    /// handle can be released. Re-inserting a resident key returns the
    /// replaced entry instead.
    pub fn insert(&mut self, key: CacheKey, handle: H) -> Option<Evicted<H>> {
        self.clock += 1;
        self.stats.prepares += 1;

        let displaced = if let Some(old) = self.entries.remove(&key) {
            debug!("Replacing cached statement: {}", key);
            Some(Evicted::new(old, EvictionReason::Replaced))
        } else if self.entries.len() >= self.capacity {
            self.evict_one()
        } else {
            None
        };

        let entry = CacheEntry::new(key.clone(), handle, self.clock, self.next_seq);
        self.next_seq += 1;
        debug!("Caching prepared statement: {}", key);
        self.entries.insert(key, entry);
        self.stats.entries = self.entries.len();

        displaced
    }

    /// Evict one entry if `incoming` would not fit, so its handle can be
    /// released before the new entry goes in
    pub fn make_room(&mut self, incoming: &CacheKey) -> Option<Evicted<H>> {
        if self.entries.len() < self.capacity || self.entries.contains_key(incoming) {
            return None;
        }
        self.evict_one()
    }

    /// Flag a resident entry as stale. Returns false if the key is not resident.
    pub fn mark_stale(&mut self, key: &CacheKey) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.mark_stale();
                true
            }
            None => false,
        }
    }

    /// Remove a specific entry
    pub fn remove(&mut self, key: &CacheKey, reason: EvictionReason) -> Option<Evicted<H>> {
        let entry = self.entries.remove(key)?;
        self.stats.entries = self.entries.len();
        if reason == EvictionReason::Stale {
            self.stats.stale_invalidations += 1;
        }

        debug!("Removed cached statement ({}): {}", reason, key);
        Some(Evicted::new(entry, reason))
    }

    /// Remove every entry, oldest insertion first
    pub fn drain(&mut self) -> Vec<Evicted<H>> {
        let mut drained: Vec<CacheEntry<H>> = self.entries.drain().map(|(_, e)| e).collect();
        drained.sort_by_key(|e| e.metadata.inserted);
        self.stats.entries = 0;

        drained
            .into_iter()
            .map(|e| Evicted::new(e, EvictionReason::Shutdown))
            .collect()
    }

    /// Key that would be evicted next
    pub fn select_victim(&self) -> Option<&CacheKey> {
        select_victim(self.entries.values())
    }

    /// Count a server-side release that failed
    pub fn record_release_failure(&mut self) {
        self.stats.release_failures += 1;
    }

    /// Lifecycle state of a key as seen by the cache
    pub fn state(&self, key: &CacheKey) -> EntryState {
        self.entries
            .get(key)
            .map(|e| e.state)
            .unwrap_or(EntryState::Absent)
    }

    /// Inspect an entry without touching its bookkeeping
    pub fn peek(&self, key: &CacheKey) -> Option<&CacheEntry<H>> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.clone()
    }

    fn evict_one(&mut self) -> Option<Evicted<H>> {
        let victim = self.select_victim()?.clone();
        let entry = self.entries.remove(&victim)?;
        self.stats.evictions += 1;

        debug!("Evicting statement due to capacity limit: {}", victim);
        Some(Evicted::new(entry, EvictionReason::Capacity))
    }
}
