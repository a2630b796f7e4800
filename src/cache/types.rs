//! Core type definitions for the statement cache

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// SQL text as submitted, with only surrounding whitespace trimmed.
///
/// Parameters are bound separately, so two statements that differ only in
/// their bound values share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(sql: &str) -> Self {
        Self(sql.trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(sql: &str) -> Self {
        Self::new(sql)
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Counters for cache behavior on one connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CacheStats {
    /// Lookups that found a resident handle
    pub hits: u64,

    /// Lookups that had to prepare
    pub misses: u64,

    /// Successful prepare round trips, including stale re-prepares
    pub prepares: u64,

    /// Entries removed to stay within capacity
    pub evictions: u64,

    /// Entries dropped because the server reported their handle stale
    pub stale_invalidations: u64,

    /// Server-side releases that failed and were only logged
    pub release_failures: u64,

    /// Number of entries currently resident
    pub entries: usize,
}

impl CacheStats {
    /// Cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, hit_rate: {:.2}%, prepares: {}, entries: {}, evictions: {}, stale: {} }}",
            self.hits,
            self.misses,
            self.hit_rate(),
            self.prepares,
            self.entries,
            self.evictions,
            self.stale_invalidations
        )
    }
}
