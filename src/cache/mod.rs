//! # Prepared Statement Cache
//!
//! Connection-scoped cache mapping SQL text to server-side prepared statement
//! handles, so repeated executions of the same text skip parsing and planning.
//!
//! ## Features
//!
//! - **Exact-text keys**: SQL is keyed as submitted, trimmed of surrounding whitespace
//! - **Bounded**: at capacity exactly one entry is evicted per insertion
//! - **LRU Eviction**: least recently used first, then least used, then oldest
//! - **Stale tracking**: entries the server invalidated are never served again
//! - **Statistics**: hits, misses, prepares, evictions, release failures
//!
//! The cache performs no I/O. Evicted entries are handed back to the caller,
//! which owns releasing their handles on the server.
//!
//! ## Example
//!
//! ```rust
//! use pg_stmt_cache::cache::{CacheConfig, CacheKey, StatementCache};
//!
//! let config = CacheConfig::builder().capacity(2).build();
//! let mut cache: StatementCache<u32> = StatementCache::new(&config).unwrap();
//!
//! let key = CacheKey::new("select bar, idx from foo where bar = $1");
//! assert!(cache.lookup(&key).is_none());
//! cache.insert(key.clone(), 1);
//! assert_eq!(cache.lookup(&key), Some(1));
//! ```

pub mod config;
pub mod entry;
pub mod eviction;
pub mod store;
pub mod types;

pub use config::{CacheConfig, CacheConfigBuilder};
pub use entry::{CacheEntry, CacheMetadata, EntryState};
pub use eviction::{Evicted, EvictionReason};
pub use store::StatementCache;
pub use types::{CacheKey, CacheStats};
