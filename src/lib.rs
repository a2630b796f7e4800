//! # pg-stmt-cache
//!
//! A connection-scoped prepared statement cache for PostgreSQL.
//!
//! ## Features
//!
//! - One cache per connection, keyed by exact SQL text
//! - Bounded, with least-recently-used eviction and server-side release
//! - Transparent single re-prepare when the server invalidates a handle
//! - Cancellation that never leaves a half-prepared entry behind
//! - Caching can be switched off entirely without changing results
//!
//! ## Executing statements
//!
//! ```no_run
//! use pg_stmt_cache::{connect, CacheConfig, PgConfig, Value};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PgConfig::new("host=localhost dbname=steve")
//!         .with_cache(CacheConfig::builder().capacity(64).build());
//!     let mut conn = connect(&config).await?;
//!
//!     let rows = conn
//!         .query(
//!             "select bar, idx from foo where bar = $2 and idx >= $1 order by idx",
//!             &[Value::Int(0), Value::from("baz")],
//!         )
//!         .await?;
//!     println!("{} rows", rows.len());
//!
//!     // Same text again: served from the cache, no second prepare
//!     conn.query(
//!         "select bar, idx from foo where bar = $2 and idx >= $1 order by idx",
//!         &[Value::Int(10), Value::from("baz")],
//!     )
//!     .await?;
//!
//!     println!("{:?}", conn.cache_stats());
//!     conn.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Without a cache
//!
//! ```no_run
//! use pg_stmt_cache::{connect, CacheConfig, PgConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PgConfig::new("host=localhost dbname=steve").with_cache(CacheConfig::disabled());
//!     let mut conn = connect(&config).await?;
//!
//!     conn.exec("drop table if exists foo", &[]).await?;
//!     assert!(conn.cache_stats().is_none());
//!     conn.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Other databases
//!
//! [`CachedConnection`] works over anything implementing [`StatementBackend`]:
//! prepare, bind+execute, release, and direct execution.

pub mod backend;
pub mod cache;
pub mod connection;
pub mod error;
pub mod postgres;
pub mod workload;

// Re-export main types for convenience
pub use backend::{ResultSet, StatementBackend, Value};
pub use cache::{
    CacheConfig, CacheConfigBuilder, CacheEntry, CacheKey, CacheStats, EntryState, EvictionReason,
    StatementCache,
};
pub use connection::CachedConnection;
pub use error::{DbError, DbErrorKind, Phase, Result, StatementError};
pub use postgres::{connect, PgBackend, PgConfig};
pub use tokio_util::sync::CancellationToken;
