//! Statement execution over a single backend connection
//!
//! [`CachedConnection`] is the one entry point for running SQL. With caching
//! enabled it consults its [`StatementCache`] and prepares on a miss; with
//! caching disabled the cache is never built and every statement goes out as a
//! one-shot execution.
//!
//! Every operation takes `&mut self`. A connection therefore runs one
//! statement at a time and statements complete in the order they were issued,
//! which is also why no second prepare can start for a key that is still
//! being prepared.

use crate::backend::{ResultSet, StatementBackend, Value};
use crate::cache::{CacheConfig, CacheKey, CacheStats, EntryState, Evicted, EvictionReason, StatementCache};
use crate::error::{DbError, Phase, Result, StatementError};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A database connection with an optional prepared statement cache
pub struct CachedConnection<B: StatementBackend> {
    id: Uuid,
    backend: B,
    cache: Option<StatementCache<B::Handle>>,
    config: CacheConfig,
}

impl<B: StatementBackend> CachedConnection<B> {
    /// Wrap an open backend connection.
    ///
    /// The cache is only constructed when `config.enabled` is true.
    pub fn new(backend: B, config: CacheConfig) -> Result<Self> {
        config.validate()?;

        let id = Uuid::new_v4();
        let cache = if config.enabled {
            Some(StatementCache::new(&config)?)
        } else {
            None
        };

        info!(
            "Opened connection {} (statement cache: {})",
            id,
            if config.enabled { "enabled" } else { "disabled" }
        );

        Ok(Self {
            id,
            backend,
            cache,
            config,
        })
    }

    /// Run a statement and return whatever the database produced.
    ///
    /// A stale cached handle is re-prepared once. Inside an open transaction
    /// PostgreSQL has already aborted the transaction by the time the stale
    /// error arrives, so the retry fails with `25P02` and that is the error
    /// returned; the stale cause is logged at `warn`. Roll back and run again.
    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<ResultSet> {
        self.run(sql, params, None).await
    }

    /// Run a statement, giving up if `cancel` fires first.
    ///
    /// A cancelled prepare leaves nothing in the cache. A cancelled
    /// bind/execute keeps the already prepared entry.
    pub async fn execute_with_cancel(
        &mut self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<ResultSet> {
        self.run(sql, params, Some(cancel)).await
    }

    /// Run a statement that returns rows
    pub async fn query(&mut self, sql: &str, params: &[Value]) -> Result<ResultSet> {
        self.execute(sql, params).await
    }

    /// Run a command and return the number of affected rows
    pub async fn exec(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        Ok(self.execute(sql, params).await?.rows_affected)
    }

    /// Start a transaction
    pub async fn begin(&mut self) -> Result<()> {
        self.transaction_control("BEGIN").await
    }

    /// Commit the current transaction
    pub async fn commit(&mut self) -> Result<()> {
        self.transaction_control("COMMIT").await
    }

    /// Roll back the current transaction
    pub async fn rollback(&mut self) -> Result<()> {
        self.transaction_control("ROLLBACK").await
    }

    /// Drop a cached statement and release its handle. Returns whether one was resident.
    pub async fn invalidate(&mut self, sql: &str) -> bool {
        let key = CacheKey::new(sql);
        let evicted = self
            .cache
            .as_mut()
            .and_then(|cache| cache.remove(&key, EvictionReason::Manual));

        match evicted {
            Some(evicted) => {
                self.release(evicted).await;
                true
            }
            None => false,
        }
    }

    /// Release every cached handle and close the backend
    pub async fn close(mut self) -> Result<()> {
        if let Some(mut cache) = self.cache.take() {
            let drained = cache.drain();
            info!(
                "Releasing {} cached statements on connection {}",
                drained.len(),
                self.id
            );

            for evicted in drained {
                if !Self::release_handle(&mut self.backend, self.id, evicted).await {
                    cache.record_release_failure();
                }
            }

            info!("Connection {} final {}", self.id, cache.stats());
        }

        self.backend
            .close()
            .await
            .map_err(|e| StatementError::from_db(Phase::Release, e))?;

        info!("Closed connection {}", self.id);
        Ok(())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// Cache counters, or `None` when caching is disabled
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(StatementCache::stats)
    }

    /// Lifecycle state of a statement in this connection's cache
    pub fn statement_state(&self, sql: &str) -> EntryState {
        self.cache
            .as_ref()
            .map(|cache| cache.state(&CacheKey::new(sql)))
            .unwrap_or(EntryState::Absent)
    }

    pub fn cache(&self) -> Option<&StatementCache<B::Handle>> {
        self.cache.as_ref()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Access the underlying backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable access to the backend, for driver-specific calls.
    ///
    /// Anything done here bypasses the cache; releasing a cached handle
    /// through it will surface later as a stale statement.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    async fn run(
        &mut self,
        sql: &str,
        params: &[Value],
        cancel: Option<&CancellationToken>,
    ) -> Result<ResultSet> {
        let key = CacheKey::new(sql);

        let cached = match self.cache.as_mut() {
            Some(cache) => cache.lookup(&key),
            None => return self.run_direct(sql, params, cancel).await,
        };

        let handle = match cached {
            Some(handle) => handle,
            None => self.prepare(&key, cancel).await?,
        };

        match cancellable(cancel, Phase::Execute, self.backend.bind_execute(&handle, params)).await? {
            Ok(result) => Ok(result),
            Err(e) if e.is_stale() => self.recover_stale(&key, params, cancel, e).await,
            Err(e) => Err(StatementError::from_db(Phase::Execute, e)),
        }
    }

    async fn run_direct(
        &mut self,
        sql: &str,
        params: &[Value],
        cancel: Option<&CancellationToken>,
    ) -> Result<ResultSet> {
        debug!("Executing directly on connection {}: {}", self.id, sql.trim());

        cancellable(cancel, Phase::Direct, self.backend.execute_direct(sql, params))
            .await?
            .map_err(|e| StatementError::from_db(Phase::Direct, e))
    }

    /// Prepare `key` and store the handle, evicting one entry first when full
    async fn prepare(
        &mut self,
        key: &CacheKey,
        cancel: Option<&CancellationToken>,
    ) -> Result<B::Handle> {
        self.try_prepare(key, cancel)
            .await?
            .map_err(|e| StatementError::from_db(Phase::Prepare, e))
    }

    /// Like [`Self::prepare`], but hands back the backend's error unclassified
    async fn try_prepare(
        &mut self,
        key: &CacheKey,
        cancel: Option<&CancellationToken>,
    ) -> Result<std::result::Result<B::Handle, DbError>> {
        debug!("Preparing statement on connection {}: {}", self.id, key);

        let handle = match cancellable(cancel, Phase::Prepare, self.backend.prepare(key.as_str())).await? {
            Ok(handle) => handle,
            Err(e) => return Ok(Err(e)),
        };

        let victim = self.cache.as_mut().and_then(|cache| cache.make_room(key));
        if let Some(evicted) = victim {
            self.release(evicted).await;
        }

        if let Some(cache) = self.cache.as_mut() {
            if let Some(displaced) = cache.insert(key.clone(), handle.clone()) {
                self.release(displaced).await;
            }
        }

        Ok(Ok(handle))
    }

    /// Evict a stale entry and re-prepare it exactly once
    async fn recover_stale(
        &mut self,
        key: &CacheKey,
        params: &[Value],
        cancel: Option<&CancellationToken>,
        err: DbError,
    ) -> Result<ResultSet> {
        self.evict_stale(key).await;

        if !self.config.retry_stale {
            return Err(StatementError::from_db(Phase::Execute, err));
        }

        warn!(
            "Prepared statement went stale on connection {} ({}), re-preparing: {}",
            self.id, err, key
        );

        let handle = match self.try_prepare(key, cancel).await? {
            Ok(handle) => handle,
            Err(e) => return Err(self.retry_failed(key, &err, Phase::Prepare, e)),
        };

        match cancellable(cancel, Phase::Execute, self.backend.bind_execute(&handle, params)).await? {
            Ok(result) => Ok(result),
            Err(e) if e.is_stale() => {
                self.evict_stale(key).await;
                Err(self.retry_failed(key, &err, Phase::Execute, e))
            }
            Err(e) => Err(self.retry_failed(key, &err, Phase::Execute, e)),
        }
    }

    /// The retry after a stale handle failed. A stale answer to the retry is
    /// reported as a prepare failure; anything else keeps its own phase.
    fn retry_failed(&self, key: &CacheKey, stale: &DbError, phase: Phase, err: DbError) -> StatementError {
        warn!(
            "Retry after stale statement failed on connection {} ({}): {} (stale cause: {})",
            self.id, err, key, stale
        );

        if err.is_stale() {
            StatementError::PrepareError {
                message: err.message,
                code: err.code,
            }
        } else {
            StatementError::from_db(phase, err)
        }
    }

    async fn evict_stale(&mut self, key: &CacheKey) {
        let evicted = self.cache.as_mut().and_then(|cache| {
            cache.mark_stale(key);
            cache.remove(key, EvictionReason::Stale)
        });

        if let Some(evicted) = evicted {
            self.release(evicted).await;
        }
    }

    async fn transaction_control(&mut self, sql: &str) -> Result<()> {
        debug!("{} on connection {}", sql, self.id);
        self.backend
            .execute_direct(sql, &[])
            .await
            .map(|_| ())
            .map_err(|e| StatementError::from_db(Phase::Direct, e))
    }

    /// Release an evicted handle, counting failures instead of returning them
    async fn release(&mut self, evicted: Evicted<B::Handle>) {
        if !Self::release_handle(&mut self.backend, self.id, evicted).await {
            if let Some(cache) = self.cache.as_mut() {
                cache.record_release_failure();
            }
        }
    }

    async fn release_handle(backend: &mut B, id: Uuid, evicted: Evicted<B::Handle>) -> bool {
        let key = evicted.key().clone();
        let reason = evicted.reason;

        match backend.release(evicted.into_handle()).await {
            Ok(()) => {
                debug!("Released statement on connection {} ({}): {}", id, reason, key);
                true
            }
            Err(e) => {
                warn!(
                    "Failed to release statement on connection {} ({}): {}: {}",
                    id, reason, key, e
                );
                false
            }
        }
    }
}

/// Run one round trip, racing it against the caller's cancellation token.
///
/// The outer result is the cancellation, the inner one the backend's answer.
async fn cancellable<T>(
    cancel: Option<&CancellationToken>,
    phase: Phase,
    fut: impl Future<Output = std::result::Result<T, DbError>>,
) -> Result<std::result::Result<T, DbError>> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Cancelled during {}", phase);
                Err(StatementError::Cancelled { phase })
            }
            result = fut => Ok(result),
        },
        None => Ok(fut.await),
    }
}
