//! Typed, fail-open facade over a [`CacheBackend`].

use super::backend::CacheBackend;
use super::entry::CacheEntry;
use overlay_core::{CacheError, CacheResult, CacheValue, Clock, SystemClock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Keys deleted per `DEL` during pattern invalidation.
const DELETE_BATCH: usize = 500;

/// Cache client shared by every component of the layer.
///
/// Two families of operations are offered:
///
/// - `try_*` operations return [`CacheResult`] and are used where the caller
///   must know whether a write landed (ingestion, pattern invalidation).
/// - The plain operations never fail: errors are logged with `warn!` and
///   turned into a miss or a no-op, so a cache outage costs latency and
///   nothing else.
///
/// Typed values travel inside a [`CacheEntry`] envelope tagged with the
/// value's [`overlay_core::CacheRegion`]. Entries found past their expiry
/// are deleted by the read that discovers them.
#[derive(Clone)]
pub struct CacheService {
    backend: Arc<dyn CacheBackend>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for CacheService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheService")
            .field("backend", &self.backend)
            .finish()
    }
}

impl CacheService {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self::with_clock(backend, Arc::new(SystemClock))
    }

    pub fn with_clock(backend: Arc<dyn CacheBackend>, clock: Arc<dyn Clock>) -> Self {
        Self { backend, clock }
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // ========================================================================
    // TYPED VALUES
    // ========================================================================

    /// Read the envelope at `key`.
    ///
    /// Expired entries are deleted and reported as absent. An entry that does
    /// not decode as `T` is a [`CacheError::Decode`].
    pub async fn try_get_entry<T: CacheValue>(
        &self,
        key: &str,
    ) -> CacheResult<Option<CacheEntry<T>>> {
        let Some(raw) = self.backend.get(key).await? else {
            return Ok(None);
        };
        let entry: CacheEntry<T> =
            serde_json::from_str(&raw).map_err(|e| CacheError::Decode {
                key: key.to_string(),
                region: T::REGION,
                reason: e.to_string(),
            })?;

        if entry.is_expired(self.clock.now(), None) {
            self.evict(key).await;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    pub async fn try_get<T: CacheValue>(&self, key: &str) -> CacheResult<Option<T>> {
        Ok(self.try_get_entry::<T>(key).await?.map(|entry| entry.value))
    }

    /// Write `value` under `key` for `ttl`.
    pub async fn try_set<T: CacheValue>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> CacheResult<()> {
        let entry = CacheEntry::new(value, self.clock.now(), Some(ttl));
        let raw = serde_json::to_string(&entry).map_err(|e| CacheError::Encode {
            region: T::REGION,
            reason: e.to_string(),
        })?;
        self.backend.set(key, &raw, Some(ttl)).await
    }

    /// Fail-open read. Errors are logged and yield `None`; an undecodable
    /// entry is also deleted.
    pub async fn get<T: CacheValue>(&self, key: &str) -> Option<T> {
        match self.try_get::<T>(key).await {
            Ok(value) => value,
            Err(e @ CacheError::Decode { .. }) => {
                tracing::warn!(key = %key, error = %e, "Dropping undecodable cache entry");
                self.evict(key).await;
                None
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    /// Fail-open write. Returns whether the value was stored.
    pub async fn set<T: CacheValue>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        match self.try_set(key, value, ttl).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache write failed");
                false
            }
        }
    }

    async fn evict(&self, key: &str) {
        if let Err(e) = self.backend.delete(&[key.to_string()]).await {
            tracing::warn!(key = %key, error = %e, "Failed to evict expired cache entry");
        }
    }

    // ========================================================================
    // DELETION
    // ========================================================================

    pub async fn try_delete(&self, keys: &[String]) -> CacheResult<u64> {
        self.backend.delete(keys).await
    }

    pub async fn delete(&self, keys: &[String]) -> u64 {
        match self.backend.delete(keys).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(keys = ?keys, error = %e, "Cache delete failed");
                0
            }
        }
    }

    /// Enumerate keys matching `pattern` and delete them in batches.
    ///
    /// Not atomic: a key written after enumeration survives, and a failure
    /// midway leaves earlier batches deleted.
    pub async fn try_delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        let keys = self.backend.scan_keys(pattern).await?;
        let mut deleted = 0;
        for batch in keys.chunks(DELETE_BATCH) {
            deleted += self.backend.delete(batch).await?;
        }
        tracing::debug!(pattern = %pattern, deleted, "Deleted keys by pattern");
        Ok(deleted)
    }

    pub async fn delete_pattern(&self, pattern: &str) -> u64 {
        match self.try_delete_pattern(pattern).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(pattern = %pattern, error = %e, "Cache pattern delete failed");
                0
            }
        }
    }

    pub async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.backend.exists(key).await
    }

    // ========================================================================
    // COLLECTIONS
    // ========================================================================

    pub async fn hset_many(&self, key: &str, fields: &[(String, String)]) -> bool {
        match self.backend.hset_many(key, fields).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache hset failed");
                false
            }
        }
    }

    pub async fn hget(&self, key: &str, field: &str) -> Option<String> {
        match self.backend.hget(key, field).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key = %key, field = %field, error = %e, "Cache hget failed");
                None
            }
        }
    }

    pub async fn hgetall(&self, key: &str) -> HashMap<String, String> {
        match self.backend.hgetall(key).await {
            Ok(fields) => fields,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache hgetall failed");
                HashMap::new()
            }
        }
    }

    pub async fn hdel(&self, key: &str, fields: &[String]) -> u64 {
        match self.backend.hdel(key, fields).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache hdel failed");
                0
            }
        }
    }

    pub async fn sadd(&self, key: &str, members: &[String]) -> u64 {
        match self.backend.sadd(key, members).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache sadd failed");
                0
            }
        }
    }

    pub async fn smembers(&self, key: &str) -> Vec<String> {
        match self.backend.smembers(key).await {
            Ok(members) => members,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache smembers failed");
                Vec::new()
            }
        }
    }

    pub async fn srem(&self, key: &str, members: &[String]) -> u64 {
        match self.backend.srem(key, members).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache srem failed");
                0
            }
        }
    }

    pub async fn zadd(&self, key: &str, member: &str, score: f64) -> bool {
        match self.backend.zadd(key, member, score).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache zadd failed");
                false
            }
        }
    }

    pub async fn zrange(&self, key: &str, start: isize, stop: isize) -> Vec<String> {
        match self.backend.zrange(key, start, stop).await {
            Ok(members) => members,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache zrange failed");
                Vec::new()
            }
        }
    }

    pub async fn zrevrange(&self, key: &str, start: isize, stop: isize) -> Vec<String> {
        match self.backend.zrevrange(key, start, stop).await {
            Ok(members) => members,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache zrevrange failed");
                Vec::new()
            }
        }
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> bool {
        match self.backend.expire(key, ttl).await {
            Ok(applied) => applied,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache expire failed");
                false
            }
        }
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Whether the backend answers.
    pub async fn ping(&self) -> bool {
        match self.backend.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Cache ping failed");
                false
            }
        }
    }

    pub async fn close(&self) {
        if let Err(e) = self.backend.close().await {
            tracing::warn!(error = %e, "Failed to close cache backend");
        }
    }
}
