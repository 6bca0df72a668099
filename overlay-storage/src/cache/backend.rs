//! Key-value backend trait.

use async_trait::async_trait;
use overlay_core::CacheResult;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Networked key-value store used by the cache layer.
///
/// Every operation is fallible. Implementations surface failures as
/// [`overlay_core::CacheError::Backend`]; deciding whether a failure is
/// fatal is left to the caller (see [`super::CacheService`] for the
/// fail-open facade).
///
/// Keys are plain strings and values are UTF-8 text. Collection commands
/// follow Redis semantics: writing to a missing key creates it, removing the
/// last member of a collection removes the key, and using a key with a
/// command of the wrong kind is an error.
#[async_trait]
pub trait CacheBackend: Send + Sync + fmt::Debug {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Store `value`, replacing any previous value and TTL. `None` keeps the
    /// key until it is deleted.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()>;

    /// Delete `keys`, returning how many existed.
    async fn delete(&self, keys: &[String]) -> CacheResult<u64>;

    /// Enumerate keys matching a glob pattern.
    ///
    /// Not atomic: keys written or deleted concurrently may or may not be
    /// reported.
    async fn scan_keys(&self, pattern: &str) -> CacheResult<Vec<String>>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    // Hashes

    async fn hset_many(&self, key: &str, fields: &[(String, String)]) -> CacheResult<()>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> CacheResult<()> {
        self.hset_many(key, &[(field.to_string(), value.to_string())])
            .await
    }

    async fn hget(&self, key: &str, field: &str) -> CacheResult<Option<String>>;

    async fn hgetall(&self, key: &str) -> CacheResult<HashMap<String, String>>;

    async fn hdel(&self, key: &str, fields: &[String]) -> CacheResult<u64>;

    // Sets

    /// Add members, returning how many were new.
    async fn sadd(&self, key: &str, members: &[String]) -> CacheResult<u64>;

    async fn smembers(&self, key: &str) -> CacheResult<Vec<String>>;

    async fn srem(&self, key: &str, members: &[String]) -> CacheResult<u64>;

    async fn scard(&self, key: &str) -> CacheResult<u64>;

    // Sorted sets

    async fn zadd(&self, key: &str, member: &str, score: f64) -> CacheResult<()>;

    /// Members by ascending score between rank `start` and `stop`
    /// inclusive. Negative ranks count from the end.
    async fn zrange(&self, key: &str, start: isize, stop: isize) -> CacheResult<Vec<String>>;

    /// Members by descending score.
    async fn zrevrange(&self, key: &str, start: isize, stop: isize) -> CacheResult<Vec<String>>;

    /// Members with `min <= score <= max`, ascending.
    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> CacheResult<Vec<String>>;

    /// Remove members, returning how many existed.
    async fn zrem(&self, key: &str, members: &[String]) -> CacheResult<u64>;

    /// Set a TTL on an existing key. Returns false if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;

    async fn ping(&self) -> CacheResult<()>;

    /// Release the connection. Later calls fail.
    async fn close(&self) -> CacheResult<()>;
}

/// Whole seconds for a TTL, never less than one.
pub(crate) fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}
