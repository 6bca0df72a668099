//! Cache-aside coordination.
//!
//! Reads check the cache, fall back to a loader against the system of
//! record on a miss, and populate the cache with the loaded value. Writes
//! call [`CacheAside::invalidate`] with the direct key of the row they
//! changed plus any pattern that may cover aggregates over it.

use crate::cache::{CacheService, CacheStats, StatsCounter};
use overlay_core::{CacheError, CacheValue};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// A key or key pattern to drop after a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    /// Exact key.
    Key(String),
    /// Glob pattern; expanded by enumeration, best-effort.
    Pattern(String),
}

impl Invalidation {
    pub fn key(key: impl Into<String>) -> Self {
        Invalidation::Key(key.into())
    }

    pub fn pattern(pattern: impl Into<String>) -> Self {
        Invalidation::Pattern(pattern.into())
    }

    fn target(&self) -> &str {
        match self {
            Invalidation::Key(key) => key,
            Invalidation::Pattern(pattern) => pattern,
        }
    }
}

/// Outcome of an invalidation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    /// Keys that existed and were deleted.
    pub deleted: u64,
    /// Keys or patterns whose deletion failed.
    pub failed: Vec<String>,
}

impl InvalidationReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Read-through orchestration over a [`CacheService`].
///
/// No lock is taken across concurrent misses for the same key: each caller
/// may run the loader and write the cache, and the last writer wins. Loads
/// are pure reads of the system of record, so the race only costs
/// duplicate work.
#[derive(Debug, Clone)]
pub struct CacheAside {
    cache: CacheService,
    stats: Arc<StatsCounter>,
}

impl CacheAside {
    pub fn new(cache: CacheService) -> Self {
        Self {
            cache,
            stats: Arc::new(StatsCounter::default()),
        }
    }

    pub fn cache(&self) -> &CacheService {
        &self.cache
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// Return the cached value at `key`, or run `loader` and cache its
    /// result for `ttl`.
    ///
    /// `None` from the loader is returned as-is and never cached. Loader
    /// errors propagate unchanged; cache errors are logged and treated as
    /// a miss.
    pub async fn get_or_load<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        loader: F,
    ) -> Result<Option<T>, E>
    where
        T: CacheValue,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        match self.cache.try_get::<T>(key).await {
            Ok(Some(value)) => {
                self.stats.hit();
                tracing::trace!(key = %key, "Cache hit");
                return Ok(Some(value));
            }
            Ok(None) => {}
            Err(e @ CacheError::Decode { .. }) => {
                self.stats.error();
                tracing::warn!(key = %key, error = %e, "Dropping undecodable cache entry");
                self.cache.delete(&[key.to_string()]).await;
            }
            Err(e) => {
                self.stats.error();
                tracing::warn!(key = %key, error = %e, "Cache read failed, loading from store");
            }
        }
        self.stats.miss();

        let loaded = loader().await?;
        if let Some(value) = &loaded {
            self.cache.set(key, value, ttl).await;
        }
        Ok(loaded)
    }

    /// Delete every target. Failures are logged at `error!` and reported,
    /// never raised: the write they follow has already committed.
    pub async fn invalidate(&self, targets: &[Invalidation]) -> InvalidationReport {
        let mut report = InvalidationReport::default();

        let keys: Vec<String> = targets
            .iter()
            .filter_map(|t| match t {
                Invalidation::Key(key) => Some(key.clone()),
                Invalidation::Pattern(_) => None,
            })
            .collect();
        if !keys.is_empty() {
            match self.cache.try_delete(&keys).await {
                Ok(n) => report.deleted += n,
                Err(e) => {
                    self.stats.error();
                    tracing::error!(keys = ?keys, error = %e, "Cache invalidation failed");
                    report.failed.extend(keys);
                }
            }
        }

        for target in targets {
            if let Invalidation::Pattern(pattern) = target {
                match self.cache.try_delete_pattern(pattern).await {
                    Ok(n) => report.deleted += n,
                    Err(e) => {
                        self.stats.error();
                        tracing::error!(
                            pattern = %pattern,
                            error = %e,
                            "Cache pattern invalidation failed"
                        );
                        report.failed.push(target.target().to_string());
                    }
                }
            }
        }

        report
    }
}
