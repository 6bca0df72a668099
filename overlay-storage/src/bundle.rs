//! Two-tier cache for assembled bundle bodies.
//!
//! The primary tier is the shared [`CacheService`] (when configured); the
//! secondary tier is a process-local map that every write is mirrored into.
//! Reads prefer the primary and fall back to the local tier only when the
//! primary errors, so an outage degrades to node-local caching.
//!
//! A cached bundle is a structural snapshot. Confirmation-style fields must
//! be recomputed from [`BundleCacheEntry::body`] by the caller on every read;
//! [`BundleCacheEntry::meets_policy_at_write`] records what was true at
//! assembly time and is never updated.

use crate::cache::{CacheService, CacheStats, StatsCounter};
use dashmap::DashMap;
use overlay_core::keys::BUNDLE_PREFIX;
use overlay_core::{
    BundleBackend, CacheError, CacheKeys, CacheRegion, CacheValue, Clock, OverlayConfig,
    SystemClock, Timestamp,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Cached bundle body with its write-time policy snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleCacheEntry {
    pub assembled_at: Timestamp,
    pub body: Value,
    /// Whether the proof set met the confirmation policy when assembled.
    /// Not current status.
    pub meets_policy_at_write: bool,
}

impl CacheValue for BundleCacheEntry {
    const REGION: CacheRegion = CacheRegion::Bundle;
}

pub struct BundleCache {
    primary: Option<CacheService>,
    local: DashMap<String, BundleCacheEntry>,
    ttl: Duration,
    max_depth: u32,
    clock: Arc<dyn Clock>,
    stats: StatsCounter,
}

impl fmt::Debug for BundleCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleCache")
            .field("networked", &self.primary.is_some())
            .field("local_entries", &self.local.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl BundleCache {
    /// Build from configuration. The networked tier is used only when
    /// `config.bundle_backend` selects it.
    pub fn new(cache: CacheService, config: &OverlayConfig) -> Self {
        let clock = cache.clock().clone();
        let primary = match config.bundle_backend {
            BundleBackend::Networked => Some(cache),
            BundleBackend::InProcess => None,
        };
        Self {
            primary,
            local: DashMap::new(),
            ttl: config.ttls.bundles,
            max_depth: config.bundle_max_depth,
            clock,
            stats: StatsCounter::default(),
        }
    }

    /// Process-local cache only.
    pub fn in_process(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            primary: None,
            local: DashMap::new(),
            ttl,
            max_depth: OverlayConfig::default().bundle_max_depth,
            clock,
            stats: StatsCounter::default(),
        }
    }

    /// Process-local cache on the system clock.
    pub fn local_only(ttl: Duration) -> Self {
        Self::in_process(ttl, Arc::new(SystemClock))
    }

    pub fn is_networked(&self) -> bool {
        self.primary.is_some()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Key of the bundle rooted at `target`, with `depth` clamped to the
    /// configured maximum.
    pub fn key(&self, target: &str, depth: u32) -> String {
        CacheKeys::bundle(target, depth.min(self.max_depth))
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    fn is_fresh(&self, entry: &BundleCacheEntry) -> bool {
        // An assembly time in the future (clock skew) counts as fresh.
        let age = self.clock.now().signed_duration_since(entry.assembled_at);
        age.to_std().map_or(true, |age| age <= self.ttl)
    }

    pub async fn get(&self, key: &str) -> Option<BundleCacheEntry> {
        if let Some(cache) = &self.primary {
            match cache.try_get::<BundleCacheEntry>(key).await {
                Ok(Some(entry)) => return self.accept(key, entry).await,
                Ok(None) => {
                    // Absent upstream: another node may have invalidated it.
                    self.local.remove(key);
                    self.stats.miss();
                    return None;
                }
                Err(e @ CacheError::Decode { .. }) => {
                    self.stats.error();
                    tracing::warn!(key = %key, error = %e, "Dropping undecodable bundle entry");
                    cache.delete(&[key.to_string()]).await;
                }
                Err(e) => {
                    self.stats.error();
                    tracing::warn!(key = %key, error = %e, "Bundle cache read failed, using local tier");
                }
            }
        }

        let local = self.local.get(key).map(|entry| entry.value().clone());
        match local {
            Some(entry) => self.accept(key, entry).await,
            None => {
                self.stats.miss();
                None
            }
        }
    }

    async fn accept(&self, key: &str, entry: BundleCacheEntry) -> Option<BundleCacheEntry> {
        if self.is_fresh(&entry) {
            self.stats.hit();
            return Some(entry);
        }
        self.stats.eviction();
        self.stats.miss();
        self.invalidate(key).await;
        None
    }

    /// Store `body` in both tiers. Returns the stored entry.
    pub async fn set(&self, key: &str, body: Value, meets_policy_at_write: bool) -> BundleCacheEntry {
        let entry = BundleCacheEntry {
            assembled_at: self.clock.now(),
            body,
            meets_policy_at_write,
        };
        self.local.insert(key.to_string(), entry.clone());
        if let Some(cache) = &self.primary {
            cache.set(key, &entry, self.ttl).await;
        }
        entry
    }

    /// Read `key` and re-check the cached body with `still_meets_policy`.
    ///
    /// A body that no longer passes is invalidated and reported as absent so
    /// the caller reassembles it. The stored flag is never rewritten.
    pub async fn get_validated<F>(&self, key: &str, still_meets_policy: F) -> Option<BundleCacheEntry>
    where
        F: FnOnce(&Value) -> bool,
    {
        let entry = self.get(key).await?;
        if still_meets_policy(&entry.body) {
            return Some(entry);
        }
        tracing::debug!(key = %key, "Cached bundle no longer meets policy");
        self.invalidate(key).await;
        None
    }

    pub async fn invalidate(&self, key: &str) {
        self.local.remove(key);
        if let Some(cache) = &self.primary {
            cache.delete(&[key.to_string()]).await;
        }
    }

    /// Drop the bundles rooted at `target`, at every depth.
    pub async fn invalidate_target(&self, target: &str) {
        let prefix = format!("{}{}:", BUNDLE_PREFIX, target);
        self.local.retain(|key, _| {
            key.strip_prefix(&prefix)
                .map_or(true, |depth| depth.parse::<u32>().is_err())
        });
        if let Some(cache) = &self.primary {
            cache.delete_pattern(&CacheKeys::bundle_pattern_for(target)).await;
        }
    }

    pub async fn invalidate_all(&self) {
        self.local.clear();
        if let Some(cache) = &self.primary {
            cache.delete_pattern(&CacheKeys::bundle_pattern_all()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheBackend, InMemoryCacheBackend};
    use overlay_core::ManualClock;
    use serde_json::json;

    fn networked() -> (BundleCache, Arc<InMemoryCacheBackend>, ManualClock) {
        let clock = ManualClock::default();
        let backend = Arc::new(InMemoryCacheBackend::with_clock(Arc::new(clock.clone())));
        let cache = CacheService::with_clock(backend.clone(), Arc::new(clock.clone()));
        (BundleCache::new(cache, &OverlayConfig::default()), backend, clock)
    }

    #[tokio::test]
    async fn test_flag_is_a_write_time_snapshot() {
        let (bundles, _, _) = networked();
        let key = bundles.key("v1", 2);
        bundles.set(&key, json!({"confirmations": 0}), true).await;

        let entry = bundles.get(&key).await.unwrap();
        assert!(entry.meets_policy_at_write);
        assert_eq!(entry.body["confirmations"], 0);
    }

    #[tokio::test]
    async fn test_stale_entries_are_evicted_from_both_tiers() {
        let (bundles, backend, clock) = networked();
        bundles.set("cache:bundle:v1:2", json!({}), true).await;

        clock.advance(Duration::from_secs(61));
        assert!(bundles.get("cache:bundle:v1:2").await.is_none());
        assert!(backend.is_empty());
        assert!(bundles.local.is_empty());
    }

    #[tokio::test]
    async fn test_outage_falls_back_to_local_tier() {
        let (bundles, backend, _) = networked();
        backend.close().await.unwrap();

        bundles.set("cache:bundle:v1:2", json!({"a": 1}), false).await;
        let entry = bundles.get("cache:bundle:v1:2").await.unwrap();
        assert_eq!(entry.body, json!({"a": 1}));
        assert_eq!(bundles.stats().errors, 1);
    }

    #[tokio::test]
    async fn test_remote_invalidation_drops_local_mirror() {
        let (bundles, backend, _) = networked();
        bundles.set("cache:bundle:v1:2", json!({}), true).await;
        backend
            .delete(&["cache:bundle:v1:2".to_string()])
            .await
            .unwrap();

        assert!(bundles.get("cache:bundle:v1:2").await.is_none());
        assert!(bundles.local.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_target_covers_every_depth() {
        let (bundles, _, _) = networked();
        for depth in [1, 2, 3] {
            bundles.set(&bundles.key("v1", depth), json!({}), true).await;
        }
        bundles.set(&bundles.key("v2", 1), json!({}), true).await;

        bundles.invalidate_target("v1").await;
        assert!(bundles.get(&bundles.key("v1", 2)).await.is_none());
        assert!(bundles.get(&bundles.key("v2", 1)).await.is_some());
    }

    #[tokio::test]
    async fn test_failed_revalidation_invalidates() {
        let bundles = BundleCache::local_only(Duration::from_secs(60));
        bundles.set("k", json!({"ok": false}), true).await;

        let entry = bundles
            .get_validated("k", |body| body["ok"].as_bool().unwrap_or(false))
            .await;
        assert!(entry.is_none());
        assert!(bundles.get("k").await.is_none());
    }

    #[test]
    fn test_key_clamps_depth() {
        let bundles = BundleCache::local_only(Duration::from_secs(60));
        assert_eq!(bundles.key("v1", 99), "cache:bundle:v1:8");
    }
}
