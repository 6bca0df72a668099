//! Cached Record Store
//!
//! Wraps a [`RecordStore`] so entity reads go through the cache-aside
//! coordinator and every write invalidates the keys derived from the row it
//! changed before returning. Store errors propagate unchanged; cache errors
//! never reach the caller.

use crate::bundle::BundleCache;
use crate::cache::CacheStats;
use crate::cache_aside::{CacheAside, Invalidation, InvalidationReport};
use crate::store::RecordStore;
use overlay_core::{
    AssetListing, AssetRecord, CacheKeys, CacheTtls, ListingQuery, PriceRecord, ProducerRecord,
    ProducerUpsert, StoreResult,
};
use std::sync::Arc;

/// Record store with read-through caching and invalidate-on-write.
#[derive(Debug)]
pub struct CachedRecordStore<S> {
    store: Arc<S>,
    aside: CacheAside,
    ttls: CacheTtls,
    bundles: Option<Arc<BundleCache>>,
}

impl<S> Clone for CachedRecordStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            aside: self.aside.clone(),
            ttls: self.ttls.clone(),
            bundles: self.bundles.clone(),
        }
    }
}

impl<S: RecordStore> CachedRecordStore<S> {
    pub fn new(store: Arc<S>, aside: CacheAside, ttls: CacheTtls) -> Self {
        Self {
            store,
            aside,
            ttls,
            bundles: None,
        }
    }

    /// Also drop bundles rooted at a version whose edges change.
    pub fn with_bundles(mut self, bundles: Arc<BundleCache>) -> Self {
        self.bundles = Some(bundles);
        self
    }

    /// Get a reference to the underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn aside(&self) -> &CacheAside {
        &self.aside
    }

    pub fn stats(&self) -> CacheStats {
        self.aside.stats()
    }

    async fn invalidate(&self, targets: &[Invalidation]) -> InvalidationReport {
        let report = self.aside.invalidate(targets).await;
        if !report.is_complete() {
            tracing::error!(
                failed = ?report.failed,
                "Write committed but invalidation incomplete; stale reads possible until TTL"
            );
        }
        report
    }

    // ========================================================================
    // ASSETS
    // ========================================================================

    pub async fn get_asset(&self, version_id: &str) -> StoreResult<Option<AssetRecord>> {
        self.aside
            .get_or_load(&CacheKeys::asset(version_id), self.ttls.assets, || {
                self.store.get_asset(version_id)
            })
            .await
    }

    /// Write the asset, then drop its key and every cached listing page.
    pub async fn upsert_asset(&self, asset: &AssetRecord) -> StoreResult<()> {
        self.store.upsert_asset(asset).await?;
        self.invalidate(&[
            Invalidation::key(CacheKeys::asset(&asset.version_id)),
            Invalidation::pattern(CacheKeys::listings_pattern()),
        ])
        .await;
        Ok(())
    }

    /// One listing page, cached under the canonical form of `query`.
    pub async fn search_assets(&self, query: &ListingQuery) -> StoreResult<AssetListing> {
        let listing = self
            .aside
            .get_or_load(&CacheKeys::listings(query), self.ttls.listings, || async {
                self.store.search_assets(query).await.map(|rows| Some(AssetListing(rows)))
            })
            .await?;
        Ok(listing.unwrap_or_default())
    }

    // ========================================================================
    // PRODUCERS
    // ========================================================================

    pub async fn get_producer(&self, producer_id: &str) -> StoreResult<Option<ProducerRecord>> {
        self.aside
            .get_or_load(&CacheKeys::producer(producer_id), self.ttls.producers, || {
                self.store.get_producer(producer_id)
            })
            .await
    }

    /// Returns the producer id.
    pub async fn upsert_producer(&self, producer: &ProducerUpsert) -> StoreResult<String> {
        let producer_id = self.store.upsert_producer(producer).await?;
        self.invalidate(&[Invalidation::key(CacheKeys::producer(&producer_id))])
            .await;
        Ok(producer_id)
    }

    // ========================================================================
    // PRICES
    // ========================================================================

    pub async fn get_price(&self, version_id: &str) -> StoreResult<Option<PriceRecord>> {
        self.aside
            .get_or_load(&CacheKeys::price(version_id), self.ttls.prices, || {
                self.store.get_price(version_id)
            })
            .await
    }

    pub async fn set_price(&self, version_id: &str, satoshis: i64) -> StoreResult<PriceRecord> {
        let price = self.store.set_price(version_id, satoshis).await?;
        self.invalidate(&[Invalidation::key(CacheKeys::price(version_id))])
            .await;
        Ok(price)
    }

    // ========================================================================
    // VERSION EDGES
    // ========================================================================

    /// Replace the parents of `child`, then drop every cached graph that
    /// mentions it and the bundles rooted at it.
    pub async fn replace_edges(&self, child: &str, parents: &[String]) -> StoreResult<()> {
        self.store.replace_edges(child, parents).await?;
        self.invalidate(&[
            Invalidation::pattern(CacheKeys::lineage_pattern_for(child)),
            Invalidation::pattern(CacheKeys::bundle_pattern_for(child)),
        ])
        .await;
        if let Some(bundles) = &self.bundles {
            bundles.invalidate_target(child).await;
        }
        Ok(())
    }

    /// Not cached.
    pub async fn get_parents(&self, child: &str) -> StoreResult<Vec<String>> {
        self.store.get_parents(child).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheService, InMemoryCacheBackend};
    use crate::store::InMemoryRecordStore;
    use chrono::Utc;
    use overlay_core::ManualClock;
    use serde_json::json;
    use std::time::Duration;

    fn stack() -> (CachedRecordStore<InMemoryRecordStore>, Arc<InMemoryRecordStore>) {
        let clock = ManualClock::default();
        let backend = Arc::new(InMemoryCacheBackend::with_clock(Arc::new(clock.clone())));
        let cache = CacheService::with_clock(backend, Arc::new(clock));
        let store = Arc::new(InMemoryRecordStore::new());
        (
            CachedRecordStore::new(store.clone(), CacheAside::new(cache), CacheTtls::default()),
            store,
        )
    }

    fn asset(title: &str) -> AssetRecord {
        AssetRecord {
            version_id: "v1".to_string(),
            dataset_id: "weather".to_string(),
            manifest_hash: "mh".to_string(),
            content_hash: None,
            title: Some(title.to_string()),
            license: None,
            classification: None,
            producer_id: None,
            manifest_json: json!({}),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_invalidates_asset_and_listings() {
        let (cached, _) = stack();
        cached.upsert_asset(&asset("X")).await.unwrap();

        let query = ListingQuery::new().with_text("weather");
        assert_eq!(cached.search_assets(&query).await.unwrap().0.len(), 1);
        assert_eq!(
            cached.get_asset("v1").await.unwrap().unwrap().title.as_deref(),
            Some("X")
        );

        cached.upsert_asset(&asset("Y")).await.unwrap();
        assert_eq!(
            cached.get_asset("v1").await.unwrap().unwrap().title.as_deref(),
            Some("Y")
        );
        let listing = cached.search_assets(&query).await.unwrap();
        assert_eq!(listing.0[0].title.as_deref(), Some("Y"));
    }

    #[tokio::test]
    async fn test_price_write_invalidates() {
        let (cached, _) = stack();
        cached.set_price("v1", 100).await.unwrap();
        assert_eq!(cached.get_price("v1").await.unwrap().unwrap().satoshis, 100);

        cached.set_price("v1", 250).await.unwrap();
        assert_eq!(cached.get_price("v1").await.unwrap().unwrap().satoshis, 250);
    }

    #[tokio::test]
    async fn test_replace_edges_drops_bundles_and_graphs() {
        let (cached, _) = stack();
        let cache = cached.aside().cache().clone();
        let bundles = Arc::new(BundleCache::new(cache.clone(), &Default::default()));
        let cached = cached.with_bundles(bundles.clone());

        bundles.set(&bundles.key("v2", 1), json!({}), true).await;
        cache
            .set(
                "ol:cache:lineage:dataset:ns:v2|3|both|simple",
                &AssetListing::default(),
                Duration::from_secs(60),
            )
            .await;

        cached.replace_edges("v2", &["v1".to_string()]).await.unwrap();
        assert!(bundles.get(&bundles.key("v2", 1)).await.is_none());
        assert!(cache
            .get::<AssetListing>("ol:cache:lineage:dataset:ns:v2|3|both|simple")
            .await
            .is_none());
        assert_eq!(cached.get_parents("v2").await.unwrap(), vec!["v1"]);
    }
}
