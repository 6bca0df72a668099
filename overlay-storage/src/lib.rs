//! Overlay Storage - Cache-Aside and Lineage Indexing
//!
//! Runtime half of the overlay cache layer:
//!
//! - [`cache`]: the cache service over Redis or an in-process map.
//! - [`store`]: the PostgreSQL system of record and the [`RecordStore`]
//!   repository surface.
//! - [`cache_aside`] and [`cached_store`]: read-through entity access with
//!   invalidate-on-write.
//! - [`lineage`]: event ingestion, projection readers and bounded graph
//!   traversal.
//! - [`bundle`] and [`sensitive`]: the specialized bundle and signing-client
//!   caches.
//!
//! Clients are constructed explicitly and passed in; nothing here is a
//! process-wide singleton.

pub mod bundle;
pub mod cache;
pub mod cache_aside;
pub mod cached_store;
pub mod health;
pub mod lineage;
pub mod sensitive;
pub mod store;

pub use bundle::{BundleCache, BundleCacheEntry};
pub use cache::{
    CacheBackend, CacheEntry, CacheService, CacheStats, InMemoryCacheBackend, RedisCacheBackend,
    RedisConfig,
};
pub use cache_aside::{CacheAside, Invalidation, InvalidationReport};
pub use cached_store::CachedRecordStore;
pub use health::OverlayHealth;
pub use lineage::{IngestReceipt, LineageIngestor, LineageProjection, LineageQuery, LineageQueryEngine};
pub use sensitive::{
    BypassMarker, MethodResultEntry, SensitiveMethodCache, SignatureEntry, VerificationEntry,
    NEVER_CACHE_METHODS,
};
pub use store::{DbConfig, InMemoryRecordStore, PgRecordStore, PgStore, RecordStore};

use overlay_core::{OverlayConfig, OverlayResult};
use std::sync::Arc;

// ============================================================================
// SERVICE GRAPH
// ============================================================================

/// Every component of the layer, wired over one cache client and one store.
#[derive(Debug)]
pub struct OverlayServices<S> {
    pub config: OverlayConfig,
    pub cache: CacheService,
    pub store: Arc<S>,
    pub records: CachedRecordStore<S>,
    pub ingestor: LineageIngestor<S>,
    pub graphs: LineageQueryEngine,
    pub projection: LineageProjection,
    pub bundles: Arc<BundleCache>,
    pub sensitive: SensitiveMethodCache,
}

impl<S: RecordStore> OverlayServices<S> {
    pub fn new(store: Arc<S>, cache: CacheService, config: OverlayConfig) -> Self {
        let bundles = Arc::new(BundleCache::new(cache.clone(), &config));
        let records = CachedRecordStore::new(
            store.clone(),
            CacheAside::new(cache.clone()),
            config.ttls.clone(),
        )
        .with_bundles(bundles.clone());

        Self {
            ingestor: LineageIngestor::new(store.clone(), cache.clone(), &config),
            graphs: LineageQueryEngine::new(cache.clone(), &config),
            projection: LineageProjection::new(cache.clone()),
            sensitive: SensitiveMethodCache::new(cache.clone(), config.ttls.clone()),
            records,
            bundles,
            store,
            cache,
            config,
        }
    }

    pub async fn health(&self) -> OverlayHealth {
        OverlayHealth::check(&self.cache, self.store.as_ref()).await
    }

    /// Close the cache client. Later cache operations degrade to misses.
    pub async fn close(&self) {
        self.cache.close().await;
    }
}

impl OverlayServices<PgRecordStore> {
    /// Connect to PostgreSQL and Redis.
    pub async fn connect(
        db: &DbConfig,
        redis: &RedisConfig,
        config: OverlayConfig,
    ) -> OverlayResult<Self> {
        let pg = PgStore::from_config(db)?;
        let backend = RedisCacheBackend::connect(redis).await?;
        let cache = CacheService::new(Arc::new(backend));
        Ok(Self::new(Arc::new(PgRecordStore::new(pg)), cache, config))
    }

    /// Close the cache client and the connection pool.
    pub async fn shutdown(&self) {
        self.close().await;
        self.store.pg().close();
    }
}
