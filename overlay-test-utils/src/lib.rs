//! Overlay Test Utilities
//!
//! Shared test infrastructure for the overlay workspace:
//! - Proptest generators for lineage events, dataset chains and listing
//!   queries
//! - Failing backends for outage scenarios
//! - Fixtures for common lineage and marketplace records
//! - An in-memory service stack on a manual clock

pub use overlay_core::{
    AssetRecord, CacheError, CacheResult, CacheTtls, Clock, DatasetRef, Direction, EventType,
    GraphFormat, JobRef, LineageAuditRecord, LineageEvent, ListingQuery, ManualClock, NodeId,
    OverlayConfig, PriceRecord, ProducerRecord, ProducerUpsert, RunRef, StoreError, StoreResult,
    Timestamp,
};
pub use overlay_storage::{
    CacheBackend, CacheService, InMemoryCacheBackend, InMemoryRecordStore, OverlayServices,
    RecordStore,
};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 2024-01-01T00:00:00Z, the epoch every fixture and generator counts from.
pub const FIXTURE_EPOCH_SECS: i64 = 1_704_067_200;

/// Fixed starting instant for manual clocks.
pub fn fixture_time() -> Timestamp {
    DateTime::from_timestamp(FIXTURE_EPOCH_SECS, 0).unwrap_or_default()
}

/// RFC 3339 rendering of `fixture_time() + offset_secs`.
pub fn event_time(offset_secs: i64) -> String {
    DateTime::from_timestamp(FIXTURE_EPOCH_SECS + offset_secs, 0)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ============================================================================
// FAILING BACKENDS
// ============================================================================

/// Cache backend whose every call fails, as during a Redis outage.
#[derive(Debug, Clone, Default)]
pub struct FailingCacheBackend;

fn unavailable(op: &'static str) -> CacheError {
    CacheError::backend(op, "connection refused")
}

#[async_trait]
impl CacheBackend for FailingCacheBackend {
    async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
        Err(unavailable("get"))
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> CacheResult<()> {
        Err(unavailable("set"))
    }

    async fn delete(&self, _keys: &[String]) -> CacheResult<u64> {
        Err(unavailable("del"))
    }

    async fn scan_keys(&self, _pattern: &str) -> CacheResult<Vec<String>> {
        Err(unavailable("scan"))
    }

    async fn exists(&self, _key: &str) -> CacheResult<bool> {
        Err(unavailable("exists"))
    }

    async fn hset_many(&self, _key: &str, _fields: &[(String, String)]) -> CacheResult<()> {
        Err(unavailable("hset"))
    }

    async fn hget(&self, _key: &str, _field: &str) -> CacheResult<Option<String>> {
        Err(unavailable("hget"))
    }

    async fn hgetall(&self, _key: &str) -> CacheResult<HashMap<String, String>> {
        Err(unavailable("hgetall"))
    }

    async fn hdel(&self, _key: &str, _fields: &[String]) -> CacheResult<u64> {
        Err(unavailable("hdel"))
    }

    async fn sadd(&self, _key: &str, _members: &[String]) -> CacheResult<u64> {
        Err(unavailable("sadd"))
    }

    async fn smembers(&self, _key: &str) -> CacheResult<Vec<String>> {
        Err(unavailable("smembers"))
    }

    async fn srem(&self, _key: &str, _members: &[String]) -> CacheResult<u64> {
        Err(unavailable("srem"))
    }

    async fn scard(&self, _key: &str) -> CacheResult<u64> {
        Err(unavailable("scard"))
    }

    async fn zadd(&self, _key: &str, _member: &str, _score: f64) -> CacheResult<()> {
        Err(unavailable("zadd"))
    }

    async fn zrange(&self, _key: &str, _start: isize, _stop: isize) -> CacheResult<Vec<String>> {
        Err(unavailable("zrange"))
    }

    async fn zrevrange(&self, _key: &str, _start: isize, _stop: isize) -> CacheResult<Vec<String>> {
        Err(unavailable("zrevrange"))
    }

    async fn zrange_by_score(&self, _key: &str, _min: f64, _max: f64) -> CacheResult<Vec<String>> {
        Err(unavailable("zrangebyscore"))
    }

    async fn zrem(&self, _key: &str, _members: &[String]) -> CacheResult<u64> {
        Err(unavailable("zrem"))
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> CacheResult<bool> {
        Err(unavailable("expire"))
    }

    async fn ping(&self) -> CacheResult<()> {
        Err(unavailable("ping"))
    }

    async fn close(&self) -> CacheResult<()> {
        Ok(())
    }
}

/// Record store whose every call fails with a pool error.
#[derive(Debug, Clone, Default)]
pub struct FailingRecordStore;

fn pool_down() -> StoreError {
    StoreError::Pool {
        reason: "pool exhausted".to_string(),
    }
}

#[async_trait]
impl RecordStore for FailingRecordStore {
    async fn get_asset(&self, _version_id: &str) -> StoreResult<Option<AssetRecord>> {
        Err(pool_down())
    }

    async fn upsert_asset(&self, _asset: &AssetRecord) -> StoreResult<()> {
        Err(pool_down())
    }

    async fn search_assets(&self, _query: &ListingQuery) -> StoreResult<Vec<AssetRecord>> {
        Err(pool_down())
    }

    async fn get_producer(&self, _producer_id: &str) -> StoreResult<Option<ProducerRecord>> {
        Err(pool_down())
    }

    async fn upsert_producer(&self, _producer: &ProducerUpsert) -> StoreResult<String> {
        Err(pool_down())
    }

    async fn get_price(&self, _version_id: &str) -> StoreResult<Option<PriceRecord>> {
        Err(pool_down())
    }

    async fn set_price(&self, _version_id: &str, _satoshis: i64) -> StoreResult<PriceRecord> {
        Err(pool_down())
    }

    async fn replace_edges(&self, _child: &str, _parents: &[String]) -> StoreResult<()> {
        Err(pool_down())
    }

    async fn get_parents(&self, _child: &str) -> StoreResult<Vec<String>> {
        Err(pool_down())
    }

    async fn insert_lineage_event(&self, _record: &LineageAuditRecord) -> StoreResult<bool> {
        Err(pool_down())
    }

    async fn lineage_event(&self, _hash: &str) -> StoreResult<Option<LineageAuditRecord>> {
        Err(pool_down())
    }

    async fn health_check(&self) -> StoreResult<()> {
        Err(pool_down())
    }
}

// ============================================================================
// COUNTING STORE
// ============================================================================

/// In-memory store that counts entity reads, to tell cache hits from
/// store loads.
#[derive(Debug, Default)]
pub struct CountingRecordStore {
    inner: InMemoryRecordStore,
    reads: AtomicUsize,
}

impl CountingRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entity reads that reached the store.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecordStore for CountingRecordStore {
    async fn get_asset(&self, version_id: &str) -> StoreResult<Option<AssetRecord>> {
        self.record_read();
        self.inner.get_asset(version_id).await
    }

    async fn upsert_asset(&self, asset: &AssetRecord) -> StoreResult<()> {
        self.inner.upsert_asset(asset).await
    }

    async fn search_assets(&self, query: &ListingQuery) -> StoreResult<Vec<AssetRecord>> {
        self.record_read();
        self.inner.search_assets(query).await
    }

    async fn get_producer(&self, producer_id: &str) -> StoreResult<Option<ProducerRecord>> {
        self.record_read();
        self.inner.get_producer(producer_id).await
    }

    async fn upsert_producer(&self, producer: &ProducerUpsert) -> StoreResult<String> {
        self.inner.upsert_producer(producer).await
    }

    async fn get_price(&self, version_id: &str) -> StoreResult<Option<PriceRecord>> {
        self.record_read();
        self.inner.get_price(version_id).await
    }

    async fn set_price(&self, version_id: &str, satoshis: i64) -> StoreResult<PriceRecord> {
        self.inner.set_price(version_id, satoshis).await
    }

    async fn replace_edges(&self, child: &str, parents: &[String]) -> StoreResult<()> {
        self.inner.replace_edges(child, parents).await
    }

    async fn get_parents(&self, child: &str) -> StoreResult<Vec<String>> {
        self.inner.get_parents(child).await
    }

    async fn insert_lineage_event(&self, record: &LineageAuditRecord) -> StoreResult<bool> {
        self.inner.insert_lineage_event(record).await
    }

    async fn lineage_event(&self, hash: &str) -> StoreResult<Option<LineageAuditRecord>> {
        self.inner.lineage_event(hash).await
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.inner.health_check().await
    }
}

// ============================================================================
// TEST STACK
// ============================================================================

/// Full service graph over in-memory backends sharing one manual clock.
#[derive(Debug)]
pub struct TestStack<S = InMemoryRecordStore> {
    pub clock: ManualClock,
    pub backend: Arc<InMemoryCacheBackend>,
    pub store: Arc<S>,
    pub services: OverlayServices<S>,
}

impl TestStack<InMemoryRecordStore> {
    pub fn new() -> Self {
        Self::with_config(OverlayConfig::default())
    }

    pub fn with_config(config: OverlayConfig) -> Self {
        Self::over(InMemoryRecordStore::new(), config)
    }
}

impl Default for TestStack<InMemoryRecordStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: RecordStore> TestStack<S> {
    /// Stack over the given store.
    pub fn over(store: S, config: OverlayConfig) -> Self {
        let clock = ManualClock::new(fixture_time());
        let backend = Arc::new(InMemoryCacheBackend::with_clock(Arc::new(clock.clone())));
        let cache = CacheService::with_clock(backend.clone(), Arc::new(clock.clone()));
        let store = Arc::new(store);
        let services = OverlayServices::new(store.clone(), cache, config);
        Self {
            clock,
            backend,
            store,
            services,
        }
    }

    pub fn advance_secs(&self, secs: u64) {
        self.clock.advance(Duration::from_secs(secs));
    }
}

/// Service graph whose cache is down for good.
pub fn services_without_cache<S: RecordStore>(
    store: Arc<S>,
    config: OverlayConfig,
) -> OverlayServices<S> {
    let cache = CacheService::with_clock(
        Arc::new(FailingCacheBackend),
        Arc::new(ManualClock::new(fixture_time())),
    );
    OverlayServices::new(store, cache, config)
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built records for common scenarios.

    use super::*;
    use serde_json::json;

    /// Completed run of `job` reading `inputs` and writing `outputs`.
    pub fn lineage_event(
        namespace: &str,
        job: &str,
        run_id: &str,
        inputs: &[&str],
        outputs: &[&str],
        offset_secs: i64,
    ) -> LineageEvent {
        LineageEvent {
            namespace: namespace.to_string(),
            event_type: EventType::Complete,
            event_time: event_time(offset_secs),
            producer: Some("https://example.com/pipelines".to_string()),
            job: JobRef {
                name: job.to_string(),
                facets: None,
            },
            run: RunRef {
                run_id: run_id.to_string(),
                facets: None,
            },
            inputs: inputs.iter().map(|name| DatasetRef::new(*name)).collect(),
            outputs: outputs.iter().map(|name| DatasetRef::new(*name)).collect(),
        }
    }

    /// One event per consecutive pair of `names`, so `a, b, c` yields the
    /// chain `a -> b -> c`.
    pub fn chain_events(namespace: &str, names: &[&str]) -> Vec<LineageEvent> {
        names
            .windows(2)
            .enumerate()
            .map(|(i, pair)| {
                lineage_event(
                    namespace,
                    &format!("build_{}", pair[1]),
                    &format!("run-{}", i),
                    &[pair[0]],
                    &[pair[1]],
                    i as i64 * 60,
                )
            })
            .collect()
    }

    /// The four-dataset chain `D1 -> D2 -> D3 -> D4` in namespace `ns`.
    pub fn d_chain() -> Vec<LineageEvent> {
        chain_events("ns", &["D1", "D2", "D3", "D4"])
    }

    pub fn asset(version_id: &str, dataset_id: &str, title: &str) -> AssetRecord {
        AssetRecord {
            version_id: version_id.to_string(),
            dataset_id: dataset_id.to_string(),
            manifest_hash: format!("mh-{}", version_id),
            content_hash: Some(format!("ch-{}", version_id)),
            title: Some(title.to_string()),
            license: Some("CC-BY-4.0".to_string()),
            classification: Some("public".to_string()),
            producer_id: None,
            manifest_json: json!({ "datasetId": dataset_id, "versionId": version_id }),
            created_at: fixture_time(),
        }
    }

    pub fn producer(identity_key: &str, display_name: &str) -> ProducerUpsert {
        ProducerUpsert {
            identity_key: identity_key.to_string(),
            display_name: Some(display_name.to_string()),
            website: None,
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating overlay inputs.

    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    // === Names ===

    pub fn arb_namespace() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,7}"
    }

    pub fn arb_dataset_name() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z0-9_.]{0,11}"
    }

    /// Between `min` and `max` distinct dataset names.
    pub fn arb_dataset_names(min: usize, max: usize) -> impl Strategy<Value = Vec<String>> {
        prop::collection::btree_set(arb_dataset_name(), min..=max)
            .prop_map(|names: BTreeSet<String>| names.into_iter().collect())
    }

    // === Lineage ===

    pub fn arb_event_type() -> impl Strategy<Value = EventType> {
        prop_oneof![
            Just(EventType::Start),
            Just(EventType::Running),
            Just(EventType::Complete),
            Just(EventType::Abort),
            Just(EventType::Other),
        ]
    }

    pub fn arb_event_time() -> impl Strategy<Value = String> {
        (0i64..10_000_000).prop_map(event_time)
    }

    pub fn arb_lineage_event() -> impl Strategy<Value = LineageEvent> {
        (
            arb_namespace(),
            arb_event_type(),
            arb_event_time(),
            "[a-z][a-z0-9_]{0,11}",
            "[a-f0-9]{8}",
            prop::collection::vec(arb_dataset_name(), 0..4),
            prop::collection::vec(arb_dataset_name(), 0..4),
        )
            .prop_map(|(namespace, event_type, time, job, run_id, inputs, outputs)| {
                LineageEvent {
                    namespace,
                    event_type,
                    event_time: time,
                    producer: None,
                    job: JobRef {
                        name: job,
                        facets: None,
                    },
                    run: RunRef {
                        run_id,
                        facets: None,
                    },
                    inputs: inputs.into_iter().map(DatasetRef::new).collect(),
                    outputs: outputs.into_iter().map(DatasetRef::new).collect(),
                }
            })
    }

    /// Dataset names plus parent/child index pairs over them. Cycles and
    /// self-loops are allowed.
    pub fn arb_lineage_graph() -> impl Strategy<Value = (Vec<String>, Vec<(usize, usize)>)> {
        arb_dataset_names(2, 8).prop_flat_map(|names| {
            let n = names.len();
            let edges = prop::collection::vec((0..n, 0..n), 0..16);
            (Just(names), edges)
        })
    }

    pub fn arb_direction() -> impl Strategy<Value = Direction> {
        prop_oneof![Just(Direction::Up), Just(Direction::Down), Just(Direction::Both)]
    }

    // === Listings ===

    pub fn arb_listing_query() -> impl Strategy<Value = ListingQuery> {
        (
            prop::option::of("[ A-Za-z0-9]{0,10}"),
            prop::option::of("[a-z0-9-]{1,10}"),
            prop::option::of("[a-z0-9-]{1,10}"),
            0u32..50,
            0u32..500,
        )
            .prop_map(|(q, dataset_id, producer_id, page, limit)| ListingQuery {
                q,
                dataset_id,
                producer_id,
                page,
                limit,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_fixture_links_consecutive_names() {
        let events = fixtures::d_chain();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].inputs[0].name, "D1");
        assert_eq!(events[2].outputs[0].name, "D4");
        for event in &events {
            assert!(event.validate(OverlayConfig::default().max_event_bytes).is_ok());
        }
    }

    #[test]
    fn test_event_time_is_rfc3339() {
        assert_eq!(event_time(0), "2024-01-01T00:00:00Z");
        assert_eq!(event_time(61), "2024-01-01T00:01:01Z");
    }
}
