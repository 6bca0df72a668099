//! System of record.
//!
//! [`PgStore`] is the thin pooled client (query, execute, transaction);
//! [`RecordStore`] is the repository surface the cache-aside layer wraps.
//! Store failures always propagate: nothing in this module fails open.

pub mod memory;
pub mod pg;
pub mod pg_records;

pub use memory::InMemoryRecordStore;
pub use pg::{DbConfig, PgStore, SCHEMA_SQL};
pub use pg_records::PgRecordStore;

use async_trait::async_trait;
use overlay_core::{
    AssetRecord, LineageAuditRecord, ListingQuery, PriceRecord, ProducerRecord, ProducerUpsert,
    StoreResult,
};

/// Entity tables and the lineage audit log.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_asset(&self, version_id: &str) -> StoreResult<Option<AssetRecord>>;

    /// Insert or replace the asset keyed by `version_id`.
    async fn upsert_asset(&self, asset: &AssetRecord) -> StoreResult<()>;

    /// One page of assets, newest first.
    async fn search_assets(&self, query: &ListingQuery) -> StoreResult<Vec<AssetRecord>>;

    async fn get_producer(&self, producer_id: &str) -> StoreResult<Option<ProducerRecord>>;

    /// Update the producer with the same identity key, or create one.
    /// Returns the producer id.
    async fn upsert_producer(&self, producer: &ProducerUpsert) -> StoreResult<String>;

    async fn get_price(&self, version_id: &str) -> StoreResult<Option<PriceRecord>>;

    async fn set_price(&self, version_id: &str, satoshis: i64) -> StoreResult<PriceRecord>;

    /// Atomically replace the parents of `child`.
    async fn replace_edges(&self, child: &str, parents: &[String]) -> StoreResult<()>;

    async fn get_parents(&self, child: &str) -> StoreResult<Vec<String>>;

    /// Append an audit row. Returns false when a row with the same hash
    /// already exists.
    async fn insert_lineage_event(&self, record: &LineageAuditRecord) -> StoreResult<bool>;

    async fn lineage_event(&self, hash: &str) -> StoreResult<Option<LineageAuditRecord>>;

    async fn health_check(&self) -> StoreResult<()>;
}

#[async_trait]
impl<S: RecordStore + ?Sized> RecordStore for std::sync::Arc<S> {
    async fn get_asset(&self, version_id: &str) -> StoreResult<Option<AssetRecord>> {
        (**self).get_asset(version_id).await
    }

    async fn upsert_asset(&self, asset: &AssetRecord) -> StoreResult<()> {
        (**self).upsert_asset(asset).await
    }

    async fn search_assets(&self, query: &ListingQuery) -> StoreResult<Vec<AssetRecord>> {
        (**self).search_assets(query).await
    }

    async fn get_producer(&self, producer_id: &str) -> StoreResult<Option<ProducerRecord>> {
        (**self).get_producer(producer_id).await
    }

    async fn upsert_producer(&self, producer: &ProducerUpsert) -> StoreResult<String> {
        (**self).upsert_producer(producer).await
    }

    async fn get_price(&self, version_id: &str) -> StoreResult<Option<PriceRecord>> {
        (**self).get_price(version_id).await
    }

    async fn set_price(&self, version_id: &str, satoshis: i64) -> StoreResult<PriceRecord> {
        (**self).set_price(version_id, satoshis).await
    }

    async fn replace_edges(&self, child: &str, parents: &[String]) -> StoreResult<()> {
        (**self).replace_edges(child, parents).await
    }

    async fn get_parents(&self, child: &str) -> StoreResult<Vec<String>> {
        (**self).get_parents(child).await
    }

    async fn insert_lineage_event(&self, record: &LineageAuditRecord) -> StoreResult<bool> {
        (**self).insert_lineage_event(record).await
    }

    async fn lineage_event(&self, hash: &str) -> StoreResult<Option<LineageAuditRecord>> {
        (**self).lineage_event(hash).await
    }

    async fn health_check(&self) -> StoreResult<()> {
        (**self).health_check().await
    }
}
