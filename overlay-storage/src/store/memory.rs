//! In-process [`RecordStore`] for tests and embedded use.

use super::RecordStore;
use async_trait::async_trait;
use chrono::Utc;
use overlay_core::{
    AssetRecord, LineageAuditRecord, ListingQuery, PriceRecord, ProducerRecord, ProducerUpsert,
    StoreError, StoreResult,
};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    assets: HashMap<String, AssetRecord>,
    producers: HashMap<String, ProducerRecord>,
    prices: HashMap<String, PriceRecord>,
    edges: HashMap<String, BTreeSet<String>>,
    events: Vec<LineageAuditRecord>,
}

/// Record store holding every table in memory.
///
/// Semantics match [`super::PgRecordStore`]: upserts replace by key,
/// listings are newest first, and audit rows are unique by hash.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    tables: RwLock<Tables>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of audit rows.
    pub async fn audit_count(&self) -> usize {
        self.tables.read().await.events.len()
    }

    /// Audit rows in insertion order.
    pub async fn lineage_events(&self) -> Vec<LineageAuditRecord> {
        self.tables.read().await.events.clone()
    }
}

fn contains_ci(haystack: Option<&str>, needle: &str) -> bool {
    haystack.is_some_and(|h| h.to_lowercase().contains(needle))
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get_asset(&self, version_id: &str) -> StoreResult<Option<AssetRecord>> {
        Ok(self.tables.read().await.assets.get(version_id).cloned())
    }

    async fn upsert_asset(&self, asset: &AssetRecord) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .assets
            .insert(asset.version_id.clone(), asset.clone());
        Ok(())
    }

    async fn search_assets(&self, query: &ListingQuery) -> StoreResult<Vec<AssetRecord>> {
        let query = query.normalized();
        let needle = query.q.as_ref().map(|q| q.to_lowercase());
        let tables = self.tables.read().await;

        let mut matches: Vec<&AssetRecord> = tables
            .assets
            .values()
            .filter(|asset| match &needle {
                Some(n) => {
                    contains_ci(asset.title.as_deref(), n)
                        || contains_ci(Some(&asset.dataset_id), n)
                }
                None => true,
            })
            .filter(|asset| {
                query
                    .dataset_id
                    .as_ref()
                    .map_or(true, |id| &asset.dataset_id == id)
            })
            .filter(|asset| {
                query
                    .producer_id
                    .as_ref()
                    .map_or(true, |id| asset.producer_id.as_ref() == Some(id))
            })
            .collect();
        matches.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.version_id.cmp(&b.version_id))
        });

        let offset = usize::try_from(query.offset()).unwrap_or(usize::MAX);
        Ok(matches
            .into_iter()
            .skip(offset)
            .take(query.limit as usize)
            .cloned()
            .collect())
    }

    async fn get_producer(&self, producer_id: &str) -> StoreResult<Option<ProducerRecord>> {
        Ok(self.tables.read().await.producers.get(producer_id).cloned())
    }

    async fn upsert_producer(&self, producer: &ProducerUpsert) -> StoreResult<String> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables
            .producers
            .values_mut()
            .find(|p| p.identity_key == producer.identity_key)
        {
            if producer.display_name.is_some() {
                existing.display_name = producer.display_name.clone();
            }
            if producer.website.is_some() {
                existing.website = producer.website.clone();
            }
            return Ok(existing.producer_id.clone());
        }

        let producer_id = Uuid::now_v7().to_string();
        tables.producers.insert(
            producer_id.clone(),
            ProducerRecord {
                producer_id: producer_id.clone(),
                identity_key: producer.identity_key.clone(),
                display_name: producer.display_name.clone(),
                website: producer.website.clone(),
                created_at: Utc::now(),
            },
        );
        Ok(producer_id)
    }

    async fn get_price(&self, version_id: &str) -> StoreResult<Option<PriceRecord>> {
        Ok(self.tables.read().await.prices.get(version_id).cloned())
    }

    async fn set_price(&self, version_id: &str, satoshis: i64) -> StoreResult<PriceRecord> {
        if satoshis < 0 {
            return Err(StoreError::Query {
                reason: format!("price must be non-negative, got {}", satoshis),
            });
        }
        let record = PriceRecord {
            version_id: version_id.to_string(),
            satoshis,
            updated_at: Utc::now(),
        };
        self.tables
            .write()
            .await
            .prices
            .insert(version_id.to_string(), record.clone());
        Ok(record)
    }

    async fn replace_edges(&self, child: &str, parents: &[String]) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if parents.is_empty() {
            tables.edges.remove(child);
        } else {
            tables
                .edges
                .insert(child.to_string(), parents.iter().cloned().collect());
        }
        Ok(())
    }

    async fn get_parents(&self, child: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .tables
            .read()
            .await
            .edges
            .get(child)
            .map(|parents| parents.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn insert_lineage_event(&self, record: &LineageAuditRecord) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        if tables.events.iter().any(|e| e.hash == record.hash) {
            return Ok(false);
        }
        tables.events.push(record.clone());
        Ok(true)
    }

    async fn lineage_event(&self, hash: &str) -> StoreResult<Option<LineageAuditRecord>> {
        Ok(self
            .tables
            .read()
            .await
            .events
            .iter()
            .find(|e| e.hash == hash)
            .cloned())
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}
