//! System-of-record entities served through the cache-aside layer.

use crate::{CacheRegion, CacheValue, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default page size of a listing query.
pub const DEFAULT_LISTING_LIMIT: u32 = 20;
/// Largest page size a listing query may request.
pub const MAX_LISTING_LIMIT: u32 = 100;

/// Published dataset version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub version_id: String,
    pub dataset_id: String,
    pub manifest_hash: String,
    pub content_hash: Option<String>,
    pub title: Option<String>,
    pub license: Option<String>,
    pub classification: Option<String>,
    pub producer_id: Option<String>,
    pub manifest_json: Value,
    pub created_at: Timestamp,
}

impl CacheValue for AssetRecord {
    const REGION: CacheRegion = CacheRegion::Asset;
}

/// One page of asset search results.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetListing(pub Vec<AssetRecord>);

impl CacheValue for AssetListing {
    const REGION: CacheRegion = CacheRegion::Listing;
}

/// Search parameters of a listing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingQuery {
    /// Free-text match against title and dataset id.
    pub q: Option<String>,
    pub dataset_id: Option<String>,
    pub producer_id: Option<String>,
    /// 1-based page number.
    pub page: u32,
    pub limit: u32,
}

impl Default for ListingQuery {
    fn default() -> Self {
        Self {
            q: None,
            dataset_id: None,
            producer_id: None,
            page: 1,
            limit: DEFAULT_LISTING_LIMIT,
        }
    }
}

impl ListingQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, q: impl Into<String>) -> Self {
        self.q = Some(q.into());
        self
    }

    pub fn with_dataset(mut self, dataset_id: impl Into<String>) -> Self {
        self.dataset_id = Some(dataset_id.into());
        self
    }

    pub fn with_producer(mut self, producer_id: impl Into<String>) -> Self {
        self.producer_id = Some(producer_id.into());
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Semantically equivalent query in canonical form: trimmed text, empty
    /// filters dropped, page at least 1, limit within bounds.
    pub fn normalized(&self) -> Self {
        fn non_empty(value: &Option<String>) -> Option<String> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        }

        let limit = match self.limit {
            0 => DEFAULT_LISTING_LIMIT,
            n => n.min(MAX_LISTING_LIMIT),
        };
        Self {
            q: non_empty(&self.q),
            dataset_id: non_empty(&self.dataset_id),
            producer_id: non_empty(&self.producer_id),
            page: self.page.max(1),
            limit,
        }
    }

    /// Rows to skip for this page.
    pub fn offset(&self) -> u64 {
        let query = self.normalized();
        u64::from(query.page - 1) * u64::from(query.limit)
    }
}

/// Data producer registered with the marketplace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerRecord {
    pub producer_id: String,
    /// Public identity key. Unique.
    pub identity_key: String,
    pub display_name: Option<String>,
    pub website: Option<String>,
    pub created_at: Timestamp,
}

impl CacheValue for ProducerRecord {
    const REGION: CacheRegion = CacheRegion::Producer;
}

/// Producer write. Matched on `identity_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerUpsert {
    pub identity_key: String,
    pub display_name: Option<String>,
    pub website: Option<String>,
}

/// Default price of a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub version_id: String,
    pub satoshis: i64,
    pub updated_at: Timestamp,
}

impl CacheValue for PriceRecord {
    const REGION: CacheRegion = CacheRegion::Price;
}

/// Append-only audit row of an ingested lineage event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageAuditRecord {
    pub event_id: String,
    pub event_time: String,
    pub namespace: String,
    pub job_name: String,
    pub run_id: String,
    pub event_type: String,
    pub payload_json: String,
    /// Content hash; unique.
    pub hash: String,
    /// Seconds since the epoch.
    pub created_at: i64,
}
