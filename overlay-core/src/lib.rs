//! Overlay Core - Value Types for the Cache and Lineage Layer
//!
//! Pure data structures shared by the storage crate: lineage events and the
//! graph shapes projected from them, the marketplace records the cache-aside
//! layer serves, cache key builders, configuration, and the error taxonomy.
//! This crate performs no I/O.

pub mod clock;
pub mod config;
pub mod error;
pub mod keys;
pub mod lineage;
pub mod records;
pub mod region;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BundleBackend, CacheTtls, OverlayConfig};
pub use error::{
    CacheError, CacheResult, ConfigError, OverlayError, OverlayResult, PolicyError, StoreError,
    StoreResult, ValidationError,
};
pub use keys::{glob_escape, CacheKeys};
pub use lineage::{
    CytoEdge, CytoEdgeData, CytoElements, CytoGraph, CytoNode, CytoNodeData, DatasetInfo,
    DatasetRef, Direction, EdgeRel, EventType, GraphFormat, GraphStats, GraphView, JobInfo,
    JobRef, LineageEdge, LineageEvent, LineageGraph, LineageNode, NodeId, NodeType, RunInfo,
    RunRef,
};
pub use records::{
    AssetListing, AssetRecord, LineageAuditRecord, ListingQuery, PriceRecord, ProducerRecord,
    ProducerUpsert,
};
pub use region::{CacheRegion, CacheValue};

use sha2::{Digest, Sha256};

/// Timestamp type using UTC timezone.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Compute the lowercase hex SHA-256 digest of `content`.
pub fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}
