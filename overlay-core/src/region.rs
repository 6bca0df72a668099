//! Cache regions and the cacheable value marker.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;

/// Logical region a cached value belongs to.
///
/// Every value moved through the cache is tagged with its region so that a
/// decoding failure names what was expected instead of silently yielding
/// nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheRegion {
    Asset,
    Listing,
    Producer,
    Price,
    LineageEvent,
    LineageGraph,
    Bundle,
    MethodResult,
    Verification,
    Signature,
    BypassMarker,
}

impl CacheRegion {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheRegion::Asset => "asset",
            CacheRegion::Listing => "listing",
            CacheRegion::Producer => "producer",
            CacheRegion::Price => "price",
            CacheRegion::LineageEvent => "lineage_event",
            CacheRegion::LineageGraph => "lineage_graph",
            CacheRegion::Bundle => "bundle",
            CacheRegion::MethodResult => "method_result",
            CacheRegion::Verification => "verification",
            CacheRegion::Signature => "signature",
            CacheRegion::BypassMarker => "bypass_marker",
        }
    }
}

impl fmt::Display for CacheRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marker trait for types that can be stored in the cache.
///
/// Implementations must be `Serialize` and `DeserializeOwned` since values
/// cross the cache as UTF-8 JSON, and `Send + Sync + 'static` for async use.
pub trait CacheValue: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Region this value is cached under.
    const REGION: CacheRegion;
}
