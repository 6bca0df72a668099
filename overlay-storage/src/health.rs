//! Liveness of the two backing services.

use crate::cache::CacheService;
use crate::store::RecordStore;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayHealth {
    pub cache: bool,
    pub store: bool,
}

impl OverlayHealth {
    /// Probe both services.
    pub async fn check<S: RecordStore + ?Sized>(cache: &CacheService, store: &S) -> Self {
        let cache_ok = cache.ping().await;
        let store_ok = match store.health_check().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Store health check failed");
                false
            }
        };
        Self {
            cache: cache_ok,
            store: store_ok,
        }
    }

    /// Reads are served as long as the store is up; a cache outage only
    /// costs latency.
    pub fn is_serving(&self) -> bool {
        self.store
    }

    pub fn is_healthy(&self) -> bool {
        self.cache && self.store
    }
}
