//! Cache service over a networked key-value store.
//!
//! [`CacheBackend`] is the raw, fallible command surface implemented for
//! Redis and for an in-process map. [`CacheService`] wraps a backend with
//! typed JSON envelopes, lazy expiry and the fail-open policy: cache
//! failures are logged and degrade to a miss, never to an error.
//!
//! # Example
//!
//! ```ignore
//! let backend = RedisCacheBackend::connect(&RedisConfig::from_env()).await?;
//! let cache = CacheService::new(Arc::new(backend));
//!
//! cache.set(&CacheKeys::asset(id), &asset, ttls.assets).await;
//! let hit: Option<AssetRecord> = cache.get(&CacheKeys::asset(id)).await;
//! ```

pub mod backend;
pub mod entry;
pub mod memory_backend;
pub mod redis_backend;
pub mod service;
pub mod stats;

pub use backend::CacheBackend;
pub use entry::CacheEntry;
pub use memory_backend::InMemoryCacheBackend;
pub use redis_backend::{RedisCacheBackend, RedisConfig};
pub use service::CacheService;
pub use stats::CacheStats;
pub(crate) use stats::StatsCounter;
