//! Cache for signing-client method results, verifications and signatures.
//!
//! Two mechanisms keep stale security decisions from being served:
//!
//! - [`NEVER_CACHE_METHODS`], a static deny-list. Deny-listed methods always
//!   bypass the cache and any attempt to cache them is refused with
//!   [`PolicyError::NeverCache`].
//! - The bypass marker, a sentinel key whose presence bypasses every cached
//!   result until it expires. It is written on key rotation and disconnect.

use crate::cache::CacheService;
use overlay_core::keys::{API_CLIENT_PREFIX, METHOD_PREFIX, SIGNATURE_PREFIX, VERIFICATION_PREFIX};
use overlay_core::{
    sha256_hex, CacheKeys, CacheRegion, CacheTtls, CacheValue, PolicyError, Timestamp,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Methods whose results depend on live state or authorize spending.
pub const NEVER_CACHE_METHODS: &[&str] = &[
    "getRevenueSummary",
    "getAgentSummary",
    "processPayment",
    "verifyPayment",
    "createSignature",
    "verifySignature",
    "waitForAuthentication",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationEntry {
    pub method: String,
    pub hash: String,
    pub verified: bool,
    pub public_key: Option<String>,
    pub written_at: Timestamp,
    pub expires_at: Timestamp,
}

impl CacheValue for VerificationEntry {
    const REGION: CacheRegion = CacheRegion::Verification;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureEntry {
    pub hash: String,
    pub signature: String,
    pub public_key: String,
    pub written_at: Timestamp,
    pub expires_at: Timestamp,
}

impl CacheValue for SignatureEntry {
    const REGION: CacheRegion = CacheRegion::Signature;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodResultEntry {
    pub method: String,
    pub hash: String,
    pub data: Value,
    pub written_at: Timestamp,
    pub expires_at: Timestamp,
}

impl CacheValue for MethodResultEntry {
    const REGION: CacheRegion = CacheRegion::MethodResult;
}

/// Content of the bypass marker. Only its presence is significant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BypassMarker {
    pub set_at: Timestamp,
}

impl CacheValue for BypassMarker {
    const REGION: CacheRegion = CacheRegion::BypassMarker;
}

/// Entries carry their own `expires_at`, re-checked on every read.
trait Expiring {
    fn expires_at(&self) -> Timestamp;
}

impl Expiring for VerificationEntry {
    fn expires_at(&self) -> Timestamp {
        self.expires_at
    }
}

impl Expiring for SignatureEntry {
    fn expires_at(&self) -> Timestamp {
        self.expires_at
    }
}

impl Expiring for MethodResultEntry {
    fn expires_at(&self) -> Timestamp {
        self.expires_at
    }
}

#[derive(Debug, Clone)]
pub struct SensitiveMethodCache {
    cache: CacheService,
    ttls: CacheTtls,
}

impl SensitiveMethodCache {
    pub fn new(cache: CacheService, ttls: CacheTtls) -> Self {
        Self { cache, ttls }
    }

    /// Whether `method` is on the deny-list.
    pub fn is_never_cached(method: &str) -> bool {
        NEVER_CACHE_METHODS.contains(&method)
    }

    /// Hash of a method's arguments, for use as a cache key component.
    pub fn args_hash(args: &Value) -> String {
        sha256_hex(args.to_string().as_bytes())
    }

    /// Whether the bypass marker is present. A failed check counts as
    /// present.
    pub async fn bypass_active(&self) -> bool {
        match self.cache.exists(&CacheKeys::api_client_marker()).await {
            Ok(present) => present,
            Err(e) => {
                tracing::warn!(error = %e, "Bypass marker check failed, bypassing cache");
                true
            }
        }
    }

    /// Whether results of `method` must be fetched live.
    pub async fn should_bypass(&self, method: &str) -> bool {
        Self::is_never_cached(method) || self.bypass_active().await
    }

    fn refuse(method: &str) -> Result<(), PolicyError> {
        if Self::is_never_cached(method) {
            tracing::error!(method = %method, "Refusing to cache never-cache method");
            return Err(PolicyError::NeverCache {
                method: method.to_string(),
            });
        }
        Ok(())
    }

    fn expiry(&self, ttl: Duration) -> (Timestamp, Timestamp) {
        let now = self.cache.clock().now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        (now, now.checked_add_signed(ttl).unwrap_or(now))
    }

    async fn read_live<T: CacheValue + Expiring>(&self, key: &str) -> Option<T> {
        let entry: T = self.cache.get(key).await?;
        if entry.expires_at() > self.cache.clock().now() {
            return Some(entry);
        }
        self.cache.delete(&[key.to_string()]).await;
        None
    }

    // ========================================================================
    // VERIFICATIONS
    // ========================================================================

    /// Cache a verification outcome. Returns whether it was stored.
    pub async fn cache_verification(
        &self,
        method: &str,
        hash: &str,
        verified: bool,
        public_key: Option<&str>,
    ) -> Result<bool, PolicyError> {
        Self::refuse(method)?;
        let ttl = self.ttls.verification;
        let (written_at, expires_at) = self.expiry(ttl);
        let entry = VerificationEntry {
            method: method.to_string(),
            hash: hash.to_string(),
            verified,
            public_key: public_key.map(str::to_string),
            written_at,
            expires_at,
        };
        Ok(self
            .cache
            .set(&CacheKeys::verification(method, hash), &entry, ttl)
            .await)
    }

    pub async fn get_cached_verification(
        &self,
        method: &str,
        hash: &str,
    ) -> Option<VerificationEntry> {
        if self.should_bypass(method).await {
            return None;
        }
        self.read_live(&CacheKeys::verification(method, hash)).await
    }

    // ========================================================================
    // SIGNATURES
    // ========================================================================

    pub async fn cache_signature(&self, hash: &str, signature: &str, public_key: &str) -> bool {
        let ttl = self.ttls.signatures;
        let (written_at, expires_at) = self.expiry(ttl);
        let entry = SignatureEntry {
            hash: hash.to_string(),
            signature: signature.to_string(),
            public_key: public_key.to_string(),
            written_at,
            expires_at,
        };
        self.cache
            .set(&CacheKeys::signature(hash), &entry, ttl)
            .await
    }

    pub async fn get_cached_signature(&self, hash: &str) -> Option<SignatureEntry> {
        if self.bypass_active().await {
            return None;
        }
        self.read_live(&CacheKeys::signature(hash)).await
    }

    // ========================================================================
    // METHOD RESULTS
    // ========================================================================

    /// Cache the result of `method` called with arguments hashing to `hash`.
    pub async fn cache_method_result(
        &self,
        method: &str,
        hash: &str,
        data: Value,
    ) -> Result<bool, PolicyError> {
        Self::refuse(method)?;
        let ttl = self.ttls.verification;
        let (written_at, expires_at) = self.expiry(ttl);
        let entry = MethodResultEntry {
            method: method.to_string(),
            hash: hash.to_string(),
            data,
            written_at,
            expires_at,
        };
        Ok(self
            .cache
            .set(&CacheKeys::method_result(method, hash), &entry, ttl)
            .await)
    }

    pub async fn get_cached_method_result(&self, method: &str, hash: &str) -> Option<Value> {
        if self.should_bypass(method).await {
            return None;
        }
        self.read_live::<MethodResultEntry>(&CacheKeys::method_result(method, hash))
            .await
            .map(|entry| entry.data)
    }

    // ========================================================================
    // INVALIDATION
    // ========================================================================

    /// Clear the verification and signature namespaces, and the method
    /// namespace unless `public_key` is given, then set the bypass marker.
    ///
    /// `public_key` only narrows which namespaces are cleared; entries are
    /// never matched by key.
    pub async fn invalidate_all(&self, public_key: Option<&str>) -> u64 {
        let mut prefixes = vec![VERIFICATION_PREFIX, SIGNATURE_PREFIX];
        if public_key.is_none() {
            prefixes.push(METHOD_PREFIX);
        }
        let mut deleted = 0;
        for prefix in prefixes {
            deleted += self
                .cache
                .delete_pattern(&CacheKeys::prefix_pattern(prefix))
                .await;
        }
        self.write_marker().await;
        tracing::info!(
            public_key = public_key.unwrap_or("<all>"),
            deleted,
            "Invalidated signing-client caches"
        );
        deleted
    }

    /// Clear cached API-client responses and set the bypass marker.
    pub async fn mark_bypass(&self) -> bool {
        self.cache
            .delete_pattern(&CacheKeys::prefix_pattern(API_CLIENT_PREFIX))
            .await;
        self.write_marker().await
    }

    async fn write_marker(&self) -> bool {
        let marker = BypassMarker {
            set_at: self.cache.clock().now(),
        };
        self.cache
            .set(
                &CacheKeys::api_client_marker(),
                &marker,
                self.ttls.bypass_marker,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheBackend, CacheEntry, InMemoryCacheBackend};
    use overlay_core::{Clock, ManualClock};
    use serde_json::json;
    use std::sync::Arc;

    fn sensitive() -> (SensitiveMethodCache, Arc<InMemoryCacheBackend>, ManualClock) {
        let clock = ManualClock::default();
        let backend = Arc::new(InMemoryCacheBackend::with_clock(Arc::new(clock.clone())));
        let cache = CacheService::with_clock(backend.clone(), Arc::new(clock.clone()));
        (
            SensitiveMethodCache::new(cache, CacheTtls::default()),
            backend,
            clock,
        )
    }

    #[tokio::test]
    async fn test_deny_listed_methods_always_bypass() {
        let (cache, _, _) = sensitive();
        for method in NEVER_CACHE_METHODS {
            assert!(cache.should_bypass(method).await);
        }
        assert!(!cache.should_bypass("getRawTx").await);
    }

    #[tokio::test]
    async fn test_marker_bypasses_until_it_expires() {
        let (cache, _, clock) = sensitive();
        assert!(cache.mark_bypass().await);
        assert!(cache.should_bypass("getRawTx").await);

        clock.advance(Duration::from_secs(61));
        assert!(!cache.should_bypass("getRawTx").await);
    }

    #[tokio::test]
    async fn test_caching_deny_listed_method_is_refused() {
        let (cache, backend, _) = sensitive();
        let err = cache
            .cache_verification("verifySignature", "h", true, None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            PolicyError::NeverCache {
                method: "verifySignature".to_string()
            }
        );
        assert!(cache
            .cache_method_result("processPayment", "h", json!({}))
            .await
            .is_err());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_verification_roundtrip_and_expiry() {
        let (cache, _, clock) = sensitive();
        assert!(cache
            .cache_verification("verifyHmac", "h1", true, Some("02ab"))
            .await
            .unwrap());

        let entry = cache.get_cached_verification("verifyHmac", "h1").await.unwrap();
        assert!(entry.verified);
        assert_eq!(entry.public_key.as_deref(), Some("02ab"));

        clock.advance(Duration::from_secs(301));
        assert!(cache.get_cached_verification("verifyHmac", "h1").await.is_none());
    }

    #[tokio::test]
    async fn test_stale_payload_is_evicted_even_if_key_survives() {
        let (cache, backend, clock) = sensitive();
        let now = clock.now();
        let stale = SignatureEntry {
            hash: "h".to_string(),
            signature: "sig".to_string(),
            public_key: "02ab".to_string(),
            written_at: now,
            expires_at: now,
        };
        let raw = serde_json::to_string(&CacheEntry::new(stale, now, None)).unwrap();
        backend.set("cache:brc:sig:h", &raw, None).await.unwrap();

        assert!(cache.get_cached_signature("h").await.is_none());
        assert!(!backend.exists("cache:brc:sig:h").await.unwrap());
    }

    #[tokio::test]
    async fn test_invalidate_all_clears_namespaces_and_sets_marker() {
        let (cache, backend, _) = sensitive();
        cache.cache_signature("h", "sig", "02ab").await;
        cache
            .cache_verification("verifyHmac", "h", true, None)
            .await
            .unwrap();
        cache
            .cache_method_result("getHeight", "h", json!(42))
            .await
            .unwrap();

        cache.invalidate_all(Some("02ab")).await;
        assert!(!backend.exists("cache:brc:sig:h").await.unwrap());
        assert!(!backend.exists("cache:brc:verify:verifyHmac:h").await.unwrap());
        assert!(backend.exists("cache:brc:method:getHeight:h").await.unwrap());
        assert!(cache.bypass_active().await);

        cache.invalidate_all(None).await;
        assert!(!backend.exists("cache:brc:method:getHeight:h").await.unwrap());
    }

    #[tokio::test]
    async fn test_outage_bypasses() {
        let (cache, backend, _) = sensitive();
        backend.close().await.unwrap();
        assert!(cache.should_bypass("getRawTx").await);
        assert!(cache.get_cached_method_result("getHeight", "h").await.is_none());
    }

    #[test]
    fn test_args_hash_ignores_key_order() {
        let a = SensitiveMethodCache::args_hash(&json!({"a": 1, "b": 2}));
        let b = SensitiveMethodCache::args_hash(&json!({"b": 2, "a": 1}));
        assert_eq!(a, b);
    }
}
