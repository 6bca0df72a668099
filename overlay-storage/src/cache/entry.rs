//! Envelope stored around every typed cache value.

use overlay_core::Timestamp;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cached value with its write time and optional expiry.
///
/// When `expires_at` is absent the reader supplies a TTL and the expiry is
/// computed from `written_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub value: T,
    pub written_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Timestamp>,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, written_at: Timestamp, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.and_then(|ttl| {
            chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|ttl| written_at.checked_add_signed(ttl))
        });
        Self {
            value,
            written_at,
            expires_at,
        }
    }

    /// Effective expiry, falling back to `written_at + fallback_ttl`.
    pub fn expiry(&self, fallback_ttl: Option<Duration>) -> Option<Timestamp> {
        self.expires_at.or_else(|| {
            fallback_ttl
                .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
                .and_then(|ttl| self.written_at.checked_add_signed(ttl))
        })
    }

    /// Whether the entry must be treated as absent at `now`.
    pub fn is_expired(&self, now: Timestamp, fallback_ttl: Option<Duration>) -> bool {
        self.expiry(fallback_ttl).is_some_and(|at| now > at)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheEntry<U> {
        CacheEntry {
            value: f(self.value),
            written_at: self.written_at,
            expires_at: self.expires_at,
        }
    }
}
