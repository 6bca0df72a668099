//! Configuration types
//!
//! Every option has a hard-coded default. Malformed values never fail
//! startup: they are logged and replaced by the default.

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Environment variable holding the per-domain TTL document.
pub const CACHE_TTLS_VAR: &str = "CACHE_TTLS_JSON";
/// Environment variable selecting the bundle cache backend.
pub const BUNDLE_BACKEND_VAR: &str = "BUNDLE_CACHE_BACKEND";
/// Environment variable holding the traversal depth ceiling.
pub const LINEAGE_MAX_DEPTH_VAR: &str = "OL_QUERY_MAX_DEPTH";
/// Environment variable holding the default bundle depth.
pub const BUNDLE_MAX_DEPTH_VAR: &str = "BUNDLE_MAX_DEPTH";

const MAX_DEPTH_CEILING: u32 = 64;

/// Per-domain cache TTLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheTtls {
    pub assets: Duration,
    pub listings: Duration,
    pub lineage: Duration,
    pub prices: Duration,
    pub producers: Duration,
    pub bundles: Duration,
    pub verification: Duration,
    pub signatures: Duration,
    pub bypass_marker: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            assets: Duration::from_secs(300),
            listings: Duration::from_secs(180),
            lineage: Duration::from_secs(120),
            prices: Duration::from_secs(120),
            producers: Duration::from_secs(300),
            bundles: Duration::from_secs(60),
            verification: Duration::from_secs(300),
            signatures: Duration::from_secs(600),
            bypass_marker: Duration::from_secs(60),
        }
    }
}

impl CacheTtls {
    /// Parse a TTL document such as `{"assets": 300, "lineage": "90"}`.
    ///
    /// Values are seconds. Unknown keys are ignored; missing, malformed or
    /// non-positive values keep their default. `producers` follows `assets`
    /// unless set explicitly.
    pub fn from_json(raw: &str) -> Self {
        let defaults = Self::default();
        let doc: Value = match serde_json::from_str(raw) {
            Ok(Value::Object(map)) => Value::Object(map),
            Ok(other) => {
                let err = ConfigError::Malformed {
                    variable: CACHE_TTLS_VAR.to_string(),
                    reason: format!("expected an object, got {}", json_kind(&other)),
                };
                tracing::warn!(error = %err, "Using default cache TTLs");
                return defaults;
            }
            Err(e) => {
                let err = ConfigError::Malformed {
                    variable: CACHE_TTLS_VAR.to_string(),
                    reason: e.to_string(),
                };
                tracing::warn!(error = %err, "Using default cache TTLs");
                return defaults;
            }
        };

        let assets = ttl_field(&doc, "assets", defaults.assets);
        Self {
            assets,
            listings: ttl_field(&doc, "listings", defaults.listings),
            lineage: ttl_field(&doc, "lineage", defaults.lineage),
            prices: ttl_field(&doc, "prices", defaults.prices),
            producers: ttl_field(&doc, "producers", assets),
            bundles: ttl_field(&doc, "bundles", defaults.bundles),
            verification: ttl_field(&doc, "verification", defaults.verification),
            signatures: ttl_field(&doc, "signatures", defaults.signatures),
            bypass_marker: ttl_field(&doc, "bypass_marker", defaults.bypass_marker),
        }
    }

    /// Read `CACHE_TTLS_JSON` through `lookup`, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        match lookup(CACHE_TTLS_VAR) {
            Some(raw) if !raw.trim().is_empty() => Self::from_json(&raw),
            _ => Self::default(),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }
}

fn ttl_field(doc: &Value, field: &str, default: Duration) -> Duration {
    let Some(raw) = doc.get(field) else {
        return default;
    };
    let secs = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match secs {
        Some(secs) if secs.is_finite() && secs >= 1.0 => Duration::from_secs(secs as u64),
        _ => {
            let err = ConfigError::InvalidValue {
                field: field.to_string(),
                value: raw.to_string(),
                reason: "expected a positive number of seconds".to_string(),
            };
            tracing::warn!(error = %err, default_secs = default.as_secs(), "Using default TTL");
            default
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Backing used by the bundle cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleBackend {
    /// Networked cache with an in-process mirror.
    #[default]
    Networked,
    /// In-process map only.
    InProcess,
}

impl BundleBackend {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().replace('_', "-").as_str() {
            "redis" | "networked" | "network" => Some(Self::Networked),
            "memory" | "in-process" | "local" => Some(Self::InProcess),
            _ => None,
        }
    }
}

/// Configuration surface of the cache and lineage layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayConfig {
    pub ttls: CacheTtls,
    pub bundle_backend: BundleBackend,
    /// Ceiling applied to every traversal depth.
    pub lineage_max_depth: u32,
    /// Default depth of assembled bundles.
    pub bundle_max_depth: u32,
    /// Upper bound on the canonical JSON size of an ingested event.
    pub max_event_bytes: usize,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            ttls: CacheTtls::default(),
            bundle_backend: BundleBackend::default(),
            lineage_max_depth: 10,
            bundle_max_depth: 8,
            max_event_bytes: 256 * 1024,
        }
    }
}

impl OverlayConfig {
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let bundle_backend = match lookup(BUNDLE_BACKEND_VAR) {
            None => defaults.bundle_backend,
            Some(raw) => BundleBackend::parse(&raw).unwrap_or_else(|| {
                tracing::warn!(
                    variable = BUNDLE_BACKEND_VAR,
                    value = %raw,
                    "Unknown bundle cache backend, using networked"
                );
                defaults.bundle_backend
            }),
        };

        Self {
            ttls: CacheTtls::from_lookup(&lookup),
            bundle_backend,
            lineage_max_depth: depth_var(&lookup, LINEAGE_MAX_DEPTH_VAR, defaults.lineage_max_depth),
            bundle_max_depth: depth_var(&lookup, BUNDLE_MAX_DEPTH_VAR, defaults.bundle_max_depth),
            max_event_bytes: defaults.max_event_bytes,
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Set the traversal depth ceiling.
    pub fn with_lineage_max_depth(mut self, depth: u32) -> Self {
        self.lineage_max_depth = depth.clamp(1, MAX_DEPTH_CEILING);
        self
    }

    /// Set the bundle backend.
    pub fn with_bundle_backend(mut self, backend: BundleBackend) -> Self {
        self.bundle_backend = backend;
        self
    }

    /// Replace the TTL table.
    pub fn with_ttls(mut self, ttls: CacheTtls) -> Self {
        self.ttls = ttls;
        self
    }
}

fn depth_var<F>(lookup: &F, variable: &str, default: u32) -> u32
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(variable) else {
        return default;
    };
    match raw.trim().parse::<u32>() {
        Ok(depth) if depth >= 1 => depth.min(MAX_DEPTH_CEILING),
        _ => {
            tracing::warn!(variable, value = %raw, default, "Invalid depth, using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_ttls_default_when_unset() {
        let ttls = CacheTtls::from_lookup(lookup_from(&[]));
        assert_eq!(ttls, CacheTtls::default());
    }

    #[test]
    fn test_ttls_partial_override() {
        let ttls = CacheTtls::from_json(r#"{"assets": 30, "lineage": "45"}"#);
        assert_eq!(ttls.assets, Duration::from_secs(30));
        assert_eq!(ttls.lineage, Duration::from_secs(45));
        assert_eq!(ttls.listings, Duration::from_secs(180));
        // producers follow assets when not set
        assert_eq!(ttls.producers, Duration::from_secs(30));
    }

    #[test]
    fn test_ttls_malformed_json_falls_back() {
        assert_eq!(CacheTtls::from_json("{not json"), CacheTtls::default());
        assert_eq!(CacheTtls::from_json("[1, 2]"), CacheTtls::default());
    }

    #[test]
    fn test_ttls_malformed_field_falls_back_per_field() {
        let ttls = CacheTtls::from_json(r#"{"assets": "soon", "prices": -5, "bundles": 2}"#);
        assert_eq!(ttls.assets, Duration::from_secs(300));
        assert_eq!(ttls.prices, Duration::from_secs(120));
        assert_eq!(ttls.bundles, Duration::from_secs(2));
    }

    #[test]
    fn test_overlay_config_from_lookup() {
        let config = OverlayConfig::from_lookup(lookup_from(&[
            (BUNDLE_BACKEND_VAR, "memory"),
            (LINEAGE_MAX_DEPTH_VAR, "4"),
        ]));
        assert_eq!(config.bundle_backend, BundleBackend::InProcess);
        assert_eq!(config.lineage_max_depth, 4);
        assert_eq!(config.bundle_max_depth, 8);
    }

    #[test]
    fn test_overlay_config_malformed_values_use_defaults() {
        let config = OverlayConfig::from_lookup(lookup_from(&[
            (BUNDLE_BACKEND_VAR, "carrier-pigeon"),
            (LINEAGE_MAX_DEPTH_VAR, "deep"),
            (BUNDLE_MAX_DEPTH_VAR, "0"),
            (CACHE_TTLS_VAR, "nope"),
        ]));
        assert_eq!(config, OverlayConfig::default());
    }

    #[test]
    fn test_depth_ceiling_is_clamped() {
        let config = OverlayConfig::from_lookup(lookup_from(&[(LINEAGE_MAX_DEPTH_VAR, "5000")]));
        assert_eq!(config.lineage_max_depth, MAX_DEPTH_CEILING);
    }
}
