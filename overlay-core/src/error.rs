//! Error types for overlay cache and lineage operations

use crate::CacheRegion;
use thiserror::Error;

/// Cache service errors.
///
/// These never escape the cache boundary on read-through paths: the
/// fail-open facade logs them and degrades to a miss or a no-op.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache backend {op} failed: {reason}")]
    Backend { op: &'static str, reason: String },

    #[error("Failed to decode {region} entry at {key}: {reason}")]
    Decode {
        key: String,
        region: CacheRegion,
        reason: String,
    },

    #[error("Failed to encode {region} entry: {reason}")]
    Encode { region: CacheRegion, reason: String },
}

impl CacheError {
    pub fn backend(op: &'static str, reason: impl ToString) -> Self {
        Self::Backend {
            op,
            reason: reason.to_string(),
        }
    }
}

/// System-of-record errors. Always propagated to the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Connection pool error: {reason}")]
    Pool { reason: String },

    #[error("Query failed: {reason}")]
    Query { reason: String },

    #[error("Transaction failed: {reason}")]
    Transaction { reason: String },

    #[error("Failed to decode column {column}: {reason}")]
    RowDecode { column: String, reason: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
}

/// Input validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid node identifier {value:?}, expected dataset:<namespace>:<name>")]
    InvalidNode { value: String },

    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Configuration errors.
///
/// Only ever logged: malformed configuration falls back to defaults.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Malformed {variable}: {reason}")]
    Malformed { variable: String, reason: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Cache policy violations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Method {method} must never be served from cache")]
    NeverCache { method: String },
}

/// Master error type for overlay operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OverlayError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),
}

/// Result type alias for overlay operations.
pub type OverlayResult<T> = Result<T, OverlayError>;

/// Result type alias for cache backend operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Result type alias for system-of-record operations.
pub type StoreResult<T> = Result<T, StoreError>;
