//! Error types
//!
//! Collection errors are split into fatal ones (abort the whole run) and
//! per-call ones that the collector absorbs as empty data.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single remote call
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("failed to send request: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API request failed: {status}")]
    Status { status: u16, body: String },

    #[error("failed to parse response JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("response is not a JSON object")]
    NotAnObject,

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// Error reported by the remote service itself
    #[error("{0}")]
    Service(String),
}

/// Cache store failures
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt cache entry at {path:?}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid cache name component: {0:?}")]
    InvalidName(String),
}

/// Errors raised while scheduling or collecting kinds
#[derive(Debug, Error)]
pub enum CollectError {
    /// The response envelope did not carry exactly one payload array
    #[error("unexpected response shape for {kind}: {reason}")]
    UnexpectedShape { kind: String, reason: String },

    /// A single call failed; absorbed as empty data by the collector
    #[error("{kind} unavailable in {region}: {source}")]
    RegionUnsupported {
        kind: String,
        region: String,
        #[source]
        source: ApiError,
    },

    #[error("cannot schedule kind {kind}: unresolved dependencies {unresolved:?}")]
    CyclicDependency {
        kind: String,
        unresolved: Vec<String>,
    },

    #[error("unknown kind: {0}")]
    UnknownKind(String),

    #[error("invalid kind registry: {0}")]
    InvalidRegistry(String),

    #[error("region list unavailable: {0}")]
    MissingRegions(String),

    #[error("collection cancelled")]
    Cancelled,

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl CollectError {
    /// Whether this error must abort the whole collection run
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CollectError::RegionUnsupported { .. })
    }
}

/// Invariant violations by the rebalancer's caller
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RebalanceError {
    #[error("capacity must be at least 1")]
    ZeroCapacity,

    #[error("{items} items share a 63-bit hash prefix; cannot split further")]
    HashExhausted { items: usize },

    #[error("container id {0} does not fit a 4-digit share slot")]
    SlotOverflow(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_region_unsupported_is_absorbed() {
        let absorbed = CollectError::RegionUnsupported {
            kind: "vpcs".to_string(),
            region: "sa-east-1".to_string(),
            source: ApiError::Service("not available".to_string()),
        };
        assert!(!absorbed.is_fatal());

        let shape = CollectError::UnexpectedShape {
            kind: "vpcs".to_string(),
            reason: "two keys".to_string(),
        };
        assert!(shape.is_fatal());
        assert!(CollectError::Cancelled.is_fatal());
    }
}
