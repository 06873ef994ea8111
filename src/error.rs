//! Error types for the cache drivers
//!
//! Provides unified error handling using thiserror. A missing or expired key
//! is never an error; drivers report it through `Option`/`bool` results.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for every cache driver.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key cannot be represented by the backend
    #[error("Invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    /// Filesystem operation failed
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Value could not be encoded (or decoded, where decoding is not a miss)
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Redis transport or command failure
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// MongoDB transport or command failure
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    /// Bulk write accepted by the server but rejected for some documents
    #[error("Batch write rejected: {0}")]
    Batch(String),

    /// Backend round trip exceeded the configured operation timeout
    #[error("Operation {operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// Driver was closed
    #[error("Driver already closed: {0}")]
    Closed(&'static str),

    /// Invalid construction-time configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The callback passed to `remember` failed
    #[error("Compute callback failed: {0}")]
    Compute(#[from] anyhow::Error),
}

impl CacheError {
    /// Builds an [`CacheError::InvalidKey`] for `key`.
    pub fn invalid_key(key: &str, reason: impl Into<String>) -> Self {
        CacheError::InvalidKey {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// Wraps an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_key_message() {
        let err = CacheError::invalid_key("a\0b", "contains NUL");
        assert!(err.to_string().contains("contains NUL"));
    }

    #[test]
    fn test_io_error_mentions_path() {
        let err = CacheError::io(
            "/tmp/cache/x.cache",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let message = err.to_string();
        assert!(message.contains("/tmp/cache/x.cache"));
        assert!(message.contains("denied"));
    }

    #[test]
    fn test_compute_error_from_anyhow() {
        let err: CacheError = anyhow::anyhow!("upstream down").into();
        assert!(matches!(err, CacheError::Compute(_)));
    }
}
