//! Error types for the caching engine
//!
//! Provides unified error handling using thiserror.
//!
//! Absence of a value is never an error: a key that resolves to "no value"
//! comes back as `None` on the read path. Errors are reserved for failed
//! source resolutions and invalid configuration.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the caching engine.
///
/// Cloneable so a single fetch failure can be handed to every reader
/// coalesced onto the same in-flight fetch.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// The source adapter rejected a resolution for a key.
    ///
    /// Carries the originating message and status code, plus the key and
    /// resource the resolution was performed for.
    #[error("{message} while resolving record {key} for {resource}")]
    Source {
        /// Message of the originating source failure
        message: String,
        /// Status code reported by the source, if any
        status_code: Option<u16>,
        /// Key being resolved
        key: String,
        /// Name of the cached resource
        resource: String,
    },

    /// Invalid TTL policy configuration (rejected synchronously)
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CacheError {
    /// Wraps a source adapter failure with the key and resource it occurred for.
    pub fn source(err: crate::source::SourceError, key: &str, resource: &str) -> Self {
        CacheError::Source {
            message: err.message,
            status_code: err.status_code,
            key: key.to_string(),
            resource: resource.to_string(),
        }
    }

    /// Returns the source status code, if this is a source failure that carried one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            CacheError::Source { status_code, .. } => *status_code,
            CacheError::Config(_) => None,
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the caching engine.
pub type Result<T> = std::result::Result<T, CacheError>;

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceError;

    #[test]
    fn test_source_error_message_format() {
        let err = CacheError::source(
            SourceError::new("connection refused", Some(503)),
            "user:42",
            "Users",
        );
        assert_eq!(
            err.to_string(),
            "connection refused while resolving record user:42 for Users"
        );
        assert_eq!(err.status_code(), Some(503));
    }

    #[test]
    fn test_config_error_has_no_status() {
        let err = CacheError::Config("eviction shorter than expiration".to_string());
        assert_eq!(err.status_code(), None);
        assert!(err.to_string().contains("Invalid configuration"));
    }
}
