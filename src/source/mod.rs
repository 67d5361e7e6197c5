//! Source Adapter Module
//!
//! The seam between the cache and the authoritative origin of the data
//! (a remote service, another table, an upstream API). The cache controller
//! only ever talks to the origin through this trait, and only from inside
//! the stampede-protected fetch path.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

// == Source Error ==
/// Failure reported by the authoritative origin while resolving a key.
///
/// Status codes are carried through verbatim so callers can distinguish
/// e.g. upstream 503s from 401s. The controller wraps this into
/// [`CacheError::Source`](crate::error::CacheError) with the key and
/// resource name attached.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct SourceError {
    /// Human-readable failure message
    pub message: String,
    /// Status code reported by the origin, if any
    pub status_code: Option<u16>,
}

impl SourceError {
    /// Creates a new SourceError.
    pub fn new(message: impl Into<String>, status_code: Option<u16>) -> Self {
        Self {
            message: message.into(),
            status_code,
        }
    }
}

// == Source Adapter Trait ==
/// Resolves a key to a value from the authoritative origin.
///
/// `Ok(None)` means the origin authoritatively reports "no value" for the
/// key; the cache records that as a tombstone (negative caching) so repeated
/// misses do not hammer the origin. `Err` means the resolution failed and
/// nothing can be cached.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Resolves `key` from the origin.
    async fn get(&self, key: &str) -> std::result::Result<Option<Value>, SourceError>;
}
