//! TTL Policy Module
//!
//! Translates a staleness specification into the expiration/eviction window
//! applied to refreshed entries.

use crate::error::{CacheError, Result};

// == TTL Spec ==
/// Staleness specification accepted by `set_ttl_expiration`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TtlSpec {
    /// Plain duration in seconds: expiration and eviction coincide, so an
    /// expired entry is immediately eligible for removal.
    Scalar(f64),
    /// Independent expiration and eviction durations in seconds. Eviction
    /// past expiration opens a window during which stale-but-present reads
    /// are possible.
    Windowed { expiration: f64, eviction: f64 },
}

// == TTL Policy ==
/// Active expiration/eviction configuration.
///
/// Effective for entries refreshed after it is installed; already-stored
/// timestamps are never rewritten retroactively.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TtlPolicy {
    /// Time after write/refresh at which an entry becomes stale
    pub expiration_ms: u64,
    /// Time after write/refresh at which an entry is removed
    pub eviction_ms: u64,
}

impl TtlPolicy {
    // == Constructor ==
    /// Builds a policy from a spec, rejecting invalid configurations.
    pub fn from_spec(spec: TtlSpec) -> Result<Self> {
        match spec {
            TtlSpec::Scalar(seconds) => {
                let ms = to_millis(seconds)?;
                Ok(Self {
                    expiration_ms: ms,
                    eviction_ms: ms,
                })
            }
            TtlSpec::Windowed {
                expiration,
                eviction,
            } => {
                let expiration_ms = to_millis(expiration)?;
                let eviction_ms = to_millis(eviction)?;
                if eviction_ms < expiration_ms {
                    return Err(CacheError::Config(format!(
                        "eviction ({eviction}s) must not be shorter than expiration ({expiration}s)"
                    )));
                }
                Ok(Self {
                    expiration_ms,
                    eviction_ms,
                })
            }
        }
    }

    // == Window ==
    /// Returns `(expires_at, evict_at)` for an entry refreshed at `now`.
    pub fn window(&self, now: u64) -> (u64, u64) {
        (
            now.saturating_add(self.expiration_ms),
            now.saturating_add(self.eviction_ms),
        )
    }

    /// Width of the stale window (zero under a scalar spec).
    pub fn stale_window_ms(&self) -> u64 {
        self.eviction_ms - self.expiration_ms
    }
}

fn to_millis(seconds: f64) -> Result<u64> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(CacheError::Config(format!(
            "TTL duration must be a non-negative number of seconds, got {seconds}"
        )));
    }
    Ok((seconds * 1000.0) as u64)
}
