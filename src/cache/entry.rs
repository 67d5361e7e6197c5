//! Cache Entry Module
//!
//! Defines the per-key state the engine manages: the cached payload, its
//! expiration/eviction instants, and the lifecycle state derived from them.

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

use crate::store::StoredRow;

// == Entry State ==
/// Lifecycle state of a cache entry, derived from its timestamps plus the
/// pending-fetch marker (not stored as a separate persisted field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Authoritative; a plain read never re-fetches it
    Fresh,
    /// Past expiration but still present; readable under staleness-tolerant policies
    Stale,
    /// A refresh for this key is in flight
    Updating,
    /// Missing, or past eviction (behaves identically to missing on every read path)
    Absent,
}

// == Cache Entry ==
/// A single cache entry as the controller sees it.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The key this entry is stored under
    pub key: String,
    /// The cached payload; `None` is the negative-cache tombstone
    pub value: Option<Value>,
    /// Epoch-ms instant after which the entry is no longer authoritative
    pub expires_at: u64,
    /// Epoch-ms instant after which the entry is removed entirely.
    /// Invariant: `evict_at >= expires_at`.
    pub evict_at: u64,
    /// Version marker assigned by the primary store, monotonically increasing
    pub local_time: u64,
}

impl CacheEntry {
    // == Constructor ==
    /// Builds an entry view from a stored row.
    pub fn from_row(key: impl Into<String>, row: StoredRow) -> Self {
        Self {
            key: key.into(),
            value: row.value,
            expires_at: row.expires_at,
            evict_at: row.evict_at,
            local_time: row.local_time,
        }
    }

    // == State Classification ==
    /// Classifies the entry at instant `now`.
    ///
    /// Boundary conditions: an entry is stale once `now >= expires_at`, and
    /// evicted (absent) once `now >= evict_at`.
    pub fn state_at(&self, now: u64) -> EntryState {
        if now >= self.evict_at {
            EntryState::Absent
        } else if now >= self.expires_at {
            EntryState::Stale
        } else {
            EntryState::Fresh
        }
    }

    /// True if the entry is past its expiration instant.
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// True if the entry is past its eviction instant.
    pub fn is_evicted(&self, now: u64) -> bool {
        now >= self.evict_at
    }

    /// True if this entry records "no value" (negative cache result).
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_millis() as u64
}
