//! Cache Statistics Module
//!
//! Tracks read/refresh metrics: hits, stale hits, misses, source fetches,
//! coalesced waits, evictions, and invalidations.

use serde::Serialize;

// == Cache Stats ==
/// Counters for cache behavior.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Reads answered by a fresh entry
    pub hits: u64,
    /// Reads answered by a stale entry (stale-while-revalidate, onlyIfCached, staleIfError)
    pub stale_hits: u64,
    /// Reads that found no usable entry
    pub misses: u64,
    /// Source adapter calls issued
    pub source_fetches: u64,
    /// Reads that waited on another caller's in-flight fetch
    pub coalesced_waits: u64,
    /// Rows removed by the eviction sweep
    pub evictions: u64,
    /// Explicit invalidations applied
    pub invalidations: u64,
    /// Current number of primary rows (set when the snapshot is taken)
    pub total_entries: usize,
}

impl CacheStats {
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Fresh hits over all reads, or 0.0 if no reads have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.stale_hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_stale_hit(&mut self) {
        self.stale_hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_source_fetch(&mut self) {
        self.source_fetches += 1;
    }

    pub fn record_coalesced_wait(&mut self) {
        self.coalesced_waits += 1;
    }

    pub fn record_evictions(&mut self, count: u64) {
        self.evictions += count;
    }

    pub fn record_invalidation(&mut self) {
        self.invalidations += 1;
    }
}
