//! Cache Module
//!
//! The read-through caching engine: entry lifecycle, TTL policy, stampede
//! coordination, and the controller tying them together over the primary
//! store and source adapter.

mod controller;
mod entry;
mod flight;
mod index;
mod policy;
mod stats;


// Re-export public types
pub use controller::{CacheController, CacheRead, PutOptions, ReadOptions, StalePredicate};
pub use entry::{current_timestamp_ms, CacheEntry, EntryState};
pub use flight::{FlightCoordinator, PENDING_PREFIX};
pub use index::{encode_component, INDEX_PREFIX};
pub use policy::{TtlPolicy, TtlSpec};
pub use stats::CacheStats;
