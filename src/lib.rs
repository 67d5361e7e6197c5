//! Readthrough - A read-through caching engine
//!
//! Sits in front of a source of truth and decides when cached data is
//! authoritative, stale, or gone. Concurrent refreshes for one key coalesce
//! onto a single source fetch (in-process and across cooperating workers
//! sharing the same primary store), and reads can opt into staleness
//! tolerance: stale-while-revalidate, stale-if-error, cache-only.

pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod source;
pub mod store;
pub mod tasks;

pub use cache::{
    CacheController, CacheEntry, CacheRead, CacheStats, EntryState, PutOptions, ReadOptions,
    TtlPolicy, TtlSpec,
};
pub use config::Config;
pub use error::{CacheError, Result};
pub use event::{EventFilter, EventKind, InvalidationEvent, Subscription};
pub use source::{SourceAdapter, SourceError};
pub use store::{MemoryStore, PrimaryStore};
pub use tasks::spawn_sweep_task;
