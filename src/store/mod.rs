//! Primary Store Module
//!
//! The transactionally-consistent keyed store the cache engine persists its
//! rows, secondary index entries, and pending-fetch markers into. The store
//! is the sole mutator of persisted cache state; everything the controller
//! keeps in process memory is a performance hint that gets re-validated
//! against the store before it is acted on.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

// == Stored Row ==
/// A persisted cache row.
///
/// The same row shape carries primary records, secondary index entries and
/// pending-fetch markers; the key namespace tells them apart.
#[derive(Debug, Clone)]
pub struct StoredRow {
    /// The cached payload; `None` is the negative-cache tombstone
    pub value: Option<Value>,
    /// Epoch-millisecond instant after which the row is stale
    pub expires_at: u64,
    /// Epoch-millisecond instant after which the row is removable
    pub evict_at: u64,
    /// Monotonically increasing version marker assigned by the store
    pub local_time: u64,
}

// == Row Init ==
/// Input for a row write. The store assigns `local_time` on commit.
#[derive(Debug, Clone)]
pub struct RowInit {
    /// The payload to store; `None` writes a tombstone
    pub value: Option<Value>,
    /// Staleness instant (epoch ms)
    pub expires_at: u64,
    /// Removal instant (epoch ms); must be `>= expires_at`
    pub evict_at: u64,
}

// == Row Patch ==
/// Partial update of an existing row. Fields left `None` are untouched.
#[derive(Debug, Clone, Default)]
pub struct RowPatch {
    /// Replacement payload (outer `Some` applies, inner option is the payload)
    pub value: Option<Option<Value>>,
    /// Replacement staleness instant
    pub expires_at: Option<u64>,
    /// Replacement removal instant
    pub evict_at: Option<u64>,
}

// == Write Op ==
/// One operation inside an atomic write batch.
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Insert or overwrite a row
    Put { key: String, row: RowInit },
    /// Partially update a row; a no-op if the row is absent
    Patch { key: String, patch: RowPatch },
    /// Remove a row; a no-op if the row is absent
    Delete { key: String },
}

// == Version Entry ==
/// One entry in a record's version history.
#[derive(Debug, Clone)]
pub struct VersionEntry {
    /// Version marker assigned when the write committed
    pub local_time: u64,
    /// Operation that produced this version ("put", "patch", "delete")
    pub operation: String,
    /// Payload snapshot after the write (`None` for tombstones and deletes)
    pub value: Option<Value>,
}

// == Range Options ==
/// Options for an ordered range scan.
#[derive(Debug, Clone, Default)]
pub struct RangeOptions {
    /// Inclusive lower bound on the key
    pub start: Option<String>,
    /// Exclusive upper bound on the key
    pub end: Option<String>,
    /// Restrict the scan to keys with this prefix
    pub prefix: Option<String>,
    /// Maximum number of rows returned
    pub limit: Option<usize>,
}

// == Primary Store Trait ==
/// The persistent keyed store the cache engine writes through.
///
/// Writes are transactional: every method that mutates state applies its
/// changes atomically, and [`apply`](PrimaryStore::apply) groups several
/// operations into one unit of work (a record write plus its index updates
/// plus a marker clear commit or fail together).
#[async_trait]
pub trait PrimaryStore: Send + Sync {
    /// Returns the row stored under `key`, if any.
    async fn get(&self, key: &str) -> Option<StoredRow>;

    /// Inserts or overwrites a row.
    async fn put(&self, key: &str, row: RowInit);

    /// Partially updates a row. Returns false if the row was absent.
    async fn patch(&self, key: &str, patch: RowPatch) -> bool;

    /// Removes a row. Returns false if the row was absent.
    async fn delete(&self, key: &str) -> bool;

    /// Inserts a row only if the key is vacant. Returns true on insert.
    ///
    /// This is the conditional write the cross-worker pending-fetch claim
    /// rides on: of N workers racing to claim a key, exactly one observes
    /// true.
    async fn put_if_absent(&self, key: &str, row: RowInit) -> bool;

    /// Applies a batch of operations as one atomic unit of work.
    async fn apply(&self, batch: Vec<WriteOp>);

    /// Resolves once the most recent write issued by this worker is durable.
    async fn committed(&self);

    /// Returns a watch on the store's commit sequence.
    ///
    /// The sequence advances on every committed unit of work; waiters use it
    /// to observe other workers' commits (e.g. a pending-fetch marker being
    /// cleared) without polling in a tight loop.
    fn commit_watch(&self) -> watch::Receiver<u64>;

    /// Ordered range scan over the keyspace.
    async fn get_range(&self, opts: RangeOptions) -> Vec<(String, StoredRow)>;

    /// Returns the ordered version history recorded for `key`.
    async fn get_history_of_record(&self, key: &str) -> Vec<VersionEntry>;
}
