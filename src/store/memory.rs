//! In-Memory Primary Store
//!
//! Reference implementation of [`PrimaryStore`] backed by a BTreeMap.
//! Writes are applied atomically under a single lock, every committed unit
//! of work bumps a watch-visible commit sequence, and each record keeps an
//! ordered version history for audit/debug.
//!
//! Durability is trivial here (a write is durable the moment it is applied),
//! but the commit-sequence contract is the same one a disk-backed store
//! would honor, so the coordination logic above it does not change.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use tokio::sync::{watch, RwLock};

use super::{PrimaryStore, RangeOptions, RowInit, RowPatch, StoredRow, VersionEntry, WriteOp};
use async_trait::async_trait;

// == Memory Store ==
/// In-memory transactional keyed store.
pub struct MemoryStore {
    inner: RwLock<StoreInner>,
    commit_tx: watch::Sender<u64>,
}

#[derive(Default)]
struct StoreInner {
    /// Ordered keyspace; BTreeMap gives us range scans for free
    rows: BTreeMap<String, StoredRow>,
    /// Per-key version history, oldest first
    history: HashMap<String, Vec<VersionEntry>>,
    /// Monotonic version clock; one tick per applied operation
    clock: u64,
}

impl MemoryStore {
    // == Constructor ==
    /// Creates a new empty MemoryStore.
    pub fn new() -> Self {
        let (commit_tx, _) = watch::channel(0);
        Self {
            inner: RwLock::new(StoreInner::default()),
            commit_tx,
        }
    }

    /// Current number of rows, across all key namespaces.
    pub async fn len(&self) -> usize {
        self.inner.read().await.rows.len()
    }

    /// Returns true if the store holds no rows.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.rows.is_empty()
    }

    fn apply_op(inner: &mut StoreInner, op: WriteOp) {
        match op {
            WriteOp::Put { key, row } => {
                inner.clock += 1;
                let stored = StoredRow {
                    value: row.value,
                    expires_at: row.expires_at,
                    evict_at: row.evict_at,
                    local_time: inner.clock,
                };
                inner.history.entry(key.clone()).or_default().push(VersionEntry {
                    local_time: stored.local_time,
                    operation: "put".to_string(),
                    value: stored.value.clone(),
                });
                inner.rows.insert(key, stored);
            }
            WriteOp::Patch { key, patch } => {
                // Patching an absent row is a no-op, not an insert
                if let Some(row) = inner.rows.get_mut(&key) {
                    inner.clock += 1;
                    if let Some(value) = patch.value {
                        row.value = value;
                    }
                    if let Some(expires_at) = patch.expires_at {
                        row.expires_at = expires_at;
                    }
                    if let Some(evict_at) = patch.evict_at {
                        row.evict_at = evict_at;
                    }
                    row.local_time = inner.clock;
                    inner.history.entry(key).or_default().push(VersionEntry {
                        local_time: row.local_time,
                        operation: "patch".to_string(),
                        value: row.value.clone(),
                    });
                }
            }
            WriteOp::Delete { key } => {
                if inner.rows.remove(&key).is_some() {
                    inner.clock += 1;
                    let local_time = inner.clock;
                    inner.history.entry(key).or_default().push(VersionEntry {
                        local_time,
                        operation: "delete".to_string(),
                        value: None,
                    });
                }
            }
        }
    }

    /// Bumps the commit sequence, releasing anyone blocked on the watch.
    fn signal_commit(&self) {
        self.commit_tx.send_modify(|seq| *seq += 1);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PrimaryStore for MemoryStore {
    async fn get(&self, key: &str) -> Option<StoredRow> {
        self.inner.read().await.rows.get(key).cloned()
    }

    async fn put(&self, key: &str, row: RowInit) {
        {
            let mut inner = self.inner.write().await;
            Self::apply_op(
                &mut inner,
                WriteOp::Put {
                    key: key.to_string(),
                    row,
                },
            );
        }
        self.signal_commit();
    }

    async fn patch(&self, key: &str, patch: RowPatch) -> bool {
        let existed = {
            let mut inner = self.inner.write().await;
            let existed = inner.rows.contains_key(key);
            Self::apply_op(
                &mut inner,
                WriteOp::Patch {
                    key: key.to_string(),
                    patch,
                },
            );
            existed
        };
        self.signal_commit();
        existed
    }

    async fn delete(&self, key: &str) -> bool {
        let existed = {
            let mut inner = self.inner.write().await;
            let existed = inner.rows.contains_key(key);
            Self::apply_op(
                &mut inner,
                WriteOp::Delete {
                    key: key.to_string(),
                },
            );
            existed
        };
        self.signal_commit();
        existed
    }

    async fn put_if_absent(&self, key: &str, row: RowInit) -> bool {
        let inserted = {
            let mut inner = self.inner.write().await;
            if inner.rows.contains_key(key) {
                false
            } else {
                Self::apply_op(
                    &mut inner,
                    WriteOp::Put {
                        key: key.to_string(),
                        row,
                    },
                );
                true
            }
        };
        if inserted {
            self.signal_commit();
        }
        inserted
    }

    async fn apply(&self, batch: Vec<WriteOp>) {
        if batch.is_empty() {
            return;
        }
        {
            let mut inner = self.inner.write().await;
            for op in batch {
                Self::apply_op(&mut inner, op);
            }
        }
        self.signal_commit();
    }

    async fn committed(&self) {
        // Writes are durable the moment they are applied; yield so waiters
        // scheduled behind a completed write observe it.
        tokio::task::yield_now().await;
    }

    fn commit_watch(&self) -> watch::Receiver<u64> {
        self.commit_tx.subscribe()
    }

    async fn get_range(&self, opts: RangeOptions) -> Vec<(String, StoredRow)> {
        let inner = self.inner.read().await;
        let start = match (&opts.prefix, &opts.start) {
            (Some(prefix), Some(start)) if start.as_str() > prefix.as_str() => start.clone(),
            (Some(prefix), _) => prefix.clone(),
            (None, Some(start)) => start.clone(),
            (None, None) => String::new(),
        };
        let mut out = Vec::new();
        for (key, row) in inner.rows.range((Bound::Included(start), Bound::Unbounded)) {
            if let Some(prefix) = &opts.prefix {
                if !key.starts_with(prefix.as_str()) {
                    break;
                }
            }
            if let Some(end) = &opts.end {
                if key.as_str() >= end.as_str() {
                    break;
                }
            }
            out.push((key.clone(), row.clone()));
            if let Some(limit) = opts.limit {
                if out.len() >= limit {
                    break;
                }
            }
        }
        out
    }

    async fn get_history_of_record(&self, key: &str) -> Vec<VersionEntry> {
        self.inner
            .read()
            .await
            .history
            .get(key)
            .cloned()
            .unwrap_or_default()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: serde_json::Value) -> RowInit {
        RowInit {
            value: Some(value),
            expires_at: u64::MAX,
            evict_at: u64::MAX,
        }
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = MemoryStore::new();
        store.put("k1", row(json!("v1"))).await;

        let stored = store.get("k1").await.unwrap();
        assert_eq!(stored.value, Some(json!("v1")));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_get_absent() {
        let store = MemoryStore::new();
        assert!(store.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryStore::new();
        store.put("k1", row(json!("v1"))).await;

        assert!(store.delete("k1").await);
        assert!(store.get("k1").await.is_none());
        assert!(!store.delete("k1").await);
    }

    #[tokio::test]
    async fn test_patch_updates_only_given_fields() {
        let store = MemoryStore::new();
        store.put(
            "k1",
            RowInit {
                value: Some(json!("v1")),
                expires_at: 100,
                evict_at: 200,
            },
        )
        .await;

        let patched = store
            .patch(
                "k1",
                RowPatch {
                    expires_at: Some(50),
                    ..RowPatch::default()
                },
            )
            .await;
        assert!(patched);

        let stored = store.get("k1").await.unwrap();
        assert_eq!(stored.expires_at, 50);
        assert_eq!(stored.evict_at, 200);
        assert_eq!(stored.value, Some(json!("v1")));
    }

    #[tokio::test]
    async fn test_patch_absent_is_noop() {
        let store = MemoryStore::new();
        let patched = store
            .patch(
                "ghost",
                RowPatch {
                    expires_at: Some(1),
                    ..RowPatch::default()
                },
            )
            .await;
        assert!(!patched);
        assert!(store.get("ghost").await.is_none());
    }

    #[tokio::test]
    async fn test_put_if_absent_claims_once() {
        let store = MemoryStore::new();
        assert!(store.put_if_absent("claim", row(json!(1))).await);
        assert!(!store.put_if_absent("claim", row(json!(2))).await);

        let stored = store.get("claim").await.unwrap();
        assert_eq!(stored.value, Some(json!(1)));
    }

    #[tokio::test]
    async fn test_local_time_is_monotonic() {
        let store = MemoryStore::new();
        store.put("a", row(json!(1))).await;
        store.put("b", row(json!(2))).await;
        store.put("a", row(json!(3))).await;

        let a = store.get("a").await.unwrap();
        let b = store.get("b").await.unwrap();
        assert!(a.local_time > b.local_time);
    }

    #[tokio::test]
    async fn test_apply_is_atomic_unit() {
        let store = MemoryStore::new();
        store.put("old", row(json!("x"))).await;

        let mut watch = store.commit_watch();
        let before = *watch.borrow_and_update();

        store
            .apply(vec![
                WriteOp::Put {
                    key: "new".to_string(),
                    row: row(json!("y")),
                },
                WriteOp::Delete {
                    key: "old".to_string(),
                },
            ])
            .await;

        // One batch, one commit tick
        assert_eq!(*store.commit_watch().borrow(), before + 1);
        assert!(store.get("old").await.is_none());
        assert!(store.get("new").await.is_some());
    }

    #[tokio::test]
    async fn test_commit_watch_signals_writes() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let mut watch = store.commit_watch();
        watch.borrow_and_update();

        let writer = store.clone();
        let handle = tokio::spawn(async move {
            writer.put("k", row(json!("v"))).await;
        });

        watch.changed().await.unwrap();
        handle.await.unwrap();
        assert!(store.get("k").await.is_some());
    }

    #[tokio::test]
    async fn test_get_range_with_prefix() {
        let store = MemoryStore::new();
        store.put("idx:age:10:a", row(json!("a"))).await;
        store.put("idx:age:20:b", row(json!("b"))).await;
        store.put("idx:name:x:c", row(json!("c"))).await;
        store.put("plain", row(json!("d"))).await;

        let rows = store
            .get_range(RangeOptions {
                prefix: Some("idx:age:".to_string()),
                ..RangeOptions::default()
            })
            .await;

        let keys: Vec<&str> = rows.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["idx:age:10:a", "idx:age:20:b"]);
    }

    #[tokio::test]
    async fn test_get_range_bounds_and_limit() {
        let store = MemoryStore::new();
        for key in ["a", "b", "c", "d"] {
            store.put(key, row(json!(key))).await;
        }

        let rows = store
            .get_range(RangeOptions {
                start: Some("b".to_string()),
                end: Some("d".to_string()),
                ..RangeOptions::default()
            })
            .await;
        let keys: Vec<&str> = rows.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["b", "c"]);

        let rows = store
            .get_range(RangeOptions {
                limit: Some(2),
                ..RangeOptions::default()
            })
            .await;
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_history_records_versions_in_order() {
        let store = MemoryStore::new();
        store.put("k", row(json!("v1"))).await;
        store
            .patch(
                "k",
                RowPatch {
                    value: Some(Some(json!("v2"))),
                    ..RowPatch::default()
                },
            )
            .await;
        store.delete("k").await;

        let history = store.get_history_of_record("k").await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].operation, "put");
        assert_eq!(history[1].operation, "patch");
        assert_eq!(history[2].operation, "delete");
        assert!(history[0].local_time < history[1].local_time);
        assert!(history[1].local_time < history[2].local_time);
        assert_eq!(history[1].value, Some(json!("v2")));
    }
}
