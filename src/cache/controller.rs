//! Cache Controller Module
//!
//! Orchestrates reads, writes and invalidations against the primary store,
//! the TTL policy, the stampede coordinator and the source adapter.
//!
//! The controller never mutates persisted state directly; every write goes
//! through the primary store as a transactional unit of work (record row,
//! secondary index entries and pending-fetch marker together), and every
//! decision about an entry's freshness is made against a row just read from
//! the store, never against an in-process snapshot alone.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::entry::{current_timestamp_ms, CacheEntry, EntryState};
use crate::cache::flight::{Claim, FlightCoordinator, LeaderGuard, PENDING_PREFIX};
use crate::cache::index::{self, INDEX_PREFIX};
use crate::cache::policy::{TtlPolicy, TtlSpec};
use crate::cache::stats::CacheStats;
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::event::{EventBus, EventFilter, EventKind, InvalidationEvent, Subscription};
use crate::source::SourceAdapter;
use crate::store::{PrimaryStore, RangeOptions, RowInit, RowPatch, VersionEntry, WriteOp};

// == Stale Predicate ==
/// Strategy consulted when a read finds a stale entry: returning true serves
/// the stale value immediately and revalidates in the background.
pub type StalePredicate = dyn Fn(&CacheEntry, &str) -> bool + Send + Sync;

// == Read Options ==
/// Per-read directives.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    /// Never contact the source adapter; serve whatever is cached, stale
    /// included, or "no value" on a miss. Default: false.
    pub only_if_cached: bool,
    /// If a synchronous refresh fails and a stale value exists, serve the
    /// stale value instead of raising. Default: false.
    pub stale_if_error: bool,
    /// Force a synchronous refresh of a stale entry even when the
    /// stale-while-revalidate predicate would serve it as-is. No effect on
    /// fresh entries or `only_if_cached` reads. Default: false.
    pub ensure_loaded: bool,
}

// == Put Options ==
/// Per-write directives.
#[derive(Debug, Clone, Copy, Default)]
pub struct PutOptions {
    /// Explicit expiration instant (epoch ms) overriding the TTL policy.
    /// An instant in the past is permitted and makes the entry immediately
    /// stale (and evictable, once the policy's stale window also elapses).
    pub expires_at: Option<u64>,
}

// == Cache Read ==
/// Result of a read: the value (or "no value"), its lifecycle state, and
/// whether the source adapter was contacted during this call.
pub struct CacheRead {
    key: String,
    value: Option<Value>,
    state: EntryState,
    from_source: bool,
    controller: CacheController,
}

impl CacheRead {
    /// The key this result was read for.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The cached payload, or `None` for a miss / negative-cache result.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Consumes the result, returning the payload.
    pub fn into_value(self) -> Option<Value> {
        self.value
    }

    /// Lifecycle state the entry was in when served.
    pub fn state(&self) -> EntryState {
        self.state
    }

    /// True if the source adapter was called to produce this result.
    pub fn was_loaded_from_source(&self) -> bool {
        self.from_source
    }

    /// Invalidates the entry this result was read from.
    ///
    /// Routes through the same primitive as the controller-level
    /// [`CacheController::invalidate`].
    pub async fn invalidate(&self) -> Result<()> {
        self.controller.invalidate(&self.key).await
    }
}

impl fmt::Debug for CacheRead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheRead")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("state", &self.state)
            .field("from_source", &self.from_source)
            .finish()
    }
}

// == Cache Controller ==
/// The read-through caching engine.
///
/// Cheap to clone; clones share all state. Background revalidations are
/// spawned from clones of the controller itself.
#[derive(Clone)]
pub struct CacheController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    store: Arc<dyn PrimaryStore>,
    source: Arc<dyn SourceAdapter>,
    flights: FlightCoordinator,
    events: EventBus,
    policy: RwLock<TtlPolicy>,
    allow_stale: RwLock<Arc<StalePredicate>>,
    stats: Mutex<CacheStats>,
    /// Keys invalidated and not yet re-resolved; bounds event emission
    invalidated: Mutex<HashSet<String>>,
    indexed: Vec<String>,
    resource: String,
}

impl CacheController {
    // == Constructor ==
    /// Creates a controller over a primary store and source adapter.
    ///
    /// The TTL policy, resource name and indexed attributes come from the
    /// configuration; the stale-while-revalidate predicate defaults to
    /// "never" (stale reads revalidate synchronously) until one is injected.
    pub fn new(
        store: Arc<dyn PrimaryStore>,
        source: Arc<dyn SourceAdapter>,
        config: &Config,
    ) -> Result<Self> {
        let policy = TtlPolicy::from_spec(config.ttl_spec())?;
        let default_predicate: Arc<StalePredicate> = Arc::new(|_: &CacheEntry, _: &str| false);
        info!(
            resource = %config.resource_name,
            expiration_ms = policy.expiration_ms,
            eviction_ms = policy.eviction_ms,
            "cache controller initialized"
        );
        Ok(Self {
            inner: Arc::new(ControllerInner {
                flights: FlightCoordinator::new(store.clone()),
                store,
                source,
                events: EventBus::new(),
                policy: RwLock::new(policy),
                allow_stale: RwLock::new(default_predicate),
                stats: Mutex::new(CacheStats::new()),
                invalidated: Mutex::new(HashSet::new()),
                indexed: config.indexed_attributes.clone(),
                resource: config.resource_name.clone(),
            }),
        })
    }

    /// Name of the cached resource (used in error messages and logs).
    pub fn resource(&self) -> &str {
        &self.inner.resource
    }

    // == TTL Configuration ==
    /// Installs a new TTL policy, rejecting invalid specs synchronously.
    ///
    /// Effective for entries refreshed after this call; already-stored
    /// timestamps are untouched.
    pub fn set_ttl_expiration(&self, spec: TtlSpec) -> Result<()> {
        let policy = TtlPolicy::from_spec(spec)?;
        *self.inner.policy.write().expect("policy lock poisoned") = policy;
        Ok(())
    }

    /// Injects the stale-while-revalidate predicate.
    pub fn set_stale_while_revalidate<F>(&self, predicate: F)
    where
        F: Fn(&CacheEntry, &str) -> bool + Send + Sync + 'static,
    {
        *self
            .inner
            .allow_stale
            .write()
            .expect("predicate lock poisoned") = Arc::new(predicate);
    }

    // == Subscribe ==
    /// Subscribes to invalidation/resolution events.
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        self.inner.events.subscribe(filter)
    }

    // == Get ==
    /// Reads `key`, fetching through the source adapter when the cached
    /// entry is missing, evicted, or stale (subject to the directives).
    pub async fn get(&self, key: &str, options: ReadOptions) -> Result<CacheRead> {
        let now = current_timestamp_ms();
        match self.load(key, now).await {
            // Missing or past eviction: a miss on every read path
            None => {
                self.with_stats(|s| s.record_miss());
                if options.only_if_cached {
                    debug!(key, "miss under only_if_cached, serving no value");
                    return Ok(self.read_result(key, None, false));
                }
                let fetched = self.fetch_resolved(key).await?;
                Ok(self.read_result(key, fetched, true))
            }
            Some(entry) if !entry.is_expired(now) => {
                self.with_stats(|s| s.record_hit());
                Ok(self.read_result(key, Some(entry), false))
            }
            // Stale window: present but no longer authoritative
            Some(stale) => {
                self.with_stats(|s| s.record_stale_hit());
                if options.only_if_cached {
                    return Ok(self.read_result(key, Some(stale), false));
                }
                let predicate = self.predicate();
                let serve_stale = !options.ensure_loaded && (*predicate)(&stale, key);
                if serve_stale {
                    self.spawn_background_refresh(key).await;
                    let mut read = self.read_result(key, Some(stale), false);
                    read.state = EntryState::Updating;
                    return Ok(read);
                }
                match self.fetch_resolved(key).await {
                    Ok(fresh) => Ok(self.read_result(key, fresh, true)),
                    Err(err) if options.stale_if_error => {
                        warn!(key, error = %err, "refresh failed, serving stale value");
                        Ok(self.read_result(key, Some(stale), false))
                    }
                    Err(err) => Err(err),
                }
            }
        }
    }

    // == Put ==
    /// Stores `value` under `key` directly, bypassing the source adapter.
    ///
    /// `None` writes the negative-cache tombstone. Secondary index entries
    /// for indexed attributes ride in the same transactional batch.
    pub async fn put(&self, key: &str, value: Option<Value>, options: PutOptions) -> Result<()> {
        let now = current_timestamp_ms();
        let policy = self.policy();
        let (expires_at, evict_at) = match options.expires_at {
            // An explicit instant (possibly in the past) pins staleness; the
            // eviction offset keeps the policy's stale window
            Some(instant) => (instant, instant.saturating_add(policy.stale_window_ms())),
            None => policy.window(now),
        };

        let mut batch = self.index_rewrite_ops(key, value.as_ref()).await;
        batch.push(WriteOp::Put {
            key: key.to_string(),
            row: RowInit {
                value,
                expires_at,
                evict_at,
            },
        });
        self.inner.store.apply(batch).await;
        self.inner.store.committed().await;
        self.resolve_invalidation(key);
        Ok(())
    }

    // == Delete ==
    /// Removes the entry and its index rows entirely.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let Some(old) = self.inner.store.get(key).await else {
            return Ok(());
        };
        let mut batch = Vec::new();
        if let Some(old_value) = &old.value {
            batch.extend(index::remove_ops(&self.inner.indexed, key, old_value));
        }
        batch.push(WriteOp::Delete {
            key: key.to_string(),
        });
        self.inner.store.apply(batch).await;
        self.inner.store.committed().await;
        // The row is gone; any unresolved invalidation for it is moot
        self.inner
            .invalidated
            .lock()
            .expect("invalidation set lock poisoned")
            .remove(key);
        Ok(())
    }

    // == Invalidate ==
    /// Forces the entry's expiration to "now": the row stays, the value is
    /// no longer authoritative, and no fetch is started eagerly.
    ///
    /// Emits at most one event per externally distinguishable invalidation;
    /// re-invalidating an already-unresolved entry is coalesced.
    pub async fn invalidate(&self, key: &str) -> Result<()> {
        let now = current_timestamp_ms();
        let patched = self
            .inner
            .store
            .patch(
                key,
                RowPatch {
                    expires_at: Some(now),
                    ..RowPatch::default()
                },
            )
            .await;
        if !patched {
            debug!(key, "invalidate on absent row, nothing to do");
            return Ok(());
        }
        self.inner.store.committed().await;
        self.with_stats(|s| s.record_invalidation());

        let newly = self
            .inner
            .invalidated
            .lock()
            .expect("invalidation set lock poisoned")
            .insert(key.to_string());
        if newly {
            self.inner
                .events
                .publish(InvalidationEvent::new(key, EventKind::Invalidate));
        }
        Ok(())
    }

    // == Search ==
    /// Range search over one indexed attribute, satisfied from the index
    /// and the primary rows alone; the source adapter is never contacted.
    ///
    /// `start` is inclusive and `end` exclusive, both in the attribute's
    /// encoded form (see [`index::encode_component`]).
    pub async fn search(
        &self,
        attribute: &str,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<Vec<CacheRead>> {
        let prefix = index::attribute_prefix(attribute);
        let rows = self
            .inner
            .store
            .get_range(RangeOptions {
                start: start.map(|s| format!("{prefix}{s}")),
                end: end.map(|e| format!("{prefix}{e}")),
                prefix: Some(prefix),
                limit: None,
            })
            .await;

        let now = current_timestamp_ms();
        let mut out = Vec::new();
        for (_, row) in rows {
            let Some(Value::String(primary_key)) = row.value else {
                continue;
            };
            if let Some(entry) = self.load(&primary_key, now).await {
                out.push(self.read_result(&primary_key, Some(entry), false));
            }
        }
        Ok(out)
    }

    // == Eviction Sweep ==
    /// Removes every primary row past its eviction instant, together with
    /// its index rows. Returns the number of records removed.
    pub async fn sweep_evicted(&self) -> usize {
        let now = current_timestamp_ms();
        let rows = self.inner.store.get_range(RangeOptions::default()).await;

        let mut batch = Vec::new();
        let mut removed = 0usize;
        for (key, row) in rows {
            if key.starts_with(INDEX_PREFIX) || key.starts_with(PENDING_PREFIX) {
                continue;
            }
            if now >= row.evict_at {
                if let Some(value) = &row.value {
                    batch.extend(index::remove_ops(&self.inner.indexed, &key, value));
                }
                batch.push(WriteOp::Delete { key });
                removed += 1;
            }
        }
        if removed > 0 {
            self.inner.store.apply(batch).await;
            self.inner.store.committed().await;
            self.with_stats(|s| s.record_evictions(removed as u64));
        }
        removed
    }

    // == Stats ==
    /// Snapshot of the controller's counters plus the live entry count.
    pub async fn stats(&self) -> CacheStats {
        let mut snapshot = self
            .inner
            .stats
            .lock()
            .expect("stats lock poisoned")
            .clone();
        let now = current_timestamp_ms();
        snapshot.total_entries = self
            .inner
            .store
            .get_range(RangeOptions::default())
            .await
            .iter()
            .filter(|(key, row)| {
                !key.starts_with(INDEX_PREFIX)
                    && !key.starts_with(PENDING_PREFIX)
                    && now < row.evict_at
            })
            .count();
        snapshot
    }

    // == History ==
    /// Ordered version history the store recorded for `key` (audit/debug).
    pub async fn get_history_of_record(&self, key: &str) -> Vec<VersionEntry> {
        self.inner.store.get_history_of_record(key).await
    }

    // == Fetch Path ==
    /// Resolves `key` through the stampede coordinator: lead the fetch, or
    /// wait on whoever already is, then read what they committed.
    async fn fetch_resolved(&self, key: &str) -> Result<Option<CacheEntry>> {
        loop {
            match self.inner.flights.claim(key).await {
                Claim::Leader(guard) => return self.lead_fetch(key, guard).await,
                Claim::Local(slot) => {
                    self.with_stats(|s| s.record_coalesced_wait());
                    self.inner.flights.await_local(slot).await?;
                    return Ok(self.load(key, current_timestamp_ms()).await);
                }
                Claim::Remote => {
                    self.with_stats(|s| s.record_coalesced_wait());
                    self.inner.flights.await_remote(key).await;
                    let now = current_timestamp_ms();
                    if let Some(entry) = self.load(key, now).await {
                        if !entry.is_expired(now) {
                            return Ok(Some(entry));
                        }
                    }
                    // The remote fetch did not leave a fresh entry (it failed
                    // or the row aged out); take over and resolve ourselves.
                    continue;
                }
            }
        }
    }

    /// Executes the single outstanding source fetch for `key`.
    async fn lead_fetch(&self, key: &str, guard: LeaderGuard) -> Result<Option<CacheEntry>> {
        self.with_stats(|s| s.record_source_fetch());
        debug!(key, resource = %self.inner.resource, "resolving record from source");

        match self.inner.source.get(key).await {
            Ok(value) => {
                let now = current_timestamp_ms();
                let (expires_at, evict_at) = self.policy().window(now);

                // Value, index entries and marker clear commit as one unit
                let mut batch = self.index_rewrite_ops(key, value.as_ref()).await;
                batch.push(WriteOp::Put {
                    key: key.to_string(),
                    row: RowInit {
                        value,
                        expires_at,
                        evict_at,
                    },
                });
                batch.push(guard.marker_clear_op());
                self.inner.store.apply(batch).await;
                self.inner.store.committed().await;

                self.resolve_invalidation(key);
                self.inner.flights.release(guard, Ok(())).await;
                Ok(self.load(key, current_timestamp_ms()).await)
            }
            Err(source_err) => {
                let err = CacheError::source(source_err, key, &self.inner.resource);
                warn!(key, error = %err, "source resolution failed");
                self.inner.flights.release(guard, Err(err.clone())).await;
                Err(err)
            }
        }
    }

    /// Starts a background revalidation if no fetch is in flight for `key`.
    async fn spawn_background_refresh(&self, key: &str) {
        match self.inner.flights.claim(key).await {
            Claim::Leader(guard) => {
                let controller = self.clone();
                let key = key.to_string();
                tokio::spawn(async move {
                    if let Err(err) = controller.lead_fetch(&key, guard).await {
                        warn!(key = %key, error = %err, "background revalidation failed");
                    }
                });
            }
            // Already refreshing somewhere; the stale value being served is
            // as current as it gets right now
            Claim::Local(_) | Claim::Remote => {}
        }
    }

    // == Internals ==
    /// Loads the entry for `key`, treating rows past eviction as missing.
    async fn load(&self, key: &str, now: u64) -> Option<CacheEntry> {
        let row = self.inner.store.get(key).await?;
        let entry = CacheEntry::from_row(key, row);
        if entry.is_evicted(now) {
            None
        } else {
            Some(entry)
        }
    }

    /// Index ops replacing the entries of the currently stored value with
    /// entries for `new_value`, for inclusion in a record write batch.
    async fn index_rewrite_ops(&self, key: &str, new_value: Option<&Value>) -> Vec<WriteOp> {
        if self.inner.indexed.is_empty() {
            return Vec::new();
        }
        let mut ops = Vec::new();
        if let Some(old) = self.inner.store.get(key).await {
            if let Some(old_value) = &old.value {
                ops.extend(index::remove_ops(&self.inner.indexed, key, old_value));
            }
        }
        if let Some(new_value) = new_value {
            ops.extend(index::insert_ops(&self.inner.indexed, key, new_value));
        }
        ops
    }

    /// Clears a pending invalidation after a successful write/refresh,
    /// emitting the matching resolve event.
    fn resolve_invalidation(&self, key: &str) {
        let resolved = self
            .inner
            .invalidated
            .lock()
            .expect("invalidation set lock poisoned")
            .remove(key);
        if resolved {
            self.inner
                .events
                .publish(InvalidationEvent::new(key, EventKind::Resolve));
        }
    }

    fn read_result(&self, key: &str, entry: Option<CacheEntry>, from_source: bool) -> CacheRead {
        let now = current_timestamp_ms();
        let (value, state) = match entry {
            Some(entry) => {
                let state = entry.state_at(now);
                (entry.value, state)
            }
            None => (None, EntryState::Absent),
        };
        CacheRead {
            key: key.to_string(),
            value,
            state,
            from_source,
            controller: self.clone(),
        }
    }

    fn policy(&self) -> TtlPolicy {
        *self.inner.policy.read().expect("policy lock poisoned")
    }

    fn predicate(&self) -> Arc<StalePredicate> {
        self.inner
            .allow_stale
            .read()
            .expect("predicate lock poisoned")
            .clone()
    }

    fn with_stats(&self, f: impl FnOnce(&mut CacheStats)) {
        let mut stats = self.inner.stats.lock().expect("stats lock poisoned");
        f(&mut stats);
    }

    /// Wipes the in-process flight registry, simulating a cooperating
    /// worker whose local view does not include this worker's flights.
    #[cfg(test)]
    pub(crate) fn clear_local_flights(&self) {
        self.inner.flights.clear_local_registry();
    }
}
