//! Stampede Coordinator Module
//!
//! Single-flight registry ensuring at most one outstanding source fetch per
//! key, system-wide. Coordination is two-tier:
//!
//! - an in-process map of flight slots, the fast path for readers that land
//!   in the same worker as the leader;
//! - a pending-fetch marker row committed through the primary store, the
//!   authoritative mechanism that readers in other workers observe.
//!
//! The in-process map is a performance optimization only. A claim is won by
//! the atomic conditional insert of the marker; a worker whose local view is
//! wiped mid-flight still coordinates correctly through the marker and the
//! store's commit signal.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::Notify;
use tracing::debug;

use crate::cache::entry::current_timestamp_ms;
use crate::error::CacheError;
use crate::store::{PrimaryStore, RowInit, WriteOp};

/// Namespace prefix for pending-fetch marker rows.
pub const PENDING_PREFIX: &str = "pending:";

/// Store key of the pending-fetch marker for a cache key.
pub fn marker_key(key: &str) -> String {
    format!("{PENDING_PREFIX}{key}")
}

// == Flight Slot ==
/// In-process rendezvous for readers coalesced onto one fetch.
pub struct FlightSlot {
    notify: Notify,
    outcome: Mutex<Option<Result<(), CacheError>>>,
}

impl FlightSlot {
    fn new() -> Self {
        Self {
            notify: Notify::new(),
            outcome: Mutex::new(None),
        }
    }
}

// == Leader Guard ==
/// Held by the single caller that owns the fetch for a key. The holder must
/// hand it back through [`FlightCoordinator::release`] on either outcome.
pub struct LeaderGuard {
    key: String,
    slot: Arc<FlightSlot>,
}

impl LeaderGuard {
    /// Key this guard owns the fetch for.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Write op clearing this flight's durable marker, for inclusion in the
    /// same transactional batch as the resolved value.
    pub fn marker_clear_op(&self) -> WriteOp {
        WriteOp::Delete {
            key: marker_key(&self.key),
        }
    }
}

// == Claim ==
/// Result of attempting to start a fetch for a key.
pub enum Claim {
    /// No fetch was in flight; the caller now owns it
    Leader(LeaderGuard),
    /// A fetch is in flight in this process; wait on the slot
    Local(Arc<FlightSlot>),
    /// A fetch is in flight in another worker; wait on the durable marker
    Remote,
}

// == Flight Coordinator ==
/// Per-key single-flight registry backed by the primary store.
pub struct FlightCoordinator {
    store: Arc<dyn PrimaryStore>,
    local: Mutex<HashMap<String, Arc<FlightSlot>>>,
}

impl FlightCoordinator {
    // == Constructor ==
    /// Creates a coordinator writing markers through `store`.
    pub fn new(store: Arc<dyn PrimaryStore>) -> Self {
        Self {
            store,
            local: Mutex::new(HashMap::new()),
        }
    }

    // == Claim ==
    /// Attempts to claim the fetch for `key`.
    ///
    /// Checks the in-process registry first, then the durable marker, then
    /// races the conditional marker insert. Exactly one concurrent caller
    /// system-wide observes [`Claim::Leader`]; the marker is durable before
    /// this returns, so no cooperating worker can start a second fetch.
    pub async fn claim(&self, key: &str) -> Claim {
        if let Some(slot) = self.local_slot(key) {
            return Claim::Local(slot);
        }

        let marker = marker_key(key);
        if self.store.get(&marker).await.is_some() {
            debug!(key, "fetch already pending in another worker");
            return Claim::Remote;
        }

        let claimed = self
            .store
            .put_if_absent(
                &marker,
                RowInit {
                    value: Some(Value::from(current_timestamp_ms())),
                    expires_at: u64::MAX,
                    evict_at: u64::MAX,
                },
            )
            .await;
        if !claimed {
            // Lost the insert race; treat the winner as a remote leader even
            // if it happens to live in this process.
            return Claim::Remote;
        }
        self.store.committed().await;

        let slot = Arc::new(FlightSlot::new());
        self.local
            .lock()
            .expect("flight registry lock poisoned")
            .insert(key.to_string(), slot.clone());
        debug!(key, "claimed fetch leadership");
        Claim::Leader(LeaderGuard {
            key: key.to_string(),
            slot,
        })
    }

    // == Release ==
    /// Completes a leader's flight and wakes every coalesced reader.
    ///
    /// On success the caller has already cleared the durable marker inside
    /// its resolution batch (see [`LeaderGuard::marker_clear_op`]); on
    /// failure the marker is cleared here so a subsequent read retries
    /// naturally.
    pub async fn release(&self, guard: LeaderGuard, outcome: Result<(), CacheError>) {
        if outcome.is_err() {
            self.store.delete(&marker_key(&guard.key)).await;
            self.store.committed().await;
        }

        // Unregister before publishing the outcome: readers arriving after
        // this point must start a fresh claim, not join a finished flight.
        self.local
            .lock()
            .expect("flight registry lock poisoned")
            .remove(&guard.key);
        *guard
            .slot
            .outcome
            .lock()
            .expect("flight slot lock poisoned") = Some(outcome);
        guard.slot.notify.notify_waiters();
    }

    // == Wait (local) ==
    /// Waits on an in-process flight and returns the leader's outcome.
    pub async fn await_local(&self, slot: Arc<FlightSlot>) -> Result<(), CacheError> {
        let notified = slot.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if let Some(outcome) = slot
            .outcome
            .lock()
            .expect("flight slot lock poisoned")
            .clone()
        {
            return outcome;
        }
        notified.await;
        slot.outcome
            .lock()
            .expect("flight slot lock poisoned")
            .clone()
            .unwrap_or(Ok(()))
    }

    // == Wait (remote) ==
    /// Waits until the durable marker for `key` is gone.
    ///
    /// Rides the store's commit signal: each committed unit of work wakes
    /// the waiter to re-check the marker, so no polling loop spins while the
    /// remote fetch is still running.
    pub async fn await_remote(&self, key: &str) {
        let marker = marker_key(key);
        let mut watch = self.store.commit_watch();
        loop {
            // Mark the current commit seq as seen before re-checking, so a
            // clear that commits during the check still wakes changed()
            watch.borrow_and_update();
            if self.store.get(&marker).await.is_none() {
                return;
            }
            if watch.changed().await.is_err() {
                return;
            }
        }
    }

    /// Looks up the in-process slot for a key.
    fn local_slot(&self, key: &str) -> Option<Arc<FlightSlot>> {
        self.local
            .lock()
            .expect("flight registry lock poisoned")
            .get(key)
            .cloned()
    }

    /// Wipes the in-process registry, as if this worker had just started.
    ///
    /// Durable markers are untouched; coordination falls back to the store.
    /// Exists for adversarial tests simulating a second worker.
    #[cfg(test)]
    pub(crate) fn clear_local_registry(&self) {
        self.local
            .lock()
            .expect("flight registry lock poisoned")
            .clear();
    }
}
