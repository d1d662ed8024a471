//! Debounced unsubscription
//!
//! Subscribing is applied immediately so a tile that scrolls into view never
//! stalls. Unsubscribing through [`DebouncedSubscriptions::unsubscribe_debounced`]
//! waits for a quiet period so scroll and rotation flicker does not drop and
//! re-request the same track.
//!
//! Each track key owns at most one pending timer. Scheduling again cancels and
//! restarts it, and any subscribe or explicit unsubscribe for the key cancels
//! it. A timer only fires if its generation is still the registered one, and
//! when it does it sends every key whose deadline has passed in one request.

use crate::error::{Error, Result};
use crate::store::{SubscriptionStore, Subscriptions};
use crate::types::{TrackKey, TrackSubscription, VideoDimension};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Delay applied to debounced unsubscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebouncePolicy {
    pub debounce_time_ms: u64,
}

impl DebouncePolicy {
    #[must_use]
    pub const fn from_millis(debounce_time_ms: u64) -> Self {
        Self { debounce_time_ms }
    }

    /// Unsubscribe as soon as the scheduler runs
    #[must_use]
    pub const fn immediate() -> Self {
        Self::from_millis(0)
    }

    #[must_use]
    pub const fn debounce_time(&self) -> Duration {
        Duration::from_millis(self.debounce_time_ms)
    }
}

impl Default for DebouncePolicy {
    fn default() -> Self {
        Self::from_millis(2000)
    }
}

struct PendingUnsubscribe {
    generation: u64,
    deadline: Instant,
    task: JoinHandle<()>,
}

struct DebounceState {
    /// Orders timer firings against immediate calls
    gate: tokio::sync::Mutex<()>,
    pending: Mutex<HashMap<TrackKey, PendingUnsubscribe>>,
}

impl DebounceState {
    fn cancel(&self, key: &TrackKey) -> bool {
        if let Some(pending) = self.pending.lock().remove(key) {
            pending.task.abort();
            debug!(track = %key, "Cancelled pending unsubscribe");
            true
        } else {
            false
        }
    }
}

pub struct DebouncedSubscriptions {
    store: Arc<SubscriptionStore>,
    state: Arc<DebounceState>,
    policy: RwLock<DebouncePolicy>,
    next_generation: AtomicU64,
}

impl DebouncedSubscriptions {
    pub fn new(store: Arc<SubscriptionStore>, policy: DebouncePolicy) -> Self {
        Self {
            store,
            state: Arc::new(DebounceState {
                gate: tokio::sync::Mutex::new(()),
                pending: Mutex::new(HashMap::new()),
            }),
            policy: RwLock::new(policy),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Replace the delay used for subsequently scheduled unsubscriptions
    pub fn set_debounce_policy(&self, policy: DebouncePolicy) {
        debug!(debounce_time_ms = policy.debounce_time_ms, "Debounce policy updated");
        *self.policy.write() = policy;
    }

    #[must_use]
    pub fn debounce_policy(&self) -> DebouncePolicy {
        *self.policy.read()
    }

    #[must_use]
    pub fn store(&self) -> &Arc<SubscriptionStore> {
        &self.store
    }

    #[must_use]
    pub fn subscriptions(&self) -> Subscriptions {
        self.store.subscriptions()
    }

    /// Keys with an unsubscribe waiting for its quiet period
    #[must_use]
    pub fn pending_unsubscribes(&self) -> Vec<TrackKey> {
        let mut keys: Vec<TrackKey> = self.state.pending.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn subscribe(
        &self,
        key: TrackKey,
        dimension: VideoDimension,
    ) -> Result<TrackSubscription> {
        let _gate = self.state.gate.lock().await;
        self.state.cancel(&key);
        self.store.subscribe(key, dimension).await
    }

    pub async fn subscribe_batch(
        &self,
        sessions: Vec<(TrackKey, VideoDimension)>,
    ) -> Result<Vec<TrackSubscription>> {
        let _gate = self.state.gate.lock().await;
        for (key, _) in &sessions {
            self.state.cancel(key);
        }
        self.store.subscribe_batch(sessions).await
    }

    /// Unsubscribe right away, superseding any pending debounced unsubscribe
    pub async fn unsubscribe(&self, key: &TrackKey) -> Result<()> {
        let _gate = self.state.gate.lock().await;
        self.state.cancel(key);
        self.store.unsubscribe(key).await
    }

    pub async fn unsubscribe_batch(&self, keys: &[TrackKey]) -> Result<()> {
        let _gate = self.state.gate.lock().await;
        for key in keys {
            self.state.cancel(key);
        }
        self.store.unsubscribe_batch(keys).await
    }

    /// Schedule an unsubscribe after the current debounce time
    ///
    /// Must be called from within a Tokio runtime.
    pub fn unsubscribe_debounced(&self, key: TrackKey) {
        self.unsubscribe_debounced_batch(vec![key]);
    }

    /// Schedule unsubscribes that share one deadline
    ///
    /// Keys still pending when the deadline passes are sent in a single
    /// request. Must be called from within a Tokio runtime.
    pub fn unsubscribe_debounced_batch(&self, keys: Vec<TrackKey>) {
        if keys.is_empty() {
            return;
        }
        let delay = self.policy.read().debounce_time();
        let deadline = Instant::now() + delay;
        let epoch = self.store.epoch();

        debug!(
            tracks = keys.len(),
            delay_ms = delay.as_millis() as u64,
            "Scheduling debounced unsubscribe"
        );

        // Held across spawn so a timer cannot look itself up before it is registered
        let mut pending = self.state.pending.lock();
        for key in keys {
            let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
            let task = tokio::spawn(Self::fire(
                Arc::clone(&self.store),
                Arc::clone(&self.state),
                key.clone(),
                generation,
                deadline,
                epoch,
            ));

            let entry = PendingUnsubscribe {
                generation,
                deadline,
                task,
            };
            if let Some(previous) = pending.insert(key, entry) {
                previous.task.abort();
            }
        }
    }

    /// Timer body: once `deadline` passes, unsubscribe every key that is due
    async fn fire(
        store: Arc<SubscriptionStore>,
        state: Arc<DebounceState>,
        key: TrackKey,
        generation: u64,
        deadline: Instant,
        epoch: u64,
    ) {
        tokio::time::sleep_until(deadline).await;

        let _gate = state.gate.lock().await;
        let due: Vec<TrackKey> = {
            let mut pending = state.pending.lock();
            match pending.get(&key) {
                Some(entry) if entry.generation == generation => {}
                _ => return,
            }

            let now = Instant::now();
            let due: Vec<TrackKey> = pending
                .iter()
                .filter(|(_, entry)| entry.deadline <= now)
                .map(|(due_key, _)| due_key.clone())
                .collect();
            for due_key in &due {
                if let Some(entry) = pending.remove(due_key) {
                    if *due_key != key {
                        entry.task.abort();
                    }
                }
            }
            due
        };

        debug!(tracks = due.len(), "Debounce window elapsed");
        match store.unsubscribe_batch_in_epoch(&due, epoch).await {
            Ok(()) => {}
            Err(Error::Cancelled(reason)) => {
                debug!(reason = %reason, "Debounced unsubscribe dropped");
            }
            Err(e) => {
                warn!(tracks = due.len(), error = %e, "Debounced unsubscribe failed");
            }
        }
    }

    /// Cancel every pending timer and drop all subscriptions locally
    pub fn clear(&self) {
        let drained: Vec<PendingUnsubscribe> = {
            let mut pending = self.state.pending.lock();
            pending.drain().map(|(_, entry)| entry).collect()
        };
        for entry in &drained {
            entry.task.abort();
        }
        debug!(cancelled = drained.len(), "Cleared debounced subscriptions");
        self.store.clear();
    }
}

impl Drop for DebouncedSubscriptions {
    fn drop(&mut self) {
        for (_, entry) in self.state.pending.lock().drain() {
            entry.task.abort();
        }
    }
}
