//! Viewport-driven subscriptions
//!
//! Every rendered video tile reports its visibility and the pixel size it
//! wants. Several tiles may show the same remote track, so demand is
//! aggregated per track key: the track is wanted if any tile showing it is
//! visible, at the largest size any visible tile asks for.

use crate::debounce::{DebouncePolicy, DebouncedSubscriptions};
use crate::error::Result;
use crate::store::Subscriptions;
use crate::types::{
    SessionId, TrackKey, TrackSubscription, TrackType, VideoDimension, ViewportId,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Whether a track should be received, and at what size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Demand {
    pub visible: bool,
    pub dimension: VideoDimension,
}

impl Demand {
    #[must_use]
    pub const fn new(visible: bool, dimension: VideoDimension) -> Self {
        Self { visible, dimension }
    }
}

/// Maps the raw demand reported by a viewport to the demand that is acted on
pub trait DemandResolver: Send + Sync {
    fn resolve(&self, session_id: &SessionId, raw: Demand) -> Demand;
}

/// Acts on viewport reports as-is
#[derive(Debug, Clone, Copy, Default)]
pub struct RawDemand;

impl DemandResolver for RawDemand {
    fn resolve(&self, _session_id: &SessionId, raw: Demand) -> Demand {
        raw
    }
}

/// Last report of a single render surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportEntry {
    pub viewport_id: ViewportId,
    pub session_id: SessionId,
    pub track_type: TrackType,
    pub visible: bool,
    pub dimension: VideoDimension,
}

impl ViewportEntry {
    pub fn new(
        viewport_id: impl Into<ViewportId>,
        key: TrackKey,
        visible: bool,
        dimension: VideoDimension,
    ) -> Self {
        Self {
            viewport_id: viewport_id.into(),
            session_id: key.session_id,
            track_type: key.track_type,
            visible,
            dimension,
        }
    }

    #[must_use]
    pub fn key(&self) -> TrackKey {
        TrackKey {
            session_id: self.session_id.clone(),
            track_type: self.track_type,
        }
    }

    fn matches(&self, key: &TrackKey) -> bool {
        self.session_id == key.session_id && self.track_type == key.track_type
    }
}

/// Aggregate the demand of all viewports showing one track
///
/// Visible if any resolved entry is visible; the dimension is the largest
/// (by pixel area) among the visible ones.
pub fn effective_demand<'a>(
    entries: impl IntoIterator<Item = &'a ViewportEntry>,
    resolver: &dyn DemandResolver,
) -> Demand {
    entries
        .into_iter()
        .map(|entry| {
            resolver.resolve(
                &entry.session_id,
                Demand::new(entry.visible, entry.dimension),
            )
        })
        .filter(|demand| demand.visible)
        .fold(Demand::default(), |best, demand| {
            if !best.visible || demand.dimension.area() > best.dimension.area() {
                demand
            } else {
                best
            }
        })
}

pub struct ViewportSubscriptions {
    inner: DebouncedSubscriptions,
    viewports: Mutex<HashMap<ViewportId, ViewportEntry>>,
    /// Held while a table change is pushed down so per-key updates stay ordered
    apply_lock: tokio::sync::Mutex<()>,
}

impl ViewportSubscriptions {
    pub fn new(inner: DebouncedSubscriptions) -> Self {
        Self {
            inner,
            viewports: Mutex::new(HashMap::new()),
            apply_lock: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub fn debounced(&self) -> &DebouncedSubscriptions {
        &self.inner
    }

    /// Snapshot of the raw viewport table
    #[must_use]
    pub fn viewports(&self) -> Vec<ViewportEntry> {
        let mut entries: Vec<ViewportEntry> = self.viewports.lock().values().cloned().collect();
        entries.sort_by(|a, b| a.viewport_id.as_str().cmp(b.viewport_id.as_str()));
        entries
    }

    /// Current aggregated demand for `key`
    #[must_use]
    pub fn demand_for(&self, key: &TrackKey, resolver: &dyn DemandResolver) -> Demand {
        let viewports = self.viewports.lock();
        effective_demand(viewports.values().filter(|entry| entry.matches(key)), resolver)
    }

    pub async fn update_viewport(
        &self,
        viewport_id: impl Into<ViewportId>,
        key: TrackKey,
        visible: bool,
        dimension: VideoDimension,
    ) -> Result<()> {
        let entry = ViewportEntry::new(viewport_id, key, visible, dimension);
        self.update_viewports_with(vec![entry], &RawDemand).await
    }

    pub async fn update_viewport_with(
        &self,
        entry: ViewportEntry,
        resolver: &dyn DemandResolver,
    ) -> Result<()> {
        self.update_viewports_with(vec![entry], resolver).await
    }

    /// Apply a batch of viewport reports with a single subscribe round trip
    pub async fn update_viewports_with(
        &self,
        entries: Vec<ViewportEntry>,
        resolver: &dyn DemandResolver,
    ) -> Result<()> {
        let _apply = self.apply_lock.lock().await;

        let mut touched = BTreeSet::new();
        {
            let mut viewports = self.viewports.lock();
            for entry in entries {
                touched.insert(entry.key());
                // A surface re-bound to another track withdraws its old demand
                if let Some(previous) = viewports.insert(entry.viewport_id.clone(), entry) {
                    touched.insert(previous.key());
                }
            }
        }

        self.apply(touched, resolver).await
    }

    /// Forget a detached surface and withdraw its demand
    pub async fn remove_viewport(
        &self,
        viewport_id: &ViewportId,
        resolver: &dyn DemandResolver,
    ) -> Result<()> {
        let _apply = self.apply_lock.lock().await;

        let removed = self.viewports.lock().remove(viewport_id);
        match removed {
            Some(entry) => {
                debug!(viewport_id = %viewport_id, track = %entry.key(), "Viewport detached");
                self.apply(BTreeSet::from([entry.key()]), resolver).await
            }
            None => Ok(()),
        }
    }

    /// Re-evaluate every tracked key accepted by `filter`
    pub async fn reconcile(
        &self,
        filter: impl Fn(&TrackKey) -> bool,
        resolver: &dyn DemandResolver,
    ) -> Result<()> {
        let _apply = self.apply_lock.lock().await;

        let keys: BTreeSet<TrackKey> = self
            .viewports
            .lock()
            .values()
            .map(ViewportEntry::key)
            .filter(|key| filter(key))
            .collect();

        self.apply(keys, resolver).await
    }

    /// Push the aggregated demand of `keys` down to the debounced store.
    /// Caller must hold `apply_lock`.
    async fn apply(&self, keys: BTreeSet<TrackKey>, resolver: &dyn DemandResolver) -> Result<()> {
        let mut wanted = Vec::new();
        let mut hidden = Vec::new();
        for key in keys {
            let demand = self.demand_for(&key, resolver);
            if demand.visible {
                debug!(track = %key, dimension = %demand.dimension, "Track in view");
                wanted.push((key, demand.dimension));
            } else {
                debug!(track = %key, "Track out of view");
                hidden.push(key);
            }
        }
        self.inner.unsubscribe_debounced_batch(hidden);

        if wanted.is_empty() {
            return Ok(());
        }
        self.inner.subscribe_batch(wanted).await.map(|_| ())
    }

    #[must_use]
    pub fn subscriptions(&self) -> Subscriptions {
        self.inner.subscriptions()
    }

    pub async fn subscribe(
        &self,
        key: TrackKey,
        dimension: VideoDimension,
    ) -> Result<TrackSubscription> {
        self.inner.subscribe(key, dimension).await
    }

    pub async fn subscribe_batch(
        &self,
        sessions: Vec<(TrackKey, VideoDimension)>,
    ) -> Result<Vec<TrackSubscription>> {
        self.inner.subscribe_batch(sessions).await
    }

    pub async fn unsubscribe(&self, key: &TrackKey) -> Result<()> {
        self.inner.unsubscribe(key).await
    }

    pub async fn unsubscribe_batch(&self, keys: &[TrackKey]) -> Result<()> {
        self.inner.unsubscribe_batch(keys).await
    }

    pub fn unsubscribe_debounced(&self, key: TrackKey) {
        self.inner.unsubscribe_debounced(key);
    }

    pub fn unsubscribe_debounced_batch(&self, keys: Vec<TrackKey>) {
        self.inner.unsubscribe_debounced_batch(keys);
    }

    pub fn set_debounce_policy(&self, policy: DebouncePolicy) {
        self.inner.set_debounce_policy(policy);
    }

    /// Drop the viewport table, pending timers and subscriptions locally
    pub fn clear(&self) {
        self.viewports.lock().clear();
        self.inner.clear();
    }
}
