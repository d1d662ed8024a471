//! Manual subscription overrides
//!
//! Callers can pin visibility or dimension for a single session or for every
//! session at once. Pins never touch the viewport table: they are applied when
//! demand is read, with precedence global, then per-session, then the raw
//! viewport report. Changing a pin immediately re-applies the demand of every
//! affected track.

use crate::debounce::DebouncePolicy;
use crate::error::Result;
use crate::store::Subscriptions;
use crate::types::{SessionId, TrackKey, TrackSubscription, VideoDimension, ViewportId};
use crate::viewport::{Demand, DemandResolver, ViewportEntry, ViewportSubscriptions};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// Pinned values; `None` leaves the lower-precedence value in effect
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Override {
    pub visible: Option<bool>,
    pub dimension: Option<VideoDimension>,
}

impl Override {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.visible.is_none() && self.dimension.is_none()
    }
}

/// Resolve the demand acted on for one viewport report
#[must_use]
pub fn resolve(global: &Override, session: Option<&Override>, raw: Demand) -> Demand {
    let visible = global
        .visible
        .or_else(|| session.and_then(|o| o.visible))
        .unwrap_or(raw.visible);
    let dimension = global
        .dimension
        .or_else(|| session.and_then(|o| o.dimension))
        .unwrap_or(raw.dimension);
    Demand { visible, dimension }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverrideState {
    pub global: Override,
    pub sessions: HashMap<SessionId, Override>,
}

impl OverrideState {
    fn update_session(&mut self, session_id: &SessionId, f: impl FnOnce(&mut Override)) {
        let entry = self.sessions.entry(session_id.clone()).or_default();
        f(entry);
        if entry.is_empty() {
            self.sessions.remove(session_id);
        }
    }
}

impl DemandResolver for OverrideState {
    fn resolve(&self, session_id: &SessionId, raw: Demand) -> Demand {
        resolve(&self.global, self.sessions.get(session_id), raw)
    }
}

/// Override state read at resolution time, so a re-evaluation always sees the
/// latest pins even if it queued behind another update
struct SharedOverrides(RwLock<OverrideState>);

impl DemandResolver for SharedOverrides {
    fn resolve(&self, session_id: &SessionId, raw: Demand) -> Demand {
        self.0.read().resolve(session_id, raw)
    }
}

pub struct ManualOverrides {
    inner: ViewportSubscriptions,
    overrides: SharedOverrides,
}

impl ManualOverrides {
    pub fn new(inner: ViewportSubscriptions) -> Self {
        Self {
            inner,
            overrides: SharedOverrides(RwLock::new(OverrideState::default())),
        }
    }

    #[must_use]
    pub fn viewports(&self) -> &ViewportSubscriptions {
        &self.inner
    }

    #[must_use]
    pub fn overrides(&self) -> OverrideState {
        self.overrides.0.read().clone()
    }

    pub async fn update_viewport(
        &self,
        viewport_id: impl Into<ViewportId>,
        key: TrackKey,
        visible: bool,
        dimension: VideoDimension,
    ) -> Result<()> {
        let entry = ViewportEntry::new(viewport_id, key, visible, dimension);
        self.inner.update_viewport_with(entry, &self.overrides).await
    }

    pub async fn update_viewports(&self, entries: Vec<ViewportEntry>) -> Result<()> {
        self.inner.update_viewports_with(entries, &self.overrides).await
    }

    pub async fn remove_viewport(&self, viewport_id: &ViewportId) -> Result<()> {
        self.inner.remove_viewport(viewport_id, &self.overrides).await
    }

    pub async fn set_visibility_override(
        &self,
        session_id: &SessionId,
        visible: bool,
    ) -> Result<()> {
        debug!(session_id = %session_id, visible, "Pinning session visibility");
        self.overrides
            .0
            .write()
            .update_session(session_id, |o| o.visible = Some(visible));
        self.reapply_session(session_id).await
    }

    pub async fn remove_visibility_override(&self, session_id: &SessionId) -> Result<()> {
        self.overrides
            .0
            .write()
            .update_session(session_id, |o| o.visible = None);
        self.reapply_session(session_id).await
    }

    pub async fn set_dimension_override(
        &self,
        session_id: &SessionId,
        dimension: VideoDimension,
    ) -> Result<()> {
        debug!(session_id = %session_id, %dimension, "Pinning session dimension");
        self.overrides
            .0
            .write()
            .update_session(session_id, |o| o.dimension = Some(dimension));
        self.reapply_session(session_id).await
    }

    pub async fn remove_dimension_override(&self, session_id: &SessionId) -> Result<()> {
        self.overrides
            .0
            .write()
            .update_session(session_id, |o| o.dimension = None);
        self.reapply_session(session_id).await
    }

    pub async fn clear_overrides(&self, session_id: &SessionId) -> Result<()> {
        self.overrides.0.write().sessions.remove(session_id);
        self.reapply_session(session_id).await
    }

    pub async fn set_global_visibility_override(&self, visible: Option<bool>) -> Result<()> {
        info!(visible = ?visible, "Global visibility override changed");
        self.overrides.0.write().global.visible = visible;
        self.reapply_all().await
    }

    pub async fn set_global_dimension_override(
        &self,
        dimension: Option<VideoDimension>,
    ) -> Result<()> {
        info!(dimension = ?dimension, "Global dimension override changed");
        self.overrides.0.write().global.dimension = dimension;
        self.reapply_all().await
    }

    pub async fn clear_global_overrides(&self) -> Result<()> {
        self.overrides.0.write().global = Override::default();
        self.reapply_all().await
    }

    async fn reapply_session(&self, session_id: &SessionId) -> Result<()> {
        self.inner
            .reconcile(|key| &key.session_id == session_id, &self.overrides)
            .await
    }

    async fn reapply_all(&self) -> Result<()> {
        self.inner.reconcile(|_| true, &self.overrides).await
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

    /// Drop overrides, viewports, pending timers and subscriptions locally
    pub fn clear(&self) {
        *self.overrides.0.write() = OverrideState::default();
        self.inner.clear();
    }
}
