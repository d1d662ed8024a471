//! Subscription store
//!
//! Source of truth for which remote tracks the local client receives. Every
//! mutation builds a candidate subscription set, sends it to the SFU and only
//! commits it locally once the SFU accepted it, so the local view always
//! matches the last confirmed server state.

use crate::error::{Error, Result};
use crate::signaling::{SignalingService, UpdateSubscriptionsRequest};
use crate::types::{SessionId, TrackKey, TrackSubscription, VideoDimension};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

pub type Subscriptions = BTreeMap<TrackKey, TrackSubscription>;

pub struct SubscriptionStore {
    /// Session id of the local participant, sent with every update
    local_session_id: SessionId,

    signaling: Arc<dyn SignalingService>,

    /// Last state confirmed by the SFU
    subscriptions: RwLock<Subscriptions>,

    /// Serializes signaling round trips so updates reach the SFU in order
    update_lock: Mutex<()>,

    /// Bumped by `clear` so in-flight updates do not resurrect old state
    epoch: AtomicU64,
}

impl SubscriptionStore {
    pub fn new(local_session_id: SessionId, signaling: Arc<dyn SignalingService>) -> Self {
        Self {
            local_session_id,
            signaling,
            subscriptions: RwLock::new(BTreeMap::new()),
            update_lock: Mutex::new(()),
            epoch: AtomicU64::new(0),
        }
    }

    /// Snapshot of the confirmed subscriptions
    #[must_use]
    pub fn subscriptions(&self) -> Subscriptions {
        self.subscriptions.read().clone()
    }

    #[must_use]
    pub fn get(&self, key: &TrackKey) -> Option<TrackSubscription> {
        self.subscriptions.read().get(key).cloned()
    }

    #[must_use]
    pub fn is_subscribed(&self, key: &TrackKey) -> bool {
        self.subscriptions.read().contains_key(key)
    }

    pub async fn subscribe(
        &self,
        key: TrackKey,
        dimension: VideoDimension,
    ) -> Result<TrackSubscription> {
        debug!(track = %key, %dimension, "Subscribing to track");
        let mut subscribed = self.subscribe_batch(vec![(key, dimension)]).await?;
        subscribed
            .pop()
            .ok_or_else(|| Error::Internal("empty subscribe result".to_string()))
    }

    /// Subscribe to several tracks with a single signaling round trip
    pub async fn subscribe_batch(
        &self,
        sessions: Vec<(TrackKey, VideoDimension)>,
    ) -> Result<Vec<TrackSubscription>> {
        let epoch = self.epoch();
        let _guard = self.update_lock.lock().await;

        let added: Vec<TrackSubscription> = sessions
            .into_iter()
            .map(|(key, dimension)| TrackSubscription::new(key, dimension))
            .collect();

        let mut candidate = self.subscriptions();
        for subscription in &added {
            candidate.insert(subscription.key(), subscription.clone());
        }

        self.commit(candidate, epoch).await?;
        Ok(added)
    }

    /// Unsubscribe from a track, succeeding trivially when it is not subscribed
    pub async fn unsubscribe(&self, key: &TrackKey) -> Result<()> {
        debug!(track = %key, "Unsubscribing from track");
        self.unsubscribe_batch(std::slice::from_ref(key)).await
    }

    /// Unsubscribe from several tracks with a single signaling round trip
    pub async fn unsubscribe_batch(&self, keys: &[TrackKey]) -> Result<()> {
        self.unsubscribe_batch_in_epoch(keys, self.epoch()).await
    }

    /// Unsubscribe on behalf of work scheduled before `epoch` ended;
    /// nothing is sent if the store was cleared since
    pub(crate) async fn unsubscribe_batch_in_epoch(
        &self,
        keys: &[TrackKey],
        epoch: u64,
    ) -> Result<()> {
        let _guard = self.update_lock.lock().await;

        let mut candidate = self.subscriptions();
        for key in keys {
            candidate.remove(key);
        }

        self.commit(candidate, epoch).await
    }

    /// Generation of the subscription map, bumped by every `clear`
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Drop all subscriptions locally without notifying the SFU
    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let mut subscriptions = self.subscriptions.write();
        info!(
            dropped = subscriptions.len(),
            "Clearing subscriptions locally"
        );
        subscriptions.clear();
    }

    /// Send `candidate` to the SFU and adopt it once confirmed, unless the
    /// store was cleared after `epoch` was read.
    /// Caller must hold `update_lock`.
    async fn commit(&self, candidate: Subscriptions, epoch: u64) -> Result<()> {
        if self.epoch() != epoch {
            debug!("Store cleared before update was sent");
            return Err(Error::Cancelled("store cleared before update".to_string()));
        }

        if *self.subscriptions.read() == candidate {
            debug!("Subscription set unchanged, skipping signaling");
            return Ok(());
        }

        let request = UpdateSubscriptionsRequest {
            session_id: self.local_session_id.clone(),
            tracks: candidate.values().cloned().collect(),
        };

        debug!(
            session_id = %self.local_session_id,
            tracks = request.tracks.len(),
            "Sending subscription update"
        );

        let response = self.signaling.update_subscriptions(request).await?;
        if let Some(message) = response.error {
            error!(
                session_id = %self.local_session_id,
                error = %message,
                "SFU rejected subscription update"
            );
            return Err(Error::Signaling(message));
        }

        if self.epoch() != epoch {
            debug!("Store cleared during update, discarding result");
            return Err(Error::Cancelled("store cleared during update".to_string()));
        }

        let keys: Vec<String> = candidate.keys().map(ToString::to_string).collect();
        *self.subscriptions.write() = candidate;
        debug!(subscriptions = ?keys, "Subscriptions updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::RecordingSignaling;
    use crate::types::TrackType;
    use std::time::Duration;

    fn store(signaling: &Arc<RecordingSignaling>) -> SubscriptionStore {
        SubscriptionStore::new(SessionId::from("local"), signaling.clone())
    }

    #[tokio::test]
    async fn test_subscribe_sends_full_state() {
        let signaling = Arc::new(RecordingSignaling::default());
        let store = store(&signaling);

        store
            .subscribe(TrackKey::new("s1", TrackType::Video), VideoDimension::new(640, 480))
            .await
            .unwrap();
        store
            .subscribe(TrackKey::new("s2", TrackType::Audio), VideoDimension::default())
            .await
            .unwrap();

        let requests = signaling.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].session_id.as_str(), "local");
        assert_eq!(requests[1].tracks.len(), 2);
        assert_eq!(store.subscriptions().len(), 2);
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let signaling = Arc::new(RecordingSignaling::default());
        let store = store(&signaling);
        let key = TrackKey::new("s1", TrackType::Video);

        store.subscribe(key.clone(), VideoDimension::new(640, 480)).await.unwrap();
        let once = store.subscriptions();
        store.subscribe(key.clone(), VideoDimension::new(640, 480)).await.unwrap();

        assert_eq!(store.subscriptions(), once);
        assert_eq!(signaling.request_count(), 1);

        // A resolution change is an update, not a no-op
        store.subscribe(key.clone(), VideoDimension::new(320, 240)).await.unwrap();
        assert_eq!(signaling.request_count(), 2);
        assert_eq!(store.get(&key).unwrap().dimension, VideoDimension::new(320, 240));
    }

    #[tokio::test]
    async fn test_same_session_different_track_types() {
        let signaling = Arc::new(RecordingSignaling::default());
        let store = store(&signaling);

        store
            .subscribe_batch(vec![
                (TrackKey::new("s1", TrackType::Video), VideoDimension::new(640, 480)),
                (TrackKey::new("s1", TrackType::ScreenShare), VideoDimension::new(1920, 1080)),
            ])
            .await
            .unwrap();

        assert_eq!(signaling.request_count(), 1);
        assert_eq!(store.subscriptions().len(), 2);

        store.unsubscribe(&TrackKey::new("s1", TrackType::Video)).await.unwrap();
        assert!(store.is_subscribed(&TrackKey::new("s1", TrackType::ScreenShare)));
        assert!(!store.is_subscribed(&TrackKey::new("s1", TrackType::Video)));
    }

    #[tokio::test]
    async fn test_unsubscribe_absent_is_noop() {
        let signaling = Arc::new(RecordingSignaling::default());
        let store = store(&signaling);

        store.unsubscribe(&TrackKey::new("ghost", TrackType::Video)).await.unwrap();
        assert_eq!(signaling.request_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_update_leaves_state_untouched() {
        let signaling = Arc::new(RecordingSignaling::default());
        let store = store(&signaling);
        let key = TrackKey::new("s1", TrackType::Video);

        store.subscribe(key.clone(), VideoDimension::new(640, 480)).await.unwrap();

        signaling.reject_with("participant left");
        let err = store
            .subscribe(TrackKey::new("s2", TrackType::Video), VideoDimension::new(640, 480))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Signaling(_)));
        assert!(err.is_retryable());

        signaling.fail_transport();
        assert!(store.unsubscribe(&key).await.is_err());

        let subscriptions = store.subscriptions();
        assert_eq!(subscriptions.len(), 1);
        assert!(subscriptions.contains_key(&key));
    }

    #[tokio::test]
    async fn test_clear_is_local_only() {
        let signaling = Arc::new(RecordingSignaling::default());
        let store = store(&signaling);

        store
            .subscribe(TrackKey::new("s1", TrackType::Video), VideoDimension::new(640, 480))
            .await
            .unwrap();
        store.clear();

        assert!(store.subscriptions().is_empty());
        assert_eq!(signaling.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_during_update_is_reported_cancelled() {
        let signaling = Arc::new(RecordingSignaling::default());
        let store = Arc::new(store(&signaling));
        signaling.set_latency(Duration::from_millis(1000));

        let in_flight = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .subscribe(TrackKey::new("s1", TrackType::Video), VideoDimension::new(640, 480))
                    .await
            })
        };
        let queued = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .subscribe(TrackKey::new("s2", TrackType::Video), VideoDimension::new(640, 480))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(500)).await;
        store.clear();

        let err = in_flight.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
        assert!(!err.is_retryable());
        assert!(matches!(queued.await.unwrap(), Err(Error::Cancelled(_))));

        // the queued update never left
        assert_eq!(signaling.request_count(), 1);
        assert!(store.subscriptions().is_empty());
    }
}
