//! Publish-side transceiver cache
//!
//! Binds each negotiated [`PublishOption`] to the native transceiver carrying
//! it and to the simulcast layers currently selected for it. Bindings are kept
//! in creation order because SDP media lines are matched by position.
//!
//! The cache indexes transceivers but does not own their lifetime. A binding
//! whose sender track was disposed by the native layer is hidden from
//! [`TransceiverCache::items`] without being removed; disposal is queried on
//! every call.

use crate::layers::OptimalVideoLayer;
use crate::publish::PublishOption;
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use webrtc::rtp_transceiver::RTCRtpTransceiver;

/// Native transceiver as seen by the cache
#[async_trait]
pub trait TransceiverHandle: Send + Sync {
    /// Whether the sender's track has been disposed by the native layer
    async fn is_disposed(&self) -> bool;
}

#[async_trait]
impl TransceiverHandle for Arc<RTCRtpTransceiver> {
    async fn is_disposed(&self) -> bool {
        self.sender().await.track().await.is_none()
    }
}

#[derive(Clone)]
pub struct TransceiverBinding<T> {
    pub publish_option: PublishOption,
    pub transceiver: T,
    pub layers: Vec<OptimalVideoLayer>,
}

struct Bound<T> {
    publish_option: PublishOption,
    transceiver: T,
}

struct CacheState<T> {
    /// Creation order
    bound: Vec<Bound<T>>,
    /// By publish option id; may be set before the option is bound
    layers: HashMap<i32, Vec<OptimalVideoLayer>>,
}

impl<T: Clone> CacheState<T> {
    fn position(&self, id: i32) -> Option<usize> {
        self.bound.iter().position(|b| b.publish_option.id == id)
    }

    fn binding(&self, bound: &Bound<T>) -> TransceiverBinding<T> {
        TransceiverBinding {
            publish_option: bound.publish_option.clone(),
            transceiver: bound.transceiver.clone(),
            layers: self
                .layers
                .get(&bound.publish_option.id)
                .cloned()
                .unwrap_or_default(),
        }
    }
}

pub struct TransceiverCache<T> {
    state: Mutex<CacheState<T>>,
}

impl<T> Default for TransceiverCache<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(CacheState {
                bound: Vec::new(),
                layers: HashMap::new(),
            }),
        }
    }
}

impl<T> TransceiverCache<T>
where
    T: TransceiverHandle + Clone,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `transceiver` to `publish_option`, replacing any previous binding
    /// for the same id in place with an empty layer list
    pub fn add(&self, publish_option: PublishOption, transceiver: T) {
        let mut state = self.state.lock();
        let id = publish_option.id;
        let bound = Bound {
            publish_option,
            transceiver,
        };

        match state.position(id) {
            Some(index) => {
                debug!(publish_option_id = id, "Replacing transceiver binding");
                state.bound[index] = bound;
            }
            None => {
                debug!(publish_option_id = id, "Adding transceiver binding");
                state.bound.push(bound);
            }
        }
        state.layers.insert(id, Vec::new());
    }

    #[must_use]
    pub fn get(&self, publish_option: &PublishOption) -> Option<TransceiverBinding<T>> {
        let state = self.state.lock();
        state
            .position(publish_option.id)
            .map(|index| state.binding(&state.bound[index]))
    }

    /// Transceiver bound to `publish_option`, if any
    #[must_use]
    pub fn transceiver(&self, publish_option: &PublishOption) -> Option<T> {
        let state = self.state.lock();
        state
            .position(publish_option.id)
            .map(|index| state.bound[index].transceiver.clone())
    }

    #[must_use]
    pub fn has(&self, publish_option: &PublishOption) -> bool {
        self.index_of(publish_option).is_some()
    }

    /// Drop the binding and any layers recorded for it
    pub fn remove(&self, publish_option: &PublishOption) {
        let mut state = self.state.lock();
        state.bound.retain(|b| b.publish_option.id != publish_option.id);
        state.layers.remove(&publish_option.id);
    }

    /// Position of the binding in creation order
    #[must_use]
    pub fn index_of(&self, publish_option: &PublishOption) -> Option<usize> {
        self.state.lock().position(publish_option.id)
    }

    /// Live bindings in creation order, skipping disposed transceivers
    pub async fn items(&self) -> Vec<TransceiverBinding<T>> {
        let snapshot: Vec<TransceiverBinding<T>> = {
            let state = self.state.lock();
            state.bound.iter().map(|b| state.binding(b)).collect()
        };
        let disposed = join_all(snapshot.iter().map(|b| b.transceiver.is_disposed())).await;

        snapshot
            .into_iter()
            .zip(disposed)
            .filter_map(|(binding, disposed)| (!disposed).then_some(binding))
            .collect()
    }

    /// Replace the layer list recorded for `publish_option`, bound or not
    pub fn set_layers(&self, publish_option: &PublishOption, layers: Vec<OptimalVideoLayer>) {
        self.state.lock().layers.insert(publish_option.id, layers);
    }

    pub fn clear_layers(&self, publish_option: &PublishOption) {
        self.set_layers(publish_option, Vec::new());
    }

    #[must_use]
    pub fn get_layers(&self, publish_option: &PublishOption) -> Option<Vec<OptimalVideoLayer>> {
        self.state.lock().layers.get(&publish_option.id).cloned()
    }

    /// Number of bindings, disposed ones included
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().bound.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().bound.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::compute_layers;
    use crate::test_helpers::FakeTransceiver;
    use crate::types::{TrackType, VideoDimension};

    fn option(id: i32, track_type: TrackType) -> PublishOption {
        PublishOption {
            id,
            track_type,
            bitrate: 1_000_000,
            fps: 30,
            video_dimension: Some(VideoDimension::new(1280, 720)),
            max_spatial_layers: 3,
            max_temporal_layers: 1,
            codec: None,
        }
    }

    #[test]
    fn test_add_get_has_remove() {
        let cache = TransceiverCache::new();
        let video = option(1, TrackType::Video);
        let audio = option(2, TrackType::Audio);
        let transceiver = FakeTransceiver::new();

        cache.add(video.clone(), transceiver.clone());
        assert!(cache.has(&video));
        assert!(!cache.has(&audio));
        assert!(cache.transceiver(&video).unwrap().same_as(&transceiver));
        assert!(cache.get(&audio).is_none());

        cache.remove(&video);
        assert!(cache.get(&video).is_none());
        assert!(cache.is_empty());

        // removing an absent binding is harmless
        cache.remove(&audio);
    }

    #[test]
    fn test_index_of_follows_creation_order() {
        let cache = TransceiverCache::new();
        cache.add(option(1, TrackType::Video), FakeTransceiver::new());
        cache.add(option(2, TrackType::Audio), FakeTransceiver::new());

        assert_eq!(cache.index_of(&option(1, TrackType::Video)), Some(0));
        assert_eq!(cache.index_of(&option(2, TrackType::Audio)), Some(1));
        assert_eq!(cache.index_of(&option(3, TrackType::Video)), None);

        // re-adding keeps the slot
        cache.add(option(1, TrackType::Video), FakeTransceiver::new());
        assert_eq!(cache.index_of(&option(1, TrackType::Video)), Some(0));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_items_skip_disposed() {
        let cache = TransceiverCache::new();
        let first = FakeTransceiver::new();
        let second = FakeTransceiver::new();
        cache.add(option(1, TrackType::Video), first);
        cache.add(option(2, TrackType::Audio), second.clone());
        assert_eq!(cache.items().await.len(), 2);

        second.dispose();
        let items = cache.items().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].publish_option.id, 1);

        // still bound, only hidden
        assert!(cache.has(&option(2, TrackType::Audio)));

        cache.add(option(2, TrackType::Audio), FakeTransceiver::new());
        let ids: Vec<i32> = cache
            .items()
            .await
            .iter()
            .map(|b| b.publish_option.id)
            .collect();
        assert_eq!(ids, [1, 2]);
    }

    #[test]
    fn test_layers_are_replaced_not_merged() {
        let cache = TransceiverCache::new();
        let video = option(1, TrackType::Video);
        cache.add(video.clone(), FakeTransceiver::new());
        assert_eq!(cache.get_layers(&video), Some(Vec::new()));

        let layers = compute_layers(None, &video);
        cache.set_layers(&video, layers.clone());
        assert_eq!(cache.get_layers(&video), Some(layers));

        let single = vec![OptimalVideoLayer::new("q", 320, 180, 300_000)];
        cache.set_layers(&video, single.clone());
        assert_eq!(cache.get_layers(&video), Some(single));

        cache.clear_layers(&video);
        assert_eq!(cache.get_layers(&video), Some(Vec::new()));

        assert_eq!(cache.get_layers(&option(9, TrackType::Video)), None);
    }

    #[test]
    fn test_layers_recorded_before_binding() {
        let cache: TransceiverCache<FakeTransceiver> = TransceiverCache::new();
        let video = option(1, TrackType::Video);
        let layers = vec![
            OptimalVideoLayer::new("f", 1920, 1080, 1_000_000),
            OptimalVideoLayer::new("h", 1280, 720, 500_000),
        ];

        cache.set_layers(&video, layers.clone());
        assert_eq!(cache.get_layers(&video), Some(layers));
        assert!(!cache.has(&video));

        cache.remove(&video);
        assert_eq!(cache.get_layers(&video), None);
    }

    #[test]
    fn test_re_adding_resets_layers() {
        let cache = TransceiverCache::new();
        let video = option(1, TrackType::Video);
        cache.add(video.clone(), FakeTransceiver::new());
        cache.set_layers(&video, compute_layers(None, &video));

        cache.add(video.clone(), FakeTransceiver::new());
        assert_eq!(cache.get_layers(&video), Some(Vec::new()));
    }
}
