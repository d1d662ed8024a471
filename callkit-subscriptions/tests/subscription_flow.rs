//! End-to-end tests for the subscription chain
//!
//! Drives viewport reports and overrides through `SubscriptionManager` against
//! a recording signaling peer.
//!
//! Run with: cargo test --test subscription_flow

use callkit_subscriptions::test_helpers::RecordingSignaling;
use callkit_subscriptions::{
    SessionId, SubscriptionConfig, SubscriptionManager, TrackKey, TrackType, VideoDimension,
    ViewportEntry,
};
use std::sync::Arc;
use std::time::Duration;

fn manager(signaling: &Arc<RecordingSignaling>, debounce_time_ms: u64) -> SubscriptionManager {
    let config = SubscriptionConfig {
        debounce_time_ms,
        ..Default::default()
    };
    SubscriptionManager::new(config, SessionId::from("local"), signaling.clone())
}

#[tokio::test(start_paused = true)]
async fn test_tile_rotating_off_screen_unsubscribes_after_debounce() {
    let signaling = Arc::new(RecordingSignaling::default());
    let manager = manager(&signaling, 2000);
    let key = TrackKey::new("s1", TrackType::Video);
    let vga = VideoDimension::new(640, 480);

    manager.submit_viewport("tile-A", key.clone(), true, Some(vga));
    manager.flush().await;

    let requests = signaling.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].tracks[0].key(), key);
    assert_eq!(requests[0].tracks[0].dimension, vga);

    manager.submit_viewport("tile-A", key.clone(), false, Some(vga));
    manager.flush().await;

    tokio::time::sleep(Duration::from_millis(1999)).await;
    assert_eq!(signaling.request_count(), 1);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(signaling.request_count(), 2);
    assert_eq!(signaling.last_tracks(), Some(Vec::new()));
    assert!(manager.engine().subscriptions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_grid_layout_with_pinned_speaker() {
    let signaling = Arc::new(RecordingSignaling::default());
    let manager = manager(&signaling, 1000);
    let thumb = VideoDimension::new(320, 180);
    let full = VideoDimension::new(1920, 1080);

    let layout: Vec<ViewportEntry> = ["s1", "s2", "s3"]
        .iter()
        .map(|s| {
            ViewportEntry::new(
                format!("tile-{s}"),
                TrackKey::new(*s, TrackType::Video),
                true,
                thumb,
            )
        })
        .collect();
    manager.submit_viewports(layout);
    manager.flush().await;
    assert_eq!(signaling.request_count(), 1);

    manager
        .engine()
        .set_dimension_override(&SessionId::from("s2"), full)
        .await
        .unwrap();

    let subscriptions = manager.engine().subscriptions();
    assert_eq!(subscriptions[&TrackKey::new("s2", TrackType::Video)].dimension, full);
    assert_eq!(subscriptions[&TrackKey::new("s1", TrackType::Video)].dimension, thumb);

    // s3 scrolls away and its tile is recycled
    manager.submit_viewport_removal("tile-s3");
    manager.flush().await;
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let subscriptions = manager.engine().subscriptions();
    assert_eq!(subscriptions.len(), 2);
    assert!(!subscriptions.contains_key(&TrackKey::new("s3", TrackType::Video)));
}

#[tokio::test(start_paused = true)]
async fn test_global_override_round_trip() {
    let signaling = Arc::new(RecordingSignaling::default());
    let manager = manager(&signaling, 500);
    let key = TrackKey::new("s1", TrackType::Video);

    manager.submit_viewport("tile", key.clone(), true, None);
    manager.flush().await;
    assert_eq!(
        manager.engine().subscriptions()[&key].dimension,
        manager.config().default_dimension
    );

    manager
        .engine()
        .set_global_visibility_override(Some(false))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(manager.engine().subscriptions().is_empty());

    manager
        .engine()
        .set_global_visibility_override(None)
        .await
        .unwrap();
    assert!(manager.engine().subscriptions().contains_key(&key));
}

#[tokio::test(start_paused = true)]
async fn test_rejected_update_is_retried_on_next_report() {
    let signaling = Arc::new(RecordingSignaling::default());
    let manager = manager(&signaling, 500);
    let key = TrackKey::new("s1", TrackType::Video);

    signaling.reject_with("session not ready");
    manager.submit_viewport("tile", key.clone(), true, None);
    manager.flush().await;
    assert!(manager.engine().subscriptions().is_empty());

    signaling.accept();
    manager.submit_viewport("tile", key.clone(), true, None);
    manager.flush().await;
    assert!(manager.engine().subscriptions().contains_key(&key));
    assert_eq!(signaling.request_count(), 2);
}
