//! Callkit track subscriptions
//!
//! Client-side engine deciding which remote tracks the local participant
//! receives from the SFU, and at what resolution, while keeping signaling
//! round trips to a minimum. It also tracks which local transceiver carries
//! which negotiated publish option.
//!
//! ## Architecture
//!
//! Receive side, innermost first:
//!
//! - **`SubscriptionStore`**: confirmed subscription set, one batched
//!   desired-state request per change
//! - **`DebouncedSubscriptions`**: delays unsubscribes to absorb flicker
//! - **`ViewportSubscriptions`**: aggregates per-tile visibility and size
//! - **`ManualOverrides`**: per-session and global pins, applied at read time
//! - **`SubscriptionManager`**: builds the chain, runs viewport reports on a
//!   background worker, tears everything down at the end of the call
//!
//! Publish side:
//!
//! - **`TransceiverCache`**: publish option to native transceiver bindings
//! - **`layers`**: simulcast/SVC layer computation
//!
//! ## Usage
//!
//! ```rust,ignore
//! use callkit_subscriptions::{SubscriptionConfig, SubscriptionManager, TrackKey, TrackType};
//!
//! let manager = SubscriptionManager::new(config, "local-session".into(), signaling);
//! manager.submit_viewport("tile-A", TrackKey::new("s1", TrackType::Video), true, None);
//! manager.engine().set_global_visibility_override(Some(false)).await?;
//! ```

mod config;
mod debounce;
mod error;
pub mod layers;
mod logging;
mod manager;
mod overrides;
mod publish;
mod signaling;
mod store;
pub mod test_helpers;
mod transceiver;
mod types;
mod viewport;

pub use config::{LoggingConfig, SubscriptionConfig};
pub use debounce::{DebouncePolicy, DebouncedSubscriptions};
pub use error::{Error, Result};
pub use layers::{OptimalVideoLayer, VideoLayer, VideoQuality};
pub use logging::init_logging;
pub use manager::SubscriptionManager;
pub use overrides::{resolve, ManualOverrides, Override, OverrideState};
pub use publish::{Codec, PublishOption};
pub use signaling::{SignalingService, UpdateSubscriptionsRequest, UpdateSubscriptionsResponse};
pub use store::{SubscriptionStore, Subscriptions};
pub use transceiver::{TransceiverBinding, TransceiverCache, TransceiverHandle};
pub use types::{SessionId, TrackKey, TrackSubscription, TrackType, VideoDimension, ViewportId};
pub use viewport::{
    effective_demand, Demand, DemandResolver, RawDemand, ViewportEntry, ViewportSubscriptions,
};
