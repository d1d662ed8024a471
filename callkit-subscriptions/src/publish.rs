//! Negotiated publish configurations

use crate::types::{TrackType, VideoDimension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Codec {
    /// Codec name or mime type, e.g. `vp8` or `video/VP9`
    pub name: String,
    pub clock_rate: u32,
    pub fmtp: String,
}

impl Codec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            clock_rate: 90_000,
            fmtp: String::new(),
        }
    }
}

/// One sendable track configuration agreed with the SFU
///
/// Identity is `id`; two options with the same id describe the same
/// transceiver slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOption {
    pub id: i32,
    pub track_type: TrackType,
    /// Target bitrate in bps
    pub bitrate: u32,
    pub fps: u32,
    pub video_dimension: Option<VideoDimension>,
    pub max_spatial_layers: u32,
    pub max_temporal_layers: u32,
    pub codec: Option<Codec>,
}

impl PublishOption {
    #[must_use]
    pub fn codec_name(&self) -> Option<&str> {
        self.codec.as_ref().map(|codec| codec.name.as_str())
    }
}
