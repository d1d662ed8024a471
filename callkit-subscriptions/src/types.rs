//! Common types used throughout the subscription engine

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a participant session in a call
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of a render surface (video tile)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewportId(String);

impl ViewportId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ViewportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ViewportId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ViewportId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Kind of media track a participant publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackType {
    Audio,
    Video,
    ScreenShare,
    ScreenShareAudio,
}

impl TrackType {
    /// Whether the track carries audio only
    #[must_use]
    pub const fn is_audio(&self) -> bool {
        matches!(self, Self::Audio | Self::ScreenShareAudio)
    }
}

/// Pixel dimension of a video track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct VideoDimension {
    pub width: u32,
    pub height: u32,
}

impl VideoDimension {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels covered by this dimension
    #[must_use]
    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Larger of the two sides
    #[must_use]
    pub fn max_side(&self) -> u32 {
        self.width.max(self.height)
    }
}

impl fmt::Display for VideoDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Identity of a subscribable track: at most one subscription exists per key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackKey {
    pub session_id: SessionId,
    pub track_type: TrackType,
}

impl TrackKey {
    pub fn new(session_id: impl Into<SessionId>, track_type: TrackType) -> Self {
        Self {
            session_id: session_id.into(),
            track_type,
        }
    }
}

impl fmt::Display for TrackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:?}", self.session_id, self.track_type)
    }
}

/// A track the local client receives from the SFU at a given resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSubscription {
    pub session_id: SessionId,
    pub track_type: TrackType,
    pub dimension: VideoDimension,
}

impl TrackSubscription {
    #[must_use]
    pub fn new(key: TrackKey, dimension: VideoDimension) -> Self {
        Self {
            session_id: key.session_id,
            track_type: key.track_type,
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
}
