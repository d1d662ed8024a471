//! Simulcast and SVC layer selection for published video
//!
//! Layers are identified by RID:
//! - `q`: quarter resolution
//! - `h`: half resolution
//! - `f`: full resolution
//!
//! SVC codecs (VP9, AV1) send a single encoding carrying all spatial layers,
//! described by a scalability mode such as `L3T3_KEY`.

use crate::publish::PublishOption;
use crate::types::VideoDimension;
use serde::{Deserialize, Serialize};

const DEFAULT_CAPTURE: VideoDimension = VideoDimension::new(1280, 720);

/// One encoding of an outgoing video track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimalVideoLayer {
    pub active: bool,
    pub rid: String,
    pub width: u32,
    pub height: u32,
    /// bps
    pub max_bitrate: u32,
    pub max_framerate: Option<u32>,
    pub scalability_mode: Option<String>,
    pub scale_resolution_down_by: Option<f64>,
    pub svc: bool,
}

impl OptimalVideoLayer {
    pub fn new(rid: impl Into<String>, width: u32, height: u32, max_bitrate: u32) -> Self {
        Self {
            active: true,
            rid: rid.into(),
            width,
            height,
            max_bitrate,
            max_framerate: None,
            scalability_mode: None,
            scale_resolution_down_by: None,
            svc: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoQuality {
    Low,
    Mid,
    High,
}

/// Layer description announced to the SFU
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoLayer {
    pub rid: String,
    pub bitrate: u32,
    pub fps: u32,
    pub quality: VideoQuality,
    pub video_dimension: VideoDimension,
}

#[must_use]
pub fn is_svc_codec(codec: Option<&str>) -> bool {
    codec.is_some_and(|name| {
        matches!(
            name.to_lowercase().as_str(),
            "vp9" | "av1" | "video/vp9" | "video/av1"
        )
    })
}

/// `LxTy`, with a `_KEY` suffix when more than one spatial layer is sent
#[must_use]
pub fn to_scalability_mode(spatial_layers: u32, temporal_layers: u32) -> String {
    let suffix = if spatial_layers > 1 { "_KEY" } else { "" };
    format!("L{spatial_layers}T{temporal_layers}{suffix}")
}

#[must_use]
pub fn rid_to_quality(rid: Option<&str>) -> VideoQuality {
    match rid {
        Some("q") => VideoQuality::Low,
        Some("h") => VideoQuality::Mid,
        _ => VideoQuality::High,
    }
}

fn default_bitrate(rid: &str) -> u32 {
    match rid {
        "q" => 300_000,
        "h" => 750_000,
        _ => 1_250_000,
    }
}

/// Scale `bitrate` down by pixel ratio when capturing below the target size
fn computed_max_bitrate(target: VideoDimension, current: VideoDimension, bitrate: u32) -> u32 {
    if (current.width < target.width || current.height < target.height) && target.area() > 0 {
        let scaled = u64::from(bitrate) * current.area() / target.area();
        u32::try_from(scaled).unwrap_or(bitrate)
    } else {
        bitrate
    }
}

/// Compute the layers to send for a capture of size `settings`
///
/// Layers are ordered lowest quality first.
#[must_use]
pub fn find_optimal_video_layers(
    settings: VideoDimension,
    option: &PublishOption,
) -> Vec<OptimalVideoLayer> {
    let svc = is_svc_codec(option.codec_name());
    let spatial_layers = option.max_spatial_layers.max(1);
    let target = option.video_dimension.unwrap_or(settings);
    let max_bitrate = computed_max_bitrate(target, settings, option.bitrate);

    let mut layers = Vec::new();
    let mut downscale = 1.0_f64;
    for rid in ["f", "h", "q"].into_iter().take(spatial_layers as usize) {
        let bitrate = (f64::from(max_bitrate) / downscale) as u32;
        let mut layer = OptimalVideoLayer {
            max_framerate: Some(option.fps),
            ..OptimalVideoLayer::new(
                rid,
                (f64::from(settings.width) / downscale) as u32,
                (f64::from(settings.height) / downscale) as u32,
                if bitrate > 0 { bitrate } else { default_bitrate(rid) },
            )
        };
        if svc {
            layer.scalability_mode = Some(to_scalability_mode(
                spatial_layers,
                option.max_temporal_layers,
            ));
        } else {
            layer.scale_resolution_down_by = Some(downscale);
        }
        layers.insert(0, layer);
        downscale *= 2.0;
    }

    with_simulcast_constraints(settings, layers)
}

/// Drop layers that make no sense for a small capture, then renumber
/// the remaining ones `q`, `h`, `f`
#[must_use]
pub fn with_simulcast_constraints(
    settings: VideoDimension,
    layers: Vec<OptimalVideoLayer>,
) -> Vec<OptimalVideoLayer> {
    let size = settings.max_side();
    let kept: Vec<OptimalVideoLayer> = if size <= 320 {
        layers.into_iter().filter(|layer| layer.rid == "f").collect()
    } else if size <= 640 {
        layers.into_iter().filter(|layer| layer.rid != "f").collect()
    } else {
        layers
    };

    kept.into_iter()
        .enumerate()
        .map(|(index, layer)| OptimalVideoLayer {
            rid: match index {
                0 => "q",
                1 => "h",
                _ => "f",
            }
            .to_string(),
            ..layer
        })
        .collect()
}

/// Collapse simulcast layers into the single encoding an SVC codec sends
#[must_use]
pub fn to_svc_encodings(layers: &[OptimalVideoLayer]) -> Vec<OptimalVideoLayer> {
    ["f", "h", "q"]
        .iter()
        .find_map(|rid| layers.iter().find(|layer| layer.rid == *rid))
        .map(|best| {
            vec![OptimalVideoLayer {
                rid: "q".to_string(),
                svc: true,
                ..best.clone()
            }]
        })
        .unwrap_or_default()
}

/// Layers for a publish option given the capture format, if known
#[must_use]
pub fn compute_layers(
    capture: Option<VideoDimension>,
    option: &PublishOption,
) -> Vec<OptimalVideoLayer> {
    if option.track_type.is_audio() {
        return Vec::new();
    }
    let settings = capture
        .or(option.video_dimension)
        .unwrap_or(DEFAULT_CAPTURE);
    let layers = find_optimal_video_layers(settings, option);
    if is_svc_codec(option.codec_name()) {
        to_svc_encodings(&layers)
    } else {
        layers
    }
}

#[must_use]
pub fn to_video_layers(layers: &[OptimalVideoLayer]) -> Vec<VideoLayer> {
    layers
        .iter()
        .map(|layer| VideoLayer {
            rid: layer.rid.clone(),
            bitrate: layer.max_bitrate,
            fps: layer.max_framerate.unwrap_or(0),
            quality: rid_to_quality(Some(layer.rid.as_str())),
            video_dimension: VideoDimension::new(layer.width, layer.height),
        })
        .collect()
}
