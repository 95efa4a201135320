// crates/framecut-core/src/export.rs
//
// Export job description: output settings, presets, and overlay items.
//
// The engine receives a complete snapshot — composition, range, settings,
// overlays — so a running export is immune to edits made while it renders.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::model::{Composition, CompositionConfig};
use crate::viewport::ExportRange;

/// Output parameters for one export job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSettings {
    pub width:         u32,
    pub height:        u32,
    pub frame_rate:    u32,
    /// Video bitrate in bits per second.
    pub video_bitrate: u32,
    /// Audio bitrate in bits per second.
    pub audio_bitrate: u32,
}

/// Quality presets. Scale applies to the composition's output dimensions;
/// even dimensions are enforced for the encoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportPreset {
    Low,
    Medium,
    High,
}

impl ExportPreset {
    pub fn settings(self, config: CompositionConfig) -> ExportSettings {
        let (scale, video_bitrate, audio_bitrate) = match self {
            ExportPreset::Low    => (0.50, 2_000_000, 96_000),
            ExportPreset::Medium => (0.75, 5_000_000, 128_000),
            ExportPreset::High   => (1.00, 8_000_000, 192_000),
        };
        ExportSettings {
            width:         even_dim(config.width, scale),
            height:        even_dim(config.height, scale),
            frame_rate:    config.frame_rate,
            video_bitrate,
            audio_bitrate,
        }
    }
}

fn even_dim(dim: u32, scale: f64) -> u32 {
    (((dim as f64 * scale) as u32).max(2)) & !1
}

/// A host-supplied bitmap layered over the video, positioned in percent of
/// the output frame so the same overlay works at any export resolution.
#[derive(Clone, Debug)]
pub struct OverlayItem {
    /// Tightly packed RGBA, `width * height * 4` bytes.
    pub data:    Arc<[u8]>,
    pub width:   u32,
    pub height:  u32,
    pub x_pct:   f32,
    pub y_pct:   f32,
    pub w_pct:   f32,
    pub h_pct:   f32,
    pub opacity: f32,
}

/// Complete description of one export job.
#[derive(Clone, Debug)]
pub struct ExportSpec {
    pub composition: Composition,
    pub range:       ExportRange,
    pub settings:    ExportSettings,
    pub overlays:    Vec<OverlayItem>,
}
