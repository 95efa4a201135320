// crates/framecut-core/src/viewport.rs
//
// Timeline viewport (zoom/pan window) and the export in/out markers.
//
// The viewport only affects sprite demand — playback and export never read it.

use serde::{Deserialize, Serialize};

/// Narrowest window the viewport may show, in microseconds.
pub const MIN_VISIBLE_DURATION_US: i64 = 1_000_000;

/// Upper zoom bound, relative to the fitted (zoom = 1) view.
pub const MAX_ZOOM: f64 = 10.0;

/// Multiplicative step used by zoom-in/zoom-out.
pub const ZOOM_STEP: f64 = 1.5;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub start_us: i64,
    pub end_us:   i64,
    pub zoom:     f64,
}

impl Viewport {
    /// A fitted view over `[0, duration]`.
    pub fn fit(duration_us: i64) -> Self {
        Self {
            start_us: 0,
            end_us:   duration_us.max(MIN_VISIBLE_DURATION_US),
            zoom:     1.0,
        }
    }

    #[inline]
    pub fn visible_us(&self) -> i64 {
        self.end_us - self.start_us
    }

    /// Zoom by `factor` around `anchor_us`, clamped to the zoom and
    /// minimum-window bounds. The anchor keeps its on-screen position.
    pub fn zoom_by(&mut self, factor: f64, anchor_us: i64, duration_us: i64) {
        let new_zoom = (self.zoom * factor).clamp(1.0, MAX_ZOOM);
        let ratio = self.zoom / new_zoom;
        self.zoom = new_zoom;

        let anchor = anchor_us.clamp(self.start_us, self.end_us);
        let frac = if self.visible_us() > 0 {
            (anchor - self.start_us) as f64 / self.visible_us() as f64
        } else {
            0.5
        };

        let new_visible = ((self.visible_us() as f64 * ratio) as i64)
            .clamp(MIN_VISIBLE_DURATION_US, duration_us.max(MIN_VISIBLE_DURATION_US));
        let start = anchor - (new_visible as f64 * frac) as i64;
        self.start_us = start.clamp(0, (duration_us - new_visible).max(0));
        self.end_us = self.start_us + new_visible;
    }

    pub fn zoom_in(&mut self, anchor_us: i64, duration_us: i64) {
        self.zoom_by(ZOOM_STEP, anchor_us, duration_us);
    }

    pub fn zoom_out(&mut self, anchor_us: i64, duration_us: i64) {
        self.zoom_by(1.0 / ZOOM_STEP, anchor_us, duration_us);
    }

    /// Shift the window by `delta_us`, clamped to `[0, duration]`.
    pub fn pan(&mut self, delta_us: i64, duration_us: i64) {
        let visible = self.visible_us();
        let start = (self.start_us + delta_us).clamp(0, (duration_us - visible).max(0));
        self.start_us = start;
        self.end_us = start + visible;
    }
}

// ── Export range ──────────────────────────────────────────────────────────────

/// Optional in/out markers selecting the slice of the timeline to export.
/// `None` on either side defaults to the composition bound.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRange {
    pub in_us:  Option<i64>,
    pub out_us: Option<i64>,
}

impl ExportRange {
    /// Resolve against a composition duration. Returns `(in, out)` with
    /// `in < out`, or `None` when the markers describe an empty range.
    pub fn resolve(&self, duration_us: i64) -> Option<(i64, i64)> {
        let start = self.in_us.unwrap_or(0).max(0);
        let end = self.out_us.unwrap_or(duration_us).min(duration_us);
        (start < end).then_some((start, end))
    }
}
