// crates/framecut-engine/src/compositor.rs
//
// Layered RGBA compositor for the export walk.
//
// Layers are drawn bottom-up into a single owned target buffer: the base
// video layer first, further video layers and overlays source-over blended
// with their per-layer opacity, subtitles last at full opacity. The blend
// runs in gamma-encoded byte space — a correct approximation for SDR
// content.
//
// Buffer contract everywhere in this file: tightly packed RGBA, straight
// (non-premultiplied) alpha, `width * height * 4` bytes, no stride padding.

use image::imageops::FilterType;
use image::RgbaImage;
use rayon::prelude::*;

use framecut_core::export::OverlayItem;

// ── Frame buffer ──────────────────────────────────────────────────────────────

/// An owned RGBA pixel buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameBuffer {
    pub width:  u32,
    pub height: u32,
    pub data:   Vec<u8>,
}

impl FrameBuffer {
    /// Fully transparent buffer.
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, data: vec![0u8; (width * height * 4) as usize] }
    }

    /// Reset to opaque black (the empty-timeline frame).
    pub fn clear_opaque_black(&mut self) {
        for px in self.data.chunks_exact_mut(4) {
            px[0] = 0;
            px[1] = 0;
            px[2] = 0;
            px[3] = 255;
        }
    }
}

// ── Pixel blend ───────────────────────────────────────────────────────────────

/// Blend one byte channel: `dst*(1-a) + src*a`, rounded.
#[inline]
fn blend_byte(dst: u8, src: u8, alpha: f32) -> u8 {
    (dst as f32 + (src as f32 - dst as f32) * alpha).round() as u8
}

/// Source-over one RGBA row onto another at `opacity`.
///
/// Effective alpha per pixel = source alpha × opacity; the destination's own
/// alpha channel saturates toward opaque.
fn blend_row(dst: &mut [u8], src: &[u8], opacity: f32) {
    debug_assert_eq!(dst.len(), src.len());
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let alpha = (s[3] as f32 / 255.0) * opacity;
        if alpha <= 0.0 {
            continue;
        }
        d[0] = blend_byte(d[0], s[0], alpha);
        d[1] = blend_byte(d[1], s[1], alpha);
        d[2] = blend_byte(d[2], s[2], alpha);
        d[3] = d[3].max((alpha * 255.0).round() as u8);
    }
}

// ── Placement ─────────────────────────────────────────────────────────────────

/// Largest aspect-preserving rect of `src` centered inside `dst`.
fn fit_rect(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> (u32, u32, u32, u32) {
    if src_w == 0 || src_h == 0 {
        return (0, 0, 0, 0);
    }
    let scale = (dst_w as f64 / src_w as f64).min(dst_h as f64 / src_h as f64);
    let w = ((src_w as f64 * scale) as u32).max(1).min(dst_w);
    let h = ((src_h as f64 * scale) as u32).max(1).min(dst_h);
    ((dst_w - w) / 2, (dst_h - h) / 2, w, h)
}

// ── Compositor ────────────────────────────────────────────────────────────────

pub struct Compositor {
    width:  u32,
    height: u32,
    target: FrameBuffer,
}

impl Compositor {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, target: FrameBuffer::new(width, height) }
    }

    /// Start a fresh output frame.
    pub fn begin_frame(&mut self) {
        self.target.clear_opaque_black();
    }

    /// Blend a video layer, letterboxed to the output and scaled with a
    /// bilinear filter.
    pub fn draw_video_layer(&mut self, src_w: u32, src_h: u32, rgba: &[u8], opacity: f32) {
        if opacity <= 0.0 || src_w == 0 || src_h == 0 {
            return;
        }
        let (x, y, w, h) = fit_rect(src_w, src_h, self.width, self.height);
        let scaled = scale_rgba(src_w, src_h, rgba, w, h);
        self.blend_rect(x, y, w, h, &scaled, opacity);
    }

    /// Blend a host overlay positioned by percent-of-output coordinates.
    pub fn draw_overlay(&mut self, overlay: &OverlayItem) {
        if overlay.opacity <= 0.0 {
            return;
        }
        let x = pct(overlay.x_pct, self.width);
        let y = pct(overlay.y_pct, self.height);
        let w = pct(overlay.w_pct, self.width).max(1).min(self.width.saturating_sub(x));
        let h = pct(overlay.h_pct, self.height).max(1).min(self.height.saturating_sub(y));
        if w == 0 || h == 0 {
            return;
        }
        let scaled = scale_rgba(overlay.width, overlay.height, &overlay.data, w, h);
        self.blend_rect(x, y, w, h, &scaled, overlay.opacity.clamp(0.0, 1.0));
    }

    /// Blend a full-frame subtitle surface over everything, at opacity 1.
    pub fn draw_subtitle_surface(&mut self, surface: &FrameBuffer) {
        debug_assert_eq!((surface.width, surface.height), (self.width, self.height));
        self.blend_rect(0, 0, self.width, self.height, &surface.data, 1.0);
    }

    /// The finished frame for the current walk step.
    pub fn frame(&self) -> &FrameBuffer {
        &self.target
    }

    /// Blend a tightly packed `w×h` RGBA block at `(x, y)`, row-parallel.
    fn blend_rect(&mut self, x: u32, y: u32, w: u32, h: u32, src: &[u8], opacity: f32) {
        let stride = (self.width * 4) as usize;
        let src_stride = (w * 4) as usize;
        let x0 = (x * 4) as usize;

        self.target
            .data
            .par_chunks_exact_mut(stride)
            .skip(y as usize)
            .take(h as usize)
            .enumerate()
            .for_each(|(row, dst_row)| {
                let src_row = &src[row * src_stride..(row + 1) * src_stride];
                blend_row(&mut dst_row[x0..x0 + src_stride], src_row, opacity);
            });
    }
}

#[inline]
fn pct(p: f32, total: u32) -> u32 {
    ((p.clamp(0.0, 100.0) / 100.0) * total as f32).round() as u32
}

/// Resize a packed RGBA buffer. Pass-through when dimensions already match.
fn scale_rgba(src_w: u32, src_h: u32, rgba: &[u8], dst_w: u32, dst_h: u32) -> Vec<u8> {
    if src_w == dst_w && src_h == dst_h {
        return rgba.to_vec();
    }
    let img = RgbaImage::from_raw(src_w, src_h, rgba.to_vec())
        .unwrap_or_else(|| RgbaImage::new(src_w.max(1), src_h.max(1)));
    image::imageops::resize(&img, dst_w, dst_h, FilterType::Triangle).into_raw()
}
