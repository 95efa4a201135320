// crates/framecut-engine/src/subtitle.rs
//
// Subtitle rasterization seam for the compositor.
//
// Text shaping belongs to the host (the platform it runs on has a real text
// stack); the engine only needs *some* RGBA surface to blend after the video
// layers. BandRasterizer is the built-in fallback: it draws the classic
// translucent caption band, sized to the text, with no glyph rendering.

use framecut_core::subtitle::SubtitleCue;

use crate::compositor::FrameBuffer;

/// Turns the active cues into a full-frame RGBA surface, or `None` when
/// nothing is visible.
pub trait CueRasterizer: Send {
    fn rasterize(&mut self, cues: &[&SubtitleCue], width: u32, height: u32)
        -> Option<FrameBuffer>;
}

/// Caption bands without glyphs: one bottom-anchored dark band per cue,
/// width proportional to the text length. Deterministic, host-independent.
pub struct BandRasterizer {
    /// Band height as a fraction of the frame height.
    band_frac:   f32,
    /// Alpha of the band fill.
    band_alpha:  u8,
}

impl Default for BandRasterizer {
    fn default() -> Self {
        Self { band_frac: 0.08, band_alpha: 200 }
    }
}

impl CueRasterizer for BandRasterizer {
    fn rasterize(
        &mut self,
        cues: &[&SubtitleCue],
        width: u32,
        height: u32,
    ) -> Option<FrameBuffer> {
        if cues.is_empty() || width == 0 || height == 0 {
            return None;
        }
        let mut surface = FrameBuffer::new(width, height);
        let band_h = ((height as f32 * self.band_frac) as u32).max(1);
        let margin = band_h / 2;

        // Stack bands upward from the bottom margin, newest cue lowest.
        for (i, cue) in cues.iter().enumerate() {
            let chars = cue.text.chars().count().min(64) as u32;
            if chars == 0 {
                continue;
            }
            // ~55% of the frame width at 64 chars, floor of 10%.
            let band_w = (width * (10 + chars * 45 / 64) / 100).clamp(1, width);
            let x0 = (width - band_w) / 2;
            let y_bottom = height.saturating_sub(margin + i as u32 * (band_h + margin / 2));
            let y0 = y_bottom.saturating_sub(band_h);

            fill_rect(&mut surface, x0, y0, band_w, y_bottom - y0, [16, 16, 16, self.band_alpha]);
        }
        Some(surface)
    }
}

fn fill_rect(fb: &mut FrameBuffer, x: u32, y: u32, w: u32, h: u32, rgba: [u8; 4]) {
    let stride = (fb.width * 4) as usize;
    for row in y..(y + h).min(fb.height) {
        let start = row as usize * stride + (x * 4) as usize;
        let end = start + (w * 4) as usize;
        for px in fb.data[start..end].chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cue(text: &str) -> SubtitleCue {
        SubtitleCue { start_us: 0, end_us: 1_000_000, text: text.into() }
    }

    #[test]
    fn no_cues_means_no_surface() {
        let mut r = BandRasterizer::default();
        assert!(r.rasterize(&[], 100, 100).is_none());
    }

    #[test]
    fn band_sits_in_the_lower_frame_and_scales_with_text() {
        let mut r = BandRasterizer::default();
        let short = cue("hi");
        let long = cue("a much longer caption line with many characters");

        let surface = r.rasterize(&[&short], 100, 100).unwrap();
        let opaque = |s: &FrameBuffer| s.data.chunks_exact(4).filter(|p| p[3] > 0).count();
        let short_px = opaque(&surface);
        assert!(short_px > 0);
        // Nothing above mid-frame.
        let top_half = &surface.data[..(100 * 50 * 4) as usize];
        assert!(top_half.chunks_exact(4).all(|p| p[3] == 0));

        let surface = r.rasterize(&[&long], 100, 100).unwrap();
        assert!(opaque(&surface) > short_px);
    }

    #[test]
    fn two_cues_stack_two_bands() {
        let mut r = BandRasterizer::default();
        let a = cue("first");
        let b = cue("second");
        let one = r.rasterize(&[&a], 200, 100).unwrap();
        let two = r.rasterize(&[&a, &b], 200, 100).unwrap();
        let opaque = |s: &FrameBuffer| s.data.chunks_exact(4).filter(|p| p[3] > 0).count();
        assert!(opaque(&two) > opaque(&one));
    }
}
