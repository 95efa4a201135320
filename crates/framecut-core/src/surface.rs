// crates/framecut-core/src/surface.rs
//
// The renderer surface the host hands to the engine via InitCanvas.
//
// The engine never owns a window or a GPU context — it writes finished RGBA
// frames into whatever the host provides (a texture upload, a shared-memory
// framebuffer, a test sink).

/// Host-provided presentation target for decoded frames.
pub trait RenderSurface: Send {
    /// Display one frame. `rgba` is tightly packed, `width * height * 4` bytes.
    fn present(&mut self, width: u32, height: u32, rgba: &[u8]);
}

/// Surface that discards everything. Default until InitCanvas arrives, so
/// playback logic never has to special-case a missing canvas.
#[derive(Debug, Default)]
pub struct NullSurface;

impl RenderSurface for NullSurface {
    fn present(&mut self, _width: u32, _height: u32, _rgba: &[u8]) {}
}
