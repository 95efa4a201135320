// crates/framecut-engine/src/snapshot.rs
//
// Frame snapshot: write the last rendered frame to disk as PNG.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::error::EngineError;

/// Encode a tightly packed RGBA buffer as a PNG at `path`.
pub fn write_png(path: &Path, width: u32, height: u32, rgba: &[u8]) -> Result<(), EngineError> {
    if rgba.len() != (width * height * 4) as usize {
        return Err(EngineError::Snapshot(format!(
            "buffer size {} does not match {width}x{height} RGBA",
            rgba.len()
        )));
    }
    let file = File::create(path)
        .map_err(|e| EngineError::Snapshot(format!("create '{}': {e}", path.display())))?;
    let writer = &mut BufWriter::new(file);
    let mut encoder = png::Encoder::new(writer, width, height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    encoder
        .write_header()
        .and_then(|mut w| w.write_image_data(rgba))
        .map_err(|e| EngineError::Snapshot(format!("encode '{}': {e}", path.display())))?;
    Ok(())
}
