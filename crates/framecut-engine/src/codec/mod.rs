// crates/framecut-engine/src/codec/mod.rs
//
// The codec boundary: everything the engine asks of a decoder, demuxer, or
// encoder, expressed as traits so the worker-resident logic never touches a
// concrete codec API.
//
// The decoder contract mirrors a hardware decode queue:
//   decode() enqueues one encoded chunk and returns immediately;
//   poll() hands back frames as they become available, in timestamp order;
//   flush() drains everything still in flight and returns it;
//   after flush() or reset(), the next chunk fed MUST be a key chunk.
//
// DecodedFrame is a linear resource — it owns its pixels and has exactly one
// owning path (rendered, dropped, or cancelled). Move semantics make a
// double-release unrepresentable; `close()` is the explicit single release.

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use framecut_core::export::ExportSettings;
use framecut_core::sample::{CodecInfo, SourceMedia};

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("decoder not configured")]
    NotConfigured,

    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("configure failed: {0}")]
    Configure(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("flush failed: {0}")]
    Flush(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("demux failed: {0}")]
    Demux(String),
}

impl CodecError {
    /// Per the error taxonomy: per-chunk failures are transient; anything
    /// that prevents a decoder from existing at all is fatal.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CodecError::Decode(_) | CodecError::Flush(_) | CodecError::Encode(_)
        )
    }
}

// ── Chunks and frames ─────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkKind {
    Key,
    Delta,
}

/// One encoded chunk on its way into a decoder. Borrows the sample payload —
/// the store keeps ownership.
#[derive(Clone, Copy, Debug)]
pub struct EncodedChunk<'a> {
    pub kind:         ChunkKind,
    pub timestamp_us: i64,
    pub duration_us:  i64,
    pub data:         &'a [u8],
}

/// Decoder configuration, taken from the source's container metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecoderConfig {
    pub codec:        CodecInfo,
    pub coded_width:  u32,
    pub coded_height: u32,
}

impl DecoderConfig {
    pub fn for_source(media: &SourceMedia) -> Self {
        Self {
            codec:        media.codec.clone(),
            coded_width:  media.width,
            coded_height: media.height,
        }
    }
}

/// A decoded frame: owned RGBA pixels plus presentation metadata.
///
/// Exactly one of three things happens to every frame — it is rendered,
/// dropped, or cancelled — and each consumes it.
#[derive(Debug)]
pub struct DecodedFrame {
    pub timestamp_us: i64,
    pub width:        u32,
    pub height:       u32,
    data:             Vec<u8>,
}

impl DecodedFrame {
    pub fn new(timestamp_us: i64, width: u32, height: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), (width * height * 4) as usize);
        Self { timestamp_us, width, height, data }
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Release the frame without presenting it (the dropped/cancelled paths).
    #[inline]
    pub fn close(self) {}

    /// Consume the frame, keeping its pixels (the rendered path).
    #[inline]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

// ── Traits ────────────────────────────────────────────────────────────────────

/// Push-model video decoder over container samples.
pub trait VideoDecoder: Send {
    fn configure(&mut self, config: &DecoderConfig) -> Result<(), CodecError>;

    fn is_configured(&self) -> bool;

    /// Enqueue one chunk. Frames come back through `poll`, not the return
    /// value. After `flush`/`reset` the first chunk must be `ChunkKind::Key`.
    fn decode(&mut self, chunk: EncodedChunk<'_>) -> Result<(), CodecError>;

    /// Next available frame, in timestamp order, or `None` while the queue
    /// is still working.
    fn poll(&mut self) -> Option<DecodedFrame>;

    /// Drain the decode queue, returning every frame still in flight.
    fn flush(&mut self) -> Result<Vec<DecodedFrame>, CodecError>;

    /// Chunks submitted but not yet returned as frames.
    fn in_flight(&self) -> usize;

    /// Discard all in-flight state. The decoder stays configured.
    fn reset(&mut self);
}

/// The external demuxer collaborator: container bytes in, samples + keyframe
/// index + codec description out.
pub trait Demuxer: Send {
    fn demux(&mut self, id: Uuid, bytes: Arc<[u8]>) -> Result<SourceMedia, CodecError>;
}

/// A span of source audio scheduled into the export output.
#[derive(Clone, Debug)]
pub struct AudioSegment {
    /// Container bytes of the source this audio comes from.
    pub container:       Arc<[u8]>,
    /// Where in the source the span begins.
    pub source_start_us: i64,
    pub duration_us:     i64,
    /// Where in the output the span begins (relative to export in-point).
    pub output_start_us: i64,
    /// Gain in [0, 1] — clip volume × master volume.
    pub volume:          f32,
}

/// Everything the sink needs to lay down the output audio track. Empty plan
/// means video-only output.
#[derive(Clone, Debug, Default)]
pub struct AudioPlan {
    pub segments: Vec<AudioSegment>,
}

impl AudioPlan {
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// The hardware-encoder driver for export: composited frames in, a finished
/// MP4 blob out.
pub trait ExportSink: Send {
    fn configure(&mut self, settings: &ExportSettings, audio: &AudioPlan) -> Result<(), CodecError>;

    /// Append one output frame. `rgba` is tightly packed at the configured
    /// output dimensions; `timestamp_us` is relative to the export in-point.
    fn write_video(
        &mut self,
        width: u32,
        height: u32,
        rgba: &[u8],
        timestamp_us: i64,
    ) -> Result<(), CodecError>;

    /// Finish the container and hand back its bytes.
    fn finalize(&mut self) -> Result<Vec<u8>, CodecError>;

    /// Cancel path: drop everything, finalize nothing.
    fn discard(&mut self);
}

/// Factory for per-pipeline codec instances. Playback, sprite, and export
/// each create their own decoder — no sharing across threads.
pub trait CodecBackend: Send + Sync {
    fn make_decoder(&self) -> Box<dyn VideoDecoder>;
    fn make_demuxer(&self) -> Box<dyn Demuxer>;
    fn make_export_sink(&self) -> Box<dyn ExportSink>;
}

// ── Test doubles ──────────────────────────────────────────────────────────────


#[cfg(test)]
mod tests {
    use super::testing::ScriptedDecoder;
    use super::*;

    fn config() -> DecoderConfig {
        DecoderConfig {
            codec: CodecInfo { codec_id: "avc1.64001f".into(), description: vec![] },
            coded_width:  4,
            coded_height: 2,
        }
    }

    fn chunk(kind: ChunkKind, ts: i64) -> EncodedChunk<'static> {
        EncodedChunk { kind, timestamp_us: ts, duration_us: 33_333, data: &[] }
    }

    #[test]
    fn scripted_decoder_respects_latency() {
        let mut dec = ScriptedDecoder::new(2);
        dec.configure(&config()).unwrap();

        dec.decode(chunk(ChunkKind::Key, 0)).unwrap();
        dec.decode(chunk(ChunkKind::Delta, 33_333)).unwrap();
        assert!(dec.poll().is_none());
        assert_eq!(dec.in_flight(), 2);

        dec.decode(chunk(ChunkKind::Delta, 66_666)).unwrap();
        let f = dec.poll().unwrap();
        assert_eq!(f.timestamp_us, 0);
        f.close();
    }

    #[test]
    fn flush_drains_everything_and_rearms_key_check() {
        let mut dec = ScriptedDecoder::new(3);
        dec.configure(&config()).unwrap();
        dec.decode(chunk(ChunkKind::Key, 0)).unwrap();
        dec.decode(chunk(ChunkKind::Delta, 1)).unwrap();

        let frames = dec.flush().unwrap();
        assert_eq!(frames.len(), 2);
        for f in frames {
            f.close();
        }
        assert_eq!(dec.in_flight(), 0);

        // A delta straight after flush is the violation the journal records.
        dec.decode(chunk(ChunkKind::Delta, 2)).unwrap();
        assert!(dec.journal.lock().unwrap().key_violation);
    }

    #[test]
    fn frame_data_length_matches_dimensions() {
        let f = DecodedFrame::new(0, 2, 2, vec![0u8; 16]);
        assert_eq!(f.data().len(), 16);
        assert_eq!(f.into_data().len(), 16);
    }
}
