// crates/framecut-engine/src/lib.rs
//
// The worker-resident playback and editing engine: playback coordinator,
// sprite pipeline, export pipeline, and the worker thread gluing them to a
// host over typed command/event channels.
//
// Codec access goes through the trait seams in `codec`; enable the `ffmpeg`
// feature for the in-process FFmpeg backend.

pub mod clock;
pub mod codec;
pub mod compositor;
pub mod config;
pub mod error;
pub mod export;
pub mod playback;
pub mod snapshot;
pub mod sprite;
pub mod subtitle;
pub mod worker;

pub use codec::{
    AudioPlan, AudioSegment, ChunkKind, CodecBackend, CodecError, DecodedFrame, DecoderConfig,
    Demuxer, EncodedChunk, ExportSink, VideoDecoder,
};
pub use config::{DeviceTier, EngineConfig};
pub use error::EngineError;
pub use playback::{CoordinatorState, PlaybackCoordinator, MAX_FRAME_LAG_US, MAX_QUEUE_SIZE};
pub use worker::EngineWorker;

#[cfg(feature = "ffmpeg")]
pub use codec::ffmpeg::FfmpegBackend;
