// crates/framecut-core/src/lib.rs
//
// Pure data and algebra for the framecut engine — no codec handles, no
// threads, no channels. Everything here is shared between the engine worker
// and any host embedding it.

pub mod commands;
pub mod events;
pub mod export;
pub mod helpers;
pub mod model;
pub mod sample;
pub mod sprite;
pub mod subtitle;
pub mod surface;
pub mod viewport;

pub use commands::{ActiveClipDescriptor, EditOp, EngineCommand};
pub use events::EngineEvent;
pub use export::{ExportPreset, ExportSettings, ExportSpec, OverlayItem};
pub use model::{Clip, ClipSpec, Composition, CompositionConfig, ModelError, SourceInfo, Track, TrackKind};
pub use sample::{CodecInfo, Sample, SampleStore, SampleTable, SourceMedia};
pub use sprite::{SheetId, SpriteRef, SpriteSheet};
pub use subtitle::SubtitleCue;
pub use surface::{NullSurface, RenderSurface};
pub use viewport::{ExportRange, Viewport};
