// crates/framecut-core/src/commands.rs
//
// Host → engine command union. One variant per operation the host can ask
// for; the engine worker matches exhaustively, so adding a feature means
// adding a variant here plus one match arm in the worker.

use std::path::PathBuf;
use std::sync::Arc;

use uuid::Uuid;

use crate::export::ExportSpec;
use crate::model::{ClipSpec, TrackKind};
use crate::surface::RenderSurface;

/// Minimum spacing hosts should keep between scrub-driven Seek commands, in
/// milliseconds. The coordinator coalesces concurrent seeks regardless; this
/// is input shaping for UIs that seek on every pointer move.
pub const SEEK_THROTTLE_MS: u64 = 50;

/// What the playback coordinator should preview: one clip's source and trim
/// window. The first entry of SetActiveClips is the primary video layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActiveClipDescriptor {
    pub source_id:   Uuid,
    pub trim_in_us:  i64,
    pub trim_out_us: i64,
}

/// One composition mutation. The engine applies it to its composition and
/// answers with `CompositionChanged` (carrying the new snapshot) on success
/// or a `Warning` naming the rejection on failure.
#[derive(Clone, Debug)]
pub enum EditOp {
    CreateTrack { kind: TrackKind, label: String },
    RemoveTrack { track_id: Uuid },
    AddClip { track_id: Uuid, spec: ClipSpec },
    AddVideoClipWithAudio { track_id: Uuid, spec: ClipSpec },
    RemoveClip { clip_id: Uuid },
    MoveClip { clip_id: Uuid, new_start_us: i64 },
    MoveClipWithLinked { clip_id: Uuid, new_start_us: i64 },
    MoveClipToTrack { clip_id: Uuid, track_id: Uuid, new_start_us: i64 },
    TrimStart { clip_id: Uuid, new_start_us: i64 },
    TrimEnd { clip_id: Uuid, new_end_us: i64 },
    TrimStartWithLinked { clip_id: Uuid, new_start_us: i64 },
    TrimEndWithLinked { clip_id: Uuid, new_end_us: i64 },
    Unlink { clip_id: Uuid },
    SplitClip { clip_id: Uuid, at_us: i64 },
    SetTrackMuted { track_id: Uuid, muted: bool },
    SetTrackSolo { track_id: Uuid, solo: bool },
    SetTrackLocked { track_id: Uuid, locked: bool },
}

pub enum EngineCommand {
    // ── Surface & sources ────────────────────────────────────────────────────
    /// Attach the host's render surface. Pure wiring.
    InitCanvas { surface: Box<dyn RenderSurface> },
    /// Load a container buffer. The demuxer collaborator fills the sample
    /// store; `SourceReady` (and `Ready` for the first source) follow.
    LoadSource { id: Uuid, bytes: Arc<[u8]> },
    RemoveSource { id: Uuid },

    // ── Transport ────────────────────────────────────────────────────────────
    /// Replace the preview's active clip set (playhead crossed a cut, or the
    /// selection changed).
    SetActiveClips { clips: Vec<ActiveClipDescriptor> },
    Seek { position_us: i64 },
    Play,
    Pause,
    SetTrim { in_us: i64, out_us: i64 },
    /// Set the composition's output gain. Folded into every clip volume when
    /// the export audio plan is built; answered with `CompositionChanged`.
    SetMasterVolume { volume: f32 },

    // ── Sprites ──────────────────────────────────────────────────────────────
    /// Hand a source's samples to the sprite pipeline so thumbnail demand can
    /// be served without touching the playback decoder.
    GetSamplesForSprites { source_id: Uuid },
    /// Viewport moved — generate thumbnails covering the visible range.
    SetVisibleRange { source_id: Uuid, start_us: i64, end_us: i64, interval_us: i64 },

    // ── Editing ──────────────────────────────────────────────────────────────
    Edit { op: EditOp },

    // ── Export ───────────────────────────────────────────────────────────────
    StartExport { job_id: Uuid, spec: ExportSpec },
    CancelExport { job_id: Uuid },

    // ── Snapshot & lifecycle ─────────────────────────────────────────────────
    /// Write the last rendered frame to `path` as PNG.
    SaveFrame { path: PathBuf },
    Shutdown,
}

impl EngineCommand {
    /// Variant name for warnings and logs (the command itself carries
    /// payloads that are not Debug).
    pub fn name(&self) -> &'static str {
        match self {
            EngineCommand::InitCanvas { .. }           => "InitCanvas",
            EngineCommand::LoadSource { .. }           => "LoadSource",
            EngineCommand::RemoveSource { .. }         => "RemoveSource",
            EngineCommand::SetActiveClips { .. }       => "SetActiveClips",
            EngineCommand::Seek { .. }                 => "Seek",
            EngineCommand::Play                        => "Play",
            EngineCommand::Pause                       => "Pause",
            EngineCommand::SetTrim { .. }              => "SetTrim",
            EngineCommand::SetMasterVolume { .. }      => "SetMasterVolume",
            EngineCommand::GetSamplesForSprites { .. } => "GetSamplesForSprites",
            EngineCommand::SetVisibleRange { .. }      => "SetVisibleRange",
            EngineCommand::Edit { .. }                 => "Edit",
            EngineCommand::StartExport { .. }          => "StartExport",
            EngineCommand::CancelExport { .. }         => "CancelExport",
            EngineCommand::SaveFrame { .. }            => "SaveFrame",
            EngineCommand::Shutdown                    => "Shutdown",
        }
    }
}
