// crates/framecut-core/src/events.rs
//
// Engine → host event union. Within one pipeline events arrive in the order
// observed; across pipelines (playback vs. sprite vs. export) ordering is
// not guaranteed.

use std::path::PathBuf;

use uuid::Uuid;

use crate::model::Composition;
use crate::sprite::SpriteSheet;

#[derive(Clone, Debug)]
pub enum EngineEvent {
    // ── Loading ──────────────────────────────────────────────────────────────
    /// The engine has a playable source attached; the preview is live.
    Ready { duration_us: i64, width: u32, height: u32 },
    /// One source finished loading into the sample store.
    SourceReady {
        id:          Uuid,
        duration_us: i64,
        width:       u32,
        height:      u32,
        has_audio:   bool,
    },

    // ── Playback ─────────────────────────────────────────────────────────────
    TimeUpdate { position_us: i64 },
    PlaybackState { playing: bool },
    /// The first frame rendered after a load, so hosts can show a poster
    /// immediately. Tightly packed RGBA.
    FirstFrame { width: u32, height: u32, data: Vec<u8> },

    // ── Editing ──────────────────────────────────────────────────────────────
    /// Some composition mutation succeeded; the snapshot carries the new
    /// state so the host can refresh its active-clip set.
    CompositionChanged { composition: Composition },

    // ── Sprites ──────────────────────────────────────────────────────────────
    SpriteSheetReady { sheet: SpriteSheet },

    // ── Export ───────────────────────────────────────────────────────────────
    Progress {
        job_id:  Uuid,
        current: u64,
        total:   u64,
        percent: f32,
    },
    Complete {
        job_id:     Uuid,
        /// Finished MP4 container bytes.
        data:       Vec<u8>,
        size_bytes: usize,
    },
    Cancelled { job_id: Uuid },

    // ── Snapshot ─────────────────────────────────────────────────────────────
    FrameSaved { path: PathBuf },

    // ── Faults ───────────────────────────────────────────────────────────────
    /// Something went wrong. `recoverable: true` means the engine reset itself
    /// and keeps running; `false` means the current operation is dead.
    Error { message: String, recoverable: bool },
    /// A command arrived in a state where it cannot apply; it was ignored.
    Warning { message: String },
}
