// crates/framecut-core/src/model/track.rs
//
// Tracks own their clips, kept sorted by start time.
//
// Collision policy by kind:
//   Video / Subtitle — clips on one track never overlap in timeline time.
//   Audio            — overlap allowed (layers mix).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::clip::Clip;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackKind {
    Video,
    Audio,
    Subtitle,
}

impl TrackKind {
    /// Whether clips on tracks of this kind may overlap each other.
    #[inline]
    pub fn allows_overlap(self) -> bool {
        matches!(self, TrackKind::Audio)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Track {
    pub id:     Uuid,
    pub kind:   TrackKind,
    pub label:  String,
    /// Sorted ascending by `start_us`. Mutate only through `Composition` ops.
    pub clips:  Vec<Clip>,
    #[serde(default)]
    pub muted:  bool,
    #[serde(default)]
    pub solo:   bool,
    #[serde(default)]
    pub locked: bool,
}

impl Track {
    pub(crate) fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        Self {
            id:     Uuid::new_v4(),
            kind,
            label:  label.into(),
            clips:  Vec::new(),
            muted:  false,
            solo:   false,
            locked: false,
        }
    }

    /// The clip under timeline time `t`, if any.
    ///
    /// On audio tracks several clips may contain `t`; this returns the first
    /// in start order — use `clips_at` when all layers are needed.
    pub fn clip_at(&self, t: i64) -> Option<&Clip> {
        self.clips.iter().find(|c| c.contains(t))
    }

    /// All clips containing timeline time `t` (audio layering).
    pub fn clips_at(&self, t: i64) -> impl Iterator<Item = &Clip> {
        self.clips.iter().filter(move |c| c.contains(t))
    }

    pub fn clip(&self, id: Uuid) -> Option<&Clip> {
        self.clips.iter().find(|c| c.id == id)
    }

    pub(crate) fn clip_index(&self, id: Uuid) -> Option<usize> {
        self.clips.iter().position(|c| c.id == id)
    }

    /// True when `[start, end)` intersects any clip other than `exclude`.
    ///
    /// Always false on kinds that allow overlap.
    pub fn would_collide(&self, start_us: i64, end_us: i64, exclude: Option<Uuid>) -> bool {
        if self.kind.allows_overlap() {
            return false;
        }
        self.clips.iter().any(|c| {
            Some(c.id) != exclude && start_us < c.end_us() && end_us > c.start_us
        })
    }

    /// First free interval of at least `duration_us`, starting at or after
    /// `after_us`. The track end is always free, so this never fails.
    pub fn find_gap(&self, duration_us: i64, after_us: i64) -> i64 {
        let mut cursor = after_us.max(0);
        // clips are sorted, so one forward pass suffices
        for c in &self.clips {
            if c.end_us() <= cursor {
                continue;
            }
            if c.start_us >= cursor + duration_us {
                return cursor;
            }
            cursor = cursor.max(c.end_us());
        }
        cursor
    }

    /// Insert preserving start-order. Collision checking is the caller's job.
    pub(crate) fn insert_sorted(&mut self, clip: Clip) {
        let at = self.clips.partition_point(|c| c.start_us <= clip.start_us);
        self.clips.insert(at, clip);
    }

    /// Re-sort after a start-time mutation.
    pub(crate) fn resort(&mut self) {
        self.clips.sort_by_key(|c| c.start_us);
    }

    /// Exclusive end of the last clip, 0 when empty.
    pub fn end_us(&self) -> i64 {
        self.clips.iter().map(Clip::end_us).max().unwrap_or(0)
    }
}
