// crates/framecut-core/src/model/clip.rs
//
// A clip is a trimmed window into a source, placed on the timeline.
//
// Three time domains meet here:
//   timeline time — where the clip sits (`start_us` .. `end_us`)
//   source time   — the trim window into the source (`trim_in_us` .. `trim_out_us`)
//   source space  — the source's full `[0, duration]` range
// `timeline_to_source` / `source_to_timeline` convert between the first two;
// both are exact integer maps so the round-trip is lossless.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::subtitle::SubtitleCue;

/// Shortest duration a clip may be trimmed to, in microseconds.
pub const MIN_TRIM_DURATION_US: i64 = 100_000;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub id:          Uuid,
    pub source_id:   Uuid,
    /// Timeline position of the clip's first frame.
    pub start_us:    i64,
    /// Source-time in-point. `0 ≤ trim_in < trim_out ≤ source.duration`.
    pub trim_in_us:  i64,
    /// Source-time out-point (exclusive).
    pub trim_out_us: i64,
    /// Compositing opacity in [0, 1].
    #[serde(default = "default_unit")]
    pub opacity:     f32,
    /// Audio gain in [0, 1], applied on top of the master volume.
    #[serde(default = "default_unit")]
    pub volume:      f32,
    /// Shared id pairing this clip with its linked peer, if any.
    #[serde(default)]
    pub link_id:     Option<Uuid>,
    /// Subtitle cues in source time. Only meaningful on subtitle tracks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cues:        Vec<SubtitleCue>,
}

fn default_unit() -> f32 {
    1.0
}

/// Caller-provided fields for a new clip; id and link are assigned by the
/// composition.
#[derive(Clone, Debug)]
pub struct ClipSpec {
    pub source_id:   Uuid,
    pub start_us:    i64,
    pub trim_in_us:  i64,
    pub trim_out_us: i64,
    pub opacity:     f32,
    pub volume:      f32,
}

impl ClipSpec {
    /// A full-length, full-opacity placement of `source_id` at `start_us`.
    pub fn full(source_id: Uuid, start_us: i64, source_duration_us: i64) -> Self {
        Self {
            source_id,
            start_us,
            trim_in_us:  0,
            trim_out_us: source_duration_us,
            opacity:     1.0,
            volume:      1.0,
        }
    }
}

impl Clip {
    pub(crate) fn from_spec(spec: &ClipSpec) -> Self {
        Self {
            id:          Uuid::new_v4(),
            source_id:   spec.source_id,
            start_us:    spec.start_us,
            trim_in_us:  spec.trim_in_us,
            trim_out_us: spec.trim_out_us,
            opacity:     spec.opacity.clamp(0.0, 1.0),
            volume:      spec.volume.clamp(0.0, 1.0),
            link_id:     None,
            cues:        Vec::new(),
        }
    }

    /// Trimmed duration on the timeline.
    #[inline]
    pub fn duration_us(&self) -> i64 {
        self.trim_out_us - self.trim_in_us
    }

    /// Exclusive timeline end.
    #[inline]
    pub fn end_us(&self) -> i64 {
        self.start_us + self.duration_us()
    }

    /// True when timeline time `t` falls inside this clip (`start ≤ t < end`).
    #[inline]
    pub fn contains(&self, t: i64) -> bool {
        t >= self.start_us && t < self.end_us()
    }

    /// Map a timeline time inside the clip to source time.
    #[inline]
    pub fn timeline_to_source(&self, t: i64) -> i64 {
        self.trim_in_us + (t - self.start_us)
    }

    /// Map a source time inside the trim window to timeline time.
    #[inline]
    pub fn source_to_timeline(&self, s: i64) -> i64 {
        self.start_us + (s - self.trim_in_us)
    }

    /// Cues active at timeline time `t`, in declaration order.
    pub fn active_cues(&self, t: i64) -> impl Iterator<Item = &SubtitleCue> {
        let s = self.timeline_to_source(t);
        self.cues
            .iter()
            .filter(move |c| s >= c.start_us && s < c.end_us)
    }
}
