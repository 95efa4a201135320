// crates/framecut-core/src/subtitle.rs
//
// Subtitle cue payloads. Parsing from WebVTT/SRT stays host-side; the engine
// only needs timed text to hand to the compositor's cue rasterizer.

use serde::{Deserialize, Serialize};

/// One timed caption. Times are in source microseconds — the owning clip's
/// trim window decides which cues are reachable from the timeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleCue {
    pub start_us: i64,
    pub end_us:   i64,
    pub text:     String,
}

impl SubtitleCue {
    /// True when the cue is visible at source time `s`.
    #[inline]
    pub fn contains(&self, s: i64) -> bool {
        s >= self.start_us && s < self.end_us
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cue_window_is_half_open() {
        let cue = SubtitleCue { start_us: 1_000, end_us: 2_000, text: "hi".into() };
        assert!(cue.contains(1_000));
        assert!(cue.contains(1_999));
        assert!(!cue.contains(2_000));
    }
}
