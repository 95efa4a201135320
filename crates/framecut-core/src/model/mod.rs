// crates/framecut-core/src/model/mod.rs
//
// The composition: sources, tracks, clips, links, and the movement/collision
// algebra over them.
//
// Every mutating operation validates first and applies second, so a failed
// call leaves the composition exactly as it was. Linked-pair operations
// validate BOTH peers before touching either — "both move or neither does".
//
// Pure data throughout: no codec handles, no channels. The engine worker owns
// one Composition and emits CompositionChanged after each successful mutation.

pub mod clip;
pub mod track;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::sample::CodecInfo;
use crate::subtitle::SubtitleCue;

pub use clip::{Clip, ClipSpec, MIN_TRIM_DURATION_US};
pub use track::{Track, TrackKind};

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("track not found")]
    TrackNotFound,

    #[error("clip not found")]
    ClipNotFound,

    #[error("source not found")]
    SourceNotFound,

    #[error("source is referenced by {0} clip(s)")]
    SourceInUse(usize),

    #[error("clip would overlap another clip on the track")]
    Overlap,

    #[error("track is locked")]
    TrackLocked,

    #[error("track kind mismatch")]
    KindMismatch,

    #[error("invalid trim: {0}")]
    InvalidTrim(&'static str),

    #[error("clip would leave the timeline: {0}")]
    OutOfRange(&'static str),

    #[error("clip is not linked")]
    NotLinked,

    #[error("split point is not strictly inside the clip")]
    BadSplitPoint,
}

// ── Sources ───────────────────────────────────────────────────────────────────

/// Composition-level view of a loaded source. The heavy sample table lives in
/// the engine's SampleStore; this is the metadata clips validate against.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub id:          Uuid,
    pub width:       u32,
    pub height:      u32,
    pub codec:       CodecInfo,
    pub duration_us: i64,
    pub has_audio:   bool,
}

// ── Composition ───────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompositionConfig {
    pub width:      u32,
    pub height:     u32,
    pub frame_rate: u32,
}

impl Default for CompositionConfig {
    fn default() -> Self {
        Self { width: 1920, height: 1080, frame_rate: 30 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Composition {
    pub config:        CompositionConfig,
    /// Output gain in [0, 1], multiplied into every clip volume when audio
    /// is planned for export. Snapshots without the field load at unity.
    #[serde(default = "default_master_volume")]
    pub master_volume: f32,
    pub sources:       HashMap<Uuid, SourceInfo>,
    pub tracks:        Vec<Track>,
}

fn default_master_volume() -> f32 {
    1.0
}

impl Default for Composition {
    fn default() -> Self {
        Self::new(CompositionConfig::default())
    }
}

/// One visible video layer at a queried time.
#[derive(Clone, Copy, Debug)]
pub struct ActiveVideo<'a> {
    /// Index of the owning track — the compositor's z-order (0 = bottom).
    pub track_index: usize,
    pub clip:        &'a Clip,
}

/// Everything intersecting one timeline instant, honouring mute/solo.
#[derive(Debug, Default)]
pub struct ActiveClips<'a> {
    /// Bottom-up by track index; at most one clip per video track.
    pub video:     Vec<ActiveVideo<'a>>,
    /// All audible audio layers (overlap allowed).
    pub audio:     Vec<&'a Clip>,
    /// Active subtitle clips, bottom-up by track index.
    pub subtitles: Vec<&'a Clip>,
}

impl Composition {
    pub fn new(config: CompositionConfig) -> Self {
        Self {
            config,
            master_volume: 1.0,
            sources:       HashMap::new(),
            tracks:        Vec::new(),
        }
    }

    /// Set the output gain applied on top of per-clip volumes.
    pub fn set_master_volume(&mut self, volume: f32) {
        self.master_volume = volume.clamp(0.0, 1.0);
    }

    // ── Sources ──────────────────────────────────────────────────────────────

    pub fn add_source(&mut self, info: SourceInfo) {
        self.sources.insert(info.id, info);
    }

    /// Remove a source. Fails while any clip still references it.
    pub fn remove_source(&mut self, id: Uuid) -> Result<(), ModelError> {
        if !self.sources.contains_key(&id) {
            return Err(ModelError::SourceNotFound);
        }
        let refs = self
            .tracks
            .iter()
            .flat_map(|t| t.clips.iter())
            .filter(|c| c.source_id == id)
            .count();
        if refs > 0 {
            return Err(ModelError::SourceInUse(refs));
        }
        self.sources.remove(&id);
        Ok(())
    }

    pub fn source(&self, id: Uuid) -> Option<&SourceInfo> {
        self.sources.get(&id)
    }

    // ── Tracks ───────────────────────────────────────────────────────────────

    pub fn create_track(&mut self, kind: TrackKind, label: impl Into<String>) -> Uuid {
        let track = Track::new(kind, label);
        let id = track.id;
        self.tracks.push(track);
        id
    }

    pub fn remove_track(&mut self, id: Uuid) -> Result<(), ModelError> {
        let idx = self.track_index(id).ok_or(ModelError::TrackNotFound)?;
        self.tracks.remove(idx);
        Ok(())
    }

    pub fn track(&self, id: Uuid) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    fn track_index(&self, id: Uuid) -> Option<usize> {
        self.tracks.iter().position(|t| t.id == id)
    }

    fn track_mut(&mut self, id: Uuid) -> Result<&mut Track, ModelError> {
        self.tracks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(ModelError::TrackNotFound)
    }

    pub fn set_track_muted(&mut self, id: Uuid, muted: bool) -> Result<(), ModelError> {
        self.track_mut(id)?.muted = muted;
        Ok(())
    }

    pub fn set_track_solo(&mut self, id: Uuid, solo: bool) -> Result<(), ModelError> {
        self.track_mut(id)?.solo = solo;
        Ok(())
    }

    pub fn set_track_locked(&mut self, id: Uuid, locked: bool) -> Result<(), ModelError> {
        self.track_mut(id)?.locked = locked;
        Ok(())
    }

    // ── Clip lookup ──────────────────────────────────────────────────────────

    /// (track index, clip index) for a clip id.
    pub fn locate_clip(&self, id: Uuid) -> Option<(usize, usize)> {
        self.tracks.iter().enumerate().find_map(|(ti, t)| {
            t.clip_index(id).map(|ci| (ti, ci))
        })
    }

    pub fn clip(&self, id: Uuid) -> Option<&Clip> {
        self.locate_clip(id).map(|(ti, ci)| &self.tracks[ti].clips[ci])
    }

    /// The other member of a linked pair.
    pub fn linked_peer(&self, id: Uuid) -> Option<&Clip> {
        let link = self.clip(id)?.link_id?;
        self.tracks
            .iter()
            .flat_map(|t| t.clips.iter())
            .find(|c| c.link_id == Some(link) && c.id != id)
    }

    fn linked_peer_id(&self, id: Uuid) -> Option<Uuid> {
        self.linked_peer(id).map(|c| c.id)
    }

    // ── Adding clips ─────────────────────────────────────────────────────────

    fn validate_spec(&self, spec: &ClipSpec) -> Result<(), ModelError> {
        let source = self
            .sources
            .get(&spec.source_id)
            .ok_or(ModelError::SourceNotFound)?;
        if spec.start_us < 0 {
            return Err(ModelError::OutOfRange("start before 0"));
        }
        if spec.trim_in_us < 0 || spec.trim_out_us > source.duration_us {
            return Err(ModelError::InvalidTrim("trim outside source"));
        }
        if spec.trim_out_us - spec.trim_in_us < MIN_TRIM_DURATION_US {
            return Err(ModelError::InvalidTrim("below minimum duration"));
        }
        Ok(())
    }

    /// Add a clip to a track. Rejects overlap on video and subtitle tracks.
    pub fn add_clip(&mut self, track_id: Uuid, spec: ClipSpec) -> Result<Uuid, ModelError> {
        self.validate_spec(&spec)?;
        let track = self.track(track_id).ok_or(ModelError::TrackNotFound)?;
        if track.locked {
            return Err(ModelError::TrackLocked);
        }
        let end = spec.start_us + (spec.trim_out_us - spec.trim_in_us);
        if track.would_collide(spec.start_us, end, None) {
            return Err(ModelError::Overlap);
        }
        let clip = Clip::from_spec(&spec);
        let id = clip.id;
        self.track_mut(track_id)?.insert_sorted(clip);
        Ok(id)
    }

    /// Atomically place a video clip and its audio companion as a linked pair.
    ///
    /// The audio clip lands on the nearest audio track below the video track
    /// (then above, then a fresh "A" track is appended). Audio tracks allow
    /// overlap, so only the video placement can fail — validated before either
    /// clip is inserted.
    pub fn add_video_clip_with_audio(
        &mut self,
        video_track_id: Uuid,
        spec: ClipSpec,
    ) -> Result<(Uuid, Uuid), ModelError> {
        self.validate_spec(&spec)?;
        let vt_index = self.track_index(video_track_id).ok_or(ModelError::TrackNotFound)?;
        {
            let track = &self.tracks[vt_index];
            if track.kind != TrackKind::Video {
                return Err(ModelError::KindMismatch);
            }
            if track.locked {
                return Err(ModelError::TrackLocked);
            }
            let end = spec.start_us + (spec.trim_out_us - spec.trim_in_us);
            if track.would_collide(spec.start_us, end, None) {
                return Err(ModelError::Overlap);
            }
        }

        let audio_track_id = self
            .nearest_audio_track(vt_index)
            .unwrap_or_else(|| {
                let n = self.tracks.iter().filter(|t| t.kind == TrackKind::Audio).count();
                self.create_track(TrackKind::Audio, format!("A{}", n + 1))
            });

        let link_id = Uuid::new_v4();
        let mut video = Clip::from_spec(&spec);
        let mut audio = Clip::from_spec(&spec);
        video.link_id = Some(link_id);
        audio.link_id = Some(link_id);
        let ids = (video.id, audio.id);

        self.tracks[vt_index].insert_sorted(video);
        self.track_mut(audio_track_id)?.insert_sorted(audio);
        Ok(ids)
    }

    /// Nearest unlocked audio track by index distance; below wins ties.
    fn nearest_audio_track(&self, from_index: usize) -> Option<Uuid> {
        self.tracks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.kind == TrackKind::Audio && !t.locked)
            .min_by_key(|(i, _)| {
                let dist = i.abs_diff(from_index);
                // below (greater index) preferred on equal distance
                (dist, if *i > from_index { 0 } else { 1 })
            })
            .map(|(_, t)| t.id)
    }

    pub fn remove_clip(&mut self, id: Uuid) -> Result<(), ModelError> {
        let (ti, ci) = self.locate_clip(id).ok_or(ModelError::ClipNotFound)?;
        if self.tracks[ti].locked {
            return Err(ModelError::TrackLocked);
        }
        self.tracks[ti].clips.remove(ci);
        Ok(())
    }

    // ── Moving clips ─────────────────────────────────────────────────────────

    /// Check a single-clip move without applying it. Returns the clamped
    /// destination start.
    fn check_move(&self, id: Uuid, new_start_us: i64) -> Result<i64, ModelError> {
        let (ti, ci) = self.locate_clip(id).ok_or(ModelError::ClipNotFound)?;
        let track = &self.tracks[ti];
        if track.locked {
            return Err(ModelError::TrackLocked);
        }
        let clip = &track.clips[ci];
        let start = new_start_us.max(0);
        let end = start + clip.duration_us();
        if track.would_collide(start, end, Some(id)) {
            return Err(ModelError::Overlap);
        }
        Ok(start)
    }

    fn apply_move(&mut self, id: Uuid, start_us: i64) {
        if let Some((ti, ci)) = self.locate_clip(id) {
            self.tracks[ti].clips[ci].start_us = start_us;
            self.tracks[ti].resort();
        }
    }

    /// Move a clip on its own track. The start is clamped to ≥ 0; a collision
    /// on a video/subtitle track rejects the move.
    pub fn move_clip(&mut self, id: Uuid, new_start_us: i64) -> Result<(), ModelError> {
        let start = self.check_move(id, new_start_us)?;
        self.apply_move(id, start);
        Ok(())
    }

    /// Move a clip and its linked peer by the same delta.
    ///
    /// Both destinations are validated before either clip moves — if either
    /// collides or would leave the timeline, both stay where they are.
    pub fn move_clip_with_linked(&mut self, id: Uuid, new_start_us: i64) -> Result<(), ModelError> {
        let Some(peer_id) = self.linked_peer_id(id) else {
            return self.move_clip(id, new_start_us);
        };
        let clip = self.clip(id).ok_or(ModelError::ClipNotFound)?;
        let peer = self.clip(peer_id).ok_or(ModelError::ClipNotFound)?;

        let start = new_start_us.max(0);
        let delta = start - clip.start_us;
        let peer_start = peer.start_us + delta;
        if peer_start < 0 {
            return Err(ModelError::OutOfRange("linked peer before 0"));
        }

        self.check_move(id, start)?;
        self.check_move(peer_id, peer_start)?;
        self.apply_move(id, start);
        self.apply_move(peer_id, peer_start);
        Ok(())
    }

    /// Move a clip to another track of the same kind.
    pub fn move_clip_to_track(
        &mut self,
        id: Uuid,
        target_track_id: Uuid,
        new_start_us: i64,
    ) -> Result<(), ModelError> {
        let (src_ti, src_ci) = self.locate_clip(id).ok_or(ModelError::ClipNotFound)?;
        let dst_ti = self.track_index(target_track_id).ok_or(ModelError::TrackNotFound)?;

        let src_kind = self.tracks[src_ti].kind;
        let dst = &self.tracks[dst_ti];
        if dst.kind != src_kind {
            return Err(ModelError::KindMismatch);
        }
        if self.tracks[src_ti].locked || dst.locked {
            return Err(ModelError::TrackLocked);
        }

        let start = new_start_us.max(0);
        let duration = self.tracks[src_ti].clips[src_ci].duration_us();
        if dst.would_collide(start, start + duration, None) {
            return Err(ModelError::Overlap);
        }

        let mut clip = self.tracks[src_ti].clips.remove(src_ci);
        clip.start_us = start;
        self.tracks[dst_ti].insert_sorted(clip);
        Ok(())
    }

    // ── Trimming ─────────────────────────────────────────────────────────────

    /// Validate a start-trim to `new_start_us` without applying. Returns the
    /// trim-in delta.
    fn check_trim_start(&self, id: Uuid, new_start_us: i64) -> Result<i64, ModelError> {
        let (ti, ci) = self.locate_clip(id).ok_or(ModelError::ClipNotFound)?;
        let track = &self.tracks[ti];
        if track.locked {
            return Err(ModelError::TrackLocked);
        }
        let clip = &track.clips[ci];
        let delta = new_start_us - clip.start_us;
        let new_trim_in = clip.trim_in_us + delta;
        if new_start_us < 0 {
            return Err(ModelError::OutOfRange("start before 0"));
        }
        if new_trim_in < 0 {
            return Err(ModelError::InvalidTrim("trim-in before source start"));
        }
        if clip.trim_out_us - new_trim_in < MIN_TRIM_DURATION_US {
            return Err(ModelError::InvalidTrim("below minimum duration"));
        }
        if track.would_collide(new_start_us, clip.end_us(), Some(id)) {
            return Err(ModelError::Overlap);
        }
        Ok(delta)
    }

    fn apply_trim_start(&mut self, id: Uuid, delta: i64) {
        if let Some((ti, ci)) = self.locate_clip(id) {
            let clip = &mut self.tracks[ti].clips[ci];
            clip.start_us += delta;
            clip.trim_in_us += delta;
            self.tracks[ti].resort();
        }
    }

    /// Trim the clip's leading edge to a new timeline start. The out-point
    /// stays put: moving the edge right discards leading source material,
    /// moving it left reveals more.
    pub fn trim_start(&mut self, id: Uuid, new_start_us: i64) -> Result<(), ModelError> {
        let delta = self.check_trim_start(id, new_start_us)?;
        self.apply_trim_start(id, delta);
        Ok(())
    }

    fn check_trim_end(&self, id: Uuid, new_end_us: i64) -> Result<i64, ModelError> {
        let (ti, ci) = self.locate_clip(id).ok_or(ModelError::ClipNotFound)?;
        let track = &self.tracks[ti];
        if track.locked {
            return Err(ModelError::TrackLocked);
        }
        let clip = &track.clips[ci];
        let source = self
            .sources
            .get(&clip.source_id)
            .ok_or(ModelError::SourceNotFound)?;
        let delta = new_end_us - clip.end_us();
        let new_trim_out = clip.trim_out_us + delta;
        if new_trim_out > source.duration_us {
            return Err(ModelError::InvalidTrim("trim-out past source end"));
        }
        if new_trim_out - clip.trim_in_us < MIN_TRIM_DURATION_US {
            return Err(ModelError::InvalidTrim("below minimum duration"));
        }
        if track.would_collide(clip.start_us, new_end_us, Some(id)) {
            return Err(ModelError::Overlap);
        }
        Ok(delta)
    }

    fn apply_trim_end(&mut self, id: Uuid, delta: i64) {
        if let Some((ti, ci)) = self.locate_clip(id) {
            self.tracks[ti].clips[ci].trim_out_us += delta;
        }
    }

    /// Trim the clip's trailing edge to a new timeline end.
    pub fn trim_end(&mut self, id: Uuid, new_end_us: i64) -> Result<(), ModelError> {
        let delta = self.check_trim_end(id, new_end_us)?;
        self.apply_trim_end(id, delta);
        Ok(())
    }

    /// Start-trim a clip and mirror the same delta onto its linked peer.
    pub fn trim_start_with_linked(&mut self, id: Uuid, new_start_us: i64) -> Result<(), ModelError> {
        let Some(peer_id) = self.linked_peer_id(id) else {
            return self.trim_start(id, new_start_us);
        };
        let delta = self.check_trim_start(id, new_start_us)?;
        let peer_start = self.clip(peer_id).ok_or(ModelError::ClipNotFound)?.start_us + delta;
        let peer_delta = self.check_trim_start(peer_id, peer_start)?;
        self.apply_trim_start(id, delta);
        self.apply_trim_start(peer_id, peer_delta);
        Ok(())
    }

    /// End-trim a clip and mirror the same delta onto its linked peer.
    pub fn trim_end_with_linked(&mut self, id: Uuid, new_end_us: i64) -> Result<(), ModelError> {
        let Some(peer_id) = self.linked_peer_id(id) else {
            return self.trim_end(id, new_end_us);
        };
        let delta = self.check_trim_end(id, new_end_us)?;
        let peer_end = self.clip(peer_id).ok_or(ModelError::ClipNotFound)?.end_us() + delta;
        let peer_delta = self.check_trim_end(peer_id, peer_end)?;
        self.apply_trim_end(id, delta);
        self.apply_trim_end(peer_id, peer_delta);
        Ok(())
    }

    // ── Linking ──────────────────────────────────────────────────────────────

    /// Dissolve a linked pair. Both peers keep their positions.
    pub fn unlink(&mut self, id: Uuid) -> Result<(), ModelError> {
        let peer_id = self.linked_peer_id(id).ok_or(ModelError::NotLinked)?;
        for cid in [id, peer_id] {
            if let Some((ti, ci)) = self.locate_clip(cid) {
                self.tracks[ti].clips[ci].link_id = None;
            }
        }
        Ok(())
    }

    // ── Splitting ────────────────────────────────────────────────────────────

    /// Split a clip in two at timeline time `at_us`. Both halves keep their
    /// source mapping; a linked peer is split at the same instant and the
    /// halves re-paired (leading halves keep the old link, trailing halves
    /// share a fresh one).
    ///
    /// Returns the ids of the trailing halves (peer second, when linked).
    pub fn split_clip(&mut self, id: Uuid, at_us: i64) -> Result<Vec<Uuid>, ModelError> {
        let peer_id = self.linked_peer_id(id);

        // Validate every half before touching anything.
        for cid in std::iter::once(id).chain(peer_id) {
            let clip = self.clip(cid).ok_or(ModelError::ClipNotFound)?;
            let (ti, _) = self.locate_clip(cid).ok_or(ModelError::ClipNotFound)?;
            if self.tracks[ti].locked {
                return Err(ModelError::TrackLocked);
            }
            if at_us <= clip.start_us || at_us >= clip.end_us() {
                return Err(ModelError::BadSplitPoint);
            }
            let lead = at_us - clip.start_us;
            let tail = clip.end_us() - at_us;
            if lead < MIN_TRIM_DURATION_US || tail < MIN_TRIM_DURATION_US {
                return Err(ModelError::InvalidTrim("split half below minimum duration"));
            }
        }

        let tail_link = peer_id.map(|_| Uuid::new_v4());
        let mut tail_ids = Vec::new();
        for cid in std::iter::once(id).chain(peer_id) {
            let (ti, ci) = self.locate_clip(cid).ok_or(ModelError::ClipNotFound)?;
            let split_source = self.tracks[ti].clips[ci].timeline_to_source(at_us);

            let mut tail = self.tracks[ti].clips[ci].clone();
            tail.id = Uuid::new_v4();
            tail.start_us = at_us;
            tail.trim_in_us = split_source;
            tail.link_id = tail_link;

            self.tracks[ti].clips[ci].trim_out_us = split_source;
            tail_ids.push(tail.id);
            self.tracks[ti].insert_sorted(tail);
        }
        Ok(tail_ids)
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    /// First free interval of at least `duration_us` on a track, searching
    /// from `after_us` (or the timeline start).
    pub fn find_gap(
        &self,
        track_id: Uuid,
        duration_us: i64,
        after_us: Option<i64>,
    ) -> Result<i64, ModelError> {
        let track = self.track(track_id).ok_or(ModelError::TrackNotFound)?;
        Ok(track.find_gap(duration_us, after_us.unwrap_or(0)))
    }

    /// Composition duration: the furthest clip end over all tracks.
    pub fn duration_us(&self) -> i64 {
        self.tracks.iter().map(Track::end_us).max().unwrap_or(0)
    }

    /// Everything active at timeline time `t`, honouring mute and solo.
    ///
    /// When any track is solo, only solo tracks contribute; otherwise all
    /// unmuted tracks do. Video layers come back bottom-up by track index.
    pub fn active_clips(&self, t: i64) -> ActiveClips<'_> {
        let any_solo = self.tracks.iter().any(|tr| tr.solo);
        let mut active = ActiveClips::default();

        for (index, track) in self.tracks.iter().enumerate() {
            let audible = if any_solo { track.solo } else { !track.muted };
            if !audible {
                continue;
            }
            match track.kind {
                TrackKind::Video => {
                    if let Some(clip) = track.clip_at(t) {
                        active.video.push(ActiveVideo { track_index: index, clip });
                    }
                }
                TrackKind::Audio => active.audio.extend(track.clips_at(t)),
                TrackKind::Subtitle => {
                    if let Some(clip) = track.clip_at(t) {
                        active.subtitles.push(clip);
                    }
                }
            }
        }
        active
    }

    /// Subtitle cues visible at `t`, bottom-up across subtitle tracks.
    pub fn active_cues(&self, t: i64) -> Vec<&SubtitleCue> {
        self.active_clips(t)
            .subtitles
            .into_iter()
            .flat_map(|clip| clip.active_cues(t))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: i64 = 1_000_000;

    fn comp_with_source(duration_us: i64) -> (Composition, Uuid) {
        let mut comp = Composition::new(CompositionConfig::default());
        let source_id = Uuid::new_v4();
        comp.add_source(SourceInfo {
            id:          source_id,
            width:       1920,
            height:      1080,
            codec:       CodecInfo { codec_id: "avc1.64001f".into(), description: vec![] },
            duration_us,
            has_audio:   true,
        });
        (comp, source_id)
    }

    fn spec(source: Uuid, start: i64, dur: i64) -> ClipSpec {
        ClipSpec {
            source_id:   source,
            start_us:    start,
            trim_in_us:  0,
            trim_out_us: dur,
            opacity:     1.0,
            volume:      1.0,
        }
    }

    #[test]
    fn add_clip_rejects_overlap_on_video_tracks() {
        let (mut comp, src) = comp_with_source(60 * SEC);
        let v1 = comp.create_track(TrackKind::Video, "V1");
        comp.add_clip(v1, spec(src, 0, 2 * SEC)).unwrap();
        assert_eq!(
            comp.add_clip(v1, spec(src, SEC, 2 * SEC)),
            Err(ModelError::Overlap)
        );
        // Butting up exactly is fine.
        comp.add_clip(v1, spec(src, 2 * SEC, 2 * SEC)).unwrap();
    }

    #[test]
    fn add_clip_validates_trim_against_source() {
        let (mut comp, src) = comp_with_source(5 * SEC);
        let v1 = comp.create_track(TrackKind::Video, "V1");
        let mut s = spec(src, 0, 2 * SEC);
        s.trim_out_us = 6 * SEC;
        assert!(matches!(comp.add_clip(v1, s), Err(ModelError::InvalidTrim(_))));
    }

    #[test]
    fn linked_pair_is_created_atomically_on_nearest_audio_track() {
        let (mut comp, src) = comp_with_source(60 * SEC);
        let v1 = comp.create_track(TrackKind::Video, "V1");
        let a1 = comp.create_track(TrackKind::Audio, "A1");

        let (vid, aid) = comp.add_video_clip_with_audio(v1, spec(src, SEC, 4 * SEC)).unwrap();
        let video = comp.clip(vid).unwrap();
        let audio = comp.clip(aid).unwrap();

        assert!(video.link_id.is_some());
        assert_eq!(video.link_id, audio.link_id);
        assert_eq!(comp.track(a1).unwrap().clips.len(), 1);
        assert_eq!(comp.linked_peer(vid).unwrap().id, aid);
    }

    #[test]
    fn linked_pair_creates_audio_track_when_none_exists() {
        let (mut comp, src) = comp_with_source(60 * SEC);
        let v1 = comp.create_track(TrackKind::Video, "V1");
        comp.add_video_clip_with_audio(v1, spec(src, 0, SEC)).unwrap();
        assert!(comp.tracks.iter().any(|t| t.kind == TrackKind::Audio));
    }

    #[test]
    fn move_clip_clamps_to_zero_and_respects_collisions() {
        let (mut comp, src) = comp_with_source(60 * SEC);
        let v1 = comp.create_track(TrackKind::Video, "V1");
        let a = comp.add_clip(v1, spec(src, 5 * SEC, 2 * SEC)).unwrap();
        let b = comp.add_clip(v1, spec(src, 10 * SEC, 2 * SEC)).unwrap();

        comp.move_clip(a, -3 * SEC).unwrap();
        assert_eq!(comp.clip(a).unwrap().start_us, 0);

        assert_eq!(comp.move_clip(b, SEC), Err(ModelError::Overlap));
        assert_eq!(comp.clip(b).unwrap().start_us, 10 * SEC);
    }

    #[test]
    fn linked_move_shifts_both_or_neither() {
        let (mut comp, src) = comp_with_source(60 * SEC);
        let v1 = comp.create_track(TrackKind::Video, "V1");
        comp.create_track(TrackKind::Audio, "A1");

        // Linked pair at 0 s, 1 s long; a blocker at 1.2 s on the video track.
        let (vid, aid) = comp.add_video_clip_with_audio(v1, spec(src, 0, SEC)).unwrap();
        comp.add_clip(v1, spec(src, 1_200_000, SEC)).unwrap();

        assert_eq!(
            comp.move_clip_with_linked(vid, 1_300_000),
            Err(ModelError::Overlap)
        );
        assert_eq!(comp.clip(vid).unwrap().start_us, 0);
        assert_eq!(comp.clip(aid).unwrap().start_us, 0);

        // A clear destination moves both by the same delta.
        comp.move_clip_with_linked(vid, 3 * SEC).unwrap();
        assert_eq!(comp.clip(vid).unwrap().start_us, 3 * SEC);
        assert_eq!(comp.clip(aid).unwrap().start_us, 3 * SEC);
    }

    #[test]
    fn move_to_track_requires_matching_kind() {
        let (mut comp, src) = comp_with_source(60 * SEC);
        let v1 = comp.create_track(TrackKind::Video, "V1");
        let v2 = comp.create_track(TrackKind::Video, "V2");
        let a1 = comp.create_track(TrackKind::Audio, "A1");
        let id = comp.add_clip(v1, spec(src, 0, SEC)).unwrap();

        assert_eq!(comp.move_clip_to_track(id, a1, 0), Err(ModelError::KindMismatch));
        comp.move_clip_to_track(id, v2, 2 * SEC).unwrap();
        assert!(comp.track(v1).unwrap().clips.is_empty());
        assert_eq!(comp.track(v2).unwrap().clips[0].start_us, 2 * SEC);
    }

    #[test]
    fn trim_start_moves_edge_and_keeps_out_point() {
        let (mut comp, src) = comp_with_source(60 * SEC);
        let v1 = comp.create_track(TrackKind::Video, "V1");
        let id = comp
            .add_clip(v1, ClipSpec {
                source_id:   src,
                start_us:    4 * SEC,
                trim_in_us:  2 * SEC,
                trim_out_us: 8 * SEC,
                opacity:     1.0,
                volume:      1.0,
            })
            .unwrap();

        comp.trim_start(id, 5 * SEC).unwrap();
        let c = comp.clip(id).unwrap();
        assert_eq!(c.start_us, 5 * SEC);
        assert_eq!(c.trim_in_us, 3 * SEC);
        assert_eq!(c.end_us(), 10 * SEC); // out edge untouched

        // Past the out-point minus the minimum duration: rejected.
        assert!(matches!(
            comp.trim_start(id, 10 * SEC),
            Err(ModelError::InvalidTrim(_))
        ));
        // Before the source's first microsecond: rejected.
        assert!(matches!(
            comp.trim_start(id, SEC),
            Err(ModelError::InvalidTrim(_))
        ));
    }

    #[test]
    fn trim_end_respects_source_duration() {
        let (mut comp, src) = comp_with_source(5 * SEC);
        let v1 = comp.create_track(TrackKind::Video, "V1");
        let id = comp.add_clip(v1, spec(src, 0, 4 * SEC)).unwrap();

        comp.trim_end(id, 5 * SEC).unwrap();
        assert_eq!(comp.clip(id).unwrap().trim_out_us, 5 * SEC);

        assert!(matches!(
            comp.trim_end(id, 6 * SEC),
            Err(ModelError::InvalidTrim(_))
        ));
    }

    #[test]
    fn linked_trim_mirrors_delta_or_leaves_both() {
        let (mut comp, src) = comp_with_source(60 * SEC);
        let v1 = comp.create_track(TrackKind::Video, "V1");
        comp.create_track(TrackKind::Audio, "A1");
        let (vid, aid) = comp
            .add_video_clip_with_audio(v1, ClipSpec {
                source_id:   src,
                start_us:    2 * SEC,
                trim_in_us:  SEC,
                trim_out_us: 5 * SEC,
                opacity:     1.0,
                volume:      1.0,
            })
            .unwrap();

        comp.trim_start_with_linked(vid, 3 * SEC).unwrap();
        assert_eq!(comp.clip(vid).unwrap().trim_in_us, 2 * SEC);
        assert_eq!(comp.clip(aid).unwrap().trim_in_us, 2 * SEC);

        comp.trim_end_with_linked(vid, 5 * SEC).unwrap();
        assert_eq!(comp.clip(vid).unwrap().trim_out_us, 4 * SEC);
        assert_eq!(comp.clip(aid).unwrap().trim_out_us, 4 * SEC);

        // Trim-in below source start must reject both peers.
        let before = (comp.clip(vid).unwrap().clone(), comp.clip(aid).unwrap().clone());
        assert!(comp.trim_start_with_linked(vid, 0).is_err());
        assert_eq!(comp.clip(vid).unwrap(), &before.0);
        assert_eq!(comp.clip(aid).unwrap(), &before.1);
    }

    #[test]
    fn unlink_clears_both_peers() {
        let (mut comp, src) = comp_with_source(60 * SEC);
        let v1 = comp.create_track(TrackKind::Video, "V1");
        comp.create_track(TrackKind::Audio, "A1");
        let (vid, aid) = comp.add_video_clip_with_audio(v1, spec(src, 0, SEC)).unwrap();

        comp.unlink(vid).unwrap();
        assert!(comp.clip(vid).unwrap().link_id.is_none());
        assert!(comp.clip(aid).unwrap().link_id.is_none());
        assert_eq!(comp.unlink(vid), Err(ModelError::NotLinked));
    }

    #[test]
    fn split_produces_two_contiguous_halves() {
        let (mut comp, src) = comp_with_source(60 * SEC);
        let v1 = comp.create_track(TrackKind::Video, "V1");
        let id = comp
            .add_clip(v1, ClipSpec {
                source_id:   src,
                start_us:    SEC,
                trim_in_us:  SEC,
                trim_out_us: 5 * SEC,
                opacity:     1.0,
                volume:      1.0,
            })
            .unwrap();

        let tails = comp.split_clip(id, 3 * SEC).unwrap();
        assert_eq!(tails.len(), 1);
        let head = comp.clip(id).unwrap();
        let tail = comp.clip(tails[0]).unwrap();

        assert_eq!(head.end_us(), 3 * SEC);
        assert_eq!(tail.start_us, 3 * SEC);
        // Source continuity across the cut.
        assert_eq!(head.trim_out_us, tail.trim_in_us);
        assert_eq!(tail.trim_out_us, 5 * SEC);

        assert_eq!(comp.split_clip(id, 0), Err(ModelError::BadSplitPoint));
    }

    #[test]
    fn split_of_linked_pair_repairs_links() {
        let (mut comp, src) = comp_with_source(60 * SEC);
        let v1 = comp.create_track(TrackKind::Video, "V1");
        comp.create_track(TrackKind::Audio, "A1");
        let (vid, aid) = comp.add_video_clip_with_audio(v1, spec(src, 0, 4 * SEC)).unwrap();

        let tails = comp.split_clip(vid, 2 * SEC).unwrap();
        assert_eq!(tails.len(), 2);

        // Leading halves still linked to each other.
        assert_eq!(comp.linked_peer(vid).unwrap().id, aid);
        // Trailing halves linked to each other, under a fresh id.
        assert_eq!(comp.linked_peer(tails[0]).unwrap().id, tails[1]);
        assert_ne!(comp.clip(vid).unwrap().link_id, comp.clip(tails[0]).unwrap().link_id);
    }

    #[test]
    fn remove_source_refuses_while_referenced() {
        let (mut comp, src) = comp_with_source(60 * SEC);
        let v1 = comp.create_track(TrackKind::Video, "V1");
        let id = comp.add_clip(v1, spec(src, 0, SEC)).unwrap();

        assert_eq!(comp.remove_source(src), Err(ModelError::SourceInUse(1)));
        comp.remove_clip(id).unwrap();
        comp.remove_source(src).unwrap();
        assert!(comp.sources.is_empty());
    }

    #[test]
    fn locked_track_rejects_mutation() {
        let (mut comp, src) = comp_with_source(60 * SEC);
        let v1 = comp.create_track(TrackKind::Video, "V1");
        let id = comp.add_clip(v1, spec(src, 0, SEC)).unwrap();
        comp.set_track_locked(v1, true).unwrap();

        assert_eq!(comp.move_clip(id, SEC), Err(ModelError::TrackLocked));
        assert_eq!(comp.add_clip(v1, spec(src, 5 * SEC, SEC)), Err(ModelError::TrackLocked));
        assert_eq!(comp.remove_clip(id), Err(ModelError::TrackLocked));
    }

    #[test]
    fn active_clips_honour_mute_and_solo() {
        let (mut comp, src) = comp_with_source(60 * SEC);
        let v1 = comp.create_track(TrackKind::Video, "V1");
        let v2 = comp.create_track(TrackKind::Video, "V2");
        let a1 = comp.create_track(TrackKind::Audio, "A1");
        comp.add_clip(v1, spec(src, 0, 2 * SEC)).unwrap();
        comp.add_clip(v2, spec(src, 0, 2 * SEC)).unwrap();
        comp.add_clip(a1, spec(src, 0, 2 * SEC)).unwrap();

        let active = comp.active_clips(SEC);
        assert_eq!(active.video.len(), 2);
        assert_eq!(active.audio.len(), 1);
        // Bottom-up z-order by track index.
        assert!(active.video[0].track_index < active.video[1].track_index);

        comp.set_track_muted(v1, true).unwrap();
        assert_eq!(comp.active_clips(SEC).video.len(), 1);

        comp.set_track_solo(v2, true).unwrap();
        let soloed = comp.active_clips(SEC);
        assert_eq!(soloed.video.len(), 1);
        assert!(soloed.audio.is_empty());
    }

    #[test]
    fn duration_is_furthest_clip_end() {
        let (mut comp, src) = comp_with_source(60 * SEC);
        assert_eq!(comp.duration_us(), 0);
        let v1 = comp.create_track(TrackKind::Video, "V1");
        let a1 = comp.create_track(TrackKind::Audio, "A1");
        comp.add_clip(v1, spec(src, 0, 2 * SEC)).unwrap();
        comp.add_clip(a1, spec(src, 5 * SEC, 3 * SEC)).unwrap();
        assert_eq!(comp.duration_us(), 8 * SEC);
    }

    #[test]
    fn master_volume_defaults_to_unity_and_clamps() {
        let (mut comp, _) = comp_with_source(60 * SEC);
        assert!((comp.master_volume - 1.0).abs() < 1e-6);

        comp.set_master_volume(1.7);
        assert!((comp.master_volume - 1.0).abs() < 1e-6);
        comp.set_master_volume(-0.3);
        assert_eq!(comp.master_volume, 0.0);

        comp.set_master_volume(0.4);
        let json = serde_json::to_string(&comp).unwrap();
        let back: Composition = serde_json::from_str(&json).unwrap();
        assert!((back.master_volume - 0.4).abs() < 1e-6);

        // Snapshots saved before the field existed load at unity gain.
        let legacy: Composition = serde_json::from_str(
            r#"{"config":{"width":1920,"height":1080,"frame_rate":30},"sources":{},"tracks":[]}"#,
        )
        .unwrap();
        assert!((legacy.master_volume - 1.0).abs() < 1e-6);
    }

    #[test]
    fn composition_json_round_trips_losslessly() {
        let (mut comp, src) = comp_with_source(60 * SEC);
        let v1 = comp.create_track(TrackKind::Video, "V1");
        comp.create_track(TrackKind::Audio, "A1");
        let (vid, _) = comp.add_video_clip_with_audio(v1, spec(src, SEC, 4 * SEC)).unwrap();
        comp.set_track_muted(v1, true).unwrap();

        let json = serde_json::to_string(&comp).unwrap();
        let back: Composition = serde_json::from_str(&json).unwrap();

        assert_eq!(back.config, comp.config);
        assert_eq!(back.sources, comp.sources);
        assert_eq!(back.tracks.len(), comp.tracks.len());
        assert_eq!(back.clip(vid).unwrap(), comp.clip(vid).unwrap());
        assert!(back.track(v1).unwrap().muted);
    }
}
