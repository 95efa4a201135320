// crates/framecut-engine/src/playback.rs
//
// The playback coordinator: one state machine driving one decoder.
//
// Lifecycle: Idle → Loading → Ready, with `playing` and `seeking` as
// concurrent flags over Ready. All work happens on the worker thread through
// `tick()` — one call per display refresh. Seeks are incremental: `seek()`
// validates and arms a plan, `tick()` feeds it, so a second seek arriving
// mid-flight lands in `pending_seek` and only the latest target runs.
//
// Rules this file lives by:
//   - after every decoder flush/reset, the next chunk fed is a key chunk
//   - at most one seek in flight; later targets coalesce into pending_seek
//   - frames are version-tagged; a frame from a superseded seek is closed,
//     never rendered
//   - while pause drains, frames are discarded and the rendered position
//     does not move
//   - the wall-clock anchor is taken on the first renderable frame after
//     (re)start, not on the Play command

use std::collections::VecDeque;
use std::sync::Arc;

use crossbeam_channel::Sender;
use tracing::{debug, warn};

use framecut_core::events::EngineEvent;
use framecut_core::model::MIN_TRIM_DURATION_US;
use framecut_core::sample::SourceMedia;
use framecut_core::surface::{NullSurface, RenderSurface};

use crate::clock::Clock;
use crate::codec::{ChunkKind, DecodedFrame, DecoderConfig, EncodedChunk, VideoDecoder};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Decoder lookahead: in-flight chunks plus queued frames never exceed this.
pub const MAX_QUEUE_SIZE: usize = 8;

/// A queued frame lagging the wall-clock target by more than this is dropped
/// instead of rendered, so slow hardware catches up.
pub const MAX_FRAME_LAG_US: i64 = 100_000;

/// Starting playback closer than this to the trim-out snaps back to trim-in.
pub const PLAY_NEAR_END_TOLERANCE_US: i64 = 100_000;

// ── Types ─────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Loading,
    Ready,
}

/// An armed seek: everything `tick()` needs to feed it.
struct SeekPlan {
    target_us:    i64,
    target_index: usize,
    cursor:       usize,
}

pub struct PlaybackCoordinator {
    decoder: Box<dyn VideoDecoder>,
    surface: Box<dyn RenderSurface>,
    clock:   Box<dyn Clock>,
    events:  Sender<EngineEvent>,

    state:  CoordinatorState,
    source: Option<Arc<SourceMedia>>,
    config: Option<DecoderConfig>,

    trim_in_us:  i64,
    trim_out_us: i64,

    // seek state
    seeking:         bool,
    seek_version:    u64,
    pending_seek_us: Option<i64>,
    plan:            Option<SeekPlan>,

    // playback state
    playing:                  bool,
    frame_queue:              VecDeque<(u64, DecodedFrame)>,
    last_queued_sample_index: Option<usize>,
    needs_wall_clock_sync:    bool,
    playback_start_wall_us:   i64,
    playback_start_us:        i64,
    playback_min_timestamp:   i64,
    last_rendered_us:         Option<i64>,

    // snapshot support
    last_frame:          Option<(u32, u32, Vec<u8>)>,
    first_frame_pending: bool,
}

impl PlaybackCoordinator {
    pub fn new(
        decoder: Box<dyn VideoDecoder>,
        clock: Box<dyn Clock>,
        events: Sender<EngineEvent>,
    ) -> Self {
        Self {
            decoder,
            surface: Box::new(NullSurface),
            clock,
            events,
            state: CoordinatorState::Idle,
            source: None,
            config: None,
            trim_in_us: 0,
            trim_out_us: 0,
            seeking: false,
            seek_version: 0,
            pending_seek_us: None,
            plan: None,
            playing: false,
            frame_queue: VecDeque::new(),
            last_queued_sample_index: None,
            needs_wall_clock_sync: false,
            playback_start_wall_us: 0,
            playback_start_us: 0,
            playback_min_timestamp: 0,
            last_rendered_us: None,
            last_frame: None,
            first_frame_pending: false,
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_seeking(&self) -> bool {
        self.seeking
    }

    /// Timestamp of the last frame put on the surface.
    pub fn position_us(&self) -> Option<i64> {
        self.last_rendered_us
    }

    /// The last presented frame, for PNG snapshots.
    pub fn last_frame(&self) -> Option<(u32, u32, &[u8])> {
        self.last_frame.as_ref().map(|(w, h, d)| (*w, *h, d.as_slice()))
    }

    #[cfg(test)]
    fn last_queued_index(&self) -> Option<usize> {
        self.last_queued_sample_index
    }

    // ── Operations ───────────────────────────────────────────────────────────

    /// Attach the host's render surface. Pure wiring.
    pub fn init_canvas(&mut self, surface: Box<dyn RenderSurface>) {
        self.surface = surface;
    }

    /// Make `media` the active source: reset everything, configure the
    /// decoder from its codec description, and arm the initial seek to 0 so
    /// the first frame shows immediately.
    pub fn load_source(&mut self, media: Arc<SourceMedia>) {
        self.state = CoordinatorState::Loading;
        self.reset_transport();

        let config = DecoderConfig::for_source(&media);
        if let Err(e) = self.decoder.configure(&config) {
            self.fatal(format!("decoder configure: {e}"));
            return;
        }
        self.config = Some(config);
        self.trim_in_us = 0;
        self.trim_out_us = media.duration_us;

        let _ = self.events.send(EngineEvent::Ready {
            duration_us: media.duration_us,
            width:       media.width,
            height:      media.height,
        });

        self.source = Some(media);
        self.state = CoordinatorState::Ready;
        self.first_frame_pending = true;
        self.start_seek(0);
    }

    /// Switch the preview to a different clip of the same or another source.
    /// Reconfigures only when the source actually changes, then lands on the
    /// clip's in-point.
    pub fn set_active_clip(&mut self, media: Arc<SourceMedia>, trim_in_us: i64, trim_out_us: i64) {
        let same = self.source.as_ref().is_some_and(|s| s.id == media.id);
        if !same {
            self.reset_transport();
            let config = DecoderConfig::for_source(&media);
            if let Err(e) = self.decoder.configure(&config) {
                self.fatal(format!("decoder configure: {e}"));
                return;
            }
            self.config = Some(config);
            self.source = Some(media);
            self.state = CoordinatorState::Ready;
        }
        self.trim_in_us = trim_in_us.max(0);
        self.trim_out_us = trim_out_us.min(self.source.as_ref().map_or(0, |s| s.duration_us));
        self.seek(self.trim_in_us);
    }

    /// Update the trim window. Does not seek; the end-of-playback check picks
    /// up the new out-point on the next tick.
    pub fn set_trim(&mut self, in_us: i64, out_us: i64) {
        let Some(source) = &self.source else {
            self.protocol_warning("SetTrim before a source is loaded");
            return;
        };
        if out_us - in_us < MIN_TRIM_DURATION_US {
            self.protocol_warning("SetTrim below minimum duration");
            return;
        }
        self.trim_in_us = in_us.max(0);
        self.trim_out_us = out_us.min(source.duration_us);
    }

    /// Request a seek. A seek already in flight coalesces this target into
    /// the single pending slot — only the latest pending target runs.
    pub fn seek(&mut self, target_us: i64) {
        if self.state != CoordinatorState::Ready {
            self.protocol_warning("Seek before a source is loaded");
            return;
        }
        if self.seeking {
            self.pending_seek_us = Some(target_us);
            return;
        }
        self.start_seek(target_us);
    }

    /// Start playback from the current position, snapping back to trim-in
    /// when at (or within tolerance of) the trim-out.
    pub fn play(&mut self) {
        if self.state != CoordinatorState::Ready || self.source.is_none() {
            self.protocol_warning("Play before a source is loaded");
            return;
        }
        if self.playing {
            return;
        }
        self.playing = true;
        let _ = self.events.send(EngineEvent::PlaybackState { playing: true });

        let pos = self.last_rendered_us.unwrap_or(self.trim_in_us);
        if pos < self.trim_in_us || pos >= self.trim_out_us - PLAY_NEAR_END_TOLERANCE_US {
            // The seek completion re-primes the queue because playing is set.
            self.seek(self.trim_in_us);
            return;
        }

        match self.decoder.flush() {
            Ok(frames) => close_all(frames),
            Err(e) => warn!("flush on play: {e}"),
        }
        self.clear_queue();
        self.playback_min_timestamp = pos + 1;
        self.needs_wall_clock_sync = true;

        if !self.prime_from(pos) {
            self.playing = false;
            let _ = self.events.send(EngineEvent::PlaybackState { playing: false });
        }
    }

    /// Stop playback. Idempotent and drain-safe: in-flight frames are
    /// discarded, the rendered position never moves, and a flush failure
    /// still leaves the coordinator paused.
    pub fn pause(&mut self) {
        if !self.playing {
            return;
        }
        match self.decoder.flush() {
            Ok(frames) => close_all(frames),
            Err(e) => warn!("flush on pause: {e}"),
        }
        self.clear_queue();
        self.playing = false;
        self.needs_wall_clock_sync = false;
        let _ = self.events.send(EngineEvent::PlaybackState { playing: false });
    }

    /// Tear the coordinator back down to Idle.
    pub fn shutdown(&mut self) {
        self.reset_transport();
        self.source = None;
        self.config = None;
        self.state = CoordinatorState::Idle;
    }

    // ── Presentation loop ────────────────────────────────────────────────────

    /// One tick per display refresh. Drives seek feeding, the refill budget,
    /// frame selection, frame dropping, and end-of-stream detection.
    pub fn tick(&mut self) {
        if self.state != CoordinatorState::Ready {
            return;
        }
        if self.seeking {
            self.advance_seek();
            return;
        }
        if !self.playing || !self.decoder.is_configured() {
            return;
        }
        let now = self.clock.now_us();

        if self.needs_wall_clock_sync {
            self.refill();
            self.drop_stale_frames();
            if let Some((_, f)) = self
                .frame_queue
                .iter()
                .find(|(_, f)| f.timestamp_us >= self.playback_min_timestamp)
            {
                self.playback_start_wall_us = now;
                self.playback_start_us = f.timestamp_us;
                self.needs_wall_clock_sync = false;
            } else {
                if self.end_of_stream() {
                    self.pause();
                }
                return;
            }
        }

        let target_us = self.playback_start_us + (now - self.playback_start_wall_us);
        if target_us >= self.trim_out_us {
            self.pause();
            return;
        }

        self.refill();
        self.present_best(target_us);

        if self.end_of_stream() {
            self.pause();
        }
    }

    // ── Seeking internals ────────────────────────────────────────────────────

    /// Validate a target and arm the seek plan. Aborts without touching the
    /// decoder when no sync sample is reachable — a flush must always be
    /// followed by a key chunk, so an unseekable target never flushes.
    fn start_seek(&mut self, target_us: i64) {
        if self.state != CoordinatorState::Ready {
            return;
        }
        let Some(source) = self.source.clone() else {
            return;
        };
        let table = &source.table;
        let target_us = target_us.clamp(self.trim_in_us, self.trim_out_us);

        let target_index = match table.sample_at_or_after(target_us) {
            Some(i) => i,
            None if !table.is_empty() => table.len() - 1,
            None => return,
        };
        // The seek lands on a real sample; everything downstream (render,
        // TimeUpdate, min-timestamp) uses its presentation time.
        let target_us = table.get(target_index).map_or(target_us, |s| s.time_us());
        let Some(key_index) = table.validated_keyframe_before(target_index) else {
            warn!(target_us, "seek aborted: no sync sample reachable");
            self.seeking = false;
            self.dispatch_pending();
            return;
        };
        // Defense in depth: never feed a non-sync chunk first after a flush.
        if !table.get(key_index).is_some_and(|s| s.is_sync) {
            self.seeking = false;
            self.dispatch_pending();
            return;
        }

        match self.decoder.flush() {
            Ok(frames) => close_all(frames),
            Err(e) => warn!("flush on seek: {e}"),
        }
        self.clear_queue();

        self.seek_version += 1;
        self.seeking = true;
        self.plan = Some(SeekPlan { target_us, target_index, cursor: key_index });
        debug!(target_us, key_index, target_index, version = self.seek_version, "seek armed");
    }

    /// Feed the armed seek to completion. Runs inside `tick()` so commands
    /// arriving between ticks can still coalesce into `pending_seek`.
    fn advance_seek(&mut self) {
        let Some(plan) = self.plan.take() else {
            self.seeking = false;
            return;
        };
        let Some(source) = self.source.clone() else {
            self.seeking = false;
            return;
        };
        let table = &source.table;
        let mut collected: Vec<DecodedFrame> = Vec::new();

        // Feed the window keyframe → target; first chunk is the key sample.
        for index in plan.cursor..=plan.target_index {
            let Some(sample) = table.get(index) else { break };
            if let Err(e) = self.feed_sample(sample, sample_kind(sample)) {
                self.recoverable(format!("decode during seek: {e}"));
                self.abort_seek();
                return;
            }
            while let Some(f) = self.decoder.poll() {
                collected.push(f);
            }
        }

        if self.playing {
            // Keep the pipeline hot: feed the continuation window so playback
            // resumes from the target without a second flush.
            let from = plan.target_index + 1;
            let to = (plan.target_index + MAX_QUEUE_SIZE).min(table.len().saturating_sub(1));
            for index in from..=to {
                if index >= table.len() {
                    break;
                }
                let Some(sample) = table.get(index) else { break };
                if self.feed_sample(sample, sample_kind(sample)).is_err() {
                    break;
                }
                self.last_queued_sample_index = Some(index);
                while let Some(f) = self.decoder.poll() {
                    collected.push(f);
                }
            }
        } else {
            match self.decoder.flush() {
                Ok(frames) => collected.extend(frames),
                Err(e) => warn!("flush at seek end: {e}"),
            }
        }

        self.seeking = false;

        // A newer target supersedes this seek: every frame it produced is
        // stale and must be closed, never rendered.
        if self.pending_seek_us.is_some() {
            close_all(collected);
            self.dispatch_pending();
            return;
        }

        // Keep the latest frame at or before the target; close the rest of
        // the pre-target window; queue the continuation.
        let mut best: Option<DecodedFrame> = None;
        for frame in collected {
            if frame.timestamp_us <= plan.target_us {
                if let Some(old) = best.replace(frame) {
                    old.close();
                }
            } else {
                self.frame_queue.push_back((self.seek_version, frame));
            }
        }

        if let Some(frame) = best {
            self.playback_min_timestamp = frame.timestamp_us + 1;
            self.render(frame);
        } else {
            // Frame still inside the decoder (latency during playback).
            // Let the presentation loop pick it up as soon as it appears.
            self.playback_min_timestamp = plan.target_us;
        }

        if self.playing {
            if self.last_queued_sample_index.is_none() {
                self.last_queued_sample_index = Some(plan.target_index);
            }
            self.needs_wall_clock_sync = true;
        }
    }

    fn abort_seek(&mut self) {
        self.seeking = false;
        self.plan = None;
        self.dispatch_pending();
    }

    fn dispatch_pending(&mut self) {
        if let Some(next) = self.pending_seek_us.take() {
            self.start_seek(next);
        }
    }

    // ── Playback internals ───────────────────────────────────────────────────

    /// Prime the decoder for playback at `pos`: key-first feed through the
    /// lookahead window. Returns false when the source has no reachable key.
    fn prime_from(&mut self, pos: i64) -> bool {
        let Some(source) = self.source.clone() else {
            return false;
        };
        let table = &source.table;
        let start_index = match table.sample_at_or_after(pos + 1) {
            Some(i) => i,
            None => return false,
        };
        let Some(key_index) = table.validated_keyframe_before(start_index) else {
            self.protocol_warning("Play aborted: no sync sample reachable");
            return false;
        };

        let end = (start_index + MAX_QUEUE_SIZE).min(table.len() - 1);
        for index in key_index..=end {
            let Some(sample) = table.get(index) else { break };
            if let Err(e) = self.feed_sample(sample, sample_kind(sample)) {
                self.recoverable(format!("decode during prime: {e}"));
                return false;
            }
            self.last_queued_sample_index = Some(index);
            self.collect_frames();
        }
        true
    }

    /// Refill budget: at most one sample per tick while the decoder plus the
    /// queue stay under the lookahead cap, then collect finished frames.
    fn refill(&mut self) {
        let Some(source) = self.source.clone() else {
            return;
        };
        let table = &source.table;
        let occupancy = self.decoder.in_flight() + self.frame_queue.len();
        let next = self.last_queued_sample_index.map_or(0, |i| i + 1);
        if next >= table.len() {
            // Stream exhausted: one drain flush releases the decoder's tail
            // frames so end-of-stream detection can fire. Nothing is fed
            // after this flush except through a key-first seek or play.
            if self.decoder.in_flight() > 0 {
                match self.decoder.flush() {
                    Ok(frames) => {
                        for frame in frames {
                            self.frame_queue.push_back((self.seek_version, frame));
                        }
                    }
                    Err(e) => warn!("flush at end of stream: {e}"),
                }
            }
        } else if occupancy < MAX_QUEUE_SIZE {
            let Some(sample) = table.get(next) else { return };
            match self.feed_sample(sample, sample_kind(sample)) {
                Ok(()) => self.last_queued_sample_index = Some(next),
                Err(e) => {
                    // Transient decode fault: surface it, reset, and
                    // re-enter through a key-first seek at the current
                    // position so the flush→key rule holds.
                    self.recoverable(format!("decode during playback: {e}"));
                    let pos = self.last_rendered_us.unwrap_or(self.trim_in_us);
                    self.start_seek(pos + 1);
                    return;
                }
            }
        }
        self.collect_frames();
    }

    fn feed_sample(
        &mut self,
        sample: &framecut_core::sample::Sample,
        kind: ChunkKind,
    ) -> Result<(), crate::codec::CodecError> {
        let chunk = EncodedChunk {
            kind,
            timestamp_us: sample.time_us(),
            duration_us:  sample.duration_us(),
            data:         &sample.data,
        };
        let result = self.decoder.decode(chunk);
        if let Err(e) = &result {
            if !e.is_recoverable() {
                self.fatal(format!("decoder: {e}"));
            } else {
                // Reset now; the caller decides how to re-establish key-first.
                self.decoder.reset();
                if let Some(config) = self.config.clone() {
                    if let Err(ce) = self.decoder.configure(&config) {
                        self.fatal(format!("decoder reconfigure: {ce}"));
                    }
                }
            }
        }
        result
    }

    fn collect_frames(&mut self) {
        while let Some(frame) = self.decoder.poll() {
            self.frame_queue.push_back((self.seek_version, frame));
        }
    }

    /// Pick the latest queued frame at or before `target_us`, close everything
    /// older, and render it — unless it lags the target by more than the drop
    /// threshold, in which case it is dropped so playback catches up.
    fn present_best(&mut self, target_us: i64) {
        self.drop_stale_frames();

        let mut best: Option<DecodedFrame> = None;
        while self
            .frame_queue
            .front()
            .is_some_and(|(_, f)| f.timestamp_us <= target_us)
        {
            let Some((_, frame)) = self.frame_queue.pop_front() else { break };
            if frame.timestamp_us < self.playback_min_timestamp {
                frame.close();
                continue;
            }
            if let Some(old) = best.replace(frame) {
                old.close();
            }
        }

        if let Some(frame) = best {
            if target_us - frame.timestamp_us > MAX_FRAME_LAG_US {
                debug!(
                    lag_us = target_us - frame.timestamp_us,
                    "dropping late frame to catch up"
                );
                frame.close();
            } else {
                self.render(frame);
            }
        }
    }

    fn drop_stale_frames(&mut self) {
        let version = self.seek_version;
        let stale: Vec<DecodedFrame> = {
            let mut kept = VecDeque::with_capacity(self.frame_queue.len());
            let mut stale = Vec::new();
            for (v, f) in self.frame_queue.drain(..) {
                if v == version {
                    kept.push_back((v, f));
                } else {
                    stale.push(f);
                }
            }
            self.frame_queue = kept;
            stale
        };
        close_all(stale);
    }

    fn end_of_stream(&self) -> bool {
        let Some(source) = &self.source else {
            return false;
        };
        let all_queued = self
            .last_queued_sample_index
            .is_some_and(|i| i + 1 >= source.table.len());
        all_queued && self.decoder.in_flight() == 0 && self.frame_queue.is_empty()
    }

    /// The single rendering path: present, remember, report.
    fn render(&mut self, frame: DecodedFrame) {
        let (w, h, ts) = (frame.width, frame.height, frame.timestamp_us);
        let data = frame.into_data();
        self.surface.present(w, h, &data);
        self.last_rendered_us = Some(ts);
        if self.first_frame_pending {
            self.first_frame_pending = false;
            let _ = self.events.send(EngineEvent::FirstFrame {
                width:  w,
                height: h,
                data:   data.clone(),
            });
        }
        self.last_frame = Some((w, h, data));
        let _ = self.events.send(EngineEvent::TimeUpdate { position_us: ts });
    }

    // ── Housekeeping ─────────────────────────────────────────────────────────

    fn reset_transport(&mut self) {
        self.clear_queue();
        self.playing = false;
        self.seeking = false;
        self.plan = None;
        self.pending_seek_us = None;
        self.seek_version += 1;
        self.last_queued_sample_index = None;
        self.needs_wall_clock_sync = false;
        self.last_rendered_us = None;
        self.last_frame = None;
        self.first_frame_pending = false;
        if self.decoder.is_configured() {
            self.decoder.reset();
        }
    }

    fn clear_queue(&mut self) {
        let frames: Vec<DecodedFrame> = self.frame_queue.drain(..).map(|(_, f)| f).collect();
        close_all(frames);
    }

    fn protocol_warning(&self, message: &str) {
        warn!("{message}");
        let _ = self.events.send(EngineEvent::Warning { message: message.into() });
    }

    fn recoverable(&self, message: String) {
        warn!("{message}");
        let _ = self.events.send(EngineEvent::Error { message, recoverable: true });
    }

    fn fatal(&mut self, message: String) {
        warn!("fatal: {message}");
        let _ = self.events.send(EngineEvent::Error { message, recoverable: false });
        self.state = CoordinatorState::Idle;
    }
}

#[inline]
fn sample_kind(sample: &framecut_core::sample::Sample) -> ChunkKind {
    if sample.is_sync {
        ChunkKind::Key
    } else {
        ChunkKind::Delta
    }
}

fn close_all(frames: Vec<DecodedFrame>) {
    for frame in frames {
        frame.close();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crossbeam_channel::{unbounded, Receiver};
    use uuid::Uuid;

    use framecut_core::sample::{CodecInfo, Sample, SampleTable};

    use crate::clock::testing::ManualClock;
    use crate::codec::testing::{DecoderJournal, ScriptedDecoder};

    const FRAME_US: i64 = 33_333;

    fn sample(index: i64, is_sync: bool) -> Sample {
        Sample {
            cts:       index * FRAME_US,
            timescale: 1_000_000,
            duration:  FRAME_US as u32,
            is_sync,
            data:      Arc::from(vec![0u8; 8].into_boxed_slice()),
        }
    }

    /// `count` samples at 30 fps with a keyframe every `gop`.
    fn media(count: i64, gop: i64) -> Arc<SourceMedia> {
        let samples: Vec<Sample> = (0..count).map(|i| sample(i, i % gop == 0)).collect();
        let keyframes = (0..count as usize).filter(|i| *i as i64 % gop == 0).collect();
        Arc::new(SourceMedia {
            id:          Uuid::new_v4(),
            width:       4,
            height:      2,
            codec:       CodecInfo { codec_id: "avc1.64001f".into(), description: vec![] },
            duration_us: count * FRAME_US,
            has_audio:   false,
            table:       SampleTable::new(samples, keyframes).unwrap(),
            container:   None,
        })
    }

    /// Media whose keyframe index lies everywhere — nothing sync-reachable.
    fn corrupt_media(count: i64) -> Arc<SourceMedia> {
        let samples: Vec<Sample> = (0..count).map(|i| sample(i, false)).collect();
        let keyframes = vec![0, 5];
        Arc::new(SourceMedia {
            id:          Uuid::new_v4(),
            width:       4,
            height:      2,
            codec:       CodecInfo { codec_id: "avc1.64001f".into(), description: vec![] },
            duration_us: count * FRAME_US,
            has_audio:   false,
            table:       SampleTable::new(samples, keyframes).unwrap(),
            container:   None,
        })
    }

    struct CountingSurface(Arc<AtomicUsize>);

    impl RenderSurface for CountingSurface {
        fn present(&mut self, _w: u32, _h: u32, _rgba: &[u8]) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        coord:    PlaybackCoordinator,
        clock:    ManualClock,
        events:   Receiver<EngineEvent>,
        journal:  Arc<Mutex<DecoderJournal>>,
        presents: Arc<AtomicUsize>,
    }

    fn harness_with(decoder: ScriptedDecoder) -> Harness {
        let journal = Arc::clone(&decoder.journal);
        let clock = ManualClock::new();
        let (tx, rx) = unbounded();
        let mut coord =
            PlaybackCoordinator::new(Box::new(decoder), Box::new(clock.clone()), tx);
        let presents = Arc::new(AtomicUsize::new(0));
        coord.init_canvas(Box::new(CountingSurface(Arc::clone(&presents))));
        Harness { coord, clock, events: rx, journal, presents }
    }

    fn harness(latency: usize) -> Harness {
        harness_with(ScriptedDecoder::new(latency))
    }

    impl Harness {
        fn drain(&self) -> Vec<EngineEvent> {
            self.events.try_iter().collect()
        }

        fn time_updates(&self) -> Vec<i64> {
            self.drain()
                .into_iter()
                .filter_map(|e| match e {
                    EngineEvent::TimeUpdate { position_us } => Some(position_us),
                    _ => None,
                })
                .collect()
        }

        /// Advance wall time in small steps, ticking like a display loop.
        fn run(&mut self, wall_us: i64, step_us: i64) {
            let mut elapsed = 0;
            while elapsed < wall_us {
                self.clock.advance_us(step_us.min(wall_us - elapsed));
                elapsed += step_us;
                self.coord.tick();
            }
        }

        fn settle(&mut self) {
            for _ in 0..4 {
                self.coord.tick();
            }
        }

        fn assert_key_discipline(&self) {
            assert!(
                !self.journal.lock().unwrap().key_violation,
                "a non-key chunk was fed directly after a flush"
            );
        }
    }

    #[test]
    fn load_renders_frame_zero_and_reports_ready() {
        let mut h = harness(2);
        h.coord.load_source(media(60, 5));
        h.settle();

        let events = h.drain();
        assert!(matches!(events[0], EngineEvent::Ready { duration_us, .. }
            if duration_us == 60 * FRAME_US));
        assert!(events.iter().any(|e| matches!(e, EngineEvent::FirstFrame { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, EngineEvent::TimeUpdate { position_us: 0 })));
        assert_eq!(h.coord.position_us(), Some(0));
        assert_eq!(h.presents.load(Ordering::SeqCst), 1);
        h.assert_key_discipline();
    }

    #[test]
    fn seek_lands_on_the_sample_at_or_after_target() {
        let mut h = harness(2);
        h.coord.load_source(media(120, 5));
        h.settle();
        h.drain();

        // 10 frames in, mid-GOP.
        h.coord.seek(10 * FRAME_US + 1);
        h.settle();
        assert_eq!(h.time_updates(), vec![11 * FRAME_US]);
        assert!(!h.coord.is_seeking());
        h.assert_key_discipline();
    }

    #[test]
    fn concurrent_seeks_coalesce_to_the_latest_target() {
        let mut h = harness(2);
        // 40 s of video at 30 fps.
        h.coord.load_source(media(1200, 10));
        h.settle();
        h.drain();

        h.coord.seek(10_000_000);
        h.coord.seek(20_000_000);
        h.coord.seek(30_000_000);
        for _ in 0..8 {
            h.coord.tick();
        }

        // Exactly one TimeUpdate once the dust settles, at (the sample
        // covering) 30 s. Nothing from the superseded 10 s / 20 s seeks.
        let updates = h.time_updates();
        assert_eq!(updates.len(), 1);
        let landed = updates[0];
        assert!((landed - 30_000_000).abs() < FRAME_US, "landed at {landed}");
        assert_eq!(h.presents.load(Ordering::SeqCst), 2); // first frame + final seek
        h.assert_key_discipline();
    }

    #[test]
    fn corrupt_keyframe_index_aborts_without_decoding() {
        let mut h = harness(2);
        h.coord.load_source(corrupt_media(30));
        h.settle();

        // The initial seek to 0 must abort: no chunk ever reaches the
        // decoder, and the coordinator stays coherent.
        assert!(h.journal.lock().unwrap().decoded.is_empty());
        assert!(!h.coord.is_seeking());
        assert_eq!(h.coord.state(), CoordinatorState::Ready);
        assert_eq!(h.coord.position_us(), None);
        h.assert_key_discipline();

        // And an explicit seek aborts the same way.
        h.coord.seek(10 * FRAME_US);
        h.settle();
        assert!(h.journal.lock().unwrap().decoded.is_empty());
        assert!(!h.coord.is_seeking());
    }

    #[test]
    fn play_anchors_on_first_frame_and_tracks_wall_clock() {
        let mut h = harness(2);
        h.coord.load_source(media(90, 5));
        h.settle();
        h.drain();

        h.coord.play();
        assert!(h.coord.is_playing());
        // Drive one simulated second at display cadence.
        h.run(1_000_000, 10_000);

        let rendered = h.time_updates();
        let last = *rendered.last().expect("frames rendered during playback");
        assert!(
            (966_667..=1_033_333).contains(&last),
            "after 1 s of wall time position was {last}"
        );
        // Queue feed positions only ever advance.
        let mut sorted = rendered.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, rendered, "rendered timestamps went backwards");
        h.assert_key_discipline();
    }

    #[test]
    fn late_frames_are_dropped_until_playback_catches_up() {
        let mut h = harness(2);
        h.coord.load_source(media(300, 5));
        h.settle();
        h.drain();

        h.coord.play();
        h.run(200_000, 10_000);
        let before_stall = *h.time_updates().last().unwrap();

        // A 250 ms stall: wall time jumps with no ticks in between.
        h.clock.advance_us(250_000);
        h.run(200_000, 10_000);

        let after = h.time_updates();
        let next = *after.first().expect("playback resumed after stall");
        assert!(
            next - before_stall >= MAX_FRAME_LAG_US,
            "stale frame rendered after stall: {before_stall} -> {next}"
        );
        h.assert_key_discipline();
    }

    #[test]
    fn pause_discards_in_flight_frames_and_freezes_position() {
        // High latency so frames are guaranteed in flight at pause time.
        let mut h = harness(4);
        h.coord.load_source(media(120, 5));
        h.settle();
        h.drain();

        h.coord.play();
        h.run(300_000, 10_000);
        let position = h.coord.position_us();
        h.drain();

        h.coord.pause();
        assert!(!h.coord.is_playing());
        // Draining the decoder must not advance the rendered position.
        assert_eq!(h.coord.position_us(), position);
        let events = h.drain();
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, EngineEvent::PlaybackState { playing: false }))
                .count(),
            1
        );

        // Idempotent: a second pause emits nothing.
        h.coord.pause();
        assert!(h.drain().is_empty());

        // And ticking after pause renders nothing new.
        h.run(200_000, 10_000);
        assert_eq!(h.coord.position_us(), position);
        h.assert_key_discipline();
    }

    #[test]
    fn playback_pauses_at_trim_out() {
        let mut h = harness(2);
        h.coord.load_source(media(60, 5));
        h.settle();
        h.coord.set_trim(0, 500_000);
        h.drain();

        h.coord.play();
        h.run(800_000, 10_000);

        assert!(!h.coord.is_playing());
        let pos = h.coord.position_us().unwrap();
        assert!(pos < 500_000 + FRAME_US);
        h.assert_key_discipline();
    }

    #[test]
    fn play_near_trim_out_snaps_back_to_trim_in() {
        let mut h = harness(2);
        h.coord.load_source(media(90, 5));
        h.settle();
        h.coord.set_trim(1_000_000, 2_000_000);
        h.drain();

        // Park the playhead within 100 ms of the out-point.
        h.coord.seek(1_950_000);
        h.settle();
        h.drain();

        h.coord.play();
        h.settle();
        let updates = h.time_updates();
        let first = *updates.first().expect("snap seek rendered");
        assert!(
            (first - 1_000_000).abs() < FRAME_US,
            "expected restart near trim-in, got {first}"
        );
        assert!(h.coord.is_playing());
        h.assert_key_discipline();
    }

    #[test]
    fn set_trim_rejects_below_minimum_and_never_seeks() {
        let mut h = harness(2);
        h.coord.load_source(media(60, 5));
        h.settle();
        h.drain();

        h.coord.set_trim(0, MIN_TRIM_DURATION_US - 1);
        let events = h.drain();
        assert!(events.iter().any(|e| matches!(e, EngineEvent::Warning { .. })));
        // Valid trim applies silently, no seek, no render.
        h.coord.set_trim(500_000, 1_500_000);
        h.settle();
        assert!(h.time_updates().is_empty());
    }

    #[test]
    fn feed_positions_advance_monotonically_during_playback() {
        let mut h = harness(2);
        h.coord.load_source(media(240, 5));
        h.settle();
        h.drain();

        h.coord.play();
        let mut last = 0usize;
        for _ in 0..100 {
            h.clock.advance_us(10_000);
            h.coord.tick();
            if let Some(idx) = h.coord.last_queued_index() {
                assert!(idx >= last, "feed position went backwards: {last} -> {idx}");
                last = idx;
            }
        }
        h.assert_key_discipline();
    }

    #[test]
    fn transient_decode_error_recovers_and_playback_continues() {
        let failing = ScriptedDecoder::new(2).failing_at(&[12 * FRAME_US]);
        let mut h = harness_with(failing);
        h.coord.load_source(media(120, 4));
        h.settle();
        h.drain();

        h.coord.play();
        h.run(1_500_000, 10_000);

        let events = h.drain();
        assert!(events.iter().any(|e| matches!(
            e,
            EngineEvent::Error { recoverable: true, .. }
        )));
        // Playback pushed past the poisoned sample.
        let last = events
            .iter()
            .rev()
            .find_map(|e| match e {
                EngineEvent::TimeUpdate { position_us } => Some(*position_us),
                _ => None,
            })
            .expect("rendered after recovery");
        assert!(last > 12 * FRAME_US);
        h.assert_key_discipline();
    }

    #[test]
    fn configure_failure_is_fatal_and_parks_the_engine() {
        let mut h = harness_with(ScriptedDecoder::new(0).failing_configure());
        h.coord.load_source(media(30, 5));
        let events = h.drain();
        assert!(events
            .iter()
            .any(|e| matches!(e, EngineEvent::Error { recoverable: false, .. })));
        assert_eq!(h.coord.state(), CoordinatorState::Idle);

        // Commands in Idle are protocol errors, not crashes.
        h.coord.seek(0);
        h.coord.play();
        assert!(h
            .drain()
            .iter()
            .all(|e| matches!(e, EngineEvent::Warning { .. })));
    }

    #[test]
    fn switching_active_clip_lands_on_its_in_point() {
        let mut h = harness(2);
        h.coord.load_source(media(120, 5));
        h.settle();
        h.drain();

        let other = media(240, 5);
        h.coord.set_active_clip(Arc::clone(&other), 2_000_000, 4_000_000);
        h.settle();

        let updates = h.time_updates();
        let landed = *updates.last().expect("seek to in-point rendered");
        assert!((landed - 2_000_000).abs() < FRAME_US);
        h.assert_key_discipline();
    }
}
