// crates/framecut-engine/src/export/mod.rs
//
// Frame-accurate export: walk the composition range output-frame by
// output-frame, composite the active layers bottom-up, and drive the
// encoder sink.
//
// Each referenced source gets its own decoder behind a SourceCursor that
// only ever moves forward — a new target at or past the current frame feeds
// the next samples; only backward motion (or a post-flush target) pays for a
// key-first re-seek. Cancellation is cooperative: the flag is checked every
// output frame and inside every per-clip decode loop.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use tracing::{debug, warn};
use uuid::Uuid;

use framecut_core::events::EngineEvent;
use framecut_core::export::ExportSpec;
use framecut_core::helpers::time::{frame_duration_us, us_to_frame};
use framecut_core::model::TrackKind;
use framecut_core::sample::SourceMedia;

use crate::codec::{
    AudioPlan, AudioSegment, ChunkKind, CodecBackend, CodecError, DecodedFrame, DecoderConfig,
    EncodedChunk, ExportSink, VideoDecoder,
};
use crate::compositor::Compositor;
use crate::error::EngineError;
use crate::subtitle::{BandRasterizer, CueRasterizer};

/// Emit a Progress event every this many output frames.
pub const PROGRESS_INTERVAL: u64 = 15;

// ── Job wrapper ───────────────────────────────────────────────────────────────

/// Run one export job to completion, emitting Progress along the way and
/// exactly one of Complete / Cancelled / Error at the end. Blocking — run on
/// the export thread.
pub fn export_composition(
    job_id: Uuid,
    spec: &ExportSpec,
    sources: &HashMap<Uuid, Arc<SourceMedia>>,
    backend: &dyn CodecBackend,
    sink: &mut dyn ExportSink,
    cancel: &AtomicBool,
    events: &Sender<EngineEvent>,
) {
    let mut rasterizer = BandRasterizer::default();
    match run_export(job_id, spec, sources, backend, sink, &mut rasterizer, cancel, events) {
        Ok(data) => {
            let size_bytes = data.len();
            let _ = events.send(EngineEvent::Complete { job_id, data, size_bytes });
        }
        Err(EngineError::Cancelled) => {
            sink.discard();
            let _ = events.send(EngineEvent::Cancelled { job_id });
        }
        Err(e) => {
            sink.discard();
            let _ = events.send(EngineEvent::Error {
                message:     format!("export: {e}"),
                recoverable: e.is_recoverable(),
            });
        }
    }
}

// ── The walk ──────────────────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
fn run_export(
    job_id: Uuid,
    spec: &ExportSpec,
    sources: &HashMap<Uuid, Arc<SourceMedia>>,
    backend: &dyn CodecBackend,
    sink: &mut dyn ExportSink,
    rasterizer: &mut dyn CueRasterizer,
    cancel: &AtomicBool,
    events: &Sender<EngineEvent>,
) -> Result<Vec<u8>, EngineError> {
    let composition = &spec.composition;
    let settings = &spec.settings;

    let Some((in_us, out_us)) = spec.range.resolve(composition.duration_us()) else {
        return Err(EngineError::Snapshot("empty export range".into()));
    };
    let fps = settings.frame_rate.max(1);
    let total_frames = us_to_frame(out_us - in_us, fps) as u64;
    if total_frames == 0 {
        return Err(EngineError::Snapshot("export range shorter than one frame".into()));
    }
    let frame_dur = frame_duration_us(fps);

    let audio = build_audio_plan(spec, sources);
    sink.configure(settings, &audio)?;

    let mut compositor = Compositor::new(settings.width, settings.height);
    let mut cursors: HashMap<Uuid, SourceCursor> = HashMap::new();

    debug!(%job_id, in_us, out_us, total_frames, "export walk starting");

    for k in 0..total_frames {
        if cancel.load(Ordering::Relaxed) {
            return Err(EngineError::Cancelled);
        }
        let t = in_us + k as i64 * frame_dur;
        let active = composition.active_clips(t);

        compositor.begin_frame();
        for layer in &active.video {
            let clip = layer.clip;
            let cursor = match cursor_for(&mut cursors, clip.source_id, sources, backend) {
                Some(c) => c,
                None => continue, // source vanished from the snapshot; layer skipped
            };
            let source_t = clip.timeline_to_source(t);
            if let Some(frame) = cursor.frame_at(source_t, cancel) {
                compositor.draw_video_layer(frame.width, frame.height, frame.data(), clip.opacity);
            } else if cancel.load(Ordering::Relaxed) {
                return Err(EngineError::Cancelled);
            }
        }
        for overlay in &spec.overlays {
            compositor.draw_overlay(overlay);
        }
        let cues = composition.active_cues(t);
        if let Some(surface) = rasterizer.rasterize(&cues, settings.width, settings.height) {
            compositor.draw_subtitle_surface(&surface);
        }

        let frame = compositor.frame();
        sink.write_video(frame.width, frame.height, &frame.data, t - in_us)?;

        let current = k + 1;
        if current % PROGRESS_INTERVAL == 0 || current == total_frames {
            let _ = events.send(EngineEvent::Progress {
                job_id,
                current,
                total: total_frames,
                percent: current as f32 / total_frames as f32 * 100.0,
            });
        }
    }

    Ok(sink.finalize()?)
}

fn cursor_for<'a>(
    cursors: &'a mut HashMap<Uuid, SourceCursor>,
    source_id: Uuid,
    sources: &HashMap<Uuid, Arc<SourceMedia>>,
    backend: &dyn CodecBackend,
) -> Option<&'a mut SourceCursor> {
    if !cursors.contains_key(&source_id) {
        let media = sources.get(&source_id)?;
        match SourceCursor::new(Arc::clone(media), backend.make_decoder()) {
            Ok(cursor) => {
                cursors.insert(source_id, cursor);
            }
            Err(e) => {
                warn!(%source_id, "export decoder configure failed: {e}");
                return None;
            }
        }
    }
    cursors.get_mut(&source_id)
}

/// Collect every audible audio span intersecting the export range.
///
/// The mix itself is the sink's job; each span's volume is the clip gain
/// multiplied by the composition's master volume (the one piece of audio
/// DSP in scope).
fn build_audio_plan(
    spec: &ExportSpec,
    sources: &HashMap<Uuid, Arc<SourceMedia>>,
) -> AudioPlan {
    let composition = &spec.composition;
    let Some((in_us, out_us)) = spec.range.resolve(composition.duration_us()) else {
        return AudioPlan::default();
    };
    let any_solo = composition.tracks.iter().any(|t| t.solo);
    let master_volume = composition.master_volume.clamp(0.0, 1.0);

    let mut segments = Vec::new();
    for track in &composition.tracks {
        if track.kind != TrackKind::Audio {
            continue;
        }
        let audible = if any_solo { track.solo } else { !track.muted };
        if !audible {
            continue;
        }
        for clip in &track.clips {
            let start = clip.start_us.max(in_us);
            let end = clip.end_us().min(out_us);
            let volume = (clip.volume * master_volume).clamp(0.0, 1.0);
            if start >= end || volume <= 0.0 {
                continue;
            }
            let Some(media) = sources.get(&clip.source_id) else { continue };
            if !media.has_audio {
                continue;
            }
            let Some(container) = media.container.clone() else { continue };
            segments.push(AudioSegment {
                container,
                source_start_us: clip.timeline_to_source(start),
                duration_us:     end - start,
                output_start_us: start - in_us,
                volume,
            });
        }
    }
    AudioPlan { segments }
}

// ── Per-source decode cursor ──────────────────────────────────────────────────

/// Forward-moving decode position over one source.
///
/// `frame_at` serves the nearest frame at or before a source time. While
/// targets move forward it just keeps feeding samples; a backward target or
/// a target after the end-of-stream flush re-seeks from the covering
/// keyframe (key chunk first, always).
struct SourceCursor {
    media:      Arc<SourceMedia>,
    decoder:    Box<dyn VideoDecoder>,
    /// Next sample index to feed; `None` means a key-first re-seek is needed.
    next_index: Option<usize>,
    current:    Option<DecodedFrame>,
    /// Frames decoded past the current target, kept for future targets.
    lookahead:  VecDeque<DecodedFrame>,
    flushed:    bool,
}

impl SourceCursor {
    fn new(media: Arc<SourceMedia>, mut decoder: Box<dyn VideoDecoder>) -> Result<Self, CodecError> {
        decoder.configure(&DecoderConfig::for_source(&media))?;
        Ok(Self {
            media,
            decoder,
            next_index: None,
            current: None,
            lookahead: VecDeque::new(),
            flushed: false,
        })
    }

    fn frame_at(&mut self, source_t: i64, cancel: &AtomicBool) -> Option<&DecodedFrame> {
        let media = Arc::clone(&self.media);
        let table = &media.table;
        let target_index = table
            .sample_at_or_before(source_t)
            .or_else(|| table.sample_at_or_after(source_t))?;
        let target_ts = table.get(target_index)?.time_us();

        if self.current.as_ref().is_some_and(|f| f.timestamp_us == target_ts) {
            return self.current.as_ref();
        }

        // Backward motion re-enters at the covering keyframe; so does the
        // very first use. Forward targets just keep feeding.
        let backward = self
            .current
            .as_ref()
            .is_some_and(|f| target_ts < f.timestamp_us);
        let fresh = self.current.is_none()
            && self.lookahead.is_empty()
            && self.next_index.is_none()
            && !self.flushed;
        if backward || fresh {
            self.reseek(target_index)?;
        }

        loop {
            if cancel.load(Ordering::Relaxed) {
                return None;
            }
            // Serve from frames already decoded first.
            self.absorb(target_ts);
            if self.current.as_ref().is_some_and(|f| f.timestamp_us == target_ts) {
                break;
            }
            if self
                .lookahead
                .front()
                .is_some_and(|f| f.timestamp_us > target_ts)
            {
                // The exact sample never produced a frame; the latest earlier
                // one is the right answer.
                break;
            }
            match self.next_index {
                Some(next) if next < table.len() => {
                    let sample = table.get(next)?;
                    let kind = if sample.is_sync { ChunkKind::Key } else { ChunkKind::Delta };
                    let chunk = EncodedChunk {
                        kind,
                        timestamp_us: sample.time_us(),
                        duration_us:  sample.duration_us(),
                        data:         &sample.data,
                    };
                    if let Err(e) = self.decoder.decode(chunk) {
                        warn!("export decode: {e}");
                        self.decoder.reset();
                        self.next_index = None;
                        break;
                    }
                    self.next_index = Some(next + 1);
                    while let Some(frame) = self.decoder.poll() {
                        self.lookahead.push_back(frame);
                    }
                }
                _ => {
                    if self.flushed {
                        break; // stream exhausted: hold the last frame
                    }
                    match self.decoder.flush() {
                        Ok(frames) => self.lookahead.extend(frames),
                        Err(e) => warn!("export flush: {e}"),
                    }
                    self.flushed = true;
                    self.next_index = None;
                }
            }
        }
        self.current.as_ref()
    }

    /// Move lookahead frames at or before the target timestamp into `current`.
    fn absorb(&mut self, target_ts: i64) {
        while self
            .lookahead
            .front()
            .is_some_and(|f| f.timestamp_us <= target_ts)
        {
            let Some(frame) = self.lookahead.pop_front() else { break };
            if let Some(old) = self.current.replace(frame) {
                old.close();
            }
        }
    }

    fn reseek(&mut self, target_index: usize) -> Option<()> {
        let key_index = self.media.table.validated_keyframe_before(target_index)?;
        match self.decoder.flush() {
            Ok(frames) => {
                for f in frames {
                    f.close();
                }
            }
            Err(e) => warn!("export reseek flush: {e}"),
        }
        for frame in self.lookahead.drain(..) {
            frame.close();
        }
        if let Some(old) = self.current.take() {
            old.close();
        }
        self.next_index = Some(key_index);
        self.flushed = false;
        Some(())
    }
}
