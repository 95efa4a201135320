// crates/framecut-engine/src/sprite/mod.rs
//
// Thumbnail (sprite) pipeline: time-indexed frame grids generated from raw
// samples, progressively by visible range, with an LRU memory budget.
//
// Runs on its own thread with its own decoder — it never touches the
// playback coordinator's state. Per target timestamp the decoder is fed from
// the covering keyframe and flushed, and only the frame matching the target
// survives; everything else is closed on the spot.

pub mod cache;
pub mod ranges;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use image::imageops::FilterType;
use image::RgbaImage;
use tracing::{debug, warn};
use uuid::Uuid;

use framecut_core::events::EngineEvent;
use framecut_core::sample::SourceMedia;
use framecut_core::sprite::{SheetId, SpriteRef, SpriteSheet, SHEET_COLS, SHEET_ROWS};

use crate::codec::{ChunkKind, DecodedFrame, DecoderConfig, EncodedChunk, VideoDecoder};
use crate::config::DeviceTier;

pub use cache::SpriteCache;
pub use ranges::GeneratedRanges;

/// Extra margin generated around the visible range, each side.
pub const VISIBLE_PADDING_US: i64 = 2_000_000;

// ── Sheet builder ─────────────────────────────────────────────────────────────

/// A sheet being filled. Finalizing freezes the pixels behind an Arc.
struct SheetBuilder {
    data:    Vec<u8>,
    sprites: Vec<SpriteRef>,
}

impl SheetBuilder {
    fn empty(sheet_w: u32, sheet_h: u32) -> Self {
        Self {
            data:    vec![0u8; (sheet_w * sheet_h * 4) as usize],
            sprites: Vec::new(),
        }
    }

    fn from_cached(sheet: &SpriteSheet) -> Self {
        Self {
            data:    sheet.data.to_vec(),
            sprites: sheet.sprites.clone(),
        }
    }

    fn paste(&mut self, tile: &[u8], tile_w: u32, tile_h: u32, col: u32, row: u32, sheet_w: u32) {
        let tile_stride = (tile_w * 4) as usize;
        let sheet_stride = (sheet_w * 4) as usize;
        let x0 = (col * tile_w * 4) as usize;
        let y0 = (row * tile_h) as usize;
        for line in 0..tile_h as usize {
            let src = &tile[line * tile_stride..(line + 1) * tile_stride];
            let dst_start = (y0 + line) * sheet_stride + x0;
            self.data[dst_start..dst_start + tile_stride].copy_from_slice(src);
        }
    }

    fn add_ref(&mut self, sprite: SpriteRef) {
        match self.sprites.iter_mut().find(|s| s.col == sprite.col && s.row == sprite.row) {
            Some(existing) => *existing = sprite,
            None => self.sprites.push(sprite),
        }
    }

    fn is_full(&self) -> bool {
        self.sprites.len() as u32 >= SHEET_COLS * SHEET_ROWS
    }

    fn finalize(self, id: SheetId, sheet_w: u32, sheet_h: u32) -> SpriteSheet {
        SpriteSheet {
            id,
            data:    Arc::from(self.data.into_boxed_slice()),
            width:   sheet_w,
            height:  sheet_h,
            sprites: self.sprites,
        }
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

pub struct SpritePipeline {
    decoder:        Box<dyn VideoDecoder>,
    events:         Sender<EngineEvent>,
    cache:          SpriteCache,
    generated:      HashMap<(Uuid, i64), GeneratedRanges>,
    sources:        HashMap<Uuid, Arc<SourceMedia>>,
    /// Raised by the worker when newer demand supersedes the current run.
    /// An aborted run emits nothing and records nothing.
    abort:          Arc<AtomicBool>,
    tier:           DeviceTier,
    configured_for: Option<Uuid>,
}

impl SpritePipeline {
    pub fn new(
        decoder: Box<dyn VideoDecoder>,
        tier: DeviceTier,
        events: Sender<EngineEvent>,
        abort: Arc<AtomicBool>,
    ) -> Self {
        Self {
            decoder,
            events,
            cache: SpriteCache::new(tier.sprite_budget_bytes()),
            generated: HashMap::new(),
            sources: HashMap::new(),
            abort,
            tier,
            configured_for: None,
        }
    }

    pub fn add_source(&mut self, media: Arc<SourceMedia>) {
        self.sources.insert(media.id, media);
    }

    pub fn remove_source(&mut self, id: Uuid) {
        self.sources.remove(&id);
        self.cache.remove_source(id);
        self.generated.retain(|(source, _), _| *source != id);
    }

    pub fn cache(&self) -> &SpriteCache {
        &self.cache
    }

    pub fn generated_ranges(&self, source_id: Uuid, interval_us: i64) -> Option<&GeneratedRanges> {
        self.generated.get(&(source_id, interval_us))
    }

    /// Progressive demand: the viewport moved, so cover it (plus padding)
    /// unless thumbnails already exist for all of it.
    pub fn request_visible_range(
        &mut self,
        source_id: Uuid,
        start_us: i64,
        end_us: i64,
        interval_us: i64,
    ) {
        let Some(duration) = self.sources.get(&source_id).map(|s| s.duration_us) else {
            self.recoverable(format!("sprite request for unloaded source {source_id}"));
            return;
        };
        let start = (start_us - VISIBLE_PADDING_US).max(0);
        let end = (end_us + VISIBLE_PADDING_US).min(duration);
        if self
            .generated
            .get(&(source_id, interval_us))
            .is_some_and(|r| r.covers(start, end))
        {
            debug!(source = %source_id, start, end, "visible range already covered");
            return;
        }
        self.generate(source_id, start, end, interval_us);
    }

    /// Generate thumbnails for every uncovered target in `[start, end]`.
    pub fn generate(&mut self, source_id: Uuid, start_us: i64, end_us: i64, interval_us: i64) {
        if interval_us <= 0 || end_us < start_us {
            self.recoverable("sprite generation with degenerate range".into());
            return;
        }
        let Some(source) = self.sources.get(&source_id).cloned() else {
            self.recoverable(format!("sprite generation for unloaded source {source_id}"));
            return;
        };
        if !self.ensure_configured(&source) {
            return;
        }

        let (tile_w, tile_h) = self.tier.sprite_tile();
        let sheet_w = tile_w * SHEET_COLS;
        let sheet_h = tile_h * SHEET_ROWS;

        let mut touched: HashMap<u32, SheetBuilder> = HashMap::new();
        let covered = self.generated.entry((source_id, interval_us)).or_default().clone();

        let mut t = start_us;
        while t <= end_us {
            if self.abort.load(Ordering::Relaxed) {
                debug!(source = %source_id, "sprite run aborted");
                return;
            }
            if covered.contains(t) {
                t += interval_us;
                continue;
            }

            let sprite_index = (t / interval_us) as u32;
            let sheet_index = sprite_index / (SHEET_COLS * SHEET_ROWS);
            let within = sprite_index % (SHEET_COLS * SHEET_ROWS);
            let (col, row) = (within % SHEET_COLS, within / SHEET_COLS);

            match self.decode_target(&source, t) {
                Ok(Some(frame)) => {
                    let tile = downscale(frame, tile_w, tile_h);
                    let id = SheetId { source_id, sheet_index, interval_us };
                    let builder = touched.entry(sheet_index).or_insert_with(|| {
                        match self.cache.get(&id) {
                            Some(cached) => SheetBuilder::from_cached(cached),
                            None => SheetBuilder::empty(sheet_w, sheet_h),
                        }
                    });
                    builder.paste(&tile, tile_w, tile_h, col, row, sheet_w);
                    builder.add_ref(SpriteRef { time_us: t, col, row });

                    if builder.is_full() {
                        if let Some(full) = touched.remove(&sheet_index) {
                            self.emit_sheet(full.finalize(id, sheet_w, sheet_h));
                        }
                    }
                }
                Ok(None) => {} // nothing decodable at this target; skip it
                Err(message) => {
                    // Transient per-target failure: reset, report, continue.
                    self.decoder.reset();
                    self.recoverable(message);
                }
            }
            t += interval_us;
        }

        if self.abort.load(Ordering::Relaxed) {
            return;
        }
        for (sheet_index, builder) in touched {
            let id = SheetId { source_id, sheet_index, interval_us };
            self.emit_sheet(builder.finalize(id, sheet_w, sheet_h));
        }
        self.generated
            .entry((source_id, interval_us))
            .or_default()
            .add(start_us, end_us);
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn ensure_configured(&mut self, source: &SourceMedia) -> bool {
        if self.configured_for == Some(source.id) && self.decoder.is_configured() {
            return true;
        }
        match self.decoder.configure(&DecoderConfig::for_source(source)) {
            Ok(()) => {
                self.configured_for = Some(source.id);
                true
            }
            Err(e) => {
                // Cannot construct a decoder at all: fatal for this pipeline.
                let _ = self.events.send(EngineEvent::Error {
                    message:     format!("sprite decoder configure: {e}"),
                    recoverable: false,
                });
                false
            }
        }
    }

    /// Decode the frame covering `target_us`: key-first feed through the
    /// target sample, one flush, keep only the last frame at or before the
    /// target.
    fn decode_target(
        &mut self,
        source: &SourceMedia,
        target_us: i64,
    ) -> Result<Option<DecodedFrame>, String> {
        let table = &source.table;
        let Some(target_index) = table
            .sample_at_or_before(target_us)
            .or_else(|| table.sample_at_or_after(target_us))
        else {
            return Ok(None);
        };
        let Some(key_index) = table.validated_keyframe_before(target_index) else {
            return Err(format!("no sync sample reachable for sprite at {target_us}"));
        };

        let mut best: Option<DecodedFrame> = None;
        let mut keep_best = |frame: DecodedFrame, best: &mut Option<DecodedFrame>| {
            if frame.timestamp_us <= target_us {
                if let Some(old) = best.replace(frame) {
                    old.close();
                }
            } else {
                frame.close();
            }
        };

        for index in key_index..=target_index {
            let Some(sample) = table.get(index) else { break };
            let kind = if sample.is_sync { ChunkKind::Key } else { ChunkKind::Delta };
            let chunk = EncodedChunk {
                kind,
                timestamp_us: sample.time_us(),
                duration_us:  sample.duration_us(),
                data:         &sample.data,
            };
            if let Err(e) = self.decoder.decode(chunk) {
                if let Some(b) = best.take() {
                    b.close();
                }
                return Err(format!("sprite decode at {target_us}: {e}"));
            }
            while let Some(frame) = self.decoder.poll() {
                keep_best(frame, &mut best);
            }
        }
        match self.decoder.flush() {
            Ok(frames) => {
                for frame in frames {
                    keep_best(frame, &mut best);
                }
            }
            Err(e) => warn!("sprite flush: {e}"),
        }
        Ok(best)
    }

    fn emit_sheet(&mut self, sheet: SpriteSheet) {
        if self.abort.load(Ordering::Relaxed) {
            return;
        }
        let _ = self.events.send(EngineEvent::SpriteSheetReady { sheet: sheet.clone() });
        if let Err(e) = self.cache.insert(sheet) {
            self.recoverable(format!("sprite cache: {e}"));
        }
    }

    fn recoverable(&self, message: String) {
        warn!("{message}");
        let _ = self.events.send(EngineEvent::Error { message, recoverable: true });
    }
}

/// Hardware-resize stand-in: bilinear downscale to tile dimensions.
fn downscale(frame: DecodedFrame, tile_w: u32, tile_h: u32) -> Vec<u8> {
    let (w, h) = (frame.width, frame.height);
    let data = frame.into_data();
    if (w, h) == (tile_w, tile_h) {
        return data;
    }
    let img = RgbaImage::from_raw(w, h, data)
        .unwrap_or_else(|| RgbaImage::new(w.max(1), h.max(1)));
    image::imageops::resize(&img, tile_w, tile_h, FilterType::Triangle).into_raw()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{unbounded, Receiver};

    use framecut_core::sample::{CodecInfo, Sample, SampleTable};

    use crate::codec::testing::ScriptedDecoder;

    const FRAME_US: i64 = 33_333;
    const SEC: i64 = 1_000_000;

    fn media(count: i64, gop: i64) -> Arc<SourceMedia> {
        let samples: Vec<Sample> = (0..count)
            .map(|i| Sample {
                cts:       i * FRAME_US,
                timescale: 1_000_000,
                duration:  FRAME_US as u32,
                is_sync:   i % gop == 0,
                data:      Arc::from(vec![0u8; 8].into_boxed_slice()),
            })
            .collect();
        let keyframes = (0..count as usize).filter(|i| *i as i64 % gop == 0).collect();
        Arc::new(SourceMedia {
            id:          Uuid::new_v4(),
            width:       16,
            height:      8,
            codec:       CodecInfo { codec_id: "avc1.64001f".into(), description: vec![] },
            duration_us: count * FRAME_US,
            has_audio:   false,
            table:       SampleTable::new(samples, keyframes).unwrap(),
            container:   None,
        })
    }

    struct Rig {
        pipeline: SpritePipeline,
        events:   Receiver<EngineEvent>,
        abort:    Arc<AtomicBool>,
        journal:  Arc<std::sync::Mutex<crate::codec::testing::DecoderJournal>>,
    }

    fn rig_with(decoder: ScriptedDecoder) -> Rig {
        let journal = Arc::clone(&decoder.journal);
        let (tx, rx) = unbounded();
        let abort = Arc::new(AtomicBool::new(false));
        let pipeline = SpritePipeline::new(
            Box::new(decoder),
            DeviceTier::Low,
            tx,
            Arc::clone(&abort),
        );
        Rig { pipeline, events: rx, abort, journal }
    }

    fn rig() -> Rig {
        rig_with(ScriptedDecoder::new(2))
    }

    fn sheets(rx: &Receiver<EngineEvent>) -> Vec<SpriteSheet> {
        rx.try_iter()
            .filter_map(|e| match e {
                EngineEvent::SpriteSheetReady { sheet } => Some(sheet),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn generates_one_sprite_per_interval_target() {
        let mut r = rig();
        let media = media(300, 5); // ~10 s
        let id = media.id;
        r.pipeline.add_source(media);

        r.pipeline.generate(id, 0, 4 * SEC, SEC);
        let emitted = sheets(&r.events);
        assert_eq!(emitted.len(), 1);
        // Targets 0 s..4 s inclusive at 1 s spacing.
        assert_eq!(emitted[0].sprites.len(), 5);
        assert_eq!(emitted[0].id.sheet_index, 0);
        // Low tier: 128×72 tiles on a 10×10 grid.
        assert_eq!((emitted[0].width, emitted[0].height), (1280, 720));
        assert!(!r.journal.lock().unwrap().key_violation);

        // The covered interval is recorded, sorted and merged.
        let ranges = r.pipeline.generated_ranges(id, SEC).unwrap();
        assert_eq!(ranges.ranges(), &[(0, 4 * SEC)]);
    }

    #[test]
    fn covered_targets_are_not_regenerated() {
        let mut r = rig();
        let media = media(300, 5);
        let id = media.id;
        r.pipeline.add_source(media);

        r.pipeline.generate(id, 0, 4 * SEC, SEC);
        sheets(&r.events);
        let decoded_before = r.journal.lock().unwrap().decoded.len();

        // Fully covered: nothing decoded, nothing emitted.
        r.pipeline.request_visible_range(id, 2 * SEC - VISIBLE_PADDING_US, 2 * SEC, SEC);
        assert!(sheets(&r.events).is_empty());
        assert_eq!(r.journal.lock().unwrap().decoded.len(), decoded_before);

        // Partially covered: only the new tail is decoded.
        r.pipeline.generate(id, 3 * SEC, 6 * SEC, SEC);
        let emitted = sheets(&r.events);
        assert_eq!(emitted.len(), 1);
        let times: Vec<i64> = emitted[0].sprites.iter().map(|s| s.time_us).collect();
        assert!(times.contains(&(5 * SEC)));
        let ranges = r.pipeline.generated_ranges(id, SEC).unwrap();
        assert_eq!(ranges.ranges(), &[(0, 6 * SEC)]);
    }

    #[test]
    fn aborted_run_emits_and_records_nothing() {
        let mut r = rig();
        let media = media(300, 5);
        let id = media.id;
        r.pipeline.add_source(media);

        r.abort.store(true, Ordering::Relaxed);
        r.pipeline.generate(id, 0, 4 * SEC, SEC);
        assert!(sheets(&r.events).is_empty());
        assert!(r
            .pipeline
            .generated_ranges(id, SEC)
            .map_or(true, |ranges| ranges.ranges().is_empty()));
    }

    #[test]
    fn per_target_decode_error_is_recoverable_and_run_continues() {
        // Fail the keyframe feed for the 2 s target once.
        let failing = ScriptedDecoder::new(2).failing_at(&[2 * SEC / FRAME_US * FRAME_US]);
        let mut r = rig_with(failing);
        let media = media(300, 5);
        let id = media.id;
        r.pipeline.add_source(media);

        r.pipeline.generate(id, 0, 4 * SEC, SEC);

        let events: Vec<EngineEvent> = r.events.try_iter().collect();
        assert!(events
            .iter()
            .any(|e| matches!(e, EngineEvent::Error { recoverable: true, .. })));
        let sheet = events
            .iter()
            .find_map(|e| match e {
                EngineEvent::SpriteSheetReady { sheet } => Some(sheet),
                _ => None,
            })
            .expect("run continued past the failed target");
        // One target lost, the other four present.
        assert_eq!(sheet.sprites.len(), 4);
    }

    #[test]
    fn configure_failure_is_fatal_for_the_run() {
        let mut r = rig_with(ScriptedDecoder::new(0).failing_configure());
        let media = media(30, 5);
        let id = media.id;
        r.pipeline.add_source(media);

        r.pipeline.generate(id, 0, SEC, SEC);
        let events: Vec<EngineEvent> = r.events.try_iter().collect();
        assert!(events
            .iter()
            .any(|e| matches!(e, EngineEvent::Error { recoverable: false, .. })));
        assert!(!events
            .iter()
            .any(|e| matches!(e, EngineEvent::SpriteSheetReady { .. })));
    }

    #[test]
    fn removing_a_source_purges_sheets_and_ranges() {
        let mut r = rig();
        let media = media(300, 5);
        let id = media.id;
        r.pipeline.add_source(media);
        r.pipeline.generate(id, 0, 4 * SEC, SEC);
        sheets(&r.events);
        assert!(r.pipeline.cache().len() > 0);

        r.pipeline.remove_source(id);
        assert_eq!(r.pipeline.cache().len(), 0);
        assert!(r.pipeline.generated_ranges(id, SEC).is_none());
    }

    #[test]
    fn visible_range_request_pads_and_clamps() {
        let mut r = rig();
        let media = media(300, 5); // ≈ 10 s
        let id = media.id;
        let duration = media.duration_us;
        r.pipeline.add_source(media);

        r.pipeline.request_visible_range(id, 0, SEC, SEC);
        sheets(&r.events);
        let ranges = r.pipeline.generated_ranges(id, SEC).unwrap();
        // Clamped at 0 on the left, padded 2 s past the visible end.
        assert_eq!(ranges.ranges(), &[(0, (SEC + VISIBLE_PADDING_US).min(duration))]);
    }
}
