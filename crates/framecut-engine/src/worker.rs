// crates/framecut-engine/src/worker.rs
//
// EngineWorker: owns the engine thread and everything the host talks to.
// All public API the host calls lives here.
//
// Thread layout:
//   engine thread — playback coordinator + composition, drains the command
//                   channel then ticks the presentation loop (~4 ms cadence)
//   sprite thread — SpritePipeline with its own decoder; superseded demand
//                   is cancelled through a shared abort flag
//   export thread — one per job, cancel flags keyed by job id; entries are
//                   removed when the job finishes or is cancelled

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use framecut_core::commands::{EditOp, EngineCommand};
use framecut_core::events::EngineEvent;
use framecut_core::model::{Composition, CompositionConfig, ModelError, SourceInfo};
use framecut_core::sample::SourceMedia;

use crate::clock::SystemClock;
use crate::codec::CodecBackend;
use crate::config::EngineConfig;
use crate::export::export_composition;
use crate::playback::PlaybackCoordinator;
use crate::snapshot::write_png;
use crate::sprite::SpritePipeline;

/// Engine-thread tick cadence while the command channel is idle.
const TICK_INTERVAL: Duration = Duration::from_millis(4);

enum SpriteCmd {
    AddSource(Arc<SourceMedia>),
    RemoveSource(Uuid),
    VisibleRange { source_id: Uuid, start_us: i64, end_us: i64, interval_us: i64 },
    Shutdown,
}

pub struct EngineWorker {
    cmd_tx: Sender<EngineCommand>,
    /// Engine → host event stream.
    pub events: Receiver<EngineEvent>,
    handle: Option<thread::JoinHandle<()>>,
}

impl EngineWorker {
    pub fn spawn(backend: Arc<dyn CodecBackend>, config: EngineConfig) -> Self {
        let (cmd_tx, cmd_rx) = bounded::<EngineCommand>(256);
        let (event_tx, event_rx) = bounded::<EngineEvent>(512);

        let handle = thread::spawn(move || {
            engine_thread(backend, config, cmd_rx, event_tx);
        });

        Self { cmd_tx, events: event_rx, handle: Some(handle) }
    }

    /// Queue a command for the engine thread. Returns false after shutdown.
    pub fn send(&self, cmd: EngineCommand) -> bool {
        self.cmd_tx.send(cmd).is_ok()
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(EngineCommand::Shutdown);
    }

    /// Block until the engine thread exits (after `shutdown`).
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

// ── Engine thread ─────────────────────────────────────────────────────────────

struct Engine {
    coordinator:   PlaybackCoordinator,
    composition:   Composition,
    sources:       HashMap<Uuid, Arc<SourceMedia>>,
    backend:       Arc<dyn CodecBackend>,
    events:        Sender<EngineEvent>,
    sprite_tx:     Sender<SpriteCmd>,
    sprite_abort:  Arc<AtomicBool>,
    export_cancel: Arc<Mutex<HashMap<Uuid, Arc<AtomicBool>>>>,
    active_source: Option<Uuid>,
}

fn engine_thread(
    backend: Arc<dyn CodecBackend>,
    config: EngineConfig,
    cmd_rx: Receiver<EngineCommand>,
    events: Sender<EngineEvent>,
) {
    // ── Sprite thread ─────────────────────────────────────────────────────────
    let (sprite_tx, sprite_rx) = bounded::<SpriteCmd>(64);
    let sprite_abort = Arc::new(AtomicBool::new(false));
    {
        let decoder = backend.make_decoder();
        let events = events.clone();
        let abort = Arc::clone(&sprite_abort);
        thread::spawn(move || {
            let mut pipeline = SpritePipeline::new(decoder, config.tier, events, Arc::clone(&abort));
            while let Ok(cmd) = sprite_rx.recv() {
                match cmd {
                    SpriteCmd::AddSource(media) => pipeline.add_source(media),
                    SpriteCmd::RemoveSource(id) => pipeline.remove_source(id),
                    SpriteCmd::VisibleRange { source_id, start_us, end_us, interval_us } => {
                        // This command owns the abort flag now; anything the
                        // engine raised to cancel an older run is consumed.
                        abort.store(false, Ordering::Relaxed);
                        pipeline.request_visible_range(source_id, start_us, end_us, interval_us);
                    }
                    SpriteCmd::Shutdown => return,
                }
            }
        });
    }

    let coordinator = PlaybackCoordinator::new(
        backend.make_decoder(),
        Box::new(SystemClock::new()),
        events.clone(),
    );

    let mut engine = Engine {
        coordinator,
        composition: Composition::new(CompositionConfig::default()),
        sources: HashMap::new(),
        backend,
        events,
        sprite_tx,
        sprite_abort,
        export_cancel: Arc::new(Mutex::new(HashMap::new())),
        active_source: None,
    };

    info!("engine worker up");
    loop {
        match cmd_rx.recv_timeout(TICK_INTERVAL) {
            Ok(cmd) => {
                if !engine.handle(cmd) {
                    break;
                }
                // Drain whatever queued behind the first command before the
                // next tick, so bursts (scrub seeks) coalesce in one pass.
                let mut stop = false;
                while let Ok(cmd) = cmd_rx.try_recv() {
                    if !engine.handle(cmd) {
                        stop = true;
                        break;
                    }
                }
                if stop {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        engine.coordinator.tick();
    }

    engine.teardown();
    info!("engine worker down");
}

impl Engine {
    /// Apply one command. Returns false on shutdown.
    fn handle(&mut self, cmd: EngineCommand) -> bool {
        match cmd {
            EngineCommand::InitCanvas { surface } => {
                self.coordinator.init_canvas(surface);
            }

            EngineCommand::LoadSource { id, bytes } => self.load_source(id, bytes),

            EngineCommand::RemoveSource { id } => self.remove_source(id),

            EngineCommand::SetActiveClips { clips } => {
                let Some(primary) = clips.first() else {
                    self.warning("SetActiveClips with no clips".into());
                    return true;
                };
                let Some(media) = self.sources.get(&primary.source_id).cloned() else {
                    self.warning(format!(
                        "SetActiveClips for unloaded source {}",
                        primary.source_id
                    ));
                    return true;
                };
                self.active_source = Some(media.id);
                self.coordinator
                    .set_active_clip(media, primary.trim_in_us, primary.trim_out_us);
            }

            EngineCommand::Seek { position_us } => self.coordinator.seek(position_us),
            EngineCommand::Play => self.coordinator.play(),
            EngineCommand::Pause => self.coordinator.pause(),
            EngineCommand::SetTrim { in_us, out_us } => self.coordinator.set_trim(in_us, out_us),
            EngineCommand::SetMasterVolume { volume } => {
                self.composition.set_master_volume(volume);
                let _ = self.events.send(EngineEvent::CompositionChanged {
                    composition: self.composition.clone(),
                });
            }

            EngineCommand::GetSamplesForSprites { source_id } => {
                match self.sources.get(&source_id) {
                    Some(media) => {
                        let _ = self.sprite_tx.send(SpriteCmd::AddSource(Arc::clone(media)));
                    }
                    None => self.warning(format!("sprite request for unloaded source {source_id}")),
                }
            }

            EngineCommand::SetVisibleRange { source_id, start_us, end_us, interval_us } => {
                // Supersede whatever the sprite thread is generating now.
                self.sprite_abort.store(true, Ordering::Relaxed);
                let _ = self.sprite_tx.send(SpriteCmd::VisibleRange {
                    source_id,
                    start_us,
                    end_us,
                    interval_us,
                });
            }

            EngineCommand::Edit { op } => self.apply_edit(op),

            EngineCommand::StartExport { job_id, spec } => self.start_export(job_id, spec),

            EngineCommand::CancelExport { job_id } => {
                if let Some(flag) = self.export_cancel.lock().get(&job_id) {
                    flag.store(true, Ordering::Relaxed);
                } else {
                    self.warning(format!("CancelExport for unknown job {job_id}"));
                }
            }

            EngineCommand::SaveFrame { path } => match self.coordinator.last_frame() {
                Some((w, h, rgba)) => match write_png(&path, w, h, rgba) {
                    Ok(()) => {
                        let _ = self.events.send(EngineEvent::FrameSaved { path });
                    }
                    Err(e) => {
                        let _ = self.events.send(EngineEvent::Error {
                            message:     e.to_string(),
                            recoverable: true,
                        });
                    }
                },
                None => self.warning("SaveFrame before any frame was rendered".into()),
            },

            EngineCommand::Shutdown => return false,
        }
        true
    }

    fn load_source(&mut self, id: Uuid, bytes: Arc<[u8]>) {
        let mut demuxer = self.backend.make_demuxer();
        let media = match demuxer.demux(id, bytes) {
            Ok(media) => Arc::new(media),
            Err(e) => {
                let _ = self.events.send(EngineEvent::Error {
                    message:     format!("load source: {e}"),
                    recoverable: false,
                });
                return;
            }
        };
        debug!(source = %id, duration_us = media.duration_us, "source demuxed");

        self.sources.insert(id, Arc::clone(&media));
        self.composition.add_source(SourceInfo {
            id,
            width:       media.width,
            height:      media.height,
            codec:       media.codec.clone(),
            duration_us: media.duration_us,
            has_audio:   media.has_audio,
        });
        let _ = self.events.send(EngineEvent::SourceReady {
            id,
            duration_us: media.duration_us,
            width:       media.width,
            height:      media.height,
            has_audio:   media.has_audio,
        });

        // The freshly loaded source becomes the preview; Ready plus the
        // first rendered frame follow from the coordinator.
        self.active_source = Some(id);
        self.coordinator.load_source(media);
    }

    fn remove_source(&mut self, id: Uuid) {
        match self.composition.remove_source(id) {
            Ok(()) | Err(ModelError::SourceNotFound) => {}
            Err(e) => {
                self.warning(format!("RemoveSource: {e}"));
                return;
            }
        }
        if self.sources.remove(&id).is_none() {
            self.warning(format!("RemoveSource for unloaded source {id}"));
            return;
        }
        let _ = self.sprite_tx.send(SpriteCmd::RemoveSource(id));
        if self.active_source == Some(id) {
            self.coordinator.shutdown();
            self.active_source = None;
        }
    }

    fn apply_edit(&mut self, op: EditOp) {
        let result = match op {
            EditOp::CreateTrack { kind, label } => {
                self.composition.create_track(kind, label);
                Ok(())
            }
            EditOp::RemoveTrack { track_id } => self.composition.remove_track(track_id),
            EditOp::AddClip { track_id, spec } => {
                self.composition.add_clip(track_id, spec).map(|_| ())
            }
            EditOp::AddVideoClipWithAudio { track_id, spec } => self
                .composition
                .add_video_clip_with_audio(track_id, spec)
                .map(|_| ()),
            EditOp::RemoveClip { clip_id } => self.composition.remove_clip(clip_id),
            EditOp::MoveClip { clip_id, new_start_us } => {
                self.composition.move_clip(clip_id, new_start_us)
            }
            EditOp::MoveClipWithLinked { clip_id, new_start_us } => {
                self.composition.move_clip_with_linked(clip_id, new_start_us)
            }
            EditOp::MoveClipToTrack { clip_id, track_id, new_start_us } => {
                self.composition.move_clip_to_track(clip_id, track_id, new_start_us)
            }
            EditOp::TrimStart { clip_id, new_start_us } => {
                self.composition.trim_start(clip_id, new_start_us)
            }
            EditOp::TrimEnd { clip_id, new_end_us } => {
                self.composition.trim_end(clip_id, new_end_us)
            }
            EditOp::TrimStartWithLinked { clip_id, new_start_us } => {
                self.composition.trim_start_with_linked(clip_id, new_start_us)
            }
            EditOp::TrimEndWithLinked { clip_id, new_end_us } => {
                self.composition.trim_end_with_linked(clip_id, new_end_us)
            }
            EditOp::Unlink { clip_id } => self.composition.unlink(clip_id),
            EditOp::SplitClip { clip_id, at_us } => {
                self.composition.split_clip(clip_id, at_us).map(|_| ())
            }
            EditOp::SetTrackMuted { track_id, muted } => {
                self.composition.set_track_muted(track_id, muted)
            }
            EditOp::SetTrackSolo { track_id, solo } => {
                self.composition.set_track_solo(track_id, solo)
            }
            EditOp::SetTrackLocked { track_id, locked } => {
                self.composition.set_track_locked(track_id, locked)
            }
        };
        match result {
            Ok(()) => {
                let _ = self.events.send(EngineEvent::CompositionChanged {
                    composition: self.composition.clone(),
                });
            }
            Err(e) => self.warning(format!("edit rejected: {e}")),
        }
    }

    fn start_export(&mut self, job_id: Uuid, spec: framecut_core::export::ExportSpec) {
        let cancel = Arc::new(AtomicBool::new(false));
        // Register before spawning so CancelExport cannot race the insert.
        self.export_cancel
            .lock()
            .insert(job_id, Arc::clone(&cancel));

        let sources = self.sources.clone();
        let backend = Arc::clone(&self.backend);
        let events = self.events.clone();
        let registry = Arc::clone(&self.export_cancel);
        thread::spawn(move || {
            let mut sink = backend.make_export_sink();
            export_composition(
                job_id,
                &spec,
                &sources,
                backend.as_ref(),
                sink.as_mut(),
                &cancel,
                &events,
            );
            registry.lock().remove(&job_id);
        });
    }

    fn warning(&self, message: String) {
        warn!("{message}");
        let _ = self.events.send(EngineEvent::Warning { message });
    }

    fn teardown(&mut self) {
        let _ = self.sprite_tx.send(SpriteCmd::Shutdown);
        for flag in self.export_cancel.lock().values() {
            flag.store(true, Ordering::Relaxed);
        }
        self.coordinator.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Instant;

    use framecut_core::commands::ActiveClipDescriptor;
    use framecut_core::export::{ExportSettings, ExportSpec};
    use framecut_core::model::{ClipSpec, TrackKind};
    use framecut_core::sample::{CodecInfo, Sample, SampleTable};
    use framecut_core::viewport::ExportRange;

    use crate::codec::testing::{DecoderJournal, RecordingSink, ScriptedDecoder};
    use crate::codec::{CodecError, Demuxer, ExportSink, VideoDecoder};

    const FRAME_US: i64 = 33_333;
    const SEC: i64 = 1_000_000;

    /// Demuxer double: fabricates a 4×2, 30 fps source; one sample per 8
    /// payload bytes, keyframe every 5.
    struct TestDemuxer;

    impl Demuxer for TestDemuxer {
        fn demux(&mut self, id: Uuid, bytes: Arc<[u8]>) -> Result<SourceMedia, CodecError> {
            if bytes.is_empty() {
                return Err(CodecError::Demux("empty buffer".into()));
            }
            let count = (bytes.len() / 8).max(30) as i64;
            let samples: Vec<Sample> = (0..count)
                .map(|i| Sample {
                    cts:       i * FRAME_US,
                    timescale: 1_000_000,
                    duration:  FRAME_US as u32,
                    is_sync:   i % 5 == 0,
                    data:      Arc::from(vec![0u8; 8].into_boxed_slice()),
                })
                .collect();
            let keyframes = (0..count as usize).filter(|i| i % 5 == 0).collect();
            Ok(SourceMedia {
                id,
                width:       4,
                height:      2,
                codec:       CodecInfo { codec_id: "avc1.64001f".into(), description: vec![] },
                duration_us: count * FRAME_US,
                has_audio:   false,
                table:       SampleTable::new(samples, keyframes).map_err(|e| {
                    CodecError::Demux(e.to_string())
                })?,
                container:   Some(bytes),
            })
        }
    }

    struct TestBackend {
        journal: Arc<StdMutex<DecoderJournal>>,
    }

    impl TestBackend {
        fn new() -> Self {
            Self { journal: Arc::new(StdMutex::new(DecoderJournal::default())) }
        }
    }

    impl CodecBackend for TestBackend {
        fn make_decoder(&self) -> Box<dyn VideoDecoder> {
            Box::new(ScriptedDecoder::new(2).sharing_journal(Arc::clone(&self.journal)))
        }

        fn make_demuxer(&self) -> Box<dyn Demuxer> {
            Box::new(TestDemuxer)
        }

        fn make_export_sink(&self) -> Box<dyn ExportSink> {
            Box::new(RecordingSink::default())
        }
    }

    fn worker() -> EngineWorker {
        EngineWorker::spawn(Arc::new(TestBackend::new()), EngineConfig::default())
    }

    /// Collect events until `pred` matches one, or panic after 2 s.
    fn wait_for(
        worker: &EngineWorker,
        pred: impl Fn(&EngineEvent) -> bool,
    ) -> Vec<EngineEvent> {
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut seen = Vec::new();
        while Instant::now() < deadline {
            match worker.events.recv_timeout(Duration::from_millis(50)) {
                Ok(event) => {
                    let hit = pred(&event);
                    seen.push(event);
                    if hit {
                        return seen;
                    }
                }
                Err(_) => {}
            }
        }
        panic!("timed out waiting for event; saw {} events", seen.len());
    }

    fn load(worker: &EngineWorker) -> Uuid {
        let id = Uuid::new_v4();
        worker.send(EngineCommand::LoadSource {
            id,
            bytes: Arc::from(vec![0u8; 8 * 120].into_boxed_slice()),
        });
        wait_for(worker, |e| matches!(e, EngineEvent::FirstFrame { .. }));
        id
    }

    #[test]
    fn load_source_flows_source_ready_ready_then_first_frame() {
        let w = worker();
        let id = Uuid::new_v4();
        w.send(EngineCommand::LoadSource {
            id,
            bytes: Arc::from(vec![0u8; 8 * 60].into_boxed_slice()),
        });

        let events = wait_for(&w, |e| matches!(e, EngineEvent::FirstFrame { .. }));
        let mut kinds = events.iter();
        assert!(matches!(
            kinds.next(),
            Some(EngineEvent::SourceReady { id: sid, .. }) if *sid == id
        ));
        assert!(matches!(kinds.next(), Some(EngineEvent::Ready { .. })));
        w.shutdown();
        w.join();
    }

    #[test]
    fn transport_commands_round_trip_through_the_thread() {
        let w = worker();
        load(&w);

        w.send(EngineCommand::Play);
        wait_for(&w, |e| matches!(e, EngineEvent::PlaybackState { playing: true }));

        w.send(EngineCommand::Pause);
        wait_for(&w, |e| matches!(e, EngineEvent::PlaybackState { playing: false }));

        w.send(EngineCommand::Seek { position_us: SEC });
        let events = wait_for(&w, |e| matches!(e, EngineEvent::TimeUpdate { .. }));
        let landed = events
            .iter()
            .find_map(|e| match e {
                EngineEvent::TimeUpdate { position_us } => Some(*position_us),
                _ => None,
            })
            .unwrap();
        assert!((landed - SEC).abs() < FRAME_US);
        w.shutdown();
        w.join();
    }

    #[test]
    fn set_master_volume_updates_and_clamps_the_composition_gain() {
        let w = worker();
        load(&w);

        let gain_from = |events: &[EngineEvent]| {
            events
                .iter()
                .find_map(|e| match e {
                    EngineEvent::CompositionChanged { composition } => {
                        Some(composition.master_volume)
                    }
                    _ => None,
                })
                .unwrap()
        };

        w.send(EngineCommand::SetMasterVolume { volume: 0.25 });
        let events = wait_for(&w, |e| matches!(e, EngineEvent::CompositionChanged { .. }));
        assert!((gain_from(&events) - 0.25).abs() < 1e-6);

        // Out-of-range input clamps to [0, 1]; the export audio plan reads
        // this gain from the snapshot.
        w.send(EngineCommand::SetMasterVolume { volume: 4.0 });
        let events = wait_for(&w, |e| matches!(e, EngineEvent::CompositionChanged { .. }));
        assert!((gain_from(&events) - 1.0).abs() < 1e-6);

        w.send(EngineCommand::SetMasterVolume { volume: -2.0 });
        let events = wait_for(&w, |e| matches!(e, EngineEvent::CompositionChanged { .. }));
        assert_eq!(gain_from(&events), 0.0);
        w.shutdown();
        w.join();
    }

    #[test]
    fn set_active_clips_previews_the_primary_clip() {
        let w = worker();
        let id = load(&w);

        w.send(EngineCommand::SetActiveClips {
            clips: vec![ActiveClipDescriptor {
                source_id:   id,
                trim_in_us:  SEC,
                trim_out_us: 3 * SEC,
            }],
        });
        let events = wait_for(&w, |e| {
            matches!(e, EngineEvent::TimeUpdate { position_us } if *position_us >= SEC)
        });
        let landed = events
            .iter()
            .rev()
            .find_map(|e| match e {
                EngineEvent::TimeUpdate { position_us } => Some(*position_us),
                _ => None,
            })
            .unwrap();
        assert!((landed - SEC).abs() < 2 * FRAME_US);
        w.shutdown();
        w.join();
    }

    #[test]
    fn commands_before_load_produce_warnings_not_crashes() {
        let w = worker();
        w.send(EngineCommand::Play);
        w.send(EngineCommand::Seek { position_us: 0 });
        let events = wait_for(&w, |e| matches!(e, EngineEvent::Warning { .. }));
        assert!(events.iter().all(|e| matches!(e, EngineEvent::Warning { .. })));
        w.shutdown();
        w.join();
    }

    #[test]
    fn edits_apply_and_broadcast_the_new_composition() {
        let w = worker();
        let source_id = load(&w);

        w.send(EngineCommand::Edit {
            op: EditOp::CreateTrack { kind: TrackKind::Video, label: "V1".into() },
        });
        let events = wait_for(&w, |e| matches!(e, EngineEvent::CompositionChanged { .. }));
        let track_id = events
            .iter()
            .find_map(|e| match e {
                EngineEvent::CompositionChanged { composition } => {
                    composition.tracks.first().map(|t| t.id)
                }
                _ => None,
            })
            .unwrap();

        w.send(EngineCommand::Edit {
            op: EditOp::AddClip {
                track_id,
                spec: ClipSpec::full(source_id, 0, 2 * SEC),
            },
        });
        let events = wait_for(&w, |e| matches!(e, EngineEvent::CompositionChanged { .. }));
        assert!(events.iter().any(|e| matches!(
            e,
            EngineEvent::CompositionChanged { composition }
                if composition.tracks[0].clips.len() == 1
        )));

        // A rejected edit warns instead.
        w.send(EngineCommand::Edit {
            op: EditOp::AddClip {
                track_id,
                spec: ClipSpec::full(source_id, SEC, 2 * SEC),
            },
        });
        wait_for(&w, |e| matches!(e, EngineEvent::Warning { .. }));
        w.shutdown();
        w.join();
    }

    #[test]
    fn sprite_demand_produces_sheets() {
        let w = worker();
        let id = load(&w);

        w.send(EngineCommand::GetSamplesForSprites { source_id: id });
        w.send(EngineCommand::SetVisibleRange {
            source_id:   id,
            start_us:    0,
            end_us:      2 * SEC,
            interval_us: SEC,
        });
        let events = wait_for(&w, |e| matches!(e, EngineEvent::SpriteSheetReady { .. }));
        assert!(events.iter().any(|e| matches!(
            e,
            EngineEvent::SpriteSheetReady { sheet } if !sheet.sprites.is_empty()
        )));
        w.shutdown();
        w.join();
    }

    #[test]
    fn export_runs_to_complete_with_progress() {
        let w = worker();
        let source_id = load(&w);

        // Build the snapshot host-side: one clip over the whole source.
        let mut composition = Composition::new(CompositionConfig {
            width: 4, height: 2, frame_rate: 30,
        });
        composition.add_source(SourceInfo {
            id:          source_id,
            width:       4,
            height:      2,
            codec:       CodecInfo { codec_id: "avc1.64001f".into(), description: vec![] },
            duration_us: 120 * FRAME_US,
            has_audio:   false,
        });
        let v1 = composition.create_track(TrackKind::Video, "V1");
        composition
            .add_clip(v1, ClipSpec::full(source_id, 0, 120 * FRAME_US))
            .unwrap();

        w.send(EngineCommand::StartExport {
            job_id: Uuid::new_v4(),
            spec: ExportSpec {
                composition,
                range: ExportRange { in_us: Some(0), out_us: Some(SEC) },
                settings: ExportSettings {
                    width:         4,
                    height:        2,
                    frame_rate:    30,
                    video_bitrate: 2_000_000,
                    audio_bitrate: 96_000,
                },
                overlays: Vec::new(),
            },
        });

        let events = wait_for(&w, |e| matches!(e, EngineEvent::Complete { .. }));
        assert!(events.iter().any(|e| matches!(e, EngineEvent::Progress { .. })));
        w.shutdown();
        w.join();
    }

    #[test]
    fn save_frame_writes_png_after_first_render() {
        let w = worker();
        load(&w);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("poster.png");

        w.send(EngineCommand::SaveFrame { path: path.clone() });
        wait_for(&w, |e| matches!(e, EngineEvent::FrameSaved { .. }));
        assert!(path.exists());
        w.shutdown();
        w.join();
    }
}
