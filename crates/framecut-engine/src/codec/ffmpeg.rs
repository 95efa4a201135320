// crates/framecut-engine/src/codec/ffmpeg.rs
//
// In-process FFmpeg backend for the codec seams (cargo feature `ffmpeg`).
//
// Three pieces:
//   FfmpegDemuxer    — container bytes → samples + keyframe index + codec info
//   FfmpegDecoder    — push decoder: encoded chunks in, RGBA frames out
//   FfmpegExportSink — H.264 + AAC MP4 mux; video from composited RGBA
//                      frames, audio mixed from the export audio plan
//
// FFmpeg wants files, not buffers, so demux and audio decode round-trip
// through tempfiles. The occasional unsafe block talks to libavcodec fields
// the safe wrapper does not expose (extradata, codecpar copies, SAR).

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context as AnyhowContext, Result};
use tracing::{debug, warn};
use uuid::Uuid;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::codec::{self, Id as FfCodecId};
use ffmpeg::encoder;
use ffmpeg::format::sample::Type as SampleType;
use ffmpeg::format::{input, output as open_output, Pixel, Sample as SampleFormat};
use ffmpeg::media::Type as MediaType;
use ffmpeg::software::resampling;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags as SwsFlags};
use ffmpeg::util::channel_layout::{ChannelLayout, ChannelLayoutMask};
use ffmpeg::util::frame::audio::Audio as AudioFrame;
use ffmpeg::util::frame::video::Video as VideoFrame;
use ffmpeg::util::rational::Rational;
use ffmpeg::Packet;

use framecut_core::export::ExportSettings;
use framecut_core::helpers::time::US_PER_SEC;
use framecut_core::sample::{CodecInfo, Sample, SampleTable, SourceMedia};

use super::{
    AudioPlan, ChunkKind, CodecBackend, CodecError, DecodedFrame, DecoderConfig, Demuxer,
    EncodedChunk, ExportSink, VideoDecoder,
};

/// Output audio sample rate for all exports.
const AUDIO_RATE: i32 = 44_100;

pub struct FfmpegBackend;

impl CodecBackend for FfmpegBackend {
    fn make_decoder(&self) -> Box<dyn VideoDecoder> {
        Box::new(FfmpegDecoder::new())
    }

    fn make_demuxer(&self) -> Box<dyn Demuxer> {
        Box::new(FfmpegDemuxer)
    }

    fn make_export_sink(&self) -> Box<dyn ExportSink> {
        Box::new(FfmpegExportSink::new())
    }
}

fn demux_err(e: impl std::fmt::Display) -> CodecError {
    CodecError::Demux(e.to_string())
}

fn encode_err(e: impl std::fmt::Display) -> CodecError {
    CodecError::Encode(e.to_string())
}

/// Write a buffer to a tempfile FFmpeg can open by path.
fn spill_to_tempfile(bytes: &[u8], suffix: &str) -> Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("framecut-")
        .suffix(suffix)
        .tempfile()
        .context("create tempfile")?;
    file.write_all(bytes).context("spill buffer")?;
    Ok(file)
}

// ── Demuxer ───────────────────────────────────────────────────────────────────

pub struct FfmpegDemuxer;

impl Demuxer for FfmpegDemuxer {
    fn demux(&mut self, id: Uuid, bytes: Arc<[u8]>) -> Result<SourceMedia, CodecError> {
        let file = spill_to_tempfile(&bytes, ".mp4").map_err(demux_err)?;
        let mut ictx = input(&file.path().to_path_buf()).map_err(demux_err)?;

        let video_idx = ictx
            .streams()
            .best(MediaType::Video)
            .ok_or_else(|| demux_err("no video stream"))?
            .index();
        let has_audio = ictx.streams().best(MediaType::Audio).is_some();

        let (tb_num, tb_den, width, height, codec) = {
            let stream = ictx.stream(video_idx).ok_or_else(|| demux_err("stream gone"))?;
            let tb = stream.time_base();
            let params = stream.parameters();
            // Width/height and extradata live on AVCodecParameters; the safe
            // wrapper exposes neither for a bare stream.
            let (w, h, extradata, codec_id) = unsafe {
                let p = params.as_ptr();
                let extra = if (*p).extradata.is_null() || (*p).extradata_size <= 0 {
                    Vec::new()
                } else {
                    std::slice::from_raw_parts((*p).extradata, (*p).extradata_size as usize)
                        .to_vec()
                };
                ((*p).width as u32, (*p).height as u32, extra, params.id())
            };
            let codec_id = match codec_id {
                FfCodecId::H264 => "avc1",
                FfCodecId::HEVC => "hvc1",
                FfCodecId::VP8 => "vp08",
                FfCodecId::VP9 => "vp09",
                FfCodecId::AV1 => "av01",
                other => {
                    return Err(CodecError::UnsupportedCodec(format!("{other:?}")));
                }
            };
            (
                tb.numerator(),
                tb.denominator(),
                w,
                h,
                CodecInfo { codec_id: codec_id.into(), description: extradata },
            )
        };

        let duration_us = {
            // Container duration is already in AV_TIME_BASE (µs) units.
            let d = ictx.duration();
            if d > 0 { d } else { 0 }
        };

        // Collect encoded video packets. `cts = pts × tb_num` at a timescale
        // of `tb_den` keeps timestamps exact for any rational time base.
        let mut collected: Vec<(i64, bool, Vec<u8>, i64)> = Vec::new();
        for (stream, packet) in ictx.packets().flatten() {
            if stream.index() != video_idx {
                continue;
            }
            let Some(pts) = packet.pts().or(packet.dts()) else { continue };
            let data = packet.data().map(|d| d.to_vec()).unwrap_or_default();
            collected.push((
                pts * tb_num as i64,
                packet.is_key(),
                data,
                packet.duration() * tb_num as i64,
            ));
        }
        if collected.is_empty() {
            return Err(demux_err("no video samples"));
        }
        // Decode order is not presentation order when B-frames exist; the
        // sample table is sorted by cts.
        collected.sort_by_key(|(cts, ..)| *cts);

        let samples: Vec<Sample> = collected
            .into_iter()
            .map(|(cts, is_sync, data, duration)| Sample {
                cts,
                timescale: tb_den as u32,
                duration: duration.max(0) as u32,
                is_sync,
                data: Arc::from(data.into_boxed_slice()),
            })
            .collect();
        let keyframes: Vec<usize> = samples
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_sync)
            .map(|(i, _)| i)
            .collect();
        let duration_us = if duration_us > 0 {
            duration_us
        } else {
            samples.last().map(|s| s.time_us() + s.duration_us()).unwrap_or(0)
        };

        debug!(source = %id, samples = samples.len(), keyframes = keyframes.len(), "demuxed");
        Ok(SourceMedia {
            id,
            width,
            height,
            codec,
            duration_us,
            has_audio,
            table: SampleTable::new(samples, keyframes).map_err(demux_err)?,
            container: Some(bytes),
        })
    }
}

// ── Decoder ───────────────────────────────────────────────────────────────────

pub struct FfmpegDecoder {
    decoder:  Option<ffmpeg::decoder::video::Video>,
    scaler:   Option<SwsContext>,
    ready:    std::collections::VecDeque<DecodedFrame>,
    sent:     usize,
    emitted:  usize,
}

impl FfmpegDecoder {
    pub fn new() -> Self {
        Self {
            decoder: None,
            scaler:  None,
            ready:   std::collections::VecDeque::new(),
            sent:    0,
            emitted: 0,
        }
    }

    fn ff_codec(codec_id: &str) -> Result<FfCodecId, CodecError> {
        let id = codec_id.to_ascii_lowercase();
        if id.starts_with("avc1") || id.starts_with("avc3") || id.starts_with("h264") {
            Ok(FfCodecId::H264)
        } else if id.starts_with("hvc1") || id.starts_with("hev1") || id.starts_with("h265") {
            Ok(FfCodecId::HEVC)
        } else if id.starts_with("vp08") {
            Ok(FfCodecId::VP8)
        } else if id.starts_with("vp09") {
            Ok(FfCodecId::VP9)
        } else if id.starts_with("av01") {
            Ok(FfCodecId::AV1)
        } else {
            Err(CodecError::UnsupportedCodec(codec_id.into()))
        }
    }

    /// Drain every frame libavcodec has ready into `self.ready` as RGBA.
    fn receive_all(&mut self) -> Result<(), CodecError> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(CodecError::NotConfigured);
        };
        let mut decoded = VideoFrame::empty();
        while decoder.receive_frame(&mut decoded).is_ok() {
            let pts = decoded.pts().unwrap_or(0);
            let scaler = match self.scaler.as_mut() {
                Some(s) => s,
                None => {
                    let s = SwsContext::get(
                        decoder.format(),
                        decoder.width(),
                        decoder.height(),
                        Pixel::RGBA,
                        decoder.width(),
                        decoder.height(),
                        SwsFlags::BILINEAR,
                    )
                    .map_err(|e| CodecError::Decode(format!("scaler: {e}")))?;
                    self.scaler.insert(s)
                }
            };
            let mut rgba = VideoFrame::empty();
            scaler
                .run(&decoded, &mut rgba)
                .map_err(|e| CodecError::Decode(format!("scale: {e}")))?;

            // Destripe: copy only visible pixels, not stride padding.
            let (w, h) = (decoder.width(), decoder.height());
            let stride = rgba.stride(0);
            let raw = rgba.data(0);
            let row_bytes = w as usize * 4;
            let data: Vec<u8> = (0..h as usize)
                .flat_map(|row| &raw[row * stride..row * stride + row_bytes])
                .copied()
                .collect();

            self.ready.push_back(DecodedFrame::new(pts, w, h, data));
            self.emitted += 1;
        }
        Ok(())
    }
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoDecoder for FfmpegDecoder {
    fn configure(&mut self, config: &DecoderConfig) -> Result<(), CodecError> {
        let codec_id = Self::ff_codec(&config.codec.codec_id)?;
        let codec = ffmpeg::decoder::find(codec_id)
            .ok_or_else(|| CodecError::Configure(format!("no decoder for {codec_id:?}")))?;
        let mut ctx = codec::context::Context::new_with_codec(codec);

        // Hand the container's decoder configuration record (AVCC/HVCC/VPCC)
        // to libavcodec. No safe setter exists for extradata.
        let description = &config.codec.description;
        if !description.is_empty() {
            unsafe {
                let raw = ctx.as_mut_ptr();
                let size = description.len();
                let buf = ffmpeg::ffi::av_mallocz(
                    size + ffmpeg::ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize,
                ) as *mut u8;
                if buf.is_null() {
                    return Err(CodecError::Configure("extradata alloc failed".into()));
                }
                std::ptr::copy_nonoverlapping(description.as_ptr(), buf, size);
                (*raw).extradata = buf;
                (*raw).extradata_size = size as i32;
            }
        }

        let decoder = ctx
            .decoder()
            .video()
            .map_err(|e| CodecError::Configure(e.to_string()))?;
        self.decoder = Some(decoder);
        self.scaler = None;
        self.ready.clear();
        self.sent = 0;
        self.emitted = 0;
        Ok(())
    }

    fn is_configured(&self) -> bool {
        self.decoder.is_some()
    }

    fn decode(&mut self, chunk: EncodedChunk<'_>) -> Result<(), CodecError> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(CodecError::NotConfigured);
        };
        let mut packet = Packet::copy(chunk.data);
        packet.set_pts(Some(chunk.timestamp_us));
        packet.set_duration(chunk.duration_us);
        if chunk.kind == ChunkKind::Key {
            packet.set_flags(ffmpeg::packet::Flags::KEY);
        }
        decoder
            .send_packet(&packet)
            .map_err(|e| CodecError::Decode(e.to_string()))?;
        self.sent += 1;
        self.receive_all()
    }

    fn poll(&mut self) -> Option<DecodedFrame> {
        self.ready.pop_front()
    }

    fn flush(&mut self) -> Result<Vec<DecodedFrame>, CodecError> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(CodecError::NotConfigured);
        };
        decoder
            .send_eof()
            .map_err(|e| CodecError::Flush(e.to_string()))?;
        self.receive_all()?;
        // Re-arm for the next (key-first) feed.
        if let Some(decoder) = self.decoder.as_mut() {
            unsafe {
                ffmpeg::ffi::avcodec_flush_buffers(decoder.as_mut_ptr());
            }
        }
        self.sent = 0;
        self.emitted = 0;
        Ok(self.ready.drain(..).collect())
    }

    fn in_flight(&self) -> usize {
        self.sent.saturating_sub(self.emitted)
    }

    fn reset(&mut self) {
        if let Some(decoder) = self.decoder.as_mut() {
            unsafe {
                ffmpeg::ffi::avcodec_flush_buffers(decoder.as_mut_ptr());
            }
        }
        self.ready.clear();
        self.sent = 0;
        self.emitted = 0;
    }
}

// ── Export sink ───────────────────────────────────────────────────────────────

struct VideoLane {
    encoder:   ffmpeg::encoder::video::Video,
    scaler:    Option<SwsContext>,
    frame_idx: i64,
    frame_tb:  Rational,
}

struct AudioLane {
    encoder:    ffmpeg::encoder::Audio,
    frame_size: usize,
    audio_tb:   Rational,
}

pub struct FfmpegExportSink {
    octx:      Option<ffmpeg::format::context::Output>,
    path:      Option<PathBuf>,
    temp:      Option<tempfile::NamedTempFile>,
    video:     Option<VideoLane>,
    audio:     Option<AudioLane>,
    plan:      AudioPlan,
    settings:  Option<ExportSettings>,
    discarded: bool,
}

impl FfmpegExportSink {
    pub fn new() -> Self {
        Self {
            octx:      None,
            path:      None,
            temp:      None,
            video:     None,
            audio:     None,
            plan:      AudioPlan::default(),
            settings:  None,
            discarded: false,
        }
    }
}

impl Default for FfmpegExportSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportSink for FfmpegExportSink {
    fn configure(&mut self, settings: &ExportSettings, audio: &AudioPlan) -> Result<(), CodecError> {
        let temp = tempfile::Builder::new()
            .prefix("framecut-export-")
            .suffix(".mp4")
            .tempfile()
            .map_err(encode_err)?;
        let path = temp.path().to_path_buf();
        let mut octx = open_output(&path).map_err(encode_err)?;

        // ── Video stream 0 ────────────────────────────────────────────────────
        let out_tb = Rational::new(1, settings.frame_rate as i32);
        let h264 = encoder::find(FfCodecId::H264)
            .ok_or_else(|| CodecError::Configure("H.264 encoder not found".into()))?;
        let mut ost_video = octx.add_stream(h264).map_err(encode_err)?;
        ost_video.set_time_base(out_tb);

        let video_ctx = codec::context::Context::new_with_codec(h264);
        let mut video_enc = video_ctx.encoder().video().map_err(encode_err)?;
        video_enc.set_width(settings.width);
        video_enc.set_height(settings.height);
        video_enc.set_format(Pixel::YUV420P);
        video_enc.set_time_base(out_tb);
        video_enc.set_frame_rate(Some(Rational::new(settings.frame_rate as i32, 1)));
        video_enc.set_bit_rate(settings.video_bitrate as usize);

        let mut opts = ffmpeg::Dictionary::new();
        opts.set("preset", "fast");
        let mut video_encoder = video_enc.open_as_with(h264, opts).map_err(encode_err)?;
        // libavcodec resets SAR during open; force square pixels after.
        video_encoder.set_aspect_ratio(Rational::new(1, 1));

        unsafe {
            let ret = ffmpeg::ffi::avcodec_parameters_from_context(
                (**(*octx.as_mut_ptr()).streams.add(0)).codecpar,
                video_encoder.as_ptr() as *mut ffmpeg::ffi::AVCodecContext,
            );
            if ret < 0 {
                return Err(encode_err(format!(
                    "avcodec_parameters_from_context (video): {ret}"
                )));
            }
        }

        // ── Audio stream 1 (only when the plan has spans) ─────────────────────
        let audio_lane = if audio.is_empty() {
            None
        } else {
            let audio_tb = Rational::new(1, AUDIO_RATE);
            let aac = encoder::find(FfCodecId::AAC)
                .ok_or_else(|| CodecError::Configure("AAC encoder not found".into()))?;
            let mut ost_audio = octx.add_stream(aac).map_err(encode_err)?;
            ost_audio.set_time_base(audio_tb);

            let audio_ctx = codec::context::Context::new_with_codec(aac);
            let mut audio_enc = audio_ctx.encoder().audio().map_err(encode_err)?;
            audio_enc.set_rate(AUDIO_RATE);
            audio_enc.set_ch_layout(ChannelLayout::STEREO);
            audio_enc.set_format(SampleFormat::F32(SampleType::Planar));
            audio_enc.set_bit_rate(settings.audio_bitrate as usize);

            let audio_encoder = audio_enc
                .open_as_with(aac, ffmpeg::Dictionary::new())
                .map_err(encode_err)?;
            let frame_size = (audio_encoder.frame_size() as usize).max(1024);

            unsafe {
                let ret = ffmpeg::ffi::avcodec_parameters_from_context(
                    (**(*octx.as_mut_ptr()).streams.add(1)).codecpar,
                    audio_encoder.as_ptr() as *mut ffmpeg::ffi::AVCodecContext,
                );
                if ret < 0 {
                    return Err(encode_err(format!(
                        "avcodec_parameters_from_context (audio): {ret}"
                    )));
                }
            }
            Some(AudioLane { encoder: audio_encoder, frame_size, audio_tb })
        };

        octx.write_header().map_err(encode_err)?;

        self.video = Some(VideoLane {
            encoder:   video_encoder,
            scaler:    None,
            frame_idx: 0,
            frame_tb:  out_tb,
        });
        self.audio = audio_lane;
        self.plan = audio.clone();
        self.settings = Some(*settings);
        self.octx = Some(octx);
        self.path = Some(path);
        self.temp = Some(temp);
        self.discarded = false;
        Ok(())
    }

    fn write_video(
        &mut self,
        width: u32,
        height: u32,
        rgba: &[u8],
        _timestamp_us: i64,
    ) -> Result<(), CodecError> {
        let (Some(octx), Some(lane)) = (self.octx.as_mut(), self.video.as_mut()) else {
            return Err(CodecError::NotConfigured);
        };
        let settings = self.settings.as_ref().ok_or(CodecError::NotConfigured)?;

        let scaler = match lane.scaler.as_mut() {
            Some(s) => s,
            None => {
                let s = SwsContext::get(
                    Pixel::RGBA,
                    width,
                    height,
                    Pixel::YUV420P,
                    settings.width,
                    settings.height,
                    SwsFlags::BILINEAR,
                )
                .map_err(encode_err)?;
                lane.scaler.insert(s)
            }
        };

        let mut src = VideoFrame::new(Pixel::RGBA, width, height);
        {
            let stride = src.stride(0);
            let row_bytes = width as usize * 4;
            let dst = src.data_mut(0);
            for row in 0..height as usize {
                dst[row * stride..row * stride + row_bytes]
                    .copy_from_slice(&rgba[row * row_bytes..(row + 1) * row_bytes]);
            }
        }

        let mut yuv = VideoFrame::empty();
        scaler.run(&src, &mut yuv).map_err(encode_err)?;
        yuv.set_pts(Some(lane.frame_idx));
        unsafe {
            (*yuv.as_mut_ptr()).sample_aspect_ratio = ffmpeg::ffi::AVRational { num: 1, den: 1 };
        }

        lane.encoder.send_frame(&yuv).map_err(encode_err)?;
        let ost_tb = octx.stream(0).ok_or(CodecError::NotConfigured)?.time_base();
        let mut pkt = Packet::empty();
        while lane.encoder.receive_packet(&mut pkt).is_ok() {
            pkt.set_stream(0);
            pkt.rescale_ts(lane.frame_tb, ost_tb);
            pkt.write_interleaved(octx).map_err(encode_err)?;
        }
        lane.frame_idx += 1;
        Ok(())
    }

    fn finalize(&mut self) -> Result<Vec<u8>, CodecError> {
        if self.discarded {
            return Err(CodecError::Encode("sink was discarded".into()));
        }
        let mut octx = self.octx.take().ok_or(CodecError::NotConfigured)?;

        // ── Flush video ───────────────────────────────────────────────────────
        if let Some(mut lane) = self.video.take() {
            lane.encoder.send_eof().map_err(encode_err)?;
            let ost_tb = octx.stream(0).ok_or(CodecError::NotConfigured)?.time_base();
            let mut pkt = Packet::empty();
            while lane.encoder.receive_packet(&mut pkt).is_ok() {
                pkt.set_stream(0);
                pkt.rescale_ts(lane.frame_tb, ost_tb);
                pkt.write_interleaved(&mut octx).map_err(encode_err)?;
            }
        }

        // ── Mix and encode audio ──────────────────────────────────────────────
        if let Some(mut lane) = self.audio.take() {
            let plan = std::mem::take(&mut self.plan);
            let (left, right) = mix_plan(&plan).map_err(encode_err)?;
            write_audio(&mut octx, &mut lane, &left, &right).map_err(encode_err)?;
        }

        octx.write_trailer().map_err(encode_err)?;
        drop(octx);

        let path = self.path.take().ok_or(CodecError::NotConfigured)?;
        let bytes = std::fs::read(&path).map_err(encode_err)?;
        self.temp = None;
        Ok(bytes)
    }

    fn discard(&mut self) {
        self.octx = None;
        self.video = None;
        self.audio = None;
        self.path = None;
        self.temp = None;
        self.discarded = true;
    }
}

// ── Audio mixing ──────────────────────────────────────────────────────────────

/// Decode every planned span, resample to stereo f32 @ 44.1 kHz, scale by the
/// clip volume, and sum into one pair of channel buffers positioned by the
/// span's output offset.
fn mix_plan(plan: &AudioPlan) -> Result<(Vec<f32>, Vec<f32>)> {
    let total_us = plan
        .segments
        .iter()
        .map(|s| s.output_start_us + s.duration_us)
        .max()
        .unwrap_or(0);
    let total_samples = (total_us * AUDIO_RATE as i64 / US_PER_SEC) as usize;
    let mut left = vec![0f32; total_samples];
    let mut right = vec![0f32; total_samples];

    for segment in &plan.segments {
        let file = spill_to_tempfile(&segment.container, ".mp4")?;
        let mut ictx = input(&file.path().to_path_buf())?;
        let audio_idx = match ictx.streams().best(MediaType::Audio) {
            Some(s) => s.index(),
            None => continue,
        };
        let in_tb = ictx
            .stream(audio_idx)
            .ok_or_else(|| anyhow!("audio stream gone"))?
            .time_base();

        let dec_ctx = codec::context::Context::from_parameters(
            ictx.stream(audio_idx)
                .ok_or_else(|| anyhow!("audio stream gone"))?
                .parameters(),
        )?;
        let mut decoder = dec_ctx.decoder().audio()?;

        // Land on the keyframe before the span; pre-roll is skipped by PTS.
        if segment.source_start_us > 0 {
            let seek_ts = segment.source_start_us;
            if let Err(e) = ictx.seek(seek_ts, ..=seek_ts) {
                warn!("audio seek soft-fail: {e}");
            }
        }

        let mut resampler: Option<resampling::Context> = None;
        let span_end_us = segment.source_start_us + segment.duration_us;
        let base_out = (segment.output_start_us * AUDIO_RATE as i64 / US_PER_SEC) as usize;
        let target_fmt = SampleFormat::F32(SampleType::Planar);

        'packets: for (stream, packet) in ictx.packets().flatten() {
            if stream.index() != audio_idx {
                continue;
            }
            if decoder.send_packet(&packet).is_err() {
                continue;
            }
            let mut raw = AudioFrame::empty();
            while decoder.receive_frame(&mut raw).is_ok() {
                let pts_us = raw
                    .pts()
                    .map(|pts| pts * in_tb.numerator() as i64 * US_PER_SEC
                        / in_tb.denominator() as i64)
                    .unwrap_or(0);
                if pts_us + US_PER_SEC / 10 < segment.source_start_us {
                    continue;
                }
                if pts_us >= span_end_us {
                    break 'packets;
                }

                let needs_resample = raw.format() != target_fmt
                    || raw.rate() != AUDIO_RATE as u32
                    || raw.ch_layout().channels() != 2;
                let frame = if needs_resample {
                    let rs = match resampler.as_mut() {
                        Some(rs) => rs,
                        None => {
                            let src_layout = if raw.ch_layout().channels() >= 2 {
                                raw.ch_layout()
                            } else {
                                ChannelLayout::MONO
                            };
                            let rs = resampling::Context::get2(
                                raw.format(),
                                src_layout,
                                raw.rate(),
                                target_fmt,
                                ChannelLayout::STEREO,
                                AUDIO_RATE as u32,
                            )?;
                            resampler.insert(rs)
                        }
                    };
                    let mut resampled = AudioFrame::empty();
                    if rs.run(&raw, &mut resampled).is_err() || resampled.samples() == 0 {
                        continue;
                    }
                    resampled
                } else {
                    raw.clone()
                };

                let n = frame.samples();
                let offset_us = (pts_us - segment.source_start_us).max(0);
                let out_pos = base_out + (offset_us * AUDIO_RATE as i64 / US_PER_SEC) as usize;
                unsafe {
                    let l = std::slice::from_raw_parts(
                        frame.data(0).as_ptr() as *const f32,
                        n,
                    );
                    let r_plane = if frame.ch_layout().channels() >= 2 {
                        frame.data(1)
                    } else {
                        frame.data(0)
                    };
                    let r = std::slice::from_raw_parts(r_plane.as_ptr() as *const f32, n);
                    for i in 0..n {
                        let at = out_pos + i;
                        if at >= left.len() {
                            break;
                        }
                        left[at] += l[i] * segment.volume;
                        right[at] += r[i] * segment.volume;
                    }
                }
            }
        }
    }
    Ok((left, right))
}

/// Chunk the mixed PCM into encoder-sized planar frames; the tail is
/// zero-padded so the AAC encoder always sees a full frame.
fn write_audio(
    octx: &mut ffmpeg::format::context::Output,
    lane: &mut AudioLane,
    left: &[f32],
    right: &[f32],
) -> Result<()> {
    let ost_tb = octx
        .stream(1)
        .ok_or_else(|| anyhow!("audio stream missing"))?
        .time_base();
    let audio_tb = lane.audio_tb;
    let n = lane.frame_size;
    let mut sample_idx: i64 = 0;

    let write_packets = |encoder: &mut ffmpeg::encoder::Audio,
                         octx: &mut ffmpeg::format::context::Output|
     -> Result<()> {
        let mut pkt = Packet::empty();
        while encoder.receive_packet(&mut pkt).is_ok() {
            pkt.set_stream(1);
            pkt.rescale_ts(audio_tb, ost_tb);
            pkt.write_interleaved(octx)
                .map_err(|e| anyhow!("write audio packet: {e}"))?;
        }
        Ok(())
    };

    for chunk_start in (0..left.len().max(1)).step_by(n) {
        let available = left.len().saturating_sub(chunk_start).min(n);
        if available == 0 {
            break;
        }
        let mut frame = AudioFrame::new(
            SampleFormat::F32(SampleType::Planar),
            n,
            ChannelLayoutMask::STEREO,
        );
        frame.set_rate(AUDIO_RATE as u32);
        frame.set_pts(Some(sample_idx));
        unsafe {
            let l = std::slice::from_raw_parts_mut(
                frame.data_mut(0).as_mut_ptr() as *mut f32,
                n,
            );
            l[..available].copy_from_slice(&left[chunk_start..chunk_start + available]);
            l[available..].fill(0.0);
            let r = std::slice::from_raw_parts_mut(
                frame.data_mut(1).as_mut_ptr() as *mut f32,
                n,
            );
            r[..available].copy_from_slice(&right[chunk_start..chunk_start + available]);
            r[available..].fill(0.0);
        }
        lane.encoder
            .send_frame(&frame)
            .map_err(|e| anyhow!("send audio frame: {e}"))?;
        write_packets(&mut lane.encoder, octx)?;
        sample_idx += n as i64;
    }

    lane.encoder
        .send_eof()
        .map_err(|e| anyhow!("audio EOF: {e}"))?;
    write_packets(&mut lane.encoder, octx)?;
    Ok(())
}
