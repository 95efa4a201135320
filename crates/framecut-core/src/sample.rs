// crates/framecut-core/src/sample.rs
//
// Container samples and the per-source sample table.
//
// A SampleTable is filled once by the demuxer collaborator and read-only
// afterwards — playback, sprite, and export pipelines all borrow the same
// Arc<SourceMedia> and never mutate it. Sample payloads are Arc<[u8]> so a
// chunk handed to a decoder never copies the encoded bytes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::helpers::time::ticks_to_us;

// ── Sample ────────────────────────────────────────────────────────────────────

/// One encoded chunk from the container.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    /// Composition timestamp in `timescale` ticks.
    pub cts:       i64,
    /// Ticks per second for this sample's timestamps.
    pub timescale: u32,
    /// Presentation duration in ticks.
    pub duration:  u32,
    /// True for sync (key) samples — decodable without predecessors.
    pub is_sync:   bool,
    /// Encoded payload. Shared, never copied per decode.
    pub data:      Arc<[u8]>,
}

impl Sample {
    /// Presentation time in microseconds.
    #[inline]
    pub fn time_us(&self) -> i64 {
        ticks_to_us(self.cts, self.timescale)
    }

    /// Presentation duration in microseconds.
    #[inline]
    pub fn duration_us(&self) -> i64 {
        ticks_to_us(self.duration as i64, self.timescale)
    }
}

/// Codec identity as reported by the container.
///
/// `description` is the raw decoder configuration record (AVCC / HVCC / VPCC)
/// handed verbatim to the decoder backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecInfo {
    pub codec_id:    String,
    pub description: Vec<u8>,
}

// ── Sample table ──────────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SampleTableError {
    #[error("samples not sorted by cts at index {0}")]
    Unsorted(usize),

    #[error("keyframe index not monotonic at entry {0}")]
    KeyframeIndexNotMonotonic(usize),

    #[error("keyframe index entry {entry} out of range ({len} samples)")]
    KeyframeOutOfRange { entry: usize, len: usize },
}

/// Samples of one source plus its sorted keyframe index.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleTable {
    samples:   Vec<Sample>,
    /// Indices into `samples` where `is_sync` was reported true. Monotonic.
    keyframes: Vec<usize>,
}

impl SampleTable {
    /// Build a table, validating ordering invariants up front so every later
    /// binary search can assume them.
    pub fn new(samples: Vec<Sample>, keyframes: Vec<usize>) -> Result<Self, SampleTableError> {
        for i in 1..samples.len() {
            if samples[i].time_us() < samples[i - 1].time_us() {
                return Err(SampleTableError::Unsorted(i));
            }
        }
        for (i, &k) in keyframes.iter().enumerate() {
            if k >= samples.len() {
                return Err(SampleTableError::KeyframeOutOfRange { entry: k, len: samples.len() });
            }
            if i > 0 && k <= keyframes[i - 1] {
                return Err(SampleTableError::KeyframeIndexNotMonotonic(i));
            }
        }
        Ok(Self { samples, keyframes })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&Sample> {
        self.samples.get(index)
    }

    #[inline]
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// A source with no keyframes cannot be seeked, only played from 0.
    #[inline]
    pub fn is_seekable(&self) -> bool {
        !self.keyframes.is_empty()
    }

    /// Index of the first sample whose presentation time is ≥ `us`.
    ///
    /// Returns `None` past the end of the source.
    pub fn sample_at_or_after(&self, us: i64) -> Option<usize> {
        let idx = self.samples.partition_point(|s| s.time_us() < us);
        (idx < self.samples.len()).then_some(idx)
    }

    /// Index of the last sample whose presentation time is ≤ `us`.
    pub fn sample_at_or_before(&self, us: i64) -> Option<usize> {
        let idx = self.samples.partition_point(|s| s.time_us() <= us);
        idx.checked_sub(1)
    }

    /// Raw keyframe lookup: the greatest keyframe index ≤ `target`, or the
    /// first keyframe when `target` precedes all of them.
    ///
    /// Binary search over the monotonic index — no sync validation here.
    pub fn keyframe_before(&self, target: usize) -> Option<usize> {
        if self.keyframes.is_empty() {
            return None;
        }
        let pos = self.keyframes.partition_point(|&k| k <= target);
        match pos.checked_sub(1) {
            Some(p) => Some(self.keyframes[p]),
            None    => Some(self.keyframes[0]),
        }
    }

    /// Validated keyframe lookup, the form every decode path uses.
    ///
    /// The result of [`keyframe_before`] is checked against the sample's
    /// actual `is_sync` flag. A mismatch means the index is corrupt; the
    /// first keyframe is tried as a fallback. `None` means no sync sample is
    /// reachable — callers must abort rather than feed a non-sync chunk
    /// after a flush.
    pub fn validated_keyframe_before(&self, target: usize) -> Option<usize> {
        let candidate = self.keyframe_before(target)?;
        if self.samples.get(candidate).is_some_and(|s| s.is_sync) {
            return Some(candidate);
        }
        let first = self.keyframes[0];
        if first != candidate && self.samples.get(first).is_some_and(|s| s.is_sync) {
            return Some(first);
        }
        None
    }

    /// Presentation time of the last sample plus its duration.
    pub fn end_us(&self) -> i64 {
        self.samples
            .last()
            .map(|s| s.time_us() + s.duration_us())
            .unwrap_or(0)
    }
}

// ── Source media ──────────────────────────────────────────────────────────────

/// Everything the engine knows about one loaded source. Immutable after load.
#[derive(Clone, Debug)]
pub struct SourceMedia {
    pub id:          Uuid,
    pub width:       u32,
    pub height:      u32,
    pub codec:       CodecInfo,
    pub duration_us: i64,
    pub has_audio:   bool,
    pub table:       SampleTable,
    /// Original container bytes, kept for export-time audio demuxing.
    /// `None` when the host transferred samples only.
    pub container:   Option<Arc<[u8]>>,
}

/// All loaded sources, keyed by id. The engine wraps this in a lock; the
/// per-source `Arc<SourceMedia>` handed out is immutable so pipelines hold it
/// across long operations without blocking loads.
#[derive(Debug, Default)]
pub struct SampleStore {
    sources: std::collections::HashMap<Uuid, Arc<SourceMedia>>,
}

impl SampleStore {
    pub fn insert(&mut self, media: SourceMedia) -> Arc<SourceMedia> {
        let arc = Arc::new(media);
        self.sources.insert(arc.id, Arc::clone(&arc));
        arc
    }

    pub fn remove(&mut self, id: Uuid) -> Option<Arc<SourceMedia>> {
        self.sources.remove(&id)
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<SourceMedia>> {
        self.sources.get(&id).cloned()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.sources.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
