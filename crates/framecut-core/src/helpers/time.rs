// crates/framecut-core/src/helpers/time.rs
//
// Integer-microsecond time math shared by every crate in the workspace.
//
// All engine-facing timestamps are i64 microseconds. Floating point appears
// only at the formatting boundary — positions, trims, and frame numbers are
// exact integers so frame-accurate comparisons never drift.

/// Microseconds per second. The single authoritative constant.
pub const US_PER_SEC: i64 = 1_000_000;

/// Convert seconds to microseconds, rounding to the nearest integer.
///
/// ```
/// use framecut_core::helpers::time::secs_to_us;
/// assert_eq!(secs_to_us(1.5), 1_500_000);
/// assert_eq!(secs_to_us(0.0), 0);
/// ```
#[inline]
pub fn secs_to_us(secs: f64) -> i64 {
    (secs * US_PER_SEC as f64).round() as i64
}

/// Convert microseconds to seconds.
///
/// ```
/// use framecut_core::helpers::time::us_to_secs;
/// assert!((us_to_secs(1_500_000) - 1.5).abs() < 1e-9);
/// ```
#[inline]
pub fn us_to_secs(us: i64) -> f64 {
    us as f64 / US_PER_SEC as f64
}

/// Frame number containing the instant `us` at `fps` frames per second.
///
/// `frame = ⌊µs × fps / 1_000_000⌋` — the widening to i128 keeps the product
/// exact for any timestamp a container can express.
///
/// ```
/// use framecut_core::helpers::time::us_to_frame;
/// assert_eq!(us_to_frame(0, 30),      0);
/// assert_eq!(us_to_frame(33_333, 30), 0);  // still inside frame 0
/// assert_eq!(us_to_frame(33_334, 30), 1);
/// ```
#[inline]
pub fn us_to_frame(us: i64, fps: u32) -> i64 {
    (us as i128 * fps as i128 / US_PER_SEC as i128) as i64
}

/// Timestamp of the start of `frame` at `fps` frames per second.
///
/// ```
/// use framecut_core::helpers::time::frame_to_us;
/// assert_eq!(frame_to_us(30, 30), 1_000_000);
/// ```
#[inline]
pub fn frame_to_us(frame: i64, fps: u32) -> i64 {
    (frame as i128 * US_PER_SEC as i128 / fps as i128) as i64
}

/// Duration of one output frame at `fps`, in microseconds (truncating).
///
/// 30 fps → 33_333 µs. The truncation matches the export walk, which steps
/// by this value and re-derives frame numbers with [`us_to_frame`].
#[inline]
pub fn frame_duration_us(fps: u32) -> i64 {
    US_PER_SEC / fps as i64
}

/// Convert a container timestamp in `timescale` ticks to microseconds.
///
/// `µs = cts × 1_000_000 / timescale`. i128 intermediate — a 90 kHz cts on a
/// multi-hour file overflows i64 when multiplied by 1e6.
///
/// ```
/// use framecut_core::helpers::time::ticks_to_us;
/// assert_eq!(ticks_to_us(90_000, 90_000), 1_000_000);
/// assert_eq!(ticks_to_us(3_003, 30_000),  100_100);
/// ```
#[inline]
pub fn ticks_to_us(ticks: i64, timescale: u32) -> i64 {
    (ticks as i128 * US_PER_SEC as i128 / timescale as i128) as i64
}

/// Format a microsecond position as `MM:SS:FF` (frames at the given fps).
///
/// Used on timeline rulers where frame-level precision matters.
///
/// ```
/// use framecut_core::helpers::time::format_timecode;
/// assert_eq!(format_timecode(0, 30),          "00:00:00");
/// assert_eq!(format_timecode(61_500_000, 30), "01:01:15");
/// ```
pub fn format_timecode(us: i64, fps: u32) -> String {
    let total_secs = us / US_PER_SEC;
    let m  = total_secs / 60;
    let s  = total_secs % 60;
    let ff = us_to_frame(us % US_PER_SEC, fps);
    format!("{m:02}:{s:02}:{ff:02}")
}

/// Format a microsecond duration as a compact human-readable string.
///
/// | Range    | Format    | Example   |
/// |----------|-----------|-----------|
/// | ≥ 1 hour | `H:MM:SS` | `1:04:35` |
/// | ≥ 1 min  | `M:SS`    | `3:07`    |
/// | < 1 min  | `S.Xs`    | `4.2s`    |
pub fn format_duration(us: i64) -> String {
    let secs = us_to_secs(us);
    if secs >= 3600.0 {
        format!(
            "{}:{:02}:{:02}",
            secs as u64 / 3600,
            (secs as u64 % 3600) / 60,
            secs as u64 % 60,
        )
    } else if secs >= 60.0 {
        format!("{}:{:02}", secs as u64 / 60, secs as u64 % 60)
    } else {
        format!("{secs:.1}s")
    }
}
