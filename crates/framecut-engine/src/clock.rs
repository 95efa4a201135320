// crates/framecut-engine/src/clock.rs
//
// Monotonic wall-clock seam for the presentation loop. Production uses
// Instant; tests drive a manual clock so drift scenarios are deterministic.

use std::time::Instant;

pub trait Clock: Send {
    /// Microseconds since an arbitrary fixed origin. Monotonic.
    fn now_us(&self) -> i64;
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_us(&self) -> i64 {
        self.origin.elapsed().as_micros() as i64
    }
}
