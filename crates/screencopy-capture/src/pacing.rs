//! Frame pacing for the capture thread.

use std::time::Duration;

/// Fraction of the remaining interval actually slept, as `(num, den)`. The
/// rest absorbs scheduler wake-up latency.
pub const SLEEP_FRACTION: (u32, u32) = (9, 10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    Sleep(Duration),
    /// The cycle took at least one full interval.
    Overrun(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePacer {
    interval: Duration,
}

impl FramePacer {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn pace(&self, elapsed: Duration) -> Pacing {
        if elapsed >= self.interval {
            return Pacing::Overrun(elapsed);
        }
        let (num, den) = SLEEP_FRACTION;
        Pacing::Sleep((self.interval - elapsed) * num / den)
    }
}
