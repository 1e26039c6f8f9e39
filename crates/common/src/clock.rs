//! Clock and pacing utilities.
//!
//! Every frame forwarded to the encoder is stamped with the time elapsed
//! since the session entered `Recording`. Audio tracks are not stamped;
//! their alignment with video comes from starting at roughly the same
//! instant and from never shortening a track while muted.

use std::time::{Duration, Instant};

/// A recording clock that provides monotonic timestamps relative to
/// a fixed epoch (the moment recording started).
#[derive(Debug, Clone)]
pub struct RecordingClock {
    /// The instant recording started.
    epoch: Instant,

    /// Wall-clock time at epoch (RFC 3339 string).
    epoch_wall: String,
}

impl RecordingClock {
    /// Create a new recording clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Time elapsed since recording start.
    pub fn elapsed(&self) -> Duration {
        self.epoch.elapsed()
    }

    /// Wall-clock time at recording start.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }
}

/// Fixed-rate pacer for producer threads.
///
/// Deadlines are computed from the start instant rather than from the
/// previous tick, so a late tick does not push every later one back.
#[derive(Debug)]
pub struct FramePacer {
    start: Instant,
    interval: Duration,
    ticks: u64,
}

impl FramePacer {
    /// Create a pacer targeting the given rate in Hz.
    pub fn new(rate_hz: u32) -> Self {
        Self {
            start: Instant::now(),
            interval: Duration::from_nanos(1_000_000_000 / rate_hz.max(1) as u64),
            ticks: 0,
        }
    }

    /// Interval between ticks.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Deadline of the next tick, advancing the tick counter.
    pub fn next_deadline(&mut self) -> Instant {
        self.ticks += 1;
        let nanos = self.interval.as_nanos().saturating_mul(u128::from(self.ticks));
        let offset = Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX));
        self.start.checked_add(offset).unwrap_or_else(Instant::now)
    }

    /// Block the calling thread until the next tick is due.
    pub fn wait_next(&mut self) {
        let deadline = self.next_deadline();
        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_elapsed() {
        let clock = RecordingClock::start();
        assert!(clock.elapsed() < Duration::from_secs(1));
        assert!(!clock.epoch_wall().is_empty());
    }

    #[test]
    fn test_pacer_interval() {
        let pacer = FramePacer::new(30);
        assert_eq!(pacer.interval(), Duration::from_nanos(33_333_333));
    }

    #[test]
    fn test_pacer_deadlines_are_anchored_to_start() {
        let mut pacer = FramePacer::new(100);
        let first = pacer.next_deadline();
        let second = pacer.next_deadline();
        assert_eq!(second - first, Duration::from_millis(10));
    }

    #[test]
    fn test_pacer_tick_count_beyond_u32() {
        let mut pacer = FramePacer::new(100);
        pacer.ticks = u64::from(u32::MAX);
        let deadline = pacer.next_deadline();
        assert!(deadline - pacer.start > Duration::from_millis(10) * u32::MAX);
    }

    #[test]
    fn test_pacer_zero_rate_does_not_panic() {
        let pacer = FramePacer::new(0);
        assert_eq!(pacer.interval(), Duration::from_secs(1));
    }
}
