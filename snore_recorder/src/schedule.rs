//! Tick and clock abstractions driving the monitoring loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Period between two samples of a live session, about 60 Hz.
pub const FRAME_PERIOD: Duration = Duration::from_millis(16);

/// Source of ticks; each completed `tick` allows one sampling step.
#[allow(async_fn_in_trait)]
pub trait Ticker {
    async fn tick(&mut self);
}

impl Ticker for Interval {
    async fn tick(&mut self) {
        Interval::tick(self).await;
    }
}

/// Ticks as fast as the runtime allows, yielding in between.
#[derive(Debug, Default, Clone, Copy)]
pub struct Immediate;

impl Ticker for Immediate {
    async fn tick(&mut self) {
        tokio::task::yield_now().await;
    }
}

/// Interval ticking at [`FRAME_PERIOD`] that skips ticks it falls behind on.
pub fn frame_interval() -> Interval {
    let mut interval = tokio::time::interval(FRAME_PERIOD);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

/// Wall-clock time as seen by the monitor.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time at creation, advanced by a monotonic timer.
///
/// Later readings never go backwards, even if the system clock is stepped.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: DateTime<Utc>,
    started: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Utc::now(),
            started: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = i64::try_from(self.started.elapsed().as_micros()).unwrap_or(i64::MAX);
        self.origin + TimeDelta::microseconds(elapsed)
    }
}

/// Clock that follows the playback position of an audio stream.
///
/// The source advances the shared position as it consumes samples, so
/// timestamps reflect audio time regardless of how fast the audio is read.
#[derive(Debug, Clone)]
pub struct AudioClock {
    start: DateTime<Utc>,
    sample_rate: u32,
    position: Arc<AtomicU64>,
}

impl AudioClock {
    pub fn new(start: DateTime<Utc>, sample_rate: u32) -> Self {
        Self {
            start,
            sample_rate: sample_rate.max(1),
            position: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Marks `samples` more samples as consumed.
    pub fn advance(&self, samples: u64) {
        self.position.fetch_add(samples, Ordering::Relaxed);
    }

    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }
}

impl Clock for AudioClock {
    fn now(&self) -> DateTime<Utc> {
        let ms = self.position() * 1_000 / u64::from(self.sample_rate);
        self.start + TimeDelta::milliseconds(ms as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_audio_clock_follows_position() {
        let start = DateTime::from_timestamp(1_750_000_000, 0).unwrap();
        let clock = AudioClock::new(start, 48_000);
        let shared = clock.clone();

        assert_eq!(clock.now(), start);
        shared.advance(48_000);
        shared.advance(24_000);
        assert_eq!(clock.now(), start + TimeDelta::milliseconds(1_500));
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let first = clock.now();
        tokio::time::advance(Duration::from_millis(1_500)).await;
        let second = clock.now();

        assert_eq!(second - first, TimeDelta::milliseconds(1_500));
        assert!(clock.now() >= second);
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_frame_interval_period() {
        let mut interval = frame_interval();
        let begin = tokio::time::Instant::now();
        for _ in 0..11 {
            Ticker::tick(&mut interval).await;
        }
        // first tick completes immediately
        assert_eq!(begin.elapsed(), FRAME_PERIOD * 10);
    }
}
