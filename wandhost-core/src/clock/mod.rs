//! Fixed-step simulation clock.
//!
//! Display refreshes arrive at whatever rate the frontend manages; the guest must be stepped at
//! exactly [`SIM_STEPS_PER_SECOND`]. [`FixedStepClock::advance`] turns each wall-clock delta into
//! a whole number of steps and carries the remainder.
//!
//! The accumulator is an integer in units of `nanoseconds * steps_per_second`, so one step is
//! exactly `1e9` units and no rounding error builds up over time.

use crate::abi::SIM_STEPS_PER_SECOND;
use std::time::{Duration, Instant};

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Default clamp on a single frame delta, in seconds.
pub const DEFAULT_MAX_FRAME_DELTA_SECS: f64 = 1.0 / 30.0;

/// A source of monotonic timestamps, expressed as time since an arbitrary origin.
pub trait TimeSource {
    fn now(&mut self) -> Duration;
}

/// Wall clock backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemClock {
    fn now(&mut self) -> Duration {
        self.origin.elapsed()
    }
}

/// Advances by exactly `1/fps` per call. Used where the frontend paces frames itself.
#[derive(Debug, Clone, Copy)]
pub struct FixedRateClock {
    fps: u32,
    frames: u64,
}

impl FixedRateClock {
    pub fn new(fps: u32) -> Self {
        Self {
            fps: fps.max(1),
            frames: 0,
        }
    }
}

impl TimeSource for FixedRateClock {
    fn now(&mut self) -> Duration {
        let nanos = u128::from(self.frames) * NANOS_PER_SEC / u128::from(self.fps);
        self.frames += 1;
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

#[derive(Debug, Clone)]
pub struct FixedStepClock {
    last: Option<Duration>,
    accumulator: u128,
    steps_per_second: u32,
    /// Clamp on one frame's delta, in accumulator units.
    max_units: u128,
}

impl FixedStepClock {
    pub fn new(max_delta_secs: f64) -> Self {
        Self::with_rate(SIM_STEPS_PER_SECOND, max_delta_secs)
    }

    pub fn with_rate(steps_per_second: u32, max_delta_secs: f64) -> Self {
        let steps_per_second = steps_per_second.max(1);
        // 1/30 s at 480 Hz is exactly 16e9; rounding keeps it from becoming 16.00000032 steps.
        let max_units = (max_delta_secs * f64::from(steps_per_second) * NANOS_PER_SEC as f64)
            .round()
            .max(0.0) as u128;
        Self {
            last: None,
            accumulator: 0,
            steps_per_second,
            max_units,
        }
    }

    pub fn step_duration(&self) -> Duration {
        Duration::from_nanos((NANOS_PER_SEC / u128::from(self.steps_per_second)) as u64)
    }

    /// Time carried over to the next frame.
    pub fn carried(&self) -> Duration {
        let nanos = self.accumulator / u128::from(self.steps_per_second);
        Duration::from_nanos(nanos as u64)
    }

    /// Number of steps to run for the frame at `now`.
    ///
    /// The first call only records the timestamp. Deltas are clamped to the configured maximum
    /// and a timestamp earlier than the last one counts as zero. The carried remainder is below
    /// one step, so a clamped frame never runs more than `floor(max)` steps.
    pub fn advance(&mut self, now: Duration) -> u32 {
        let Some(last) = self.last.replace(now) else {
            return 0;
        };
        let units = (now.saturating_sub(last).as_nanos() * u128::from(self.steps_per_second))
            .min(self.max_units);
        self.accumulate(units)
    }

    /// Accumulate `delta` directly, bypassing timestamps and the clamp.
    pub fn advance_by(&mut self, delta: Duration) -> u32 {
        self.accumulate(delta.as_nanos() * u128::from(self.steps_per_second))
    }

    fn accumulate(&mut self, units: u128) -> u32 {
        self.accumulator += units;
        let steps = self.accumulator / NANOS_PER_SEC;
        self.accumulator %= NANOS_PER_SEC;
        log::trace!("clock: {units} units -> {steps} steps");
        u32::try_from(steps).unwrap_or(u32::MAX)
    }

    /// Forget the last timestamp and the carried remainder.
    pub fn reset(&mut self) {
        self.last = None;
        self.accumulator = 0;
    }
}

impl Default for FixedStepClock {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_DELTA_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME_60HZ: Duration = Duration::from_nanos(16_666_667);

    #[test]
    fn first_advance_only_primes() {
        let mut clock = FixedStepClock::default();
        assert_eq!(clock.advance(Duration::from_secs(5)), 0);
        assert_eq!(clock.carried(), Duration::ZERO);
    }

    #[test]
    fn eight_frames_at_60hz_make_64_steps() {
        let mut clock = FixedStepClock::default();
        let mut now = Duration::ZERO;
        clock.advance(now);

        let mut total = 0;
        for _ in 0..8 {
            now += FRAME_60HZ;
            let steps = clock.advance(now);
            assert!(steps <= 16);
            assert_eq!(steps, 8);
            total += steps;
        }
        assert_eq!(total, 64);
    }

    #[test]
    fn long_stall_is_clamped() {
        let mut clock = FixedStepClock::default();
        clock.advance(Duration::ZERO);
        // A 2 s hitch is worth at most 1/30 s of simulation.
        assert_eq!(clock.advance(Duration::from_secs(2)), 16);
    }

    #[test]
    fn stall_after_carried_remainder_stays_at_sixteen() {
        let mut clock = FixedStepClock::default();
        clock.advance(Duration::ZERO);
        // Just short of one step.
        let almost = Duration::from_nanos(2_083_333);
        assert_eq!(clock.advance(almost), 0);
        assert_eq!(clock.advance(almost + Duration::from_secs(2)), 16);
        assert_eq!(clock.carried(), almost);
    }

    #[test]
    fn clamp_follows_the_configured_seconds() {
        let mut clock = FixedStepClock::new(0.05);
        clock.advance(Duration::ZERO);
        assert_eq!(clock.advance(Duration::from_secs(1)), 24);
        assert_eq!(clock.carried(), Duration::ZERO);
    }

    #[test]
    fn small_deltas_carry_over() {
        let mut clock = FixedStepClock::default();
        clock.advance(Duration::ZERO);
        assert_eq!(clock.advance(Duration::from_millis(1)), 0);
        assert_eq!(clock.carried(), Duration::from_millis(1));
        assert_eq!(clock.advance(Duration::from_millis(2)), 0);
        // 3 ms total crosses one 2.083 ms step.
        assert_eq!(clock.advance(Duration::from_millis(3)), 1);
    }

    #[test]
    fn time_going_backwards_counts_as_zero() {
        let mut clock = FixedStepClock::default();
        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.advance(Duration::from_millis(500)), 0);
        assert_eq!(clock.advance(Duration::from_millis(500) + FRAME_60HZ), 8);
    }

    #[test]
    fn fixed_rate_clock_spaces_frames_evenly() {
        let mut source = FixedRateClock::new(60);
        let mut clock = FixedStepClock::default();
        clock.advance(source.now());
        let total: u32 = (0..60).map(|_| clock.advance(source.now())).sum();
        assert_eq!(total, SIM_STEPS_PER_SECOND);
    }
}
